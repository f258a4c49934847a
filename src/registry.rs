use crate::error::{Error, Result};
use crate::protocol::{Peer, Registration, Superstep, WorkerId};
use crate::state::WorkerStatus;

use std::collections::{BTreeMap, HashMap};

/// Identifies one accepted control connection on the master.
pub type ConnId = u64;

struct Entry {
    name: String,
    conn: ConnId,
    status: WorkerStatus,
    data_address: String,
    failed_at: Option<Superstep>,
}

/// Every worker known to the master, keyed by id.
///
/// Owned by the coordination thread; I/O threads never touch it.
pub struct WorkerRegistry {
    expected: u32,
    workers: BTreeMap<WorkerId, Entry>,
    by_conn: HashMap<ConnId, WorkerId>,
    window_open: bool,
}

impl WorkerRegistry {
    pub fn new(expected: u32) -> Self {
        WorkerRegistry {
            expected,
            workers: BTreeMap::new(),
            by_conn: HashMap::new(),
            window_open: true,
        }
    }

    pub fn expected(&self) -> u32 {
        self.expected
    }

    pub fn registered(&self) -> u32 {
        self.workers.len() as u32
    }

    pub fn is_full(&self) -> bool {
        self.registered() >= self.expected
    }

    pub fn is_window_open(&self) -> bool {
        self.window_open
    }

    pub fn close_window(&mut self) {
        self.window_open = false;
    }

    /// Assigns the hinted slot if it is free, the lowest free slot otherwise.
    pub fn register_worker(&mut self, conn: ConnId, candidate: &Registration) -> Result<WorkerId> {
        if !self.window_open || self.is_full() {
            return Err(Error::RegistrationWindowClosed);
        }
        if self.by_conn.contains_key(&conn) || self.workers.values().any(|e| e.name == candidate.name) {
            return Err(Error::DuplicateRegistration {
                name: candidate.name.clone(),
            });
        }

        let id = match candidate.partition_hint {
            Some(hint) if hint < self.expected && !self.workers.contains_key(&WorkerId(hint)) => {
                WorkerId(hint)
            }
            _ => (0..self.expected)
                .map(WorkerId)
                .find(|id| !self.workers.contains_key(id))
                .ok_or(Error::RegistrationWindowClosed)?,
        };

        let entry = Entry {
            name: candidate.name.clone(),
            conn,
            status: WorkerStatus::Ready,
            data_address: candidate.data_address.clone(),
            failed_at: None,
        };
        self.workers.insert(id, entry);
        self.by_conn.insert(conn, id);
        Ok(id)
    }

    /// Frees the slot of a worker that went away before the computation
    /// started. Returns the id it held.
    pub fn forget(&mut self, conn: ConnId) -> Option<WorkerId> {
        if !self.window_open {
            return None;
        }
        let id = self.by_conn.remove(&conn)?;
        self.workers.remove(&id);
        Some(id)
    }

    pub fn worker_of(&self, conn: ConnId) -> Option<WorkerId> {
        self.by_conn.get(&conn).copied()
    }

    pub fn conn_of(&self, id: WorkerId) -> Option<ConnId> {
        self.workers.get(&id).map(|e| e.conn)
    }

    pub fn name_of(&self, id: WorkerId) -> Option<&str> {
        self.workers.get(&id).map(|e| e.name.as_str())
    }

    pub fn status(&self, id: WorkerId) -> Option<WorkerStatus> {
        self.workers.get(&id).map(|e| e.status)
    }

    pub fn failed_at(&self, id: WorkerId) -> Option<Superstep> {
        self.workers.get(&id).and_then(|e| e.failed_at)
    }

    fn transition(&mut self, id: WorkerId, from: &[WorkerStatus], to: WorkerStatus) -> bool {
        match self.workers.get_mut(&id) {
            Some(entry) if from.contains(&entry.status) => {
                entry.status = to;
                true
            }
            _ => false,
        }
    }

    pub fn mark_computing(&mut self, id: WorkerId) -> bool {
        self.transition(id, &[WorkerStatus::Ready], WorkerStatus::Computing)
    }

    /// Returns a worker that reported the last superstep to the pool.
    pub fn mark_ready(&mut self, id: WorkerId) -> bool {
        self.transition(id, &[WorkerStatus::Reported], WorkerStatus::Ready)
    }

    pub fn mark_reported(&mut self, id: WorkerId) -> bool {
        self.transition(id, &[WorkerStatus::Computing], WorkerStatus::Reported)
    }

    fn mark_terminal(&mut self, id: WorkerId, superstep: Superstep, status: WorkerStatus) -> bool {
        match self.workers.get_mut(&id) {
            Some(entry) if !entry.status.is_terminal() => {
                entry.status = status;
                entry.failed_at = Some(superstep);
                true
            }
            _ => false,
        }
    }

    /// Returns false if the worker was already failed or disconnected, so a
    /// worker is only ever classified once.
    pub fn mark_failed(&mut self, id: WorkerId, superstep: Superstep) -> bool {
        self.mark_terminal(id, superstep, WorkerStatus::Failed)
    }

    pub fn mark_disconnected(&mut self, id: WorkerId, superstep: Superstep) -> bool {
        self.mark_terminal(id, superstep, WorkerStatus::Disconnected)
    }

    /// Workers that can take part in the next superstep.
    pub fn ready_ids(&self) -> Vec<WorkerId> {
        self.ids_where(|s| s == WorkerStatus::Ready)
    }

    pub fn reported_ids(&self) -> Vec<WorkerId> {
        self.ids_where(|s| s == WorkerStatus::Reported)
    }

    pub fn live_ids(&self) -> Vec<WorkerId> {
        self.ids_where(|s| !s.is_terminal())
    }

    pub fn failed_ids(&self) -> Vec<WorkerId> {
        self.ids_where(|s| s.is_terminal())
    }

    pub fn live_count(&self) -> u32 {
        self.live_ids().len() as u32
    }

    fn ids_where<F: Fn(WorkerStatus) -> bool>(&self, pred: F) -> Vec<WorkerId> {
        self.workers
            .iter()
            .filter(|(_, e)| pred(e.status))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Data addresses of every registered worker, in id order.
    pub fn peers(&self) -> Vec<Peer> {
        self.workers
            .iter()
            .map(|(id, e)| Peer {
                worker_id: *id,
                data_address: e.data_address.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, hint: Option<u32>) -> Registration {
        Registration {
            name: name.to_string(),
            partition_hint: hint,
            data_address: format!("{}:0", name),
        }
    }

    #[test]
    fn hints_are_honoured_when_free() {
        let mut registry = WorkerRegistry::new(3);
        assert_eq!(registry.register_worker(1, &candidate("a", Some(2))).unwrap(), WorkerId(2));
        assert_eq!(registry.register_worker(2, &candidate("b", Some(2))).unwrap(), WorkerId(0));
        assert_eq!(registry.register_worker(3, &candidate("c", Some(9))).unwrap(), WorkerId(1));
        assert!(registry.is_full());
        assert_eq!(registry.status(WorkerId(2)), Some(WorkerStatus::Ready));
    }

    #[test]
    fn duplicate_name_or_connection_is_rejected() {
        let mut registry = WorkerRegistry::new(3);
        registry.register_worker(1, &candidate("a", None)).unwrap();

        assert!(matches!(
            registry.register_worker(2, &candidate("a", None)),
            Err(Error::DuplicateRegistration { name }) if name == "a"
        ));
        assert!(matches!(
            registry.register_worker(1, &candidate("b", None)),
            Err(Error::DuplicateRegistration { .. })
        ));
        assert_eq!(registry.registered(), 1);
    }

    #[test]
    fn window_closes_when_full_or_started() {
        let mut registry = WorkerRegistry::new(1);
        registry.register_worker(1, &candidate("a", None)).unwrap();
        assert!(matches!(
            registry.register_worker(2, &candidate("b", None)),
            Err(Error::RegistrationWindowClosed)
        ));

        let mut registry = WorkerRegistry::new(2);
        registry.register_worker(1, &candidate("a", None)).unwrap();
        registry.close_window();
        assert!(matches!(
            registry.register_worker(2, &candidate("b", None)),
            Err(Error::RegistrationWindowClosed)
        ));
    }

    #[test]
    fn failure_is_recorded_once() {
        let mut registry = WorkerRegistry::new(2);
        let a = registry.register_worker(1, &candidate("a", None)).unwrap();
        let b = registry.register_worker(2, &candidate("b", None)).unwrap();
        registry.close_window();

        assert!(registry.mark_computing(a));
        assert!(registry.mark_failed(a, 3));
        assert!(!registry.mark_failed(a, 4));
        assert!(!registry.mark_disconnected(a, 4));
        assert_eq!(registry.failed_at(a), Some(3));
        assert!(!registry.mark_reported(a));

        assert_eq!(registry.live_ids(), vec![b]);
        assert_eq!(registry.failed_ids(), vec![a]);
        assert_eq!(registry.ready_ids(), vec![b]);
    }

    #[test]
    fn reports_only_count_while_computing() {
        let mut registry = WorkerRegistry::new(1);
        let a = registry.register_worker(7, &candidate("a", None)).unwrap();
        assert!(!registry.mark_reported(a));
        assert!(registry.mark_computing(a));
        assert!(registry.mark_reported(a));
        assert!(!registry.mark_reported(a));
        assert!(registry.mark_ready(a));
        assert!(registry.mark_computing(a));
    }

    #[test]
    fn reported_workers_pass_through_ready() {
        let mut registry = WorkerRegistry::new(2);
        let a = registry.register_worker(1, &candidate("a", None)).unwrap();
        let b = registry.register_worker(2, &candidate("b", None)).unwrap();
        registry.close_window();

        assert!(registry.mark_computing(a));
        assert!(registry.mark_computing(b));
        assert!(registry.mark_reported(a));

        // Reported is not runnable until it has been returned to Ready.
        assert!(!registry.mark_computing(a));
        assert!(registry.ready_ids().is_empty());
        assert_eq!(registry.reported_ids(), vec![a]);

        assert!(registry.mark_ready(a));
        assert!(!registry.mark_ready(a));
        assert!(!registry.mark_ready(b));
        assert_eq!(registry.status(a), Some(WorkerStatus::Ready));
        assert_eq!(registry.ready_ids(), vec![a]);
        assert!(registry.mark_computing(a));
    }

    #[test]
    fn slots_free_up_only_before_the_start() {
        let mut registry = WorkerRegistry::new(2);
        registry.register_worker(1, &candidate("a", Some(1))).unwrap();
        assert_eq!(registry.forget(1), Some(WorkerId(1)));
        assert_eq!(registry.registered(), 0);

        registry.register_worker(2, &candidate("a", None)).unwrap();
        registry.close_window();
        assert_eq!(registry.forget(2), None);
        assert_eq!(registry.worker_of(2), Some(WorkerId(0)));
        assert_eq!(registry.peers().len(), 1);
    }
}
