use crate::barrier::{Arrival, SuperstepBarrier};
use crate::channel::{self, Connection, FrameWriter, Listener, Mode};
use crate::config::{Config, MasterConfig};
use crate::error::{Error, Result};
use crate::protocol::{
    RegistrationReply, RejectReason, Report, RunAction, RunCommand, StepPlan, StopReason, Superstep,
    ToMaster, ToWorker, WorkerId,
};
use crate::registry::{ConnId, WorkerRegistry};
use crate::state::{MasterState, WorkerStatus};
use crate::stats::{GlobalStepSummary, SuperstepStats};
use crate::termination::{decide_termination, TerminationDecision, TerminationPolicy};

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// What the I/O threads hand to the coordination thread.
enum MasterEvent {
    Connected { conn: ConnId, writer: FrameWriter },
    Inbound { conn: ConnId, frame: ToMaster },
    Closed { conn: ConnId },
}

/// Asks a running master to stop after its current wait slice.
#[derive(Clone, Debug, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Clone, Debug)]
pub struct MasterOutcome {
    pub decision: TerminationDecision,
    /// Number of supersteps that ran.
    pub supersteps: u64,
    pub summary: GlobalStepSummary,
    pub history: Vec<GlobalStepSummary>,
}

pub struct Master {
    config: MasterConfig,
    address: String,
    tolerate_missing: bool,
    state: MasterState,
    superstep: Superstep,
    registry: WorkerRegistry,
    writers: HashMap<ConnId, FrameWriter>,
    reports: BTreeMap<WorkerId, SuperstepStats>,
    history: Vec<GlobalStepSummary>,
    barrier: Arc<SuperstepBarrier>,
    events: Receiver<MasterEvent>,
    acceptor: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
    shutdown: ShutdownHandle,
}

impl Master {
    /// Binds the control listener and starts accepting workers.
    pub fn bind(config: &Config, mode: Mode) -> Result<Master> {
        let listener = Listener::bind(mode, &config.master.address)?;
        let address = listener.local_address();
        let barrier = Arc::new(SuperstepBarrier::new());
        let (sender, events) = mpsc::channel();

        let io_timeout = config.worker.io_timeout();
        let readers = barrier.clone();
        let mut next_conn: ConnId = 0;
        let acceptor = channel::spawn_acceptor(
            "master-acceptor".to_string(),
            listener,
            config.master.poll_interval(),
            move |connection| {
                next_conn += 1;
                accept(next_conn, connection, io_timeout, &sender, &readers)
            },
        )?;

        tracing::info!(
            "Master listening on {} ({} mode), waiting for {} workers",
            address,
            mode,
            config.master.workers
        );

        Ok(Master {
            config: config.master.clone(),
            address,
            tolerate_missing: false,
            state: MasterState::AwaitingWorkers,
            superstep: 0,
            registry: WorkerRegistry::new(config.master.workers),
            writers: HashMap::new(),
            reports: BTreeMap::new(),
            history: Vec::new(),
            barrier,
            events,
            acceptor: Some(acceptor),
            shutdown: ShutdownHandle::default(),
        })
    }

    /// Lets the run continue without failed workers, up to
    /// `failure_tolerance` of them.
    pub fn tolerate_missing_partitions(mut self, tolerate: bool) -> Self {
        self.tolerate_missing = tolerate;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn local_address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> MasterState {
        self.state
    }

    pub fn superstep(&self) -> Superstep {
        self.superstep
    }

    pub fn worker_status(&self, id: WorkerId) -> Option<WorkerStatus> {
        self.registry.status(id)
    }

    pub fn run(&mut self) -> Result<MasterOutcome> {
        let now = Instant::now();
        let result = self.coordinate();
        self.close();

        match &result {
            Ok(outcome) => tracing::info!(
                "Computation finished with {:?} after {} supersteps, total time cost: {} ms",
                outcome.decision,
                outcome.supersteps,
                now.elapsed().as_millis()
            ),
            Err(e) => tracing::error!("Computation failed: {}", e),
        }
        result
    }

    fn coordinate(&mut self) -> Result<MasterOutcome> {
        if let Err(e) = self.begin_computation_when_quorum_ready() {
            if matches!(e, Error::Cancelled) {
                self.broadcast_stop(StopReason::Shutdown);
            }
            return Err(e);
        }

        let policy = TerminationPolicy {
            expected_workers: self.registry.expected(),
            tolerated_failures: if self.tolerate_missing {
                self.config.failure_tolerance
            } else {
                0
            },
            max_supersteps: self.config.max_supersteps,
        };

        loop {
            let summary = match self.run_superstep() {
                Ok(summary) => summary,
                Err(e) => {
                    self.state = MasterState::Failed;
                    self.broadcast_stop(StopReason::Shutdown);
                    return Err(e);
                }
            };
            self.print_stats(&summary);

            let decision = decide_termination(&summary, self.registry.live_count(), &policy);
            self.history.push(summary.clone());

            let reason = match decision {
                TerminationDecision::Continue => {
                    self.superstep += 1;
                    self.state = MasterState::Running(self.superstep);
                    continue;
                }
                TerminationDecision::HaltConverged => StopReason::Converged,
                TerminationDecision::HaltStepLimit => StopReason::StepLimit,
                TerminationDecision::HaltFailed => {
                    let workers = self.registry.failed_ids();
                    for id in &workers {
                        tracing::error!(
                            "{} lost at superstep {}",
                            id,
                            self.registry.failed_at(*id).unwrap_or(self.superstep)
                        );
                    }
                    self.state = MasterState::Failed;
                    self.broadcast_stop(StopReason::Failed {
                        superstep: self.superstep,
                        workers: workers.clone(),
                    });
                    return Err(Error::ComputationFailed {
                        superstep: self.superstep,
                        workers,
                    });
                }
            };

            self.state = MasterState::Converged;
            self.broadcast_stop(reason);
            return Ok(MasterOutcome {
                decision,
                supersteps: self.superstep + 1,
                summary,
                history: std::mem::take(&mut self.history),
            });
        }
    }

    /// Waits for the configured number of workers, then hands every worker
    /// the peer directory.
    pub fn begin_computation_when_quorum_ready(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.config.registration_timeout();
        while !self.registry.is_full() {
            if self.shutdown.is_requested() {
                return Err(Error::Cancelled);
            }

            let now = Instant::now();
            if now >= deadline {
                let registered = self.registry.registered();
                tracing::error!(
                    "Only {} of {} workers registered within {} ms",
                    registered,
                    self.registry.expected(),
                    self.config.registration_timeout_ms
                );
                self.registry.close_window();
                self.state = MasterState::Failed;
                self.broadcast_stop(StopReason::RegistrationFailed);
                return Err(Error::InsufficientWorkers {
                    expected: self.registry.expected(),
                    registered,
                });
            }

            match self.events.recv_timeout((deadline - now).min(self.config.poll_interval())) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Disconnected("master event queue closed".to_string()))
                }
            }
        }

        self.registry.close_window();
        let peers = self.registry.peers();
        let worker_count = self.registry.expected();
        for id in self.registry.live_ids() {
            let start = ToWorker::Start {
                peers: peers.clone(),
                worker_count,
            };
            self.send_or_fail(id, &start);
        }

        self.state = MasterState::Running(self.superstep);
        tracing::info!("All {} workers registered, starting computation", worker_count);
        Ok(())
    }

    /// Runs one superstep to completion or deadline and returns the merged
    /// stats of the workers that reported in time.
    pub fn run_superstep(&mut self) -> Result<GlobalStepSummary> {
        let n = self.superstep;
        let excluded = self.registry.failed_ids();
        // Only senders outside `excluded` count towards expected totals.
        let expected = GlobalStepSummary::from_reports(
            n,
            self.reports.iter().filter(|(id, _)| !excluded.contains(*id)),
        );
        self.reports.clear();

        for id in self.registry.reported_ids() {
            self.registry.mark_ready(id);
        }
        let participants = self.registry.ready_ids();
        self.barrier.reset(n, participants.iter().copied());

        let previous = self.history.last();
        let aggregates = previous.map(|s| s.aggregates.clone()).unwrap_or_default();
        let total_vertices = previous.map(|s| s.total_vertices).unwrap_or(0);
        let mut commands = Vec::with_capacity(participants.len());
        for id in &participants {
            let plan = StepPlan {
                expected_messages: expected.messages_for(*id),
                excluded: excluded.clone(),
                aggregates: aggregates.clone(),
                total_vertices,
            };
            commands.push((*id, plan));
        }

        for (id, plan) in commands {
            self.registry.mark_computing(id);
            let run = ToWorker::Run(RunCommand {
                superstep: n,
                action: RunAction::Continue(plan),
            });
            self.send_or_fail(id, &run);
        }

        let deadline = Instant::now() + self.config.superstep_timeout();
        loop {
            if self.shutdown.is_requested() {
                self.barrier.close();
                return Err(Error::Cancelled);
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let missing = self.barrier.wait((deadline - now).min(self.config.poll_interval()));
            self.drain_events();
            if missing.is_empty() {
                break;
            }
        }

        // Reports enqueued before their arrival was counted are still queued.
        let missing = self.barrier.close();
        self.drain_events();

        for id in missing {
            if self.registry.mark_failed(id, n) {
                tracing::warn!(
                    "{} did not report superstep {} within {} ms, marked {}",
                    id,
                    n,
                    self.config.superstep_timeout_ms,
                    WorkerStatus::Failed
                );
            }
        }

        Ok(GlobalStepSummary::from_reports(n, self.reports.iter()))
    }

    pub fn on_worker_report(&mut self, conn: ConnId, report: Report) {
        let id = report.worker_id;
        if self.registry.worker_of(conn) != Some(id) {
            tracing::warn!("Dropping report claiming to be {} from another connection", id);
            return;
        }
        if report.superstep != self.superstep {
            tracing::warn!(
                "Dropping stale report of {} for superstep {}, now at {}",
                id,
                report.superstep,
                self.superstep
            );
            return;
        }
        match self.registry.status(id) {
            Some(WorkerStatus::Computing) => (),
            Some(status) => {
                tracing::warn!("Dropping report of {} for superstep {} while {}", id, report.superstep, status);
                return;
            }
            None => return,
        }

        self.registry.mark_reported(id);
        tracing::debug!(
            "{} reported superstep {}: {} active vertices, {} messages sent",
            id,
            report.superstep,
            report.stats.active_vertices,
            report.stats.messages_sent
        );
        self.reports.insert(id, report.stats);
    }

    fn handle_event(&mut self, event: MasterEvent) {
        match event {
            MasterEvent::Connected { conn, writer } => {
                self.writers.insert(conn, writer);
            }
            MasterEvent::Inbound { conn, frame } => match frame {
                ToMaster::Register(registration) => {
                    let reply = match self.registry.register_worker(conn, &registration) {
                        Ok(worker_id) => {
                            tracing::info!(
                                "Registered '{}' as {} ({} of {})",
                                registration.name,
                                worker_id,
                                self.registry.registered(),
                                self.registry.expected()
                            );
                            ToWorker::Accepted(RegistrationReply {
                                worker_id,
                                expected_workers: self.registry.expected(),
                                superstep: self.superstep,
                            })
                        }
                        Err(Error::DuplicateRegistration { name }) => {
                            tracing::warn!("Rejecting duplicate registration of '{}'", name);
                            ToWorker::Rejected(RejectReason::DuplicateRegistration { name })
                        }
                        Err(e) => {
                            tracing::warn!("Rejecting registration of '{}': {}", registration.name, e);
                            ToWorker::Rejected(RejectReason::RegistrationWindowClosed)
                        }
                    };
                    self.send_to_conn(conn, &reply);
                }
                ToMaster::Report(report) => self.on_worker_report(conn, report),
                ToMaster::Abort {
                    worker_id,
                    superstep,
                    reason,
                } => {
                    if self.registry.worker_of(conn) == Some(worker_id) {
                        tracing::error!(
                            "{} aborted at superstep {:?}: {}",
                            worker_id,
                            superstep,
                            reason
                        );
                        self.fail_worker(worker_id, WorkerStatus::Failed);
                    }
                }
            },
            MasterEvent::Closed { conn } => {
                self.writers.remove(&conn);
                if self.registry.is_window_open() {
                    if let Some(id) = self.registry.forget(conn) {
                        tracing::warn!("{} left before the computation started", id);
                    }
                } else if let Some(id) = self.registry.worker_of(conn) {
                    self.fail_worker(id, WorkerStatus::Disconnected);
                }
            }
        }
    }

    fn drain_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.handle_event(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn fail_worker(&mut self, id: WorkerId, status: WorkerStatus) {
        let changed = match status {
            WorkerStatus::Disconnected => self.registry.mark_disconnected(id, self.superstep),
            _ => self.registry.mark_failed(id, self.superstep),
        };
        if changed {
            self.barrier.withdraw(self.superstep, id);
            tracing::warn!(
                "{} ('{}') marked {} at superstep {}",
                id,
                self.registry.name_of(id).unwrap_or("?"),
                status,
                self.superstep
            );
        }
    }

    fn send_to_conn(&mut self, conn: ConnId, frame: &ToWorker) -> bool {
        match self.writers.get_mut(&conn) {
            Some(writer) => match writer.send(frame) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Failed to send to connection {}: {}", conn, e);
                    false
                }
            },
            None => false,
        }
    }

    fn send_or_fail(&mut self, id: WorkerId, frame: &ToWorker) {
        let sent = match self.registry.conn_of(id) {
            Some(conn) => self.send_to_conn(conn, frame),
            None => false,
        };
        if !sent {
            self.fail_worker(id, WorkerStatus::Disconnected);
        }
    }

    fn broadcast_stop(&mut self, reason: StopReason) {
        let stop = ToWorker::Run(RunCommand {
            superstep: self.superstep,
            action: RunAction::Stop(reason),
        });
        let conns: Vec<ConnId> = self
            .registry
            .live_ids()
            .into_iter()
            .filter_map(|id| self.registry.conn_of(id))
            .collect();
        for conn in conns {
            self.send_to_conn(conn, &stop);
        }
    }

    fn print_stats(&self, summary: &GlobalStepSummary) {
        tracing::info!(
            "Superstep: {}, num_vertices: {}, num_edges: {}, n_active_vertices: {}, msg_sent: {}",
            summary.superstep,
            summary.total_vertices,
            summary.total_edges,
            summary.active_vertices,
            summary.messages_sent
        );

        for (id, stats) in &self.reports {
            tracing::info!(
                "    {}: n_active_vertices: {}, n_vertices: {}, n_edges: {}, \
                    msg_sent: {}, msg_recv: {}, time_cost: {} ms",
                id,
                stats.active_vertices,
                stats.local_vertices,
                stats.local_edges,
                stats.messages_sent,
                stats.messages_received,
                stats.compute_time_ms
            );
        }
    }

    fn close(&mut self) {
        if let Some((stop, handle)) = self.acceptor.take() {
            stop.store(true, Ordering::Release);
            if handle.join().is_err() {
                tracing::warn!("Master acceptor panicked");
            }
        }
        for (_, writer) in self.writers.drain() {
            writer.close();
        }
    }
}

impl Drop for Master {
    fn drop(&mut self) {
        self.close();
    }
}

/// Splits a new control connection and starts its reader thread. Returns
/// false once the coordination thread is gone.
fn accept(
    conn: ConnId,
    connection: Connection,
    io_timeout: Duration,
    sender: &Sender<MasterEvent>,
    barrier: &Arc<SuperstepBarrier>,
) -> bool {
    let (writer, mut reader) = match connection.split(io_timeout) {
        Ok(halves) => halves,
        Err(e) => {
            tracing::warn!("Dropping connection {}: {}", conn, e);
            return true;
        }
    };
    if sender.send(MasterEvent::Connected { conn, writer }).is_err() {
        return false;
    }

    let sender = sender.clone();
    let barrier = barrier.clone();
    let spawned = thread::Builder::new()
        .name(format!("master-reader-{}", conn))
        .spawn(move || {
            loop {
                let frame = match reader.recv::<ToMaster>() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Connection {} failed: {}", conn, e);
                        break;
                    }
                };

                let arrival = match &frame {
                    ToMaster::Report(report) => Some((report.superstep, report.worker_id)),
                    _ => None,
                };
                if sender.send(MasterEvent::Inbound { conn, frame }).is_err() {
                    return;
                }
                // Only counted once the report is queued for the coordinator.
                if let Some((superstep, id)) = arrival {
                    match barrier.arrive(superstep, id) {
                        Arrival::Counted | Arrival::Early => (),
                        other => tracing::debug!("Arrival of {} for superstep {}: {:?}", id, superstep, other),
                    }
                }
            }
            let _ = sender.send(MasterEvent::Closed { conn });
        });

    if let Err(e) = spawned {
        tracing::error!("Failed to start reader for connection {}: {}", conn, e);
    }
    true
}
