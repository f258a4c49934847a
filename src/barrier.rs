//! Counting barrier between supersteps.

use crate::protocol::{Superstep, WorkerId};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arrival {
    /// Counted towards the current round.
    Counted,
    /// Held for a round that has not started yet.
    Early,
    /// The round is over; the arrival is ignored.
    Stale,
    Duplicate,
    /// The participant is not expected in the current round.
    Unexpected,
}

#[derive(Default)]
struct Round {
    superstep: Option<Superstep>,
    open: bool,
    expected: BTreeSet<WorkerId>,
    arrived: BTreeSet<WorkerId>,
    early: BTreeMap<Superstep, BTreeSet<WorkerId>>,
}

impl Round {
    fn missing(&self) -> BTreeSet<WorkerId> {
        self.expected.difference(&self.arrived).copied().collect()
    }

    fn complete(&self) -> bool {
        self.expected.is_subset(&self.arrived)
    }
}

/// Arrivals for a round not reset yet are held; arrivals for a closed or
/// earlier round are stale.
#[derive(Default)]
pub struct SuperstepBarrier {
    round: Mutex<Round>,
    released: Condvar,
}

impl SuperstepBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Round> {
        self.round.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts the round for `superstep` with the given participants.
    pub fn reset<I>(&self, superstep: Superstep, participants: I)
    where
        I: IntoIterator<Item = WorkerId>,
    {
        let mut round = self.lock();
        round.superstep = Some(superstep);
        round.open = true;
        round.expected = participants.into_iter().collect();
        round.arrived.clear();

        let held = round.early.remove(&superstep).unwrap_or_default();
        let expected = round.expected.clone();
        round.arrived.extend(held.intersection(&expected).copied());

        // Anything held for rounds that never happened is dropped.
        round.early = round.early.split_off(&(superstep + 1));

        if round.complete() {
            self.released.notify_all();
        }
    }

    pub fn arrive(&self, superstep: Superstep, id: WorkerId) -> Arrival {
        let mut round = self.lock();
        let outcome = match round.superstep {
            Some(current) if superstep < current => Arrival::Stale,
            Some(current) if superstep == current && !round.open => Arrival::Stale,
            Some(current) if superstep == current => {
                if !round.expected.contains(&id) {
                    Arrival::Unexpected
                } else if !round.arrived.insert(id) {
                    Arrival::Duplicate
                } else {
                    Arrival::Counted
                }
            }
            _ => {
                round.early.entry(superstep).or_default().insert(id);
                Arrival::Early
            }
        };

        if outcome == Arrival::Counted && round.complete() {
            self.released.notify_all();
        }
        outcome
    }

    /// Removes a participant known to have failed from the current round.
    pub fn withdraw(&self, superstep: Superstep, id: WorkerId) -> bool {
        let mut round = self.lock();
        if round.superstep != Some(superstep) || !round.open {
            return false;
        }

        let removed = round.expected.remove(&id);
        if removed && round.complete() {
            self.released.notify_all();
        }
        removed
    }

    /// Blocks until every expected participant arrived or `timeout` elapsed,
    /// returning the participants that did not arrive.
    pub fn wait(&self, timeout: Duration) -> BTreeSet<WorkerId> {
        let round = self.lock();
        let (round, _) = self
            .released
            .wait_timeout_while(round, timeout, |r| r.open && !r.complete())
            .unwrap_or_else(PoisonError::into_inner);
        round.missing()
    }

    /// Ends the current round. Later arrivals for it are stale.
    pub fn close(&self) -> BTreeSet<WorkerId> {
        let mut round = self.lock();
        round.open = false;
        self.released.notify_all();
        round.missing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn ids(raw: &[u32]) -> BTreeSet<WorkerId> {
        raw.iter().map(|i| WorkerId(*i)).collect()
    }

    #[test]
    fn releases_early_when_everyone_arrives() {
        let barrier = Arc::new(SuperstepBarrier::new());
        barrier.reset(0, ids(&[0, 1, 2]));

        let arriving = barrier.clone();
        let handle = thread::spawn(move || {
            for id in 0..3 {
                thread::sleep(Duration::from_millis(20));
                assert_eq!(arriving.arrive(0, WorkerId(id)), Arrival::Counted);
            }
        });

        let started = Instant::now();
        let missing = barrier.wait(Duration::from_secs(10));
        assert!(missing.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn timeout_reports_missing_participants() {
        let barrier = SuperstepBarrier::new();
        barrier.reset(4, ids(&[0, 1, 2]));
        barrier.arrive(4, WorkerId(1));

        let started = Instant::now();
        let missing = barrier.wait(Duration::from_millis(50));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(missing, ids(&[0, 2]));
    }

    #[test]
    fn arrivals_for_next_round_are_not_counted_now() {
        let barrier = SuperstepBarrier::new();
        barrier.reset(1, ids(&[0, 1]));

        assert_eq!(barrier.arrive(2, WorkerId(0)), Arrival::Early);
        assert_eq!(barrier.wait(Duration::from_millis(10)), ids(&[0, 1]));

        barrier.arrive(1, WorkerId(0));
        barrier.arrive(1, WorkerId(1));
        assert!(barrier.close().is_empty());

        barrier.reset(2, ids(&[0, 1]));
        assert_eq!(barrier.wait(Duration::from_millis(10)), ids(&[1]));
    }

    #[test]
    fn arrivals_after_close_are_stale() {
        let barrier = SuperstepBarrier::new();
        barrier.reset(3, ids(&[0, 1]));
        barrier.arrive(3, WorkerId(0));
        assert_eq!(barrier.close(), ids(&[1]));

        assert_eq!(barrier.arrive(3, WorkerId(1)), Arrival::Stale);
        assert_eq!(barrier.arrive(2, WorkerId(1)), Arrival::Stale);

        barrier.reset(4, ids(&[0]));
        assert_eq!(barrier.arrive(3, WorkerId(1)), Arrival::Stale);
    }

    #[test]
    fn duplicates_and_strangers_do_not_count() {
        let barrier = SuperstepBarrier::new();
        barrier.reset(0, ids(&[0, 1]));
        assert_eq!(barrier.arrive(0, WorkerId(0)), Arrival::Counted);
        assert_eq!(barrier.arrive(0, WorkerId(0)), Arrival::Duplicate);
        assert_eq!(barrier.arrive(0, WorkerId(7)), Arrival::Unexpected);
        assert_eq!(barrier.wait(Duration::from_millis(5)), ids(&[1]));
    }

    #[test]
    fn withdraw_releases_the_round() {
        let barrier = Arc::new(SuperstepBarrier::new());
        barrier.reset(0, ids(&[0, 1]));
        barrier.arrive(0, WorkerId(0));

        let failing = barrier.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            assert!(failing.withdraw(0, WorkerId(1)));
        });

        assert!(barrier.wait(Duration::from_secs(10)).is_empty());
        handle.join().unwrap();
        assert!(!barrier.withdraw(1, WorkerId(0)));
    }

    #[test]
    fn early_arrivals_of_skipped_rounds_are_dropped() {
        let barrier = SuperstepBarrier::new();
        barrier.arrive(5, WorkerId(0));
        barrier.arrive(7, WorkerId(0));
        barrier.reset(6, ids(&[0]));
        assert_eq!(barrier.wait(Duration::from_millis(5)), ids(&[0]));

        barrier.close();
        barrier.reset(7, ids(&[0]));
        assert!(barrier.wait(Duration::ZERO).is_empty());
    }
}
