use crate::aggregate::AggValue;
use crate::protocol::{Superstep, WorkerId};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What one worker did during one superstep.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SuperstepStats {
    pub active_vertices: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub compute_time_ms: u64,
    pub local_vertices: u64,
    pub local_edges: u64,
    /// Messages sent to each destination worker, itself included.
    pub sent_to: BTreeMap<WorkerId, u64>,
    pub aggregates: BTreeMap<String, AggValue>,
}

/// The master's merge of every reporting worker's stats for one superstep.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalStepSummary {
    pub superstep: Superstep,
    pub workers_reported: u32,
    pub active_vertices: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub total_vertices: u64,
    pub total_edges: u64,
    /// Slowest worker's compute time.
    pub max_compute_time_ms: u64,
    pub total_compute_time_ms: u64,
    pub messages_to: BTreeMap<WorkerId, u64>,
    pub aggregates: BTreeMap<String, AggValue>,
}

impl GlobalStepSummary {
    pub fn new(superstep: Superstep) -> Self {
        GlobalStepSummary {
            superstep,
            ..Default::default()
        }
    }

    /// Folds reports in worker id order, so the result does not depend on
    /// the order reports arrived in.
    pub fn from_reports<'a, I>(superstep: Superstep, reports: I) -> Self
    where
        I: IntoIterator<Item = (&'a WorkerId, &'a SuperstepStats)>,
    {
        let mut ordered: Vec<_> = reports.into_iter().collect();
        ordered.sort_by_key(|(id, _)| **id);

        let mut summary = GlobalStepSummary::new(superstep);
        for (_, stats) in ordered {
            summary.merge(stats);
        }
        summary
    }

    pub fn merge(&mut self, stats: &SuperstepStats) {
        self.workers_reported += 1;
        self.active_vertices += stats.active_vertices;
        self.messages_sent += stats.messages_sent;
        self.messages_received += stats.messages_received;
        self.total_vertices += stats.local_vertices;
        self.total_edges += stats.local_edges;
        self.max_compute_time_ms = self.max_compute_time_ms.max(stats.compute_time_ms);
        self.total_compute_time_ms += stats.compute_time_ms;

        for (worker, count) in &stats.sent_to {
            *self.messages_to.entry(*worker).or_insert(0) += count;
        }
        merge_aggregates(&mut self.aggregates, &stats.aggregates);
    }

    pub fn messages_for(&self, worker: WorkerId) -> u64 {
        self.messages_to.get(&worker).copied().unwrap_or(0)
    }
}

pub(crate) fn merge_aggregates(
    into: &mut BTreeMap<String, AggValue>,
    from: &BTreeMap<String, AggValue>,
) {
    for (name, value) in from {
        let merged = match into.remove(name) {
            Some(current) => current.merge(*value),
            None => *value,
        };
        into.insert(name.clone(), merged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(active: u64, sent: u64, to: &[(u32, u64)], reached: u64, low: f64) -> SuperstepStats {
        SuperstepStats {
            active_vertices: active,
            messages_sent: sent,
            messages_received: sent / 2,
            compute_time_ms: active * 3,
            local_vertices: active + 1,
            local_edges: sent,
            sent_to: to.iter().map(|(w, n)| (WorkerId(*w), *n)).collect(),
            aggregates: [
                ("reached".to_string(), AggValue::Count(reached)),
                ("low".to_string(), AggValue::Min(low)),
            ]
            .into_iter()
            .collect(),
        }
    }

    fn sample() -> Vec<SuperstepStats> {
        vec![
            stats(3, 4, &[(0, 1), (1, 3)], 2, 4.0),
            stats(0, 0, &[], 0, 9.0),
            stats(7, 10, &[(0, 6), (2, 4)], 5, -2.5),
            stats(1, 2, &[(1, 2)], 1, 0.0),
        ]
    }

    fn fold(order: &[usize], all: &[SuperstepStats]) -> GlobalStepSummary {
        let mut summary = GlobalStepSummary::new(3);
        for i in order {
            summary.merge(&all[*i]);
        }
        summary
    }

    #[test]
    fn merge_is_order_independent() {
        let all = sample();
        let expected = fold(&[0, 1, 2, 3], &all);
        for order in [[3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1]] {
            assert_eq!(fold(&order, &all), expected);
        }
        assert_eq!(expected.active_vertices, 11);
        assert_eq!(expected.messages_sent, 16);
        assert_eq!(expected.messages_for(WorkerId(0)), 7);
        assert_eq!(expected.messages_for(WorkerId(1)), 5);
        assert_eq!(expected.messages_for(WorkerId(3)), 0);
        assert_eq!(expected.max_compute_time_ms, 21);
        assert_eq!(expected.aggregates["reached"], AggValue::Count(8));
        assert_eq!(expected.aggregates["low"], AggValue::Min(-2.5));
    }

    #[test]
    fn from_reports_ignores_arrival_order() {
        let all = sample();
        let forward: BTreeMap<WorkerId, SuperstepStats> = all
            .iter()
            .enumerate()
            .map(|(i, s)| (WorkerId(i as u32), s.clone()))
            .collect();
        let backward: Vec<(WorkerId, SuperstepStats)> =
            forward.iter().rev().map(|(id, s)| (*id, s.clone())).collect();

        let a = GlobalStepSummary::from_reports(5, forward.iter());
        let b = GlobalStepSummary::from_reports(5, backward.iter().map(|(id, s)| (id, s)));
        assert_eq!(a, b);
        assert_eq!(a.superstep, 5);
        assert_eq!(a.workers_reported, 4);
    }
}
