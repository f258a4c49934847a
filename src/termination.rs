use crate::stats::GlobalStepSummary;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationDecision {
    Continue,
    HaltConverged,
    HaltStepLimit,
    HaltFailed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TerminationPolicy {
    pub expected_workers: u32,
    /// How many workers may be lost before the run fails.
    pub tolerated_failures: u32,
    pub max_supersteps: Option<u64>,
}

/// Decides what follows the superstep described by `summary`.
///
/// Failure is checked first, then convergence (no active vertex and no
/// message in flight), then the superstep limit.
pub fn decide_termination(
    summary: &GlobalStepSummary,
    live_workers: u32,
    policy: &TerminationPolicy,
) -> TerminationDecision {
    let failed = policy.expected_workers.saturating_sub(live_workers);
    if live_workers == 0 || failed > policy.tolerated_failures {
        return TerminationDecision::HaltFailed;
    }

    if summary.active_vertices == 0 && summary.messages_sent == 0 {
        return TerminationDecision::HaltConverged;
    }

    match policy.max_supersteps {
        Some(limit) if summary.superstep + 1 >= limit => TerminationDecision::HaltStepLimit,
        _ => TerminationDecision::Continue,
    }
}
