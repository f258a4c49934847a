use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::Superstep;

/*
 * Coordination states.
 *
 * Master:  AWAITING_WORKERS ---> RUNNING(n) ---> CONVERGED
 *                 |                  |
 *                 ----------------------------> FAILED
 *
 * Worker:  AWAITING_REGISTRATION_ACK ---> READY ---> COMPUTING ---> REPORTING
 *                                           ^                          |
 *                                           |                          |
 *                                            --------------------------
 *          (any) ---> STOPPED
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MasterState {
    AwaitingWorkers,
    Running(Superstep),
    Converged,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    AwaitingRegistrationAck,
    Ready,
    Computing(Superstep),
    Reporting(Superstep),
    Stopped,
}

/// The master's view of one registered worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    Registering,
    Ready,
    Computing,
    Reported,
    Failed,
    Disconnected,
}

impl WorkerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerStatus::Failed | WorkerStatus::Disconnected)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerStatus::Registering => "REGISTERING",
            WorkerStatus::Ready => "READY",
            WorkerStatus::Computing => "COMPUTING",
            WorkerStatus::Reported => "REPORTED",
            WorkerStatus::Failed => "FAILED",
            WorkerStatus::Disconnected => "DISCONNECTED",
        };
        f.write_str(name)
    }
}
