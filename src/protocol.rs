//! Frames exchanged between the master and the workers.

use crate::aggregate::AggValue;
use crate::stats::SuperstepStats;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type Superstep = u64;
pub type VertexId = i64;

/// Identifier assigned by the master at registration. It is also the index
/// of the partition the worker owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    /// Stable name from the worker's configuration; used to detect duplicates.
    pub name: String,
    pub partition_hint: Option<u32>,
    /// Where peers deliver vertex message batches to this worker.
    pub data_address: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistrationReply {
    pub worker_id: WorkerId,
    pub expected_workers: u32,
    pub superstep: Superstep,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RejectReason {
    DuplicateRegistration { name: String },
    RegistrationWindowClosed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub worker_id: WorkerId,
    pub data_address: String,
}

/// What a worker needs to run one superstep besides its own state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepPlan {
    /// Number of messages other workers (and itself) sent to this worker in
    /// the previous superstep.
    pub expected_messages: u64,
    /// Senders whose messages must be discarded because they failed.
    pub excluded: Vec<WorkerId>,
    /// Global aggregates of the previous superstep.
    pub aggregates: BTreeMap<String, AggValue>,
    /// Global vertex count of the previous superstep, 0 at superstep 0.
    pub total_vertices: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StopReason {
    Converged,
    StepLimit,
    Failed {
        superstep: Superstep,
        workers: Vec<WorkerId>,
    },
    RegistrationFailed,
    Shutdown,
}

impl StopReason {
    /// Whether workers stopping for this reason hold a usable result.
    pub fn is_success(&self) -> bool {
        matches!(self, StopReason::Converged | StopReason::StepLimit)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Converged => write!(f, "converged"),
            StopReason::StepLimit => write!(f, "superstep limit reached"),
            StopReason::Failed { superstep, workers } => write!(
                f,
                "failed at superstep {} (workers: {:?})",
                superstep, workers
            ),
            StopReason::RegistrationFailed => write!(f, "registration failed"),
            StopReason::Shutdown => write!(f, "shutdown requested"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RunAction {
    Continue(StepPlan),
    Stop(StopReason),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunCommand {
    pub superstep: Superstep,
    pub action: RunAction,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub worker_id: WorkerId,
    pub superstep: Superstep,
    pub stats: SuperstepStats,
}

/// Frames sent from a worker to the master.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ToMaster {
    Register(Registration),
    Report(Report),
    Abort {
        worker_id: WorkerId,
        superstep: Option<Superstep>,
        reason: String,
    },
}

/// Frames sent from the master to a worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ToWorker {
    Accepted(RegistrationReply),
    Rejected(RejectReason),
    Start { peers: Vec<Peer>, worker_count: u32 },
    Run(RunCommand),
}
