use crate::aggregate::AggValue;
use crate::protocol::{Superstep, WorkerId};

use std::collections::BTreeMap;

/// Read-only view of the computation handed to every compute call.
pub struct Context {
    pub(crate) superstep: Superstep,
    pub(crate) worker_id: WorkerId,
    pub(crate) worker_count: u32,
    pub(crate) total_vertices: u64,
    pub(crate) aggregated_values: BTreeMap<String, AggValue>,
}

impl Context {
    pub fn new(superstep: Superstep, worker_id: WorkerId, worker_count: u32) -> Self {
        Context {
            superstep,
            worker_id,
            worker_count,
            total_vertices: 0,
            aggregated_values: BTreeMap::new(),
        }
    }

    pub fn superstep(&self) -> Superstep {
        self.superstep
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    pub fn worker_count(&self) -> u32 {
        self.worker_count
    }

    /// Global vertex count as of the previous superstep; 0 in superstep 0.
    pub fn num_vertices(&self) -> u64 {
        self.total_vertices
    }

    /// Global value of an aggregator as of the previous superstep.
    pub fn get_aggregated_value(&self, name: &str) -> Option<AggValue> {
        self.aggregated_values.get(name).copied()
    }
}
