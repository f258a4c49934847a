use crate::protocol::{Superstep, VertexId, WorkerId};

use serde::{Deserialize, Serialize};

/// A message produced by a vertex during compute, before it is routed.
pub struct Message<M> {
    pub value: M,
    pub sender: VertexId,
    pub receiver: VertexId,
}

impl<M> Message<M> {
    pub fn new(value: M, sender: VertexId, receiver: VertexId) -> Self {
        Message {
            value,
            sender,
            receiver,
        }
    }
}

/// Messages sent from one worker to another during one superstep.
///
/// `superstep` is the superstep the messages were produced in; they become
/// readable in the following one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VertexBatch<M> {
    pub from: WorkerId,
    pub to: WorkerId,
    pub superstep: Superstep,
    pub messages: Vec<(VertexId, M)>,
}

impl<M> VertexBatch<M> {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
