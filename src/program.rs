use crate::aggregate::Aggregate;
use crate::combine::Combine;
use crate::context::Context;
use crate::vertex::Vertex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;

/// The algorithm-specific part of a computation.
///
/// `compute` runs once per superstep for every vertex that is active or has
/// received messages. Messages sent through the vertex are readable by their
/// receivers in the next superstep only.
pub trait VertexProgram: Send + Sync + 'static {
    type Value: Clone + Display + Send + 'static;
    type Message: Clone + Send + Serialize + DeserializeOwned + 'static;

    fn compute(&self, vertex: &mut Vertex<Self::Value, Self::Message>, context: &Context);

    fn combiner(&self) -> Option<Box<dyn Combine<Self::Message>>> {
        None
    }

    fn aggregators(&self) -> Vec<Box<dyn Aggregate<Self::Value, Self::Message>>> {
        Vec::new()
    }

    /// Whether results stay meaningful when partitions of failed workers are
    /// dropped from the computation.
    fn tolerates_missing_partitions(&self) -> bool {
        false
    }
}
