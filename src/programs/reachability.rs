use crate::aggregate::{AggValue, Aggregate};
use crate::combine::Combine;
use crate::context::Context;
use crate::program::VertexProgram;
use crate::protocol::VertexId;
use crate::vertex::Vertex;

use std::collections::HashSet;

/// Marks every vertex reachable from a set of sources.
///
/// Without explicit sources every vertex is a source, so the run only checks
/// that each vertex hears from a neighbour: vertices stay active through
/// superstep 0 and all halt in superstep 1.
pub struct Reachability {
    sources: Option<HashSet<VertexId>>,
}

impl Reachability {
    pub fn new(sources: Option<Vec<VertexId>>) -> Self {
        Reachability {
            sources: sources.map(|s| s.into_iter().collect()),
        }
    }

    pub fn from_all() -> Self {
        Reachability { sources: None }
    }

    fn is_source(&self, id: VertexId) -> bool {
        match &self.sources {
            Some(sources) => sources.contains(&id),
            None => true,
        }
    }
}

struct KeepOne;

impl Combine<()> for KeepOne {
    fn combine(&self, _: (), _: ()) {}
}

struct ReachedCounter;

impl Aggregate<bool, ()> for ReachedCounter {
    fn name(&self) -> &str {
        "reached"
    }

    fn report(&self, v: &Vertex<bool, ()>) -> Option<AggValue> {
        match v.value {
            Some(true) => Some(AggValue::Count(1)),
            _ => None,
        }
    }
}

impl VertexProgram for Reachability {
    type Value = bool;
    type Message = ();

    fn compute(&self, vertex: &mut Vertex<bool, ()>, context: &Context) {
        if context.superstep() == 0 {
            let reached = self.is_source(vertex.id());
            vertex.value = Some(reached);
            if reached {
                vertex.send_message(());
            }
            return;
        }

        let heard = !vertex.take_messages().is_empty();
        if heard && vertex.value != Some(true) {
            vertex.value = Some(true);
            vertex.send_message(());
        }
        vertex.vote_to_halt();
    }

    fn combiner(&self) -> Option<Box<dyn Combine<()>>> {
        Some(Box::new(KeepOne))
    }

    fn aggregators(&self) -> Vec<Box<dyn Aggregate<bool, ()>>> {
        vec![Box::new(ReachedCounter)]
    }
}
