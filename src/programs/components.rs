use super::MinCombiner;
use crate::aggregate::{AggValue, Aggregate};
use crate::combine::Combine;
use crate::context::Context;
use crate::program::VertexProgram;
use crate::protocol::VertexId;
use crate::vertex::Vertex;

/// Labels every vertex with the smallest id that reaches it.
///
/// On a graph whose edges go both ways this is the weakly connected
/// component of the vertex; on a directed graph it is the minimum over
/// its ancestors.
pub struct ConnectedComponents;

struct ComponentCounter;

impl Aggregate<VertexId, VertexId> for ComponentCounter {
    fn name(&self) -> &str {
        "components"
    }

    fn report(&self, v: &Vertex<VertexId, VertexId>) -> Option<AggValue> {
        match v.value {
            Some(label) if label == v.id() => Some(AggValue::Count(1)),
            _ => None,
        }
    }
}

impl VertexProgram for ConnectedComponents {
    type Value = VertexId;
    type Message = VertexId;

    fn compute(&self, vertex: &mut Vertex<VertexId, VertexId>, context: &Context) {
        if context.superstep() == 0 {
            let id = vertex.id();
            vertex.value = Some(id);
            vertex.send_message(id);
            vertex.vote_to_halt();
            return;
        }

        let current = vertex.value.unwrap_or(vertex.id());
        if let Some(smallest) = vertex.take_messages().into_iter().min() {
            if smallest < current {
                vertex.value = Some(smallest);
                vertex.send_message(smallest);
            }
        }
        vertex.vote_to_halt();
    }

    fn combiner(&self) -> Option<Box<dyn Combine<VertexId>>> {
        Some(Box::new(MinCombiner))
    }

    fn aggregators(&self) -> Vec<Box<dyn Aggregate<VertexId, VertexId>>> {
        vec![Box::new(ComponentCounter)]
    }
}
