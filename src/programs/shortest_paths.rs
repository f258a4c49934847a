use super::MinCombiner;
use crate::aggregate::{AggValue, Aggregate};
use crate::combine::Combine;
use crate::context::Context;
use crate::program::VertexProgram;
use crate::protocol::VertexId;
use crate::vertex::Vertex;

/// Single source shortest paths over the edge weights.
/// Unreachable vertices end at infinity.
pub struct ShortestPaths {
    source: VertexId,
}

impl ShortestPaths {
    pub fn new(source: VertexId) -> Self {
        ShortestPaths { source }
    }
}

struct MaxDistance;

impl Aggregate<f64, f64> for MaxDistance {
    fn name(&self) -> &str {
        "max_distance"
    }

    fn report(&self, v: &Vertex<f64, f64>) -> Option<AggValue> {
        v.value.filter(|d| d.is_finite()).map(AggValue::Max)
    }
}

impl VertexProgram for ShortestPaths {
    type Value = f64;
    type Message = f64;

    fn compute(&self, vertex: &mut Vertex<f64, f64>, context: &Context) {
        if context.superstep() == 0 {
            vertex.value = Some(f64::INFINITY);
        }

        let mut min_dist = if vertex.id() == self.source {
            0.0
        } else {
            f64::INFINITY
        };
        while let Some(dist) = vertex.read_message() {
            min_dist = min_dist.min(dist);
        }

        let current = vertex.value.unwrap_or(f64::INFINITY);
        if min_dist < current {
            vertex.value = Some(min_dist);
            let edges: Vec<(VertexId, f64)> = vertex.get_outer_edges().map(|(t, w)| (*t, *w)).collect();
            for (target, weight) in edges {
                vertex.send_message_to(target, min_dist + weight);
            }
        }

        vertex.vote_to_halt();
    }

    fn combiner(&self) -> Option<Box<dyn Combine<f64>>> {
        Some(Box::new(MinCombiner))
    }

    fn aggregators(&self) -> Vec<Box<dyn Aggregate<f64, f64>>> {
        vec![Box::new(MaxDistance)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programs::testing::run_single;

    #[test]
    fn finds_cheaper_indirect_route() {
        let edges = vec![(0, 1, 10.0), (0, 2, 1.0), (2, 1, 2.0), (1, 3, 1.0)];
        let (values, _) = run_single(&ShortestPaths::new(0), &edges, 20);

        assert_eq!(values[&0], 0.0);
        assert_eq!(values[&2], 1.0);
        assert_eq!(values[&1], 3.0);
        assert_eq!(values[&3], 4.0);
    }

    #[test]
    fn unreachable_vertices_stay_at_infinity() {
        let edges = vec![(0, 1, 1.0), (2, 0, 1.0)];
        let (values, _) = run_single(&ShortestPaths::new(0), &edges, 20);
        assert_eq!(values[&1], 1.0);
        assert!(values[&2].is_infinite());
    }
}
