use crate::aggregate::{AggValue, Aggregate};
use crate::combine::Combine;
use crate::context::Context;
use crate::program::VertexProgram;
use crate::vertex::Vertex;

use std::fmt;

const DAMPING: f64 = 0.85;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rank {
    pub rank: f64,
    /// Change of `rank` in the superstep that produced it.
    pub delta: f64,
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rank)
    }
}

/// Unnormalized PageRank: every vertex starts at 1.0 and the ranks of a
/// graph without sinks keep summing to the vertex count.
///
/// Stops after `iterations` supersteps, or earlier once the summed rank
/// change of a superstep drops below `tolerance`.
pub struct PageRank {
    iterations: u64,
    tolerance: f64,
}

impl PageRank {
    pub fn new(iterations: u64, tolerance: f64) -> Self {
        PageRank { iterations, tolerance }
    }
}

struct PageRankCombiner;

impl Combine<f64> for PageRankCombiner {
    fn combine(&self, a: f64, b: f64) -> f64 {
        a + b
    }
}

struct DeltaAggregator;

impl Aggregate<Rank, f64> for DeltaAggregator {
    fn name(&self) -> &str {
        "delta"
    }

    fn report(&self, v: &Vertex<Rank, f64>) -> Option<AggValue> {
        v.value.map(|r| AggValue::Sum(r.delta))
    }
}

struct MaxRankAggregator;

impl Aggregate<Rank, f64> for MaxRankAggregator {
    fn name(&self) -> &str {
        "max_rank"
    }

    fn report(&self, v: &Vertex<Rank, f64>) -> Option<AggValue> {
        v.value.map(|r| AggValue::Max(r.rank))
    }
}

impl VertexProgram for PageRank {
    type Value = Rank;
    type Message = f64;

    fn compute(&self, vertex: &mut Vertex<Rank, f64>, context: &Context) {
        let superstep = context.superstep();
        if superstep == 0 {
            vertex.value = Some(Rank { rank: 1.0, delta: 1.0 });
        } else {
            let sum: f64 = vertex.take_messages().into_iter().sum();
            let rank = (1.0 - DAMPING) + DAMPING * sum;
            let previous = vertex.value.map(|r| r.rank).unwrap_or(rank);
            vertex.value = Some(Rank {
                rank,
                delta: (rank - previous).abs(),
            });
        }

        let settled = superstep >= 2
            && context
                .get_aggregated_value("delta")
                .map(|d| d.as_f64() < self.tolerance)
                .unwrap_or(false);
        if superstep >= self.iterations || settled {
            vertex.vote_to_halt();
            return;
        }

        let n = vertex.out_degree();
        if n > 0 {
            if let Some(value) = vertex.value {
                vertex.send_message(value.rank / n as f64);
            }
        }
    }

    fn combiner(&self) -> Option<Box<dyn Combine<f64>>> {
        Some(Box::new(PageRankCombiner))
    }

    fn aggregators(&self) -> Vec<Box<dyn Aggregate<Rank, f64>>> {
        vec![Box::new(DeltaAggregator), Box::new(MaxRankAggregator)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programs::testing::run_single;

    #[test]
    fn symmetric_cycle_settles_early() {
        let edges = vec![(0, 1, 1.0), (1, 2, 1.0), (2, 0, 1.0)];
        let (values, supersteps) = run_single(&PageRank::new(30, 1e-4), &edges, 100);

        assert_eq!(supersteps, 3);
        for rank in values.values() {
            assert!((rank.rank - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn hub_collects_the_most_rank() {
        let edges = vec![(1, 0, 1.0), (2, 0, 1.0), (3, 0, 1.0), (0, 1, 1.0)];
        let (values, supersteps) = run_single(&PageRank::new(9, 0.0), &edges, 100);

        assert_eq!(supersteps, 10);
        let hub = values[&0].rank;
        assert!(values.iter().filter(|(id, _)| **id != 0).all(|(_, r)| r.rank < hub));
        assert_eq!(values[&0].to_string(), hub.to_string());
    }
}
