//! Vertex programs the launcher can run by name.

mod components;
mod page_rank;
mod reachability;
mod shortest_paths;

pub use components::ConnectedComponents;
pub use page_rank::{PageRank, Rank};
pub use reachability::Reachability;
pub use shortest_paths::ShortestPaths;

use crate::combine::Combine;

pub(crate) struct MinCombiner;

impl Combine<f64> for MinCombiner {
    fn combine(&self, a: f64, b: f64) -> f64 {
        f64::min(a, b)
    }
}

impl Combine<i64> for MinCombiner {
    fn combine(&self, a: i64, b: i64) -> i64 {
        a.min(b)
    }
}
