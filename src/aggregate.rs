use crate::vertex::Vertex;

use serde::{Deserialize, Serialize};

/// A value reported by an aggregator. The variant decides how two values
/// merge, so the master can combine reports without knowing the program.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum AggValue {
    Count(u64),
    Sum(f64),
    Min(f64),
    Max(f64),
}

impl AggValue {
    pub fn merge(self, other: AggValue) -> AggValue {
        match (self, other) {
            (AggValue::Count(a), AggValue::Count(b)) => AggValue::Count(a + b),
            (AggValue::Sum(a), AggValue::Sum(b)) => AggValue::Sum(a + b),
            (AggValue::Min(a), AggValue::Min(b)) => AggValue::Min(f64::min(a, b)),
            (AggValue::Max(a), AggValue::Max(b)) => AggValue::Max(f64::max(a, b)),
            (a, b) => {
                tracing::warn!("Mismatched aggregate kinds {:?} and {:?}, keeping the first", a, b);
                a
            }
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            AggValue::Count(n) => n as f64,
            AggValue::Sum(v) | AggValue::Min(v) | AggValue::Max(v) => v,
        }
    }
}

/// Per-vertex contribution to a named global value.
///
/// Workers merge the reports of their own vertices; the master merges the
/// per-worker values into the global summary.
pub trait Aggregate<V, M>: Send + Sync {
    fn name(&self) -> &str;

    /// `None` means the vertex does not contribute this superstep.
    fn report(&self, v: &Vertex<V, M>) -> Option<AggValue>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_follows_the_variant() {
        assert_eq!(AggValue::Count(2).merge(AggValue::Count(3)), AggValue::Count(5));
        assert_eq!(AggValue::Min(2.0).merge(AggValue::Min(-1.0)), AggValue::Min(-1.0));
        assert_eq!(AggValue::Max(2.0).merge(AggValue::Max(-1.0)), AggValue::Max(2.0));
        assert_eq!(AggValue::Sum(0.5).merge(AggValue::Sum(0.25)), AggValue::Sum(0.75));
    }

    #[test]
    fn mismatched_kinds_keep_left() {
        assert_eq!(AggValue::Count(1).merge(AggValue::Max(9.0)), AggValue::Count(1));
    }
}
