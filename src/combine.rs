/// Folds two messages bound for the same vertex into one before they are
/// sent, e.g. `min` for shortest paths or `+` for PageRank.
pub trait Combine<M>: Send + Sync {
    fn combine(&self, a: M, b: M) -> M;
}
