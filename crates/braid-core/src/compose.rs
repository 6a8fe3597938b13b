//! Composition of deltas recorded inside a single transaction.
//!
//! A transaction may touch the same field several times. Before the batch is
//! committed the individual deltas are folded into one, so observers see one
//! change per field and peers receive one patch per field. Composition must
//! be associative: folding `a, b, c` left to right or grouping `b, c` first
//! yields the same delta.

/// Sequential composition of two deltas, `self` applied first.
pub trait Compose: Sized {
    fn compose(self, later: Self) -> Self;

    /// Fold a non-empty sequence of deltas in application order.
    fn compose_all<I>(deltas: I) -> Option<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        deltas.into_iter().reduce(Self::compose)
    }
}
