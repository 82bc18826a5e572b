//! Error abstractions.

/// Errors from the pod pairing algorithm.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum GroupingError {
    /// The observed pod placement cannot satisfy per-group node anti-affinity.
    #[error("insufficient node diversity to satisfy pod anti-affinity")]
    InsufficientNodeDiversity,
}
