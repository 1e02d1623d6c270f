use thiserror::Error;

/// Errors surfaced by [`RingTree`](crate::RingTree) construction.
///
/// Absent keys are ordinary `Option` results, not errors, and a corrupted
/// tree is a programmer error that panics; configuration is the only thing
/// a caller can get wrong recoverably.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum RingTreeError {
    /// The requested degree cannot host a split.
    ///
    /// A degree below 3 leaves no key to promote when a full node divides,
    /// so construction rejects it up front.
    #[error("degree must be at least 3, got {degree}")]
    InvalidDegree {
        /// The rejected degree.
        degree: usize,
    },
}
