//! Error types shared across the engine.

use thiserror::Error;

/// Errors surfaced by the fingerprinting engine.
///
/// The CPU stages (peak extraction, hashing, scoring) never fail on valid
/// input; the decoding front end and the index are the failure boundaries.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The input could not be turned into PCM.
    #[error("failed to decode audio: {0}")]
    DecodeFailure(String),

    /// The input was too short or too quiet to fingerprint. Not an error
    /// worth logging; callers skip the input and move on.
    #[error("input produced no usable fingerprint")]
    EmptyFingerprint,

    /// The track id is already present in the index.
    #[error("track {0} is already indexed")]
    DuplicateTrack(String),

    /// The track id is not present in the index.
    #[error("unknown track {0}")]
    UnknownTrack(String),

    /// A stored invariant no longer holds; the index cannot be trusted.
    #[error("index corrupted: {0}")]
    CorruptIndex(String),

    /// Out of memory or storage quota.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Underlying SQLite failure.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
