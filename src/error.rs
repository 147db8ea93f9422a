use thiserror::Error;

/// Error taxonomy for the fingerprinting, indexing, and matching engine.
///
/// `OVERFLOW` (bucket-cap overflow) deliberately has no variant here: per the
/// indexer's bucket-capping policy it is a silent, expected outcome, not a
/// reported failure.
#[derive(Error, Debug)]
pub enum Error {
    #[error("decoder failed for {path}: {reason}")]
    DecoderFailed { path: String, reason: String },

    #[error("inconsistent parameters: {0}")]
    BadParams(String),

    #[error("index unreadable: {0}")]
    IndexUnreadable(String),

    #[error("index truncated at track {track_id}, resuming from last good track")]
    IndexTruncated { track_id: u32 },

    #[error("worker lost while processing {path}")]
    WorkerLost { path: String },

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("duplicate track name: {0}")]
    DuplicateTrack(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
