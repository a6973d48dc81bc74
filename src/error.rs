use crate::db::IndexError;
use crate::session::ChunkResult;

/// Misuse of a session or an unusable configuration.
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("Session is closed")]
    SessionClosed,
    #[error("Session failed earlier and must be discarded")]
    SessionFailed,
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

/// Failure to seal a chunk (encrypt + erasure code) or to open it again.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Encryption failed: {0}")]
    Encrypt(String),
    #[error("Decryption failed: {0}")]
    Decrypt(String),
    #[error("Erasure coding failed: {0}")]
    Erasure(String),
    #[error("Need {required} fragments to reconstruct, only {present} present")]
    NotEnoughFragments { required: usize, present: usize },
    #[error("Chunk processing was cancelled")]
    Cancelled,
}

/// Failure confined to a single chunk. The stream keeps going after one of these.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("Dedup index error: {0}")]
    Index(#[from] IndexError),
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),
}

impl ChunkError {
    pub fn is_index(&self) -> bool {
        matches!(self, Self::Index(_))
    }
}

/// Failure of a `push`/`flush` call as a whole.
///
/// Fatal variants carry every result the failing call had already produced so that no chunk
/// goes unreported.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("Failed to read input: {0}")]
    Read(#[from] std::io::Error),
    #[error("Dedup index failed for {consecutive} consecutive chunks")]
    IndexUnavailable {
        consecutive: usize,
        emitted: Vec<ChunkResult>,
    },
    #[error("Internal invariant violated: {detail}")]
    InvariantViolation {
        detail: String,
        emitted: Vec<ChunkResult>,
    },
}

impl SessionError {
    /// Results produced by the failing call before it gave up.
    pub fn into_emitted(self) -> Vec<ChunkResult> {
        match self {
            Self::Usage(_) | Self::Read(_) => Vec::new(),
            Self::IndexUnavailable { emitted, .. } | Self::InvariantViolation { emitted, .. } => {
                emitted
            }
        }
    }
}
