//! Filesystem-facing error taxonomy and HTTP status translation.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FsError>;

/// Errors surfaced by every public filesystem operation.
///
/// Transport-level failures that survive the retry policy are folded
/// into this taxonomy as well (`Unavailable`, `Timeout`, `Network`),
/// so callers never see raw HTTP or reqwest errors.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error("remote data integrity error: {0}")]
    Integrity(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl FsError {
    /// Transient errors are worth retrying at the chunk level.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(
            self,
            FsError::Unavailable(_) | FsError::Timeout(_) | FsError::Network(_)
        )
    }
}

/// Operation context used to disambiguate remote 409 responses:
/// a conflict while creating means "already exists", a conflict while
/// moving or replacing means the remote rejected the mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpContext {
    Create,
    Mutate,
    Read,
}

/// Map an HTTP status plus response detail to a filesystem error.
///
/// Total function: every status produces a value. 401 reaching this
/// point means the transport already refreshed the token once, and
/// 429 means the retry ceiling is exhausted.
pub(crate) fn translate_status(status: u16, detail: &str, ctx: OpContext) -> FsError {
    let detail = if detail.is_empty() {
        format!("http status {}", status)
    } else {
        format!("http status {}: {}", status, detail)
    };
    match status {
        400 | 416 => FsError::InvalidArgument(detail),
        401 | 403 => FsError::PermissionDenied(detail),
        404 | 410 => FsError::NotFound(detail),
        409 => match ctx {
            OpContext::Create => FsError::AlreadyExists(detail),
            _ => FsError::Conflict(detail),
        },
        412 => FsError::Conflict(detail),
        429 => FsError::Unavailable(detail),
        500..=599 => FsError::Unavailable(detail),
        _ => FsError::Integrity(detail),
    }
}

impl From<reqwest::Error> for FsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FsError::Timeout(err.to_string())
        } else if err.is_decode() {
            FsError::Integrity(format!("malformed remote payload: {}", err))
        } else {
            FsError::Network(err.to_string())
        }
    }
}
