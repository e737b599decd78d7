use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Microsoft Graph API base URL.
pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Files at or below this size go through one atomic PUT; larger files
/// use a resumable upload session.
pub const SIMPLE_UPLOAD_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Upload session chunks must be a multiple of 320 KiB.
pub const CHUNK_ALIGNMENT: u64 = 327_680;

/// Adapter tunables.
///
/// The defaults match the Graph service limits and are safe for
/// production use; tests shrink the thresholds to exercise the
/// chunked paths with small payloads.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DriveConfig {
    /// API base URL. Override for mock servers.
    pub base_url: String,
    /// Per-request timeout.
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Retry ceiling for rate-limited requests and failed chunks.
    pub max_retries: u32,
    /// Base delay for exponential backoff when the remote supplies no
    /// Retry-After hint.
    pub retry_base_delay_ms: u64,
    /// Upload size above which a resumable session is used.
    pub simple_upload_threshold: u64,
    /// Chunk size for resumable uploads. Rounded down to the 320 KiB
    /// alignment the service requires.
    pub chunk_size: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            base_url: GRAPH_API_BASE.to_string(),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay_ms: 500,
            simple_upload_threshold: SIMPLE_UPLOAD_THRESHOLD,
            chunk_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

impl DriveConfig {
    /// Effective chunk size after 320 KiB alignment.
    pub fn aligned_chunk_size(&self) -> u64 {
        let aligned = (self.chunk_size / CHUNK_ALIGNMENT) * CHUNK_ALIGNMENT;
        aligned.max(CHUNK_ALIGNMENT)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
