//! File content transfer: ranged downloads and simple/chunked uploads.

use crate::client::DriveClientApi;
use crate::config::DriveConfig;
use crate::error::{FsError, Result};
use crate::http_client::backoff_delay;
use crate::models::{
    split_into_chunks, ChunkRange, ChunkStatus, DriveItem, ItemRef, UploadSession, WriteMode,
};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::time::sleep;

pub struct ContentIo {
    client: Arc<dyn DriveClientApi>,
    config: DriveConfig,
}

impl ContentIo {
    pub fn new(client: Arc<dyn DriveClientApi>, config: DriveConfig) -> Self {
        Self { client, config }
    }

    /// Fetch file bytes, optionally restricted to an inclusive byte
    /// range. Full downloads are verified against the remote sha256
    /// hash when the item reports one.
    pub async fn download(&self, item: &ItemRef, range: Option<(u64, u64)>) -> Result<Vec<u8>> {
        let record = self.client.get_item(&item.id).await?;
        let url = record.download_url.clone().ok_or_else(|| {
            FsError::Integrity(format!("file item {} has no download url", item.id))
        })?;
        let data = self.client.download(&url, range).await?;

        if range.is_none() {
            verify_sha256(&record, &data)?;
        }
        Ok(data)
    }

    /// Upload file bytes under `name` into `parent`.
    ///
    /// Payloads at or below the simple-upload threshold go through one
    /// atomic request; larger payloads use a resumable upload session
    /// in 320 KiB-aligned chunks, retrying failed chunks individually.
    /// A session abandoned mid-transfer is not cleaned up here; the
    /// service expires orphaned sessions on its own after a few days.
    pub async fn upload(
        &self,
        parent: &ItemRef,
        name: &str,
        data: &[u8],
        mode: &WriteMode,
    ) -> Result<DriveItem> {
        let size = data.len() as u64;
        if size <= self.config.simple_upload_threshold {
            debug!("Simple upload for {:?} ({} bytes)", name, size);
            return self.client.upload_small(&parent.id, name, data, mode).await;
        }
        info!(
            "File size {} exceeds {} bytes, using resumable upload",
            size, self.config.simple_upload_threshold
        );
        self.upload_chunked(parent, name, data, mode).await
    }

    async fn upload_chunked(
        &self,
        parent: &ItemRef,
        name: &str,
        data: &[u8],
        mode: &WriteMode,
    ) -> Result<DriveItem> {
        let response = self
            .client
            .create_upload_session(&parent.id, name, mode)
            .await?;
        let total_size = data.len() as u64;
        let mut session = UploadSession {
            upload_url: response.upload_url,
            total_size,
            bytes_committed: 0,
        };

        let chunk_size = self.config.aligned_chunk_size();
        let chunks = split_into_chunks(total_size, chunk_size);
        debug!(
            "Split {} bytes into {} chunks of up to {} bytes",
            total_size,
            chunks.len(),
            chunk_size
        );

        for (index, chunk) in chunks.iter().enumerate() {
            let status = match self.upload_chunk_with_retry(&session, *chunk, data).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(
                        "Abandoning upload session for {:?} with {} of {} bytes committed",
                        name, session.bytes_committed, total_size
                    );
                    return Err(with_committed_context(e, session.bytes_committed, total_size));
                }
            };
            session.bytes_committed = chunk.end + 1;

            match status {
                ChunkStatus::Complete(item) => {
                    if index + 1 != chunks.len() {
                        return Err(FsError::Integrity(format!(
                            "upload session completed early at chunk {} of {}",
                            index + 1,
                            chunks.len()
                        )));
                    }
                    info!("Completed chunked upload of {:?} ({} bytes)", name, total_size);
                    return Ok(*item);
                }
                ChunkStatus::Accepted { .. } => {}
            }
        }

        Err(FsError::Integrity(
            "upload session ended without a final item".to_string(),
        ))
    }

    /// PUT one chunk, retrying transient failures against the same
    /// session. The committed offset is tracked by the session, so a
    /// retry resumes exactly where the failed attempt left off.
    async fn upload_chunk_with_retry(
        &self,
        session: &UploadSession,
        chunk: ChunkRange,
        data: &[u8],
    ) -> Result<ChunkStatus> {
        let slice = &data[chunk.start as usize..=chunk.end as usize];
        let mut last_error: Option<FsError> = None;
        for attempt in 0..=self.config.max_retries {
            match self
                .client
                .upload_chunk(&session.upload_url, chunk, session.total_size, slice)
                .await
            {
                Ok(status) => return Ok(status),
                Err(e) if e.is_transient() => {
                    warn!(
                        "Chunk {}-{} attempt {} failed: {}",
                        chunk.start,
                        chunk.end,
                        attempt + 1,
                        e
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
            if attempt < self.config.max_retries {
                sleep(backoff_delay(self.config.retry_base_delay_ms, attempt)).await;
            }
        }
        Err(last_error.unwrap_or_else(|| {
            FsError::Unavailable("chunk upload failed with no recorded error".to_string())
        }))
    }
}

/// Annotate a transport failure with how far the session got, so the
/// caller can decide whether re-issuing the whole write is worth it.
fn with_committed_context(err: FsError, committed: u64, total: u64) -> FsError {
    let note = |detail: String| {
        format!(
            "upload interrupted after {} of {} bytes: {}",
            committed, total, detail
        )
    };
    match err {
        FsError::Unavailable(d) => FsError::Unavailable(note(d)),
        FsError::Network(d) => FsError::Network(note(d)),
        FsError::Timeout(d) => FsError::Timeout(note(d)),
        other => other,
    }
}

/// Compare downloaded bytes against the item's sha256 hash, when the
/// service reported one. Hex comparison is case-insensitive.
fn verify_sha256(record: &DriveItem, data: &[u8]) -> Result<()> {
    let expected = record
        .file
        .as_ref()
        .and_then(|f| f.hashes.as_ref())
        .and_then(|h| h.sha256.as_deref());
    let Some(expected) = expected else {
        return Ok(());
    };
    let digest = Sha256::digest(data);
    let actual: String = digest.iter().map(|b| format!("{:02X}", b)).collect();
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(FsError::Integrity(format!(
            "content hash mismatch for {}: expected {}, computed {}",
            record.id, expected, actual
        )))
    }
}
