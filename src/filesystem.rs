//! The path-addressed filesystem surface.
//!
//! Every operation normalizes its path(s), resolves them to item
//! references through the cache, performs the remote calls, and keeps
//! the cache consistent with the structural change it made.

use crate::auth::{TokenManager, TokenProvider};
use crate::client::{DriveClient, DriveClientApi};
use crate::config::DriveConfig;
use crate::content::ContentIo;
use crate::error::{FsError, Result};
use crate::http_client::HttpClient;
use crate::listing::DirectoryLister;
use crate::metadata::{to_file_info, to_times_patch};
use crate::models::{CopyStatus, FileInfo, ItemRef, WriteMode};
use crate::path_utils::{join, normalize, parent_and_name};
use crate::resolver::PathResolver;
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Poll ceiling for asynchronous server-side copies.
const COPY_POLL_ATTEMPTS: u32 = 30;

/// Path-addressed filesystem adapter over the Graph drive API.
///
/// Cheap to share: all operations take `&self` and may be invoked
/// concurrently from multiple tasks. The only cross-call state is the
/// path cache and the cached credential, both internally synchronized.
/// Concurrent conflicting operations on the same path are arbitrated
/// by the remote service, not serialized locally.
pub struct OneDriveFs {
    client: Arc<dyn DriveClientApi>,
    resolver: PathResolver,
    lister: DirectoryLister,
    content: ContentIo,
    config: DriveConfig,
}

impl OneDriveFs {
    /// Build an adapter speaking real HTTP, authenticated through the
    /// supplied credential provider.
    pub fn new(provider: Arc<dyn TokenProvider>, config: DriveConfig) -> Self {
        let tokens = Arc::new(TokenManager::new(provider));
        let http = HttpClient::new(tokens, config.clone());
        let client: Arc<dyn DriveClientApi> = Arc::new(DriveClient::new(http));
        Self::with_client(client, config)
    }

    /// Build an adapter over any `DriveClientApi` implementation.
    pub fn with_client(client: Arc<dyn DriveClientApi>, config: DriveConfig) -> Self {
        Self {
            resolver: PathResolver::new(DirectoryLister::new(client.clone())),
            lister: DirectoryLister::new(client.clone()),
            content: ContentIo::new(client.clone(), config.clone()),
            client,
            config,
        }
    }

    /// Resolve a path and run `op` against the reference. When a
    /// cached reference turns out stale (the operation reports
    /// `NotFound` for an id that resolved fine), the entry is dropped
    /// and the walk repeats once from the nearest cached ancestor
    /// before the failure surfaces.
    async fn with_item<T, F, Fut>(&self, segments: &[String], op: F) -> Result<T>
    where
        F: Fn(ItemRef) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let item = self.resolver.resolve(segments).await?;
        match op(item).await {
            Err(FsError::NotFound(detail)) if !segments.is_empty() => {
                debug!(
                    "Stale reference for {} ({}), re-resolving once",
                    join(segments),
                    detail
                );
                self.resolver.invalidate(segments);
                let item = self.resolver.resolve(segments).await?;
                op(item).await
            }
            other => other,
        }
    }

    /// List a directory's entries.
    pub async fn list_dir(&self, path: &str) -> Result<Vec<FileInfo>> {
        let segments = normalize(path)?;
        self.with_item(&segments, |dir| async move {
            if !dir.is_folder {
                return Err(FsError::InvalidArgument(format!(
                    "{} is not a directory",
                    path
                )));
            }
            let children = self.lister.list_children(&dir).await?;
            Ok(children.iter().map(to_file_info).collect())
        })
        .await
    }

    /// Stat a single path.
    pub async fn get_info(&self, path: &str) -> Result<FileInfo> {
        let segments = normalize(path)?;
        self.with_item(&segments, |item| async move {
            let record = self.client.get_item(&item.id).await?;
            let mut info = to_file_info(&record);
            if item.is_root() {
                info.name = "/".to_string();
                info.is_dir = true;
                info.is_root = true;
            }
            Ok(info)
        })
        .await
    }

    /// Whether a path currently resolves. `NotFound` folds to `false`;
    /// every other failure propagates.
    pub async fn exists(&self, path: &str) -> Result<bool> {
        match self.get_info(path).await {
            Ok(_) => Ok(true),
            Err(FsError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read a whole file.
    pub async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let segments = normalize(path)?;
        self.with_item(&segments, |item| async move {
            if item.is_folder {
                return Err(FsError::InvalidArgument(format!("{} is a directory", path)));
            }
            self.content.download(&item, None).await
        })
        .await
    }

    /// Read `len` bytes starting at `offset`.
    pub async fn read_range(&self, path: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let segments = normalize(path)?;
        let range = (offset, offset + len - 1);
        self.with_item(&segments, |item| async move {
            if item.is_folder {
                return Err(FsError::InvalidArgument(format!("{} is a directory", path)));
            }
            self.content.download(&item, Some(range)).await
        })
        .await
    }

    /// Write a file, creating or replacing it per `mode`. The fresh
    /// reference is registered in the path cache, so an immediately
    /// following lookup costs no remote traversal.
    pub async fn write(&self, path: &str, data: &[u8], mode: WriteMode) -> Result<FileInfo> {
        let segments = normalize(path)?;
        let (parent, name) = parent_and_name(&segments)?;
        info!("Writing {} bytes to {}", data.len(), path);
        let mode = &mode;
        let item = self
            .with_item(parent, |dir| async move {
                if !dir.is_folder {
                    return Err(FsError::InvalidArgument(format!(
                        "parent of {} is not a directory",
                        path
                    )));
                }
                self.content.upload(&dir, name, data, mode).await
            })
            .await?;
        self.resolver.register(&segments, item.to_ref());
        Ok(to_file_info(&item))
    }

    /// Create a directory. Fails `AlreadyExists` when any item of
    /// that name is present, file or folder alike.
    pub async fn make_dir(&self, path: &str) -> Result<FileInfo> {
        let segments = normalize(path)?;
        let (parent, name) = parent_and_name(&segments)?;
        info!("Creating directory {}", path);
        let item = self
            .with_item(parent, |dir| async move {
                if !dir.is_folder {
                    return Err(FsError::InvalidArgument(format!(
                        "parent of {} is not a directory",
                        path
                    )));
                }
                self.client
                    .create_folder(&dir.id, name, &WriteMode::FailIfExists)
                    .await
            })
            .await?;
        self.resolver.register(&segments, item.to_ref());
        Ok(to_file_info(&item))
    }

    /// Delete a file.
    pub async fn remove_file(&self, path: &str) -> Result<()> {
        let segments = normalize(path)?;
        info!("Removing file {}", path);
        let result = self
            .with_item(&segments, |item| async move {
                if item.is_folder {
                    return Err(FsError::InvalidArgument(format!("{} is a directory", path)));
                }
                self.client.delete_item(&item.id).await
            })
            .await;
        self.invalidate_after_delete(&segments, &result);
        result
    }

    /// Delete a directory. Without `recursive`, a non-empty directory
    /// fails `Conflict` (the remote deletes recursively on its own,
    /// so emptiness is checked first).
    pub async fn remove_dir(&self, path: &str, recursive: bool) -> Result<()> {
        let segments = normalize(path)?;
        if segments.is_empty() {
            return Err(FsError::InvalidArgument(
                "cannot remove the root directory".to_string(),
            ));
        }
        info!("Removing directory {} (recursive: {})", path, recursive);
        let result = self
            .with_item(&segments, |item| async move {
                if !item.is_folder {
                    return Err(FsError::InvalidArgument(format!(
                        "{} is not a directory",
                        path
                    )));
                }
                if !recursive {
                    let record = self.client.get_item(&item.id).await?;
                    let child_count = record.folder.as_ref().map(|f| f.child_count).unwrap_or(0);
                    if child_count > 0 {
                        return Err(FsError::Conflict(format!(
                            "directory {} is not empty",
                            path
                        )));
                    }
                }
                self.client.delete_item(&item.id).await
            })
            .await;
        self.invalidate_after_delete(&segments, &result);
        result
    }

    /// Move and/or rename an item. The cache entry for the source
    /// subtree is dropped and the destination registered with the
    /// same item id.
    pub async fn rename(&self, src: &str, dst: &str) -> Result<FileInfo> {
        let src_segments = normalize(src)?;
        let dst_segments = normalize(dst)?;
        parent_and_name(&src_segments)?; // the root cannot be moved
        let (dst_parent, dst_name) = parent_and_name(&dst_segments)?;

        let dst_parent_ref = self.resolver.resolve(dst_parent).await?;
        if !dst_parent_ref.is_folder {
            return Err(FsError::InvalidArgument(format!(
                "parent of {} is not a directory",
                dst
            )));
        }

        info!("Moving {} to {}", src, dst);
        let dst_parent_ref = &dst_parent_ref;
        let moved = self
            .with_item(&src_segments, |item| async move {
                self.client
                    .move_item(&item.id, &dst_parent_ref.id, dst_name)
                    .await
            })
            .await?;

        self.resolver.invalidate(&src_segments);
        self.resolver.register(&dst_segments, moved.to_ref());
        Ok(to_file_info(&moved))
    }

    /// Server-side copy. Graph performs copies asynchronously; the
    /// returned monitor is polled until completion, bounded at
    /// [`COPY_POLL_ATTEMPTS`]; on exhaustion the call fails
    /// `Unavailable` even though the copy may still finish remotely.
    pub async fn copy(&self, src: &str, dst: &str) -> Result<FileInfo> {
        let src_segments = normalize(src)?;
        let dst_segments = normalize(dst)?;
        parent_and_name(&src_segments)?;
        let (dst_parent, dst_name) = parent_and_name(&dst_segments)?;

        let dst_parent_ref = self.resolver.resolve(dst_parent).await?;
        if !dst_parent_ref.is_folder {
            return Err(FsError::InvalidArgument(format!(
                "parent of {} is not a directory",
                dst
            )));
        }

        info!("Copying {} to {}", src, dst);
        let dst_parent_ref = &dst_parent_ref;
        let monitor_url = self
            .with_item(&src_segments, |item| async move {
                self.client
                    .copy_item(&item.id, &dst_parent_ref.id, dst_name)
                    .await
            })
            .await?;

        for _ in 0..COPY_POLL_ATTEMPTS {
            match self.client.poll_copy(&monitor_url).await? {
                CopyStatus::Completed { resource_id } => {
                    let record = self.client.get_item(&resource_id).await?;
                    self.resolver.register(&dst_segments, record.to_ref());
                    return Ok(to_file_info(&record));
                }
                CopyStatus::Failed(reason) => {
                    return Err(FsError::Conflict(format!("copy rejected: {}", reason)));
                }
                CopyStatus::InProgress => {
                    sleep(Duration::from_millis(self.config.retry_base_delay_ms)).await;
                }
            }
        }
        Err(FsError::Unavailable(format!(
            "copy of {} did not complete within {} polls",
            src, COPY_POLL_ATTEMPTS
        )))
    }

    /// Update the created/modified timestamps, the only metadata the
    /// remote allows mutating. Other fields fail `InvalidArgument`
    /// before any request is issued.
    pub async fn set_times(
        &self,
        path: &str,
        created: Option<DateTime<Utc>>,
        modified: Option<DateTime<Utc>>,
    ) -> Result<FileInfo> {
        let segments = normalize(path)?;
        let patch = to_times_patch(created, modified)?;
        let patch = &patch;
        self.with_item(&segments, |item| async move {
            let record = self.client.patch_item(&item.id, patch).await?;
            Ok(to_file_info(&record))
        })
        .await
    }

    /// A delete observed as definitive (success, or the item already
    /// gone) must drop the cached subtree either way.
    fn invalidate_after_delete(&self, segments: &[String], result: &Result<()>) {
        match result {
            Ok(()) | Err(FsError::NotFound(_)) => self.resolver.invalidate(segments),
            Err(_) => {}
        }
    }
}
