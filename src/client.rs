//! Typed Graph drive operations.
//!
//! `DriveClientApi` is the seam between the filesystem layers and the
//! remote service; the real `DriveClient` speaks HTTP through
//! [`HttpClient`], and tests substitute an in-memory implementation.

use crate::error::{translate_status, FsError, OpContext, Result};
use crate::http_client::{Body, HttpClient};
use crate::models::{
    ChunkRange, ChunkStatus, CopyStatus, DriveItem, DriveItemPage, UploadSessionResponse,
    WriteMode, ROOT_ID,
};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderValue, IF_MATCH, RANGE};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;

/// Remote calls the resolver, lister and content layers are built on.
#[async_trait]
pub trait DriveClientApi: Send + Sync {
    /// Fetch a single item record by ID.
    async fn get_item(&self, item_id: &str) -> Result<DriveItem>;

    /// Fetch one page of a directory listing. `next_link` continues a
    /// pagination sequence; `None` starts a fresh one.
    async fn list_children_page(
        &self,
        item_id: &str,
        next_link: Option<&str>,
    ) -> Result<DriveItemPage>;

    async fn create_folder(
        &self,
        parent_id: &str,
        name: &str,
        mode: &WriteMode,
    ) -> Result<DriveItem>;

    /// Single-request upload for payloads under the session threshold.
    async fn upload_small(
        &self,
        parent_id: &str,
        name: &str,
        data: &[u8],
        mode: &WriteMode,
    ) -> Result<DriveItem>;

    async fn create_upload_session(
        &self,
        parent_id: &str,
        name: &str,
        mode: &WriteMode,
    ) -> Result<UploadSessionResponse>;

    /// PUT one byte range against an upload session URL.
    async fn upload_chunk(
        &self,
        upload_url: &str,
        range: ChunkRange,
        total_size: u64,
        data: &[u8],
    ) -> Result<ChunkStatus>;

    /// Fetch file bytes from a pre-authenticated download URL,
    /// optionally limited to an inclusive byte range.
    async fn download(&self, download_url: &str, range: Option<(u64, u64)>) -> Result<Vec<u8>>;

    async fn delete_item(&self, item_id: &str) -> Result<()>;

    /// Re-parent and/or rename an item. Returns the updated record.
    async fn move_item(
        &self,
        item_id: &str,
        new_parent_id: &str,
        new_name: &str,
    ) -> Result<DriveItem>;

    /// Start a server-side copy. Returns the monitor URL to poll.
    async fn copy_item(
        &self,
        item_id: &str,
        new_parent_id: &str,
        new_name: &str,
    ) -> Result<String>;

    async fn poll_copy(&self, monitor_url: &str) -> Result<CopyStatus>;

    /// PATCH mutable metadata fields. Returns the updated record.
    async fn patch_item(&self, item_id: &str, patch: &serde_json::Value) -> Result<DriveItem>;
}

/// ID-addressed endpoint for an item; the root uses its alias path.
fn item_url(item_id: &str) -> String {
    if item_id == ROOT_ID {
        "/me/drive/root".to_string()
    } else {
        format!("/me/drive/items/{}", item_id)
    }
}

/// Path-addressed endpoint for a child of `parent_id`, used by the
/// upload family (`:/name:/content`, `:/name:/createUploadSession`).
fn child_url(parent_id: &str, name: &str, suffix: &str) -> String {
    let encoded = urlencoding::encode(name);
    if parent_id == ROOT_ID {
        format!("/me/drive/root:/{}:/{}", encoded, suffix)
    } else {
        format!("/me/drive/items/{}:/{}:/{}", parent_id, encoded, suffix)
    }
}

/// Body of an intermediate (202) chunk response.
#[derive(Debug, Deserialize)]
struct UploadSessionProgress {
    #[serde(rename = "nextExpectedRanges", default)]
    next_expected_ranges: Vec<String>,
}

/// Body of a copy monitor response.
#[derive(Debug, Deserialize)]
struct CopyMonitor {
    #[serde(default)]
    status: String,
    #[serde(rename = "resourceId")]
    resource_id: Option<String>,
    #[serde(rename = "statusDescription")]
    status_description: Option<String>,
}

pub struct DriveClient {
    http: HttpClient,
}

impl DriveClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Decode a successful response, or translate the failure using
    /// the operation context.
    async fn parse_json<T: serde::de::DeserializeOwned>(
        response: Response,
        ctx: OpContext,
        what: &str,
    ) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| FsError::Integrity(format!("malformed {} payload: {}", what, e)))
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(translate_status(status.as_u16(), &detail, ctx))
        }
    }

    async fn fail_from(response: Response, ctx: OpContext) -> FsError {
        let status = response.status().as_u16();
        let detail = response.text().await.unwrap_or_default();
        translate_status(status, &detail, ctx)
    }
}

#[async_trait]
impl DriveClientApi for DriveClient {
    async fn get_item(&self, item_id: &str) -> Result<DriveItem> {
        let response = self
            .http
            .send(Method::GET, &item_url(item_id), HeaderMap::new(), Body::Empty)
            .await?;
        Self::parse_json(response, OpContext::Read, "drive item").await
    }

    async fn list_children_page(
        &self,
        item_id: &str,
        next_link: Option<&str>,
    ) -> Result<DriveItemPage> {
        let endpoint = match next_link {
            Some(link) => link.to_string(),
            None => format!("{}/children", item_url(item_id)),
        };
        debug!("Listing children page: {}", endpoint);
        let response = self
            .http
            .send(Method::GET, &endpoint, HeaderMap::new(), Body::Empty)
            .await?;
        Self::parse_json(response, OpContext::Read, "children page").await
    }

    async fn create_folder(
        &self,
        parent_id: &str,
        name: &str,
        mode: &WriteMode,
    ) -> Result<DriveItem> {
        let endpoint = format!("{}/children", item_url(parent_id));
        let body = serde_json::json!({
            "name": name,
            "folder": {},
            "@microsoft.graph.conflictBehavior": mode.conflict_behavior(),
        });
        info!("Creating folder {:?} in {}", name, parent_id);
        let response = self
            .http
            .send(Method::POST, &endpoint, HeaderMap::new(), Body::Json(body))
            .await?;
        Self::parse_json(response, OpContext::Create, "created folder").await
    }

    async fn upload_small(
        &self,
        parent_id: &str,
        name: &str,
        data: &[u8],
        mode: &WriteMode,
    ) -> Result<DriveItem> {
        let endpoint = format!(
            "{}?@microsoft.graph.conflictBehavior={}",
            child_url(parent_id, name, "content"),
            mode.conflict_behavior()
        );
        let mut headers = HeaderMap::new();
        if let Some(etag) = mode.if_match() {
            headers.insert(
                IF_MATCH,
                HeaderValue::from_str(etag)
                    .map_err(|_| FsError::InvalidArgument("etag is not header-safe".into()))?,
            );
        }
        info!("Uploading {} bytes to {:?} in {}", data.len(), name, parent_id);
        let response = self
            .http
            .send(Method::PUT, &endpoint, headers, Body::Bytes(data.to_vec()))
            .await?;
        Self::parse_json(response, OpContext::Create, "uploaded item").await
    }

    async fn create_upload_session(
        &self,
        parent_id: &str,
        name: &str,
        mode: &WriteMode,
    ) -> Result<UploadSessionResponse> {
        let endpoint = child_url(parent_id, name, "createUploadSession");
        let body = serde_json::json!({
            "item": {
                "@microsoft.graph.conflictBehavior": mode.conflict_behavior(),
                "name": name,
            }
        });
        let mut headers = HeaderMap::new();
        if let Some(etag) = mode.if_match() {
            headers.insert(
                IF_MATCH,
                HeaderValue::from_str(etag)
                    .map_err(|_| FsError::InvalidArgument("etag is not header-safe".into()))?,
            );
        }
        info!("Creating upload session for {:?} in {}", name, parent_id);
        let response = self
            .http
            .send(Method::POST, &endpoint, headers, Body::Json(body))
            .await?;
        let session: UploadSessionResponse =
            Self::parse_json(response, OpContext::Create, "upload session").await?;
        debug!("Upload session created: {}", session.upload_url);
        Ok(session)
    }

    async fn upload_chunk(
        &self,
        upload_url: &str,
        range: ChunkRange,
        total_size: u64,
        data: &[u8],
    ) -> Result<ChunkStatus> {
        let mut headers = HeaderMap::new();
        let content_range = format!("bytes {}-{}/{}", range.start, range.end, total_size);
        headers.insert(
            "Content-Range",
            HeaderValue::from_str(&content_range)
                .map_err(|_| FsError::InvalidArgument("bad content range".into()))?,
        );
        let response = self
            .http
            .send_unauthenticated(Method::PUT, upload_url, headers, Body::Bytes(data.to_vec()))
            .await?;
        match response.status() {
            StatusCode::ACCEPTED => {
                let progress: UploadSessionProgress = response.json().await.map_err(|e| {
                    FsError::Integrity(format!("malformed upload progress payload: {}", e))
                })?;
                Ok(ChunkStatus::Accepted {
                    next_expected_ranges: progress.next_expected_ranges,
                })
            }
            status if status.is_success() => {
                let item: DriveItem = response.json().await.map_err(|e| {
                    FsError::Integrity(format!("malformed final upload payload: {}", e))
                })?;
                Ok(ChunkStatus::Complete(Box::new(item)))
            }
            _ => Err(Self::fail_from(response, OpContext::Create).await),
        }
    }

    async fn download(&self, download_url: &str, range: Option<(u64, u64)>) -> Result<Vec<u8>> {
        let mut headers = HeaderMap::new();
        if let Some((start, end)) = range {
            let value = format!("bytes={}-{}", start, end);
            headers.insert(
                RANGE,
                HeaderValue::from_str(&value)
                    .map_err(|_| FsError::InvalidArgument("bad byte range".into()))?,
            );
        }
        let response = self
            .http
            .send_unauthenticated(Method::GET, download_url, headers, Body::Empty)
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail_from(response, OpContext::Read).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn delete_item(&self, item_id: &str) -> Result<()> {
        let response = self
            .http
            .send(Method::DELETE, &item_url(item_id), HeaderMap::new(), Body::Empty)
            .await?;
        if response.status().is_success() {
            info!("Deleted item {}", item_id);
            Ok(())
        } else {
            Err(Self::fail_from(response, OpContext::Mutate).await)
        }
    }

    async fn move_item(
        &self,
        item_id: &str,
        new_parent_id: &str,
        new_name: &str,
    ) -> Result<DriveItem> {
        let body = serde_json::json!({
            "parentReference": { "id": new_parent_id },
            "name": new_name,
        });
        info!("Moving {} to parent {} as {:?}", item_id, new_parent_id, new_name);
        let response = self
            .http
            .send(Method::PATCH, &item_url(item_id), HeaderMap::new(), Body::Json(body))
            .await?;
        Self::parse_json(response, OpContext::Mutate, "moved item").await
    }

    async fn copy_item(
        &self,
        item_id: &str,
        new_parent_id: &str,
        new_name: &str,
    ) -> Result<String> {
        let endpoint = format!("{}/copy", item_url(item_id));
        let body = serde_json::json!({
            "parentReference": { "id": new_parent_id },
            "name": new_name,
        });
        info!("Copying {} to parent {} as {:?}", item_id, new_parent_id, new_name);
        let response = self
            .http
            .send(Method::POST, &endpoint, HeaderMap::new(), Body::Json(body))
            .await?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(Self::fail_from(response, OpContext::Mutate).await);
        }
        response
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                FsError::Integrity("copy accepted without a monitor location".to_string())
            })
    }

    async fn poll_copy(&self, monitor_url: &str) -> Result<CopyStatus> {
        // The monitor URL is pre-authenticated and rejects bearer headers.
        let response = self
            .http
            .send_unauthenticated(Method::GET, monitor_url, HeaderMap::new(), Body::Empty)
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail_from(response, OpContext::Read).await);
        }
        let monitor: CopyMonitor = response
            .json()
            .await
            .map_err(|e| FsError::Integrity(format!("malformed copy monitor payload: {}", e)))?;
        match monitor.status.as_str() {
            "completed" => match monitor.resource_id {
                Some(resource_id) => Ok(CopyStatus::Completed { resource_id }),
                None => Err(FsError::Integrity(
                    "copy completed without a resource id".to_string(),
                )),
            },
            "failed" => Ok(CopyStatus::Failed(
                monitor.status_description.unwrap_or_default(),
            )),
            _ => Ok(CopyStatus::InProgress),
        }
    }

    async fn patch_item(&self, item_id: &str, patch: &serde_json::Value) -> Result<DriveItem> {
        let response = self
            .http
            .send(
                Method::PATCH,
                &item_url(item_id),
                HeaderMap::new(),
                Body::Json(patch.clone()),
            )
            .await?;
        Self::parse_json(response, OpContext::Mutate, "patched item").await
    }
}
