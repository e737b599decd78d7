//! Wire types for the Graph drive API and the adapter's own records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel ID for the drive root. Resolving "/" never touches the
/// network; the client layer maps this ID to the `/me/drive/root`
/// endpoint family.
pub const ROOT_ID: &str = "root";

/// ParentReference: parent linkage of a drive item.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Default)]
pub struct ParentReference {
    #[serde(default)]
    pub id: String,
    pub path: Option<String>,
}

/// DriveItem: one remote file or folder record.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DriveItem {
    #[serde(default)]
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "eTag")]
    pub etag: Option<String>,
    #[serde(rename = "cTag")]
    pub ctag: Option<String>,
    #[serde(rename = "lastModifiedDateTime")]
    pub last_modified: Option<String>,
    #[serde(rename = "createdDateTime")]
    pub created_date: Option<String>,
    pub size: Option<u64>,
    pub folder: Option<FolderFacet>,
    pub file: Option<FileFacet>,
    #[serde(rename = "@microsoft.graph.downloadUrl")]
    pub download_url: Option<String>,
    pub deleted: Option<DeletedFacet>,
    #[serde(rename = "parentReference")]
    pub parent_reference: Option<ParentReference>,
}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }

    /// Lightweight reference for the path cache.
    pub fn to_ref(&self) -> ItemRef {
        ItemRef {
            id: self.id.clone(),
            parent_id: self.parent_reference.as_ref().map(|p| p.id.clone()),
            is_folder: self.is_folder(),
        }
    }
}

/// FolderFacet: present on directories.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FolderFacet {
    #[serde(rename = "childCount", default)]
    pub child_count: u32,
}

/// FileFacet: present on regular files.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FileFacet {
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
    pub hashes: Option<Hashes>,
}

/// Content hashes the service reports for a file.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Hashes {
    #[serde(rename = "sha1Hash")]
    pub sha1: Option<String>,
    #[serde(rename = "sha256Hash")]
    pub sha256: Option<String>,
    #[serde(rename = "quickXorHash")]
    pub quick_xor: Option<String>,
}

/// DeletedFacet: present on tombstones.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeletedFacet {
    pub state: String,
}

/// One page of a children listing.
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct DriveItemPage {
    #[serde(default)]
    pub value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// Opaque reference to exactly one remote object.
///
/// Immutable once obtained. A path may map to a different `ItemRef`
/// after a structural change, so the resolver invalidates cached
/// references instead of mutating them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRef {
    pub id: String,
    /// `None` only for the drive root.
    pub parent_id: Option<String>,
    pub is_folder: bool,
}

impl ItemRef {
    pub fn root() -> Self {
        Self {
            id: ROOT_ID.to_string(),
            parent_id: None,
            is_folder: true,
        }
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_ID
    }
}

/// Canonical, provider-agnostic metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub is_dir: bool,
    /// Bytes; 0 for directories.
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    /// Preferred remote content hash, when the service reports one.
    pub content_hash: Option<String>,
    /// Version tag for conditional replacement ([`WriteMode::ReplaceIfMatch`]).
    pub etag: Option<String>,
    pub is_root: bool,
}

/// Overwrite policy for write-style operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with `AlreadyExists` when an item of that name is present.
    FailIfExists,
    /// Replace whatever is there.
    Overwrite,
    /// Replace only if the existing item's ETag still matches.
    ReplaceIfMatch(String),
}

impl WriteMode {
    /// Value for the `@microsoft.graph.conflictBehavior` annotation.
    pub fn conflict_behavior(&self) -> &'static str {
        match self {
            WriteMode::FailIfExists => "fail",
            WriteMode::Overwrite | WriteMode::ReplaceIfMatch(_) => "replace",
        }
    }

    /// ETag for the `If-Match` precondition, when conditional.
    pub fn if_match(&self) -> Option<&str> {
        match self {
            WriteMode::ReplaceIfMatch(etag) => Some(etag),
            _ => None,
        }
    }
}

/// Upload session response from the service.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UploadSessionResponse {
    #[serde(rename = "uploadUrl")]
    pub upload_url: String,
    #[serde(rename = "expirationDateTime")]
    pub expiration_date_time: Option<String>,
}

/// Outcome of one chunk PUT against an upload session.
#[derive(Debug, Clone)]
pub enum ChunkStatus {
    /// 202: the session recorded the range and expects more.
    Accepted {
        next_expected_ranges: Vec<String>,
    },
    /// 200/201 on the final chunk: the item has been materialized.
    Complete(Box<DriveItem>),
}

/// Ephemeral chunked-upload state, owned by a single write call.
///
/// Never persisted; an abandoned session is left for server-side
/// expiry rather than resumed by a later call.
#[derive(Debug)]
pub struct UploadSession {
    pub upload_url: String,
    pub total_size: u64,
    pub bytes_committed: u64,
}

/// Status of an asynchronous server-side copy.
#[derive(Debug, Clone)]
pub enum CopyStatus {
    InProgress,
    Completed { resource_id: String },
    Failed(String),
}

/// Byte range of one upload chunk (inclusive bounds, service style).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    /// Inclusive bounds, so a range always covers at least one byte.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Split a payload of `total` bytes into aligned inclusive ranges.
pub fn split_into_chunks(total: u64, chunk_size: u64) -> Vec<ChunkRange> {
    let mut chunks = Vec::new();
    let mut start = 0u64;
    while start < total {
        let end = std::cmp::min(start + chunk_size - 1, total - 1);
        chunks.push(ChunkRange { start, end });
        start = end + 1;
    }
    chunks
}
