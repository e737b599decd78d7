//! Translation between remote item records and canonical metadata.

use crate::error::{FsError, Result};
use crate::models::{DriveItem, FileInfo};
use chrono::{DateTime, Utc};

/// Timestamp format the service accepts in `fileSystemInfo` patches.
const GRAPH_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Parse a Graph timestamp. Unparseable values map to `None` rather
/// than failing the whole record.
fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Preferred content hash: sha256 when present, then quickXor, then
/// sha1 (which drive type reports which is plan-dependent).
fn preferred_hash(item: &DriveItem) -> Option<String> {
    let hashes = item.file.as_ref()?.hashes.as_ref()?;
    hashes
        .sha256
        .clone()
        .or_else(|| hashes.quick_xor.clone())
        .or_else(|| hashes.sha1.clone())
}

/// Convert a remote item record into a `FileInfo`.
///
/// Pure and total: every optional remote field degrades to an absent
/// value instead of an error.
pub fn to_file_info(item: &DriveItem) -> FileInfo {
    let is_dir = item.is_folder();
    FileInfo {
        name: item.name.clone().unwrap_or_default(),
        is_dir,
        size: if is_dir { 0 } else { item.size.unwrap_or(0) },
        created: parse_timestamp(item.created_date.as_deref()),
        modified: parse_timestamp(item.last_modified.as_deref()),
        content_hash: if is_dir { None } else { preferred_hash(item) },
        etag: item.etag.clone(),
        is_root: false,
    }
}

/// Build the `fileSystemInfo` patch body for the timestamp fields the
/// service allows mutating. Fails `InvalidArgument` when there is
/// nothing to set.
pub fn to_times_patch(
    created: Option<DateTime<Utc>>,
    modified: Option<DateTime<Utc>>,
) -> Result<serde_json::Value> {
    if created.is_none() && modified.is_none() {
        return Err(FsError::InvalidArgument(
            "no mutable metadata fields supplied".to_string(),
        ));
    }
    let mut fs_info = serde_json::Map::new();
    if let Some(created) = created {
        fs_info.insert(
            "createdDateTime".to_string(),
            serde_json::Value::String(created.format(GRAPH_TIME_FORMAT).to_string()),
        );
    }
    if let Some(modified) = modified {
        fs_info.insert(
            "lastModifiedDateTime".to_string(),
            serde_json::Value::String(modified.format(GRAPH_TIME_FORMAT).to_string()),
        );
    }
    Ok(serde_json::json!({ "fileSystemInfo": fs_info }))
}
