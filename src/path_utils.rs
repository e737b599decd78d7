//! Path normalization for the adapter's virtual tree.
//!
//! Remote items are addressed by ID; paths exist only on the client
//! side. Every public operation normalizes its path here before any
//! cache lookup or traversal happens.

use crate::error::{FsError, Result};

/// Split an absolute path into its segments.
///
/// Accepts a leading slash (required), collapses duplicate slashes,
/// and strips one trailing slash. `.` and `..` segments are rejected
/// rather than resolved, as are empty names and control characters.
/// The root path yields an empty segment list.
pub fn normalize(path: &str) -> Result<Vec<String>> {
    if !path.starts_with('/') {
        return Err(FsError::InvalidArgument(format!(
            "path must be absolute: {:?}",
            path
        )));
    }
    let mut segments = Vec::new();
    for segment in path.split('/') {
        if segment.is_empty() {
            continue;
        }
        if segment == "." || segment == ".." {
            return Err(FsError::InvalidArgument(format!(
                "path may not contain {:?}: {:?}",
                segment, path
            )));
        }
        if segment.chars().any(|c| c.is_control()) {
            return Err(FsError::InvalidArgument(format!(
                "path segment contains control characters: {:?}",
                path
            )));
        }
        segments.push(segment.to_string());
    }
    Ok(segments)
}

/// Re-join segments into a display path.
pub fn join(segments: &[String]) -> String {
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Cache key for a (possibly partial) segment prefix.
///
/// OneDrive name matching is case-insensitive and case-preserving, so
/// keys are folded with Unicode simple lowercasing.
pub fn cache_key(segments: &[String]) -> String {
    let folded: Vec<String> = segments.iter().map(|s| s.to_lowercase()).collect();
    format!("/{}", folded.join("/"))
}

/// Case-folded name comparison matching the provider's convention.
pub fn names_equal(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Split segments into (parent segments, final name).
///
/// Fails for the root path, which has no parent.
pub fn parent_and_name(segments: &[String]) -> Result<(&[String], &str)> {
    match segments.split_last() {
        Some((name, parent)) => Ok((parent, name)),
        None => Err(FsError::InvalidArgument(
            "operation not supported on the root directory".to_string(),
        )),
    }
}
