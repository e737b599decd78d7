//! In-memory drive backing `DriveClientApi` for integration tests.
//!
//! Holds a real item tree (IDs, parent links, content bytes) so the
//! adapter's path resolution, pagination, caching and upload logic can
//! be exercised end to end without HTTP. Failures are scriptable per
//! operation and calls are counted so tests can assert how often the
//! adapter actually went to the "network".

#![allow(dead_code)]

use async_trait::async_trait;
use onedrive_fs::client::DriveClientApi;
use onedrive_fs::error::{FsError, Result};
use onedrive_fs::models::{
    ChunkRange, ChunkStatus, CopyStatus, DriveItem, DriveItemPage, FileFacet, FolderFacet,
    Hashes, ParentReference, UploadSessionResponse, WriteMode, ROOT_ID,
};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

const MOCK_TIME: &str = "2024-01-01T00:00:00Z";

#[derive(Debug, Clone)]
struct MockNode {
    id: String,
    name: String,
    parent: Option<String>,
    folder: bool,
    content: Vec<u8>,
    children: Vec<String>,
    etag: u64,
    created: String,
    modified: String,
    corrupt_hash: bool,
}

#[derive(Debug)]
struct MockSession {
    parent: String,
    name: String,
    behavior: String,
    buffer: Vec<u8>,
    committed: u64,
}

#[derive(Debug)]
struct CopyJob {
    outcome: std::result::Result<String, String>,
    polls_remaining: u32,
}

#[derive(Default)]
struct MockState {
    items: HashMap<String, MockNode>,
    sessions: HashMap<String, MockSession>,
    copies: HashMap<String, CopyJob>,
    fail_queue: HashMap<String, VecDeque<FsError>>,
    chunk_failures: HashMap<usize, FsError>,
    chunk_calls: usize,
    calls: HashMap<String, usize>,
    next_id: u64,
    page_size: usize,
    duplicate_page_boundary: bool,
    copy_polls: u32,
}

/// Mock implementation of `DriveClientApi` over an in-memory tree.
#[derive(Clone)]
pub struct MockDriveClient {
    state: Arc<Mutex<MockState>>,
}

impl MockDriveClient {
    pub fn new() -> Self {
        let mut state = MockState {
            page_size: 200,
            copy_polls: 1,
            ..Default::default()
        };
        state.items.insert(
            ROOT_ID.to_string(),
            MockNode {
                id: ROOT_ID.to_string(),
                name: "root".to_string(),
                parent: None,
                folder: true,
                content: Vec::new(),
                children: Vec::new(),
                etag: 0,
                created: MOCK_TIME.to_string(),
                modified: MOCK_TIME.to_string(),
                corrupt_hash: false,
            },
        );
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Children per listing page; small values force pagination.
    pub fn set_page_size(&self, size: usize) {
        self.state.lock().unwrap().page_size = size;
    }

    /// Repeat the last item of the previous page at the start of the
    /// next, as eventually-consistent listings sometimes do.
    pub fn set_duplicate_page_boundary(&self, duplicate: bool) {
        self.state.lock().unwrap().duplicate_page_boundary = duplicate;
    }

    /// How many times a copy monitor reports in-progress before done.
    pub fn set_copy_polls(&self, polls: u32) {
        self.state.lock().unwrap().copy_polls = polls;
    }

    /// Queue a failure for the next call of `op`.
    pub fn fail_next(&self, op: &str, err: FsError) {
        self.state
            .lock()
            .unwrap()
            .fail_queue
            .entry(op.to_string())
            .or_default()
            .push_back(err);
    }

    /// Fail the `n`-th `upload_chunk` call (1-based) across the test.
    pub fn fail_chunk(&self, nth: usize, err: FsError) {
        self.state.lock().unwrap().chunk_failures.insert(nth, err);
    }

    /// Report a bogus sha256 for this file from now on.
    pub fn corrupt_hash_of(&self, item_id: &str) {
        if let Some(node) = self.state.lock().unwrap().items.get_mut(item_id) {
            node.corrupt_hash = true;
        }
    }

    pub fn calls(&self, op: &str) -> usize {
        *self.state.lock().unwrap().calls.get(op).unwrap_or(&0)
    }

    /// Build a folder directly in the backing tree (bypasses the
    /// adapter, as if another client created it).
    pub fn add_folder(&self, parent_id: &str, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.insert_node(parent_id, name, true, Vec::new())
    }

    /// Build a file directly in the backing tree.
    pub fn add_file(&self, parent_id: &str, name: &str, content: &[u8]) -> String {
        let mut state = self.state.lock().unwrap();
        state.insert_node(parent_id, name, false, content.to_vec())
    }

    /// Remove an item directly, as if another client deleted it.
    pub fn remove_node(&self, item_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.detach_and_drop(item_id);
    }

    pub fn content_of(&self, item_id: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .items
            .get(item_id)
            .map(|n| n.content.clone())
    }

    pub fn id_of_child(&self, parent_id: &str, name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.child_by_name(parent_id, name).map(|n| n.id.clone())
    }
}

impl MockState {
    fn count(&mut self, op: &str) {
        *self.calls.entry(op.to_string()).or_insert(0) += 1;
    }

    fn scripted_failure(&mut self, op: &str) -> Option<FsError> {
        self.fail_queue.get_mut(op).and_then(|q| q.pop_front())
    }

    fn begin(&mut self, op: &str) -> Result<()> {
        self.count(op);
        match self.scripted_failure(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn fresh_id(&mut self) -> String {
        self.next_id += 1;
        format!("id-{}", self.next_id)
    }

    fn insert_node(&mut self, parent_id: &str, name: &str, folder: bool, content: Vec<u8>) -> String {
        let id = self.fresh_id();
        let node = MockNode {
            id: id.clone(),
            name: name.to_string(),
            parent: Some(parent_id.to_string()),
            folder,
            content,
            children: Vec::new(),
            etag: 1,
            created: MOCK_TIME.to_string(),
            modified: MOCK_TIME.to_string(),
            corrupt_hash: false,
        };
        self.items.insert(id.clone(), node);
        if let Some(parent) = self.items.get_mut(parent_id) {
            parent.children.push(id.clone());
        }
        id
    }

    fn child_by_name(&self, parent_id: &str, name: &str) -> Option<&MockNode> {
        let parent = self.items.get(parent_id)?;
        parent
            .children
            .iter()
            .filter_map(|id| self.items.get(id))
            .find(|n| n.name.to_lowercase() == name.to_lowercase())
    }

    fn detach_and_drop(&mut self, item_id: &str) {
        let Some(node) = self.items.remove(item_id) else {
            return;
        };
        if let Some(parent_id) = &node.parent {
            if let Some(parent) = self.items.get_mut(parent_id) {
                parent.children.retain(|id| id != item_id);
            }
        }
        for child in node.children {
            self.detach_and_drop(&child);
        }
    }

    fn to_drive_item(&self, node: &MockNode) -> DriveItem {
        let mut item = DriveItem {
            id: node.id.clone(),
            name: Some(node.name.clone()),
            etag: Some(format!("\"e{}\"", node.etag)),
            created_date: Some(node.created.clone()),
            last_modified: Some(node.modified.clone()),
            parent_reference: node.parent.as_ref().map(|p| ParentReference {
                id: p.clone(),
                path: None,
            }),
            ..Default::default()
        };
        if node.folder {
            item.folder = Some(FolderFacet {
                child_count: node.children.len() as u32,
            });
        } else {
            let sha256 = if node.corrupt_hash {
                "0000".to_string()
            } else {
                let digest = Sha256::digest(&node.content);
                digest.iter().map(|b| format!("{:02X}", b)).collect()
            };
            item.file = Some(FileFacet {
                mime_type: Some("application/octet-stream".to_string()),
                hashes: Some(Hashes {
                    sha256: Some(sha256),
                    ..Default::default()
                }),
            });
            item.size = Some(node.content.len() as u64);
            item.download_url = Some(format!("mock://content/{}", node.id));
        }
        item
    }

    /// Materialize an upload (simple or finalized session) into the
    /// tree, honoring the conflict behavior.
    fn commit_upload(
        &mut self,
        parent_id: &str,
        name: &str,
        behavior: &str,
        if_match: Option<&str>,
        content: Vec<u8>,
    ) -> Result<DriveItem> {
        if self.items.get(parent_id).map(|p| !p.folder).unwrap_or(true) {
            return Err(FsError::NotFound(format!("no folder {}", parent_id)));
        }
        let existing = self.child_by_name(parent_id, name).map(|n| n.id.clone());
        match existing {
            Some(id) => {
                if behavior == "fail" {
                    return Err(FsError::AlreadyExists(name.to_string()));
                }
                let current_etag = self
                    .items
                    .get(&id)
                    .map(|n| format!("\"e{}\"", n.etag))
                    .unwrap_or_default();
                if let Some(expected) = if_match {
                    if expected != current_etag {
                        return Err(FsError::Conflict(format!(
                            "etag mismatch: {} vs {}",
                            expected, current_etag
                        )));
                    }
                }
                let node = self.items.get_mut(&id).expect("existing child");
                if node.folder {
                    return Err(FsError::Conflict(format!("{} is a folder", name)));
                }
                node.content = content;
                node.etag += 1;
                node.modified = MOCK_TIME.to_string();
                let node = node.clone();
                Ok(self.to_drive_item(&node))
            }
            None => {
                let id = self.insert_node(parent_id, name, false, content);
                let node = self.items.get(&id).expect("fresh node").clone();
                Ok(self.to_drive_item(&node))
            }
        }
    }
}

#[async_trait]
impl DriveClientApi for MockDriveClient {
    async fn get_item(&self, item_id: &str) -> Result<DriveItem> {
        let mut state = self.state.lock().unwrap();
        state.begin("get_item")?;
        match state.items.get(item_id) {
            Some(node) => Ok(state.to_drive_item(node)),
            None => Err(FsError::NotFound(format!("no item {}", item_id))),
        }
    }

    async fn list_children_page(
        &self,
        item_id: &str,
        next_link: Option<&str>,
    ) -> Result<DriveItemPage> {
        let mut state = self.state.lock().unwrap();
        state.begin("list_children_page")?;
        let node = state
            .items
            .get(item_id)
            .ok_or_else(|| FsError::NotFound(format!("no item {}", item_id)))?;
        if !node.folder {
            return Err(FsError::InvalidArgument(format!("{} is a file", item_id)));
        }

        let offset: usize = match next_link {
            Some(link) => link
                .rsplit('/')
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| FsError::Integrity(format!("bad continuation {}", link)))?,
            None => 0,
        };

        let children = node.children.clone();
        let end = (offset + state.page_size).min(children.len());
        let mut ids: Vec<String> = Vec::new();
        // Eventual consistency artifact: the first item of a
        // continuation page repeats the last of the previous one.
        if state.duplicate_page_boundary && offset > 0 {
            ids.push(children[offset - 1].clone());
        }
        ids.extend(children[offset..end].iter().cloned());

        let value = ids
            .iter()
            .filter_map(|id| state.items.get(id))
            .map(|n| state.to_drive_item(n))
            .collect();
        let next = if end < children.len() {
            Some(format!("mock://page/{}/{}", item_id, end))
        } else {
            None
        };
        Ok(DriveItemPage {
            value,
            next_link: next,
        })
    }

    async fn create_folder(
        &self,
        parent_id: &str,
        name: &str,
        mode: &WriteMode,
    ) -> Result<DriveItem> {
        let mut state = self.state.lock().unwrap();
        state.begin("create_folder")?;
        if state.items.get(parent_id).map(|p| !p.folder).unwrap_or(true) {
            return Err(FsError::NotFound(format!("no folder {}", parent_id)));
        }
        if let Some(existing) = state.child_by_name(parent_id, name) {
            if mode.conflict_behavior() == "fail" {
                return Err(FsError::AlreadyExists(name.to_string()));
            }
            let existing = existing.clone();
            return Ok(state.to_drive_item(&existing));
        }
        let id = state.insert_node(parent_id, name, true, Vec::new());
        let node = state.items.get(&id).expect("fresh folder").clone();
        Ok(state.to_drive_item(&node))
    }

    async fn upload_small(
        &self,
        parent_id: &str,
        name: &str,
        data: &[u8],
        mode: &WriteMode,
    ) -> Result<DriveItem> {
        let mut state = self.state.lock().unwrap();
        state.begin("upload_small")?;
        state.commit_upload(
            parent_id,
            name,
            mode.conflict_behavior(),
            mode.if_match(),
            data.to_vec(),
        )
    }

    async fn create_upload_session(
        &self,
        parent_id: &str,
        name: &str,
        mode: &WriteMode,
    ) -> Result<UploadSessionResponse> {
        let mut state = self.state.lock().unwrap();
        state.begin("create_upload_session")?;
        if state.items.get(parent_id).map(|p| !p.folder).unwrap_or(true) {
            return Err(FsError::NotFound(format!("no folder {}", parent_id)));
        }
        if mode.conflict_behavior() == "fail" && state.child_by_name(parent_id, name).is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }
        let url = format!("mock://upload/{}", state.fresh_id());
        state.sessions.insert(
            url.clone(),
            MockSession {
                parent: parent_id.to_string(),
                name: name.to_string(),
                behavior: mode.conflict_behavior().to_string(),
                buffer: Vec::new(),
                committed: 0,
            },
        );
        Ok(UploadSessionResponse {
            upload_url: url,
            expiration_date_time: Some(MOCK_TIME.to_string()),
        })
    }

    async fn upload_chunk(
        &self,
        upload_url: &str,
        range: ChunkRange,
        total_size: u64,
        data: &[u8],
    ) -> Result<ChunkStatus> {
        let mut state = self.state.lock().unwrap();
        state.begin("upload_chunk")?;
        state.chunk_calls += 1;
        let call = state.chunk_calls;
        if let Some(err) = state.chunk_failures.remove(&call) {
            return Err(err);
        }

        let session = state
            .sessions
            .get_mut(upload_url)
            .ok_or_else(|| FsError::NotFound(format!("no session {}", upload_url)))?;
        if range.start != session.committed {
            return Err(FsError::Conflict(format!(
                "range {} does not continue committed offset {}",
                range.start, session.committed
            )));
        }
        session.buffer.extend_from_slice(data);
        session.committed = range.end + 1;

        if session.committed < total_size {
            let next = format!("{}-", session.committed);
            return Ok(ChunkStatus::Accepted {
                next_expected_ranges: vec![next],
            });
        }
        let session = state
            .sessions
            .remove(upload_url)
            .expect("session present above");
        let item = state.commit_upload(
            &session.parent,
            &session.name,
            &session.behavior,
            None,
            session.buffer,
        )?;
        Ok(ChunkStatus::Complete(Box::new(item)))
    }

    async fn download(&self, download_url: &str, range: Option<(u64, u64)>) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.begin("download")?;
        let id = download_url
            .strip_prefix("mock://content/")
            .ok_or_else(|| FsError::InvalidArgument(format!("bad url {}", download_url)))?;
        let node = state
            .items
            .get(id)
            .ok_or_else(|| FsError::NotFound(format!("no item {}", id)))?;
        match range {
            None => Ok(node.content.clone()),
            Some((start, end)) => {
                let start = start as usize;
                let end = (end as usize + 1).min(node.content.len());
                if start >= end {
                    return Err(FsError::InvalidArgument("range out of bounds".to_string()));
                }
                Ok(node.content[start..end].to_vec())
            }
        }
    }

    async fn delete_item(&self, item_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.begin("delete_item")?;
        if !state.items.contains_key(item_id) {
            return Err(FsError::NotFound(format!("no item {}", item_id)));
        }
        state.detach_and_drop(item_id);
        Ok(())
    }

    async fn move_item(
        &self,
        item_id: &str,
        new_parent_id: &str,
        new_name: &str,
    ) -> Result<DriveItem> {
        let mut state = self.state.lock().unwrap();
        state.begin("move_item")?;
        if !state.items.contains_key(item_id) {
            return Err(FsError::NotFound(format!("no item {}", item_id)));
        }
        if state
            .items
            .get(new_parent_id)
            .map(|p| !p.folder)
            .unwrap_or(true)
        {
            return Err(FsError::NotFound(format!("no folder {}", new_parent_id)));
        }
        if let Some(existing) = state.child_by_name(new_parent_id, new_name) {
            if existing.id != item_id {
                return Err(FsError::Conflict(format!(
                    "{} already exists in target",
                    new_name
                )));
            }
        }

        let old_parent = state.items.get(item_id).and_then(|n| n.parent.clone());
        if let Some(parent_id) = old_parent {
            if let Some(parent) = state.items.get_mut(&parent_id) {
                parent.children.retain(|id| id != item_id);
            }
        }
        if let Some(parent) = state.items.get_mut(new_parent_id) {
            if !parent.children.iter().any(|id| id == item_id) {
                parent.children.push(item_id.to_string());
            }
        }
        let node = state.items.get_mut(item_id).expect("checked above");
        node.parent = Some(new_parent_id.to_string());
        node.name = new_name.to_string();
        node.etag += 1;
        let node = node.clone();
        Ok(state.to_drive_item(&node))
    }

    async fn copy_item(
        &self,
        item_id: &str,
        new_parent_id: &str,
        new_name: &str,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.begin("copy_item")?;
        if !state.items.contains_key(item_id) {
            return Err(FsError::NotFound(format!("no item {}", item_id)));
        }
        let monitor = format!("mock://monitor/{}", state.fresh_id());
        let outcome = if state.child_by_name(new_parent_id, new_name).is_some() {
            Err("nameAlreadyExists".to_string())
        } else {
            let source = state.items.get(item_id).expect("checked above").clone();
            let new_id = state.insert_node(new_parent_id, new_name, source.folder, source.content);
            Ok(new_id)
        };
        let polls = state.copy_polls;
        state.copies.insert(
            monitor.clone(),
            CopyJob {
                outcome,
                polls_remaining: polls,
            },
        );
        Ok(monitor)
    }

    async fn poll_copy(&self, monitor_url: &str) -> Result<CopyStatus> {
        let mut state = self.state.lock().unwrap();
        state.begin("poll_copy")?;
        let job = state
            .copies
            .get_mut(monitor_url)
            .ok_or_else(|| FsError::NotFound(format!("no copy job {}", monitor_url)))?;
        if job.polls_remaining > 0 {
            job.polls_remaining -= 1;
            return Ok(CopyStatus::InProgress);
        }
        match &job.outcome {
            Ok(new_id) => Ok(CopyStatus::Completed {
                resource_id: new_id.clone(),
            }),
            Err(reason) => Ok(CopyStatus::Failed(reason.clone())),
        }
    }

    async fn patch_item(&self, item_id: &str, patch: &serde_json::Value) -> Result<DriveItem> {
        let mut state = self.state.lock().unwrap();
        state.begin("patch_item")?;
        let node = state
            .items
            .get_mut(item_id)
            .ok_or_else(|| FsError::NotFound(format!("no item {}", item_id)))?;
        if let Some(fs_info) = patch.get("fileSystemInfo") {
            if let Some(created) = fs_info.get("createdDateTime").and_then(|v| v.as_str()) {
                node.created = created.to_string();
            }
            if let Some(modified) = fs_info.get("lastModifiedDateTime").and_then(|v| v.as_str()) {
                node.modified = modified.to_string();
            }
        }
        node.etag += 1;
        let node = node.clone();
        Ok(state.to_drive_item(&node))
    }
}
