//! Paginated directory enumeration.

use crate::client::DriveClientApi;
use crate::error::Result;
use crate::models::{DriveItem, ItemRef};
use log::debug;
use std::collections::HashSet;
use std::sync::Arc;

/// Enumerates the children of a directory, following continuation
/// links until the sequence ends.
///
/// Each call starts a fresh pagination sequence; no cursor state
/// survives across calls. Under eventual consistency the service may
/// repeat an item across adjacent pages, so results are de-duplicated
/// by item ID within one logical listing.
pub struct DirectoryLister {
    client: Arc<dyn DriveClientApi>,
}

impl DirectoryLister {
    pub fn new(client: Arc<dyn DriveClientApi>) -> Self {
        Self { client }
    }

    pub async fn list_children(&self, dir: &ItemRef) -> Result<Vec<DriveItem>> {
        let mut items = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut next_link: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page = self
                .client
                .list_children_page(&dir.id, next_link.as_deref())
                .await?;
            pages += 1;
            for item in page.value {
                if seen.insert(item.id.clone()) {
                    items.push(item);
                }
            }
            match page.next_link {
                Some(link) => next_link = Some(link),
                None => break,
            }
        }
        debug!("Listed {} children of {} over {} pages", items.len(), dir.id, pages);
        Ok(items)
    }
}
