//! Path to item-reference resolution with the ID cache.
//!
//! The cache is the only cross-call state in the adapter. It maps
//! case-folded absolute paths to `ItemRef`s, trading staleness risk
//! for fewer remote traversals. The resolver owns the cache
//! exclusively; structural operations call back into `invalidate` /
//! `register` so no other component ever holds a reference the cache
//! does not know about.

use crate::error::{FsError, Result};
use crate::listing::DirectoryLister;
use crate::models::ItemRef;
use crate::path_utils::{cache_key, join, names_equal};
use log::debug;
use std::collections::HashMap;
use std::sync::RwLock;

pub struct PathResolver {
    lister: DirectoryLister,
    // Coarse single lock over the whole cache; lock scopes never span
    // an await.
    cache: RwLock<HashMap<String, ItemRef>>,
}

impl PathResolver {
    pub fn new(lister: DirectoryLister) -> Self {
        Self {
            lister,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve normalized path segments to an item reference.
    ///
    /// Walks from the deepest cached ancestor, listing one directory
    /// per uncached segment and caching every segment it resolves.
    /// The root resolves without any remote call.
    pub async fn resolve(&self, segments: &[String]) -> Result<ItemRef> {
        if segments.is_empty() {
            return Ok(ItemRef::root());
        }

        // Deepest cached prefix, if any.
        let mut depth = segments.len();
        let mut current: Option<ItemRef> = None;
        {
            let cache = self.cache.read().unwrap();
            while depth > 0 {
                if let Some(cached) = cache.get(&cache_key(&segments[..depth])) {
                    current = Some(cached.clone());
                    break;
                }
                depth -= 1;
            }
        }
        let mut current = current.unwrap_or_else(ItemRef::root);

        for level in depth..segments.len() {
            if !current.is_folder {
                return Err(FsError::NotFound(format!(
                    "{} is not a directory",
                    join(&segments[..level])
                )));
            }
            current = self.resolve_child(&current, &segments[..=level]).await?;
        }
        Ok(current)
    }

    /// Resolve one child by name within `parent`, caching the result.
    async fn resolve_child(&self, parent: &ItemRef, prefix: &[String]) -> Result<ItemRef> {
        let name = prefix.last().map(String::as_str).unwrap_or_default();
        let children = self.lister.list_children(parent).await?;

        let mut matched: Option<ItemRef> = None;
        for child in &children {
            let child_name = child.name.as_deref().unwrap_or_default();
            if names_equal(child_name, name) {
                if matched.is_some() {
                    // Should not occur server-side; refuse to guess.
                    return Err(FsError::Integrity(format!(
                        "duplicate entries named {:?} in {}",
                        name,
                        join(&prefix[..prefix.len() - 1])
                    )));
                }
                matched = Some(child.to_ref());
            }
        }

        match matched {
            Some(item_ref) => {
                self.cache
                    .write()
                    .unwrap()
                    .insert(cache_key(prefix), item_ref.clone());
                Ok(item_ref)
            }
            None => Err(FsError::NotFound(join(prefix))),
        }
    }

    /// Insert a known-fresh entry right after a create or move, so the
    /// next lookup skips the remote traversal.
    pub fn register(&self, segments: &[String], item_ref: ItemRef) {
        if segments.is_empty() {
            return; // the root is implicit
        }
        self.cache
            .write()
            .unwrap()
            .insert(cache_key(segments), item_ref);
    }

    /// Drop the entry for a path and every descendant entry; their
    /// parent linkage is no longer trustworthy after a structural
    /// change.
    pub fn invalidate(&self, segments: &[String]) {
        let key = cache_key(segments);
        let subtree_prefix = if key == "/" {
            "/".to_string()
        } else {
            format!("{}/", key)
        };
        let mut cache = self.cache.write().unwrap();
        let before = cache.len();
        cache.retain(|k, _| k != &key && !k.starts_with(&subtree_prefix));
        debug!(
            "Invalidated {} cache entries under {}",
            before - cache.len(),
            key
        );
    }
}
