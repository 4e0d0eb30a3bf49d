//! Two-stage resolution: page tokens to gallery tokens, then gallery tokens
//! to metadata.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::api::{ApiEntry, EntryError, GalleryApi};
use super::types::{ExtractionResult, GalleryMetadata};

/// Resolves extracted links into gallery metadata.
///
/// Failures never propagate: a failed remote call counts as an empty
/// response and a failed entry only removes its own gallery from the output.
#[derive(Clone)]
pub struct GalleryResolver {
    api: Arc<dyn GalleryApi>,
}

impl GalleryResolver {
    /// Creates a resolver backed by `api`.
    #[must_use]
    pub fn new(api: Arc<dyn GalleryApi>) -> Self {
        Self { api }
    }

    /// Resolves `extraction` into metadata, in the order links first appeared.
    pub async fn resolve(&self, mut extraction: ExtractionResult) -> Vec<GalleryMetadata> {
        self.resolve_pages(&mut extraction).await;

        let resolved = extraction.resolved();
        if resolved.is_empty() {
            debug!("No resolvable galleries left, skipping metadata request");
            return Vec::new();
        }

        let entries = match self.api.gallery_metadata(&resolved).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Metadata request for {} galleries failed: {}", resolved.len(), e);
                return Vec::new();
            }
        };

        let mut by_gid: HashMap<u64, GalleryMetadata> = HashMap::with_capacity(entries.len());
        for entry in entries {
            match entry {
                ApiEntry::Found(meta) => {
                    by_gid.entry(meta.gid).or_insert(meta);
                }
                ApiEntry::Failed(err) => log_entry_error("gdata", &err),
            }
        }

        // Response order is not guaranteed, so re-associate by gid.
        resolved
            .iter()
            .filter_map(|g| by_gid.remove(&g.gid))
            .collect()
    }

    /// Fills in tokens for page links that have no direct link in the message.
    async fn resolve_pages(&self, extraction: &mut ExtractionResult) {
        let pending = extraction.pending_pages();
        if pending.is_empty() {
            return;
        }

        let entries = match self.api.gallery_tokens(&pending).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Token request for {} pages failed: {}", pending.len(), e);
                return;
            }
        };

        for entry in entries {
            match entry {
                ApiEntry::Found(resolved) => {
                    if let Some(slot) = extraction.refs.get_mut(&resolved.gid) {
                        *slot = Some(resolved.token);
                    } else {
                        debug!("Ignoring token for unrequested gallery {}", resolved.gid);
                    }
                }
                ApiEntry::Failed(err) => log_entry_error("gtoken", &err),
            }
        }
    }
}

fn log_entry_error(method: &str, err: &EntryError) {
    let gid = err
        .gid
        .as_ref()
        .map_or_else(|| "?".to_string(), ToString::to_string);
    warn!("{} entry for gallery {} errored with `{}`", method, gid, err.error);
}
