//! Gallery identifiers and metadata records.
//!
//! The remote API is loose about numeric types: `posted`, `filecount`,
//! `rating` and most torrent sizes arrive as strings, while `gid` and
//! `filesize` are plain numbers. Every numeric field here accepts both.

use indexmap::IndexMap;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use crate::limits::Demand;

/// A gallery identifier whose token may still be unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryRef {
    /// Numeric gallery id
    pub gid: u64,
    /// Gallery token, `None` while page resolution is pending
    pub token: Option<String>,
}

impl GalleryRef {
    /// Returns the resolved pair if the token is known.
    #[must_use]
    pub fn resolved(&self) -> Option<GalleryToken> {
        self.token.as_ref().map(|token| GalleryToken {
            gid: self.gid,
            token: token.clone(),
        })
    }
}

/// A fully resolved `(gid, token)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryToken {
    /// Numeric gallery id
    #[serde(deserialize_with = "lenient")]
    pub gid: u64,
    /// Gallery token
    pub token: String,
}

impl GalleryToken {
    /// Creates a resolved pair.
    pub fn new(gid: u64, token: impl Into<String>) -> Self {
        Self {
            gid,
            token: token.into(),
        }
    }
}

/// A single page whose gallery token has to be looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRef {
    /// Numeric id of the containing gallery
    pub gid: u64,
    /// Token of the page itself
    pub page_token: String,
    /// Page number inside the gallery
    pub page: u32,
}

/// Everything found in one message.
///
/// `refs` keeps gids in first-seen order. Page links reserve their slot with
/// `None` so the final output follows the order of the message text even
/// though their tokens arrive later.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionResult {
    /// gid -> token, in order of first appearance
    pub refs: IndexMap<u64, Option<String>>,
    /// Pages needing a `gtoken` lookup, one per gid
    pub pages: Vec<PageRef>,
}

impl ExtractionResult {
    /// Returns `true` when there is nothing to resolve.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Number of distinct galleries referenced.
    #[must_use]
    pub fn gallery_count(&self) -> usize {
        self.refs.len()
    }

    /// Number of remote calls a full resolution will issue.
    #[must_use]
    pub fn api_calls(&self) -> u32 {
        if self.pending_pages().is_empty() {
            1
        } else {
            2
        }
    }

    /// Admission cost of resolving this extraction.
    #[must_use]
    pub fn demand(&self) -> Demand {
        Demand {
            galleries: u32::try_from(self.gallery_count()).unwrap_or(u32::MAX),
            api_calls: self.api_calls(),
        }
    }

    /// Iterates over all references in order.
    pub fn gallery_refs(&self) -> impl Iterator<Item = GalleryRef> + '_ {
        self.refs.iter().map(|(gid, token)| GalleryRef {
            gid: *gid,
            token: token.clone(),
        })
    }

    /// Resolved pairs in order, skipping gids whose token is unknown.
    #[must_use]
    pub fn resolved(&self) -> Vec<GalleryToken> {
        self.gallery_refs().filter_map(|r| r.resolved()).collect()
    }

    /// Pages whose gid has not been given a token by a direct link.
    #[must_use]
    pub fn pending_pages(&self) -> Vec<PageRef> {
        self.pages
            .iter()
            .filter(|p| !matches!(self.refs.get(&p.gid), Some(Some(_))))
            .cloned()
            .collect()
    }
}

/// A torrent attached to a gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Torrent {
    /// Info hash
    pub hash: String,
    /// Unix timestamp the torrent was added
    #[serde(deserialize_with = "lenient")]
    pub added: u64,
    /// Torrent name
    pub name: String,
    /// Torrent file size in bytes
    #[serde(deserialize_with = "lenient")]
    pub tsize: u64,
    /// Payload size in bytes
    #[serde(deserialize_with = "lenient")]
    pub fsize: u64,
}

/// Metadata of one gallery as returned by the `gdata` method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryMetadata {
    #[serde(deserialize_with = "lenient")]
    pub gid: u64,
    pub token: String,
    #[serde(default)]
    pub archiver_key: String,
    pub title: String,
    #[serde(default)]
    pub title_jpn: String,
    pub category: String,
    #[serde(default)]
    pub thumb: String,
    #[serde(default)]
    pub uploader: String,
    /// Upload time as a unix timestamp
    #[serde(deserialize_with = "lenient")]
    pub posted: i64,
    /// Page count
    #[serde(deserialize_with = "lenient")]
    pub filecount: u32,
    #[serde(default, deserialize_with = "lenient")]
    pub filesize: u64,
    #[serde(default)]
    pub expunged: bool,
    #[serde(deserialize_with = "lenient")]
    pub rating: f64,
    #[serde(default, deserialize_with = "lenient")]
    pub torrentcount: u32,
    #[serde(default)]
    pub torrents: Vec<Torrent>,
    /// Tags, namespaced as `namespace:tag` when `namespace=1` was requested
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "lenient_opt")]
    pub parent_gid: Option<u64>,
    #[serde(default)]
    pub parent_key: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt")]
    pub first_gid: Option<u64>,
    #[serde(default)]
    pub first_key: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt")]
    pub current_gid: Option<u64>,
    #[serde(default)]
    pub current_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText<T> {
    Number(T),
    Text(String),
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: Display,
{
    match NumberOrText::<T>::deserialize(deserializer)? {
        NumberOrText::Number(value) => Ok(value),
        NumberOrText::Text(text) => text.trim().parse().map_err(de::Error::custom),
    }
}

fn lenient_opt<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: Display,
{
    match Option::<NumberOrText<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Number(value)) => Ok(Some(value)),
        Some(NumberOrText::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(NumberOrText::Text(text)) => text.trim().parse().map(Some).map_err(de::Error::custom),
    }
}
