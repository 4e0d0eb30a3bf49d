//! Gallery link extraction from free-form message text.

// lazy_regex! validates the pattern at compile time
#![allow(clippy::non_std_lazy_statics)]

use lazy_regex::lazy_regex;
use tracing::debug;

use super::types::{ExtractionResult, PageRef};

/// Maximum number of links accepted in one message.
///
/// The API takes at most 25 entries per request. Messages with more links
/// than that are treated as abuse and ignored entirely.
pub const BATCH_CEILING: usize = 25;

/// Gallery (`/g/`, `/mpv/`) and page (`/s/`) links on both hostnames.
static RE_GALLERY_LINK: lazy_regex::Lazy<regex::Regex> = lazy_regex!(
    r"(?i:https?)://e[-x]hentai\.org/(?:(?:g|mpv)/(?P<gid>\d+)/(?P<token>[\da-f]{10})|s/(?P<page_token>[\da-f]{10})/(?P<page_gid>\d+)-(?P<page>\d+))"
);

enum Link<'a> {
    Gallery { gid: u64, token: &'a str },
    Page(PageRef),
}

/// Scans message bodies for gallery links.
#[derive(Debug, Clone, Copy)]
pub struct LinkExtractor {
    ceiling: usize,
}

impl Default for LinkExtractor {
    fn default() -> Self {
        Self {
            ceiling: BATCH_CEILING,
        }
    }
}

impl LinkExtractor {
    /// Creates an extractor with the standard batch ceiling.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Extracts gallery references from `text`.
    ///
    /// Returns an empty result when there are no links or when the number of
    /// links exceeds the batch ceiling.
    ///
    /// # Examples
    ///
    /// ```
    /// use sadpanda::gallery::LinkExtractor;
    ///
    /// let result = LinkExtractor::new().extract("see https://exhentai.org/g/12345/abcdef0123/");
    /// assert_eq!(result.refs.get(&12345), Some(&Some("abcdef0123".to_string())));
    /// assert!(result.pages.is_empty());
    /// ```
    #[must_use]
    pub fn extract(&self, text: &str) -> ExtractionResult {
        let links: Vec<Link<'_>> = RE_GALLERY_LINK
            .captures_iter(text)
            .filter_map(|caps| parse_link(&caps))
            .collect();

        if links.len() > self.ceiling {
            debug!(
                "Ignoring message with {} links (ceiling is {})",
                links.len(),
                self.ceiling
            );
            return ExtractionResult::default();
        }

        let mut result = ExtractionResult::default();
        for link in links {
            match link {
                Link::Gallery { gid, token } => {
                    result.refs.insert(gid, Some(token.to_string()));
                }
                Link::Page(page) => {
                    if !result.refs.contains_key(&page.gid) {
                        // Reserve the slot now so output order follows the text.
                        result.refs.insert(page.gid, None);
                        result.pages.push(page);
                    }
                }
            }
        }
        result
    }
}

fn parse_link<'t>(caps: &regex::Captures<'t>) -> Option<Link<'t>> {
    if let (Some(gid), Some(token)) = (caps.name("gid"), caps.name("token")) {
        return Some(Link::Gallery {
            gid: gid.as_str().parse().ok()?,
            token: token.as_str(),
        });
    }

    let gid = caps.name("page_gid")?.as_str().parse().ok()?;
    let page = caps.name("page")?.as_str().parse().ok()?;
    let page_token = caps.name("page_token")?.as_str().to_string();
    Some(Link::Page(PageRef {
        gid,
        page_token,
        page,
    }))
}
