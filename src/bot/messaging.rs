//! Delivery of gallery responses to Telegram.
//!
//! Decides between one combined message and one message per gallery, splits
//! long bodies at the Telegram limit, and retries transient send failures.

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode};

use super::format::format_gallery;
use crate::gallery::GalleryMetadata;
use crate::utils;

/// Maximum message length for Telegram with safety margin.
/// Telegram's official limit is 4096, but we use 4000 to account for
/// HTML tags and other formatting that may be added.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4000;

/// How a list of galleries is laid out into messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// From this many galleries on, everything goes into one message
    pub inline_thresh: usize,
    /// From this many galleries on, blocks are collapsed
    pub collapse_thresh: usize,
}

impl Layout {
    /// Renders `galleries` into message bodies, ready to send in order.
    #[must_use]
    pub fn render(&self, galleries: &[GalleryMetadata]) -> Vec<String> {
        let count = galleries.len();
        if count == 0 {
            return Vec::new();
        }

        if count >= self.inline_thresh {
            let collapsed = count >= self.collapse_thresh;
            let body = galleries
                .iter()
                .map(|g| format_gallery(g, collapsed))
                .collect::<Vec<_>>()
                .join("\n\n");
            utils::split_long_message(&body, TELEGRAM_MESSAGE_LIMIT)
        } else {
            galleries
                .iter()
                .flat_map(|g| {
                    utils::split_long_message(&format_gallery(g, false), TELEGRAM_MESSAGE_LIMIT)
                })
                .collect()
        }
    }
}

/// Sends a message with automatic retry on network failures.
///
/// # Errors
///
/// Returns an error after all retries are exhausted.
pub async fn send_html_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: &str,
) -> Result<Message> {
    utils::retry_telegram_operation(|| async {
        bot.send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Sends every rendered part of a gallery response.
///
/// # Errors
///
/// Returns the first error that survives retries; later parts are not sent.
pub async fn send_galleries(
    bot: &Bot,
    chat_id: ChatId,
    layout: Layout,
    galleries: &[GalleryMetadata],
) -> Result<()> {
    for part in layout.render(galleries) {
        send_html_resilient(bot, chat_id, &part).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gallery(gid: u64) -> GalleryMetadata {
        GalleryMetadata {
            gid,
            token: "aaaaaaaaaa".to_string(),
            archiver_key: String::new(),
            title: format!("Gallery {gid}"),
            title_jpn: String::new(),
            category: "Manga".to_string(),
            thumb: String::new(),
            uploader: String::new(),
            posted: 0,
            filecount: 1,
            filesize: 0,
            expunged: false,
            rating: 5.0,
            torrentcount: 0,
            torrents: Vec::new(),
            tags: Vec::new(),
            parent_gid: None,
            parent_key: None,
            first_gid: None,
            first_key: None,
            current_gid: None,
            current_key: None,
        }
    }

    const LAYOUT: Layout = Layout {
        inline_thresh: 2,
        collapse_thresh: 3,
    };

    #[test]
    fn test_single_gallery_gets_its_own_message() {
        let parts = LAYOUT.render(&[gallery(1)]);
        assert_eq!(parts.len(), 1);
        assert!(!parts[0].contains("blockquote"));
    }

    #[test]
    fn test_inline_threshold_combines_messages() {
        let parts = LAYOUT.render(&[gallery(1), gallery(2)]);
        assert_eq!(parts.len(), 1);
        assert!(parts[0].contains("Gallery 1"));
        assert!(parts[0].contains("Gallery 2"));
        assert!(!parts[0].contains("blockquote"));
    }

    #[test]
    fn test_collapse_threshold() {
        let parts = LAYOUT.render(&[gallery(1), gallery(2), gallery(3)]);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].matches("<blockquote expandable>").count(), 3);
    }

    #[test]
    fn test_below_inline_threshold_sends_one_per_gallery() {
        let layout = Layout {
            inline_thresh: 10,
            collapse_thresh: 10,
        };
        let parts = layout.render(&[gallery(1), gallery(2), gallery(3)]);
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn test_oversized_galleries_keep_quotes_balanced() {
        let galleries: Vec<GalleryMetadata> = (1..=4)
            .map(|gid| {
                let mut g = gallery(gid);
                g.tags = (0..500)
                    .map(|i| format!("ns{}:a fairly long tag name number {i}", i % 50))
                    .collect();
                g
            })
            .collect();

        let parts = LAYOUT.render(&galleries);
        assert!(parts.len() > 1);
        for part in &parts {
            assert!(part.len() <= TELEGRAM_MESSAGE_LIMIT);
            assert_eq!(
                part.matches("<blockquote expandable>").count(),
                part.matches("</blockquote>").count()
            );
        }
    }

    #[test]
    fn test_empty_renders_nothing() {
        assert!(LAYOUT.render(&[]).is_empty());
    }
}
