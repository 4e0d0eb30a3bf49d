//! Text helpers and retry utilities.

use anyhow::Result;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

/// Splits a message into parts of at most `max_length` bytes.
///
/// Parts are cut at blank lines between blocks where possible, then at line
/// breaks, and only as a last resort inside a line (on grapheme
/// boundaries). Each gallery block is kept whole when it fits.
///
/// # Examples
///
/// ```
/// use sadpanda::utils::split_long_message;
/// let long_msg = "A gallery block\nwith two lines\n\n".repeat(300);
/// let parts = split_long_message(&long_msg, 4000);
/// assert!(parts.len() > 1);
/// assert!(parts.iter().all(|p| p.len() <= 4000));
/// ```
#[must_use]
pub fn split_long_message(message: &str, max_length: usize) -> Vec<String> {
    if message.is_empty() {
        return Vec::new();
    }

    if message.len() <= max_length {
        return vec![message.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();

    for block in message.split("\n\n") {
        if current.len() + block.len() + 2 <= max_length {
            push_separated(&mut current, block, "\n\n");
            continue;
        }

        flush(&mut parts, &mut current);
        if block.len() <= max_length {
            current.push_str(block);
            continue;
        }

        for line in block.lines() {
            if current.len() + line.len() + 1 > max_length {
                flush(&mut parts, &mut current);
            }
            if line.len() <= max_length {
                push_separated(&mut current, line, "\n");
                continue;
            }

            // Split the long line by grapheme clusters (Unicode-safe)
            for grapheme in line.graphemes(true) {
                if current.len() + grapheme.len() > max_length {
                    flush(&mut parts, &mut current);
                }
                current.push_str(grapheme);
            }
        }
    }

    flush(&mut parts, &mut current);
    parts
}

fn push_separated(target: &mut String, text: &str, separator: &str) {
    if !target.is_empty() {
        target.push_str(separator);
    }
    target.push_str(text);
}

fn flush(parts: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim_end();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }
    current.clear();
}

/// Safely truncates a string to a maximum character length (not bytes).
///
/// This is UTF-8 safe and will not panic on multi-byte characters.
///
/// # Examples
///
/// ```
/// use sadpanda::utils::truncate_str;
/// let s = "東方Project";
/// assert_eq!(truncate_str(s, 2), "東方");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Retry a Telegram API operation with exponential backoff.
///
/// The retry strategy uses exponential backoff with jitter to avoid thundering herd:
/// - Initial delay: 500ms
/// - Max delay: 4s
/// - Max attempts: 3 (configurable via constants in `config.rs`)
///
/// # Errors
///
/// Returns the last error if all attempts fail.
///
/// # Examples
///
/// ```no_run
/// use sadpanda::utils::retry_telegram_operation;
/// use anyhow::Result;
///
/// async fn send() -> Result<()> {
///     Ok(())
/// }
///
/// # async fn example() -> Result<()> {
/// retry_telegram_operation(|| async { send().await }).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    use crate::config::{
        TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
    };

    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter) // Add jitter to prevent thundering herd
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Telegram API operation failed after {} attempts: {}",
            TELEGRAM_API_MAX_RETRIES, e
        );
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_truncate_str_unicode() {
        let s = "Привет, мир!";
        assert_eq!(truncate_str(s, 6), "Привет");
        assert_eq!(truncate_str(s, 100), s);
    }

    #[test]
    fn test_split_short_message_is_untouched() {
        assert_eq!(split_long_message("hello", 10), vec!["hello".to_string()]);
        assert!(split_long_message("", 10).is_empty());
    }

    #[test]
    fn test_split_keeps_blocks_whole() {
        let block = "title line\nsecond line";
        let message = [block; 5].join("\n\n");
        let parts = split_long_message(&message, 50);

        for part in &parts {
            assert!(part.len() <= 50);
            for chunk in part.split("\n\n") {
                assert_eq!(chunk, block);
            }
        }
        let total: usize = parts.iter().map(|p| p.split("\n\n").count()).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_split_oversized_block_by_lines() {
        let message = format!("{}\n{}", "a".repeat(30), "b".repeat(30));
        let parts = split_long_message(&message, 40);
        assert_eq!(parts, vec!["a".repeat(30), "b".repeat(30)]);
    }

    #[test]
    fn test_split_very_long_line() {
        let message = "ж".repeat(100);
        let parts = split_long_message(&message, 50);
        assert!(parts.len() >= 4);
        assert!(parts.iter().all(|p| p.len() <= 50));
        assert_eq!(parts.concat(), message);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let attempts = AtomicUsize::new(0);
        let result = retry_telegram_operation(|| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(anyhow::anyhow!("connection reset"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some(1));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
