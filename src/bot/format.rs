//! Telegram HTML rendering of gallery metadata.

use chrono::DateTime;
use html_escape::{encode_double_quoted_attribute, encode_text};
use indexmap::IndexMap;

use crate::gallery::GalleryMetadata;

/// Namespace used for tags that carry none.
const MISC_NAMESPACE: &str = "misc";

/// Upper bound on one rendered gallery block, in bytes.
///
/// Kept below the Telegram message limit so a block is never split, which
/// would leave its HTML tags unbalanced.
pub const MAX_BLOCK_BYTES: usize = 3500;

const QUOTE_OPEN: &str = "<blockquote expandable>";
const QUOTE_CLOSE: &str = "</blockquote>";
const ELLIPSIS: &str = "…";

/// `1 page`, `2 pages`.
#[must_use]
pub fn pluralize(num: u32, word: &str) -> String {
    if num == 1 {
        format!("{num} {word}")
    } else {
        format!("{num} {word}s")
    }
}

/// Canonical gallery URL.
#[must_use]
pub fn gallery_url(gid: u64, token: &str) -> String {
    format!("https://exhentai.org/g/{gid}/{token}/")
}

/// Groups `namespace:tag` entries by namespace, in order of first appearance.
#[must_use]
pub fn group_tags(tags: &[String]) -> IndexMap<&str, Vec<&str>> {
    let mut grouped: IndexMap<&str, Vec<&str>> = IndexMap::new();
    for tag in tags {
        let (namespace, name) = tag
            .split_once(':')
            .unwrap_or((MISC_NAMESPACE, tag.as_str()));
        grouped.entry(namespace).or_default().push(name);
    }
    grouped
}

/// Renders tag groups until `budget` bytes are used; the rest is elided.
fn format_tags(tags: &[String], budget: usize) -> String {
    let mut out = String::new();
    for (namespace, names) in group_tags(tags) {
        let names: Vec<String> = names.iter().map(|n| encode_text(n).into_owned()).collect();
        let group = format!("<b>{}</b>\n{}", encode_text(namespace), names.join(", "));

        let separator = usize::from(!out.is_empty());
        // Leave room for a trailing ellipsis line.
        if out.len() + separator + group.len() + 1 + ELLIPSIS.len() > budget {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(ELLIPSIS);
            break;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&group);
    }
    out
}

fn format_posted(posted: i64) -> String {
    DateTime::from_timestamp(posted, 0).map_or_else(
        || posted.to_string(),
        |ts| ts.format("%Y-%m-%d %H:%M UTC").to_string(),
    )
}

/// Renders one gallery as a Telegram HTML block.
///
/// A collapsed block is wrapped in an expandable quote so long result lists
/// stay readable.
#[must_use]
pub fn format_gallery(gallery: &GalleryMetadata, collapsed: bool) -> String {
    let url = gallery_url(gallery.gid, &gallery.token);
    let mut lines = vec![format!(
        "<a href=\"{}\">{}</a>",
        encode_double_quoted_attribute(&url),
        encode_text(&gallery.title)
    )];

    if !gallery.title_jpn.is_empty() {
        lines.push(encode_text(&gallery.title_jpn).into_owned());
    }

    lines.push(format!(
        "{} | {} | {}★ | {}",
        encode_text(&gallery.category),
        pluralize(gallery.filecount, "page"),
        gallery.rating,
        format_posted(gallery.posted)
    ));

    if !gallery.tags.is_empty() {
        let used = lines.iter().map(|l| l.len() + 1).sum::<usize>()
            + QUOTE_OPEN.len()
            + QUOTE_CLOSE.len();
        lines.push(format_tags(
            &gallery.tags,
            MAX_BLOCK_BYTES.saturating_sub(used),
        ));
    }

    let body = lines.join("\n");
    if collapsed {
        format!("{QUOTE_OPEN}{body}{QUOTE_CLOSE}")
    } else {
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gallery() -> GalleryMetadata {
        GalleryMetadata {
            gid: 618_395,
            token: "0439fa3666".to_string(),
            archiver_key: String::new(),
            title: "TOUHOU <GUNMANIA> A2".to_string(),
            title_jpn: "東方 GUNMANIA A2".to_string(),
            category: "Non-H".to_string(),
            thumb: String::new(),
            uploader: "avexotsukaai".to_string(),
            posted: 1_376_143_500,
            filecount: 20,
            filesize: 0,
            expunged: false,
            rating: 4.43,
            torrentcount: 0,
            torrents: Vec::new(),
            tags: vec![
                "parody:touhou project".to_string(),
                "artbook".to_string(),
                "parody:other".to_string(),
            ],
            parent_gid: None,
            parent_key: None,
            first_gid: None,
            first_key: None,
            current_gid: None,
            current_key: None,
        }
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize(1, "page"), "1 page");
        assert_eq!(pluralize(0, "page"), "0 pages");
        assert_eq!(pluralize(20, "page"), "20 pages");
    }

    #[test]
    fn test_group_tags_keeps_first_appearance_order() {
        let g = gallery();
        let grouped = group_tags(&g.tags);
        let namespaces: Vec<&str> = grouped.keys().copied().collect();
        assert_eq!(namespaces, vec!["parody", "misc"]);
        assert_eq!(grouped["parody"], vec!["touhou project", "other"]);
    }

    #[test]
    fn test_format_gallery() {
        let rendered = format_gallery(&gallery(), false);
        let expected = "<a href=\"https://exhentai.org/g/618395/0439fa3666/\">TOUHOU &lt;GUNMANIA&gt; A2</a>\n\
            東方 GUNMANIA A2\n\
            Non-H | 20 pages | 4.43★ | 2013-08-10 14:05 UTC\n\
            <b>parody</b>\n\
            touhou project, other\n\
            <b>misc</b>\n\
            artbook";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_long_tag_list_is_elided() {
        let mut g = gallery();
        g.tags = (0..400)
            .map(|i| format!("namespace{}:some rather long tag name {i}", i % 40))
            .collect();

        let rendered = format_gallery(&g, true);
        assert!(rendered.len() <= MAX_BLOCK_BYTES);
        assert!(rendered.ends_with("…</blockquote>"));
        assert!(rendered.contains("<b>namespace0</b>"));
    }

    #[test]
    fn test_collapsed_gallery_is_quoted() {
        let rendered = format_gallery(&gallery(), true);
        assert!(rendered.starts_with("<blockquote expandable><a href="));
        assert!(rendered.ends_with("</blockquote>"));
    }
}
