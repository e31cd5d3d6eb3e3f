use chrono::Utc;
use feed_rs::model::Entry;
use feed_rs::parser::{self, ParseErrorKind, ParseFeedError};
use html_escape::decode_html_entities;

use crate::app::{Result, RssqError};
use crate::domain::{FeedId, Item};

/// Summaries longer than this are cut down; article bodies are not kept.
pub const MAX_SUMMARY_CHARS: usize = 500;

#[derive(Debug, Clone, Default)]
pub struct FeedMeta {
    pub title: Option<String>,
}

#[derive(Clone)]
pub struct Normalizer;

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Parses a raw RSS/Atom document into candidate items for `feed_id`.
    pub fn parse(&self, body: &[u8], feed_id: FeedId) -> Result<Vec<Item>> {
        self.parse_with_meta(body, feed_id).map(|(_, items)| items)
    }

    pub fn parse_with_meta(&self, body: &[u8], feed_id: FeedId) -> Result<(FeedMeta, Vec<Item>)> {
        // Leave missing entry ids empty so the guid -> link -> hash order is ours to apply.
        let parser = parser::Builder::new()
            .id_generator(|_links, _title, _uri| String::new())
            .build();

        let feed = parser.parse(body).map_err(classify_error)?;

        let meta = FeedMeta {
            title: feed.title.map(|t| decode_text(&t.content)),
        };

        let total = feed.entries.len();
        let items: Vec<Item> = feed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let item = entry_to_item(feed_id, entry);
                if item.is_none() {
                    tracing::debug!("Skipping entry without guid, link or title in feed {}", feed_id);
                }
                item
            })
            .collect();

        if items.len() < total {
            tracing::warn!(
                "Feed {}: skipped {} of {} entries",
                feed_id,
                total - items.len(),
                total
            );
        }

        Ok((meta, items))
    }
}

fn classify_error(err: ParseFeedError) -> RssqError {
    match err {
        ParseFeedError::ParseError(ParseErrorKind::NoFeedRoot) => {
            RssqError::UnsupportedFormat("document is not an RSS, Atom or JSON feed".into())
        }
        ParseFeedError::JsonUnsupportedVersion(version) => {
            RssqError::UnsupportedFormat(format!("JSON Feed version {}", version))
        }
        other => RssqError::Parse(other.to_string()),
    }
}

fn entry_to_item(feed_id: FeedId, entry: Entry) -> Option<Item> {
    let title = entry
        .title
        .map(|t| decode_text(&t.content))
        .filter(|t| !t.is_empty());
    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or_else(|| entry.links.first())
        .map(|l| l.href.trim().to_string())
        .filter(|href| !href.is_empty());
    let published_at = entry.published.or(entry.updated).map(|dt| dt.with_timezone(&Utc));

    let guid = Some(entry.id.as_str());
    let stable_id = Item::derive_stable_id(guid, link.as_deref(), title.as_deref(), published_at)?;

    let summary = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .map(|s| excerpt(&decode_text(&s), MAX_SUMMARY_CHARS))
        .filter(|s| !s.is_empty());

    let mut item = Item::new(feed_id, stable_id, Utc::now());
    item.title = title;
    item.link = link;
    item.published_at = published_at;
    item.summary = summary;
    Some(item)
}

fn decode_text(raw: &str) -> String {
    decode_html_entities(raw.trim()).to_string()
}

fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RSS_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <description>A test feed</description>
    <item>
      <title>Test Item 1</title>
      <link>https://example.com/item1</link>
      <guid>item-1</guid>
      <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
      <description>This is item 1</description>
    </item>
    <item>
      <title>Test Item 2</title>
      <link>https://example.com/item2</link>
      <description>This is item 2</description>
    </item>
    <item>
      <title>Fish &amp; Chips</title>
      <pubDate>Tue, 02 Jan 2024 00:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    const ATOM_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Test Feed</title>
  <subtitle>An Atom test feed</subtitle>
  <entry>
    <title>Atom Entry 1</title>
    <link href="https://example.com/atom1"/>
    <id>atom-entry-1</id>
    <updated>2024-01-01T00:00:00Z</updated>
    <summary>This is Atom entry 1</summary>
  </entry>
</feed>"#;

    fn rss_with_items(items: &[String]) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Bulk</title>{}</channel></rss>"#,
            items.join("\n")
        )
    }

    #[test]
    fn test_parse_rss() {
        let normalizer = Normalizer::new();
        let (meta, items) = normalizer
            .parse_with_meta(RSS_SAMPLE.as_bytes(), 1)
            .unwrap();

        assert_eq!(meta.title, Some("Test Feed".into()));
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].title, Some("Test Item 1".into()));
        assert_eq!(items[0].link, Some("https://example.com/item1".into()));
        assert_eq!(items[0].summary, Some("This is item 1".into()));
        assert_eq!(
            items[0].published_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert!(items.iter().all(|i| i.feed_id == 1 && !i.read));
    }

    #[test]
    fn test_parse_atom() {
        let normalizer = Normalizer::new();
        let (meta, items) = normalizer
            .parse_with_meta(ATOM_SAMPLE.as_bytes(), 1)
            .unwrap();

        assert_eq!(meta.title, Some("Atom Test Feed".into()));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].stable_id, "atom-entry-1");
        assert_eq!(items[0].title, Some("Atom Entry 1".into()));
        assert_eq!(items[0].link, Some("https://example.com/atom1".into()));
    }

    #[test]
    fn test_stable_id_derivation_order() {
        let items = Normalizer::new().parse(RSS_SAMPLE.as_bytes(), 1).unwrap();

        assert_eq!(items[0].stable_id, "item-1");
        assert_eq!(items[1].stable_id, "https://example.com/item2");
        assert_eq!(
            items[2].stable_id,
            Item::content_hash(
                "Fish & Chips",
                Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
            )
        );
    }

    #[test]
    fn test_entities_decoded() {
        let items = Normalizer::new().parse(RSS_SAMPLE.as_bytes(), 1).unwrap();
        assert_eq!(items[2].title, Some("Fish & Chips".into()));
    }

    #[test]
    fn test_stable_ids_are_deterministic() {
        let normalizer = Normalizer::new();
        let first = normalizer.parse(RSS_SAMPLE.as_bytes(), 1).unwrap();
        let second = normalizer.parse(RSS_SAMPLE.as_bytes(), 1).unwrap();

        let ids = |items: &[Item]| items.iter().map(|i| i.stable_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_malformed_entry_is_skipped() {
        let mut entries: Vec<String> = (0..9)
            .map(|i| {
                format!(
                    "<item><title>Post {i}</title><guid>post-{i}</guid><link>https://example.com/{i}</link></item>"
                )
            })
            .collect();
        entries.insert(4, "<item><description>orphan body</description></item>".into());

        let body = rss_with_items(&entries);
        let items = Normalizer::new().parse(body.as_bytes(), 3).unwrap();

        assert_eq!(items.len(), 9);
        assert!(items.iter().all(|i| i.stable_id.starts_with("post-")));
    }

    #[test]
    fn test_long_summary_is_truncated() {
        let long = "x".repeat(MAX_SUMMARY_CHARS + 50);
        let body = rss_with_items(&[format!(
            "<item><guid>g</guid><title>t</title><description>{long}</description></item>"
        )]);
        let items = Normalizer::new().parse(body.as_bytes(), 1).unwrap();
        let summary = items[0].summary.as_deref().unwrap();
        assert_eq!(summary.chars().count(), MAX_SUMMARY_CHARS + 1);
        assert!(summary.ends_with('…'));
    }

    #[test]
    fn test_malformed_document_is_parse_error() {
        let result = Normalizer::new().parse(b"{ this is not a feed", 1);
        assert!(matches!(result, Err(RssqError::Parse(_))));
    }

    #[test]
    fn test_html_page_is_unsupported() {
        let html = b"<html><head><title>Home</title></head><body><p>hi</p></body></html>";
        let result = Normalizer::new().parse(html, 1);
        assert!(matches!(result, Err(RssqError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_empty_channel_yields_no_items() {
        let body = rss_with_items(&[]);
        let items = Normalizer::new().parse(body.as_bytes(), 1).unwrap();
        assert!(items.is_empty());
    }
}
