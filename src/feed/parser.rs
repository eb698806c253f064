use anyhow::Result;
use feed_rs::parser;

#[derive(Debug, Clone)]
pub struct ParsedItem {
    pub guid: String,
    pub title: String,
    pub published: Option<i64>,
    pub summary: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub items: Vec<ParsedItem>,
}

impl ParsedFeed {
    pub fn contains_guid(&self, guid: &str) -> bool {
        self.items.iter().any(|item| item.guid == guid)
    }
}

/// Reads a feed document back into its channel title and items, in document order.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed> {
    let feed = parser::parse(bytes)?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| ParsedItem {
            guid: entry.id.trim().to_string(),
            title: entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string()),
            published: entry.published.or(entry.updated).map(|dt| dt.timestamp()),
            summary: entry.summary.map(|s| s.content),
            content: entry.content.and_then(|c| c.body),
        })
        .collect();

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content),
        items,
    })
}
