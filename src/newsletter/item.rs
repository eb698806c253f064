use chrono::{DateTime, Utc};
use quick_xml::escape::escape;
use sha2::{Digest, Sha256};

use super::extract::GeneratedContent;
use super::html::{HtmlPolicy, HtmlPolicyError};

/// Options that differ between newsletter flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemOptions {
    /// Render the subtitle as a bold lead paragraph above the body.
    pub include_subtitle: bool,
}

impl Default for ItemOptions {
    fn default() -> Self {
        Self {
            include_subtitle: true,
        }
    }
}

/// One newsletter entry, ready to be merged into a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub title: String,
    /// Rendered as the RSS `<description>`.
    pub summary: String,
    /// Rendered as `<content:encoded>`.
    pub body_html: String,
    pub published_at: DateTime<Utc>,
    pub guid: String,
}

impl Item {
    pub fn new(
        title: impl Into<String>,
        summary: impl Into<String>,
        body_html: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        let title = title.into();
        let summary = summary.into();
        let guid = generate_guid(&title, published_at, &summary);
        Self {
            title,
            summary,
            body_html: body_html.into(),
            published_at,
            guid,
        }
    }

    /// Builds an item from model output, enforcing the HTML policy on the body.
    pub fn from_content(
        content: GeneratedContent,
        policy: &HtmlPolicy,
        options: ItemOptions,
        now: DateTime<Utc>,
    ) -> Result<Self, HtmlPolicyError> {
        let body = policy.apply(&content.content)?;

        let lead = content
            .subtitle
            .as_deref()
            .map(str::trim)
            .filter(|s| options.include_subtitle && !s.is_empty())
            .map(|s| format!("<p><strong>{}</strong></p>\n", escape(s)));

        let body_html = match lead {
            Some(lead) => format!("{}{}", lead, body),
            None => body.into_owned(),
        };

        Ok(Self::new(content.title, content.summary, body_html, now))
    }

    /// RFC 822 date in GMT, as RSS readers expect for `<pubDate>`.
    pub fn pub_date(&self) -> String {
        self.published_at
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string()
    }
}

/// Stable identifier: SHA-256 over title, publish instant and summary.
fn generate_guid(title: &str, published_at: DateTime<Utc>, summary: &str) -> String {
    let input = format!(
        "{}|{}|{}",
        title,
        published_at.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
        summary
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::newsletter::html::ViolationAction;
    use chrono::TimeZone;

    fn content(subtitle: Option<&str>, body: &str) -> GeneratedContent {
        GeneratedContent {
            title: "Microgreens im Herbst".to_string(),
            subtitle: subtitle.map(str::to_string),
            summary: "Was jetzt keimt.".to_string(),
            content: body.to_string(),
        }
    }

    fn at(secs: i64, nanos: u32) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, nanos).unwrap()
    }

    #[test]
    fn test_subtitle_becomes_lead_paragraph() {
        let item = Item::from_content(
            content(Some("Radieschen & Co"), "<p>Text</p>"),
            &HtmlPolicy::default(),
            ItemOptions::default(),
            at(1_700_000_000, 0),
        )
        .unwrap();
        assert_eq!(
            item.body_html,
            "<p><strong>Radieschen &amp; Co</strong></p>\n<p>Text</p>"
        );
    }

    #[test]
    fn test_subtitle_omitted_when_disabled_or_blank() {
        let no_subtitle = ItemOptions {
            include_subtitle: false,
        };
        let item = Item::from_content(
            content(Some("Erbsen"), "<p>Text</p>"),
            &HtmlPolicy::default(),
            no_subtitle,
            at(1_700_000_000, 0),
        )
        .unwrap();
        assert_eq!(item.body_html, "<p>Text</p>");

        let item = Item::from_content(
            content(Some("   "), "<p>Text</p>"),
            &HtmlPolicy::default(),
            ItemOptions::default(),
            at(1_700_000_000, 0),
        )
        .unwrap();
        assert_eq!(item.body_html, "<p>Text</p>");
    }

    #[test]
    fn test_policy_rejects_disallowed_body() {
        let result = Item::from_content(
            content(None, "<h1>Nein</h1>"),
            &HtmlPolicy::default(),
            ItemOptions::default(),
            at(1_700_000_000, 0),
        );
        assert!(matches!(result, Err(HtmlPolicyError::DisallowedTags(_))));
    }

    #[test]
    fn test_policy_strips_disallowed_body() {
        let policy = HtmlPolicy::allow_list(["p"], ViolationAction::Strip);
        let item = Item::from_content(
            content(None, "<div><p>Ja</p></div>"),
            &policy,
            ItemOptions::default(),
            at(1_700_000_000, 0),
        )
        .unwrap();
        assert_eq!(item.body_html, "<p>Ja</p>");
    }

    #[test]
    fn test_guid_differs_within_same_millisecond() {
        let a = Item::new("T", "S", "", at(1_700_000_000, 1_000));
        let b = Item::new("T", "S", "", at(1_700_000_000, 2_000));
        assert_ne!(a.guid, b.guid);
        assert_eq!(a.guid.len(), 64);
    }

    #[test]
    fn test_guid_is_deterministic() {
        let a = Item::new("T", "S", "<p>a</p>", at(1_700_000_000, 0));
        let b = Item::new("T", "S", "<p>b</p>", at(1_700_000_000, 0));
        assert_eq!(a.guid, b.guid);
    }

    #[test]
    fn test_pub_date_format() {
        let item = Item::new("T", "S", "", at(1_700_000_000, 0));
        assert_eq!(item.pub_date(), "Tue, 14 Nov 2023 22:13:20 GMT");
    }
}
