use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

use crate::newsletter::Item;

/// Namespace for `<content:encoded>`.
pub const CONTENT_NS: &str = "http://purl.org/rss/1.0/modules/content/";

/// Errors that can occur while merging an item into a feed document.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The existing document is not well-formed XML.
    #[error("Existing feed is not well-formed XML: {0}")]
    Xml(String),

    /// The root element is something other than `<rss>`.
    #[error("Existing feed root is <{0}>, expected <rss>")]
    NotRss(String),

    #[error("Existing feed has no <channel> under <rss>")]
    MissingChannel,

    #[error("Existing feed has more than one <channel>")]
    MultipleChannels,

    #[error("Failed to write feed XML: {0}")]
    Write(String),
}

/// Whether a run adds to the existing feed or replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    #[default]
    Append,
    Overwrite,
}

impl FromStr for MergeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "overwrite" => Ok(Self::Overwrite),
            other => Err(format!(
                "unknown mode '{}', expected 'append' or 'overwrite'",
                other
            )),
        }
    }
}

/// Where an appended item goes among the channel's existing items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Just before `</channel>`.
    #[default]
    NewestLast,
    /// Just before the first existing `<item>`.
    NewestFirst,
}

/// Fixed channel metadata used when a feed is created from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChannelMeta {
    pub title: String,
    pub link: String,
    pub description: String,
}

impl Default for ChannelMeta {
    fn default() -> Self {
        Self {
            title: "Weekly Newsletter".to_string(),
            link: "https://janis332.github.io/newsletter-rss-pf/".to_string(),
            description: "Automatically generated newsletter".to_string(),
        }
    }
}

/// Returns true when `merge` will build a new document rather than edit `existing`.
pub fn starts_fresh(existing: Option<&str>, mode: MergeMode) -> bool {
    match existing {
        Some(doc) => mode == MergeMode::Overwrite || doc.trim().is_empty(),
        None => true,
    }
}

/// Splices newsletter items into RSS 2.0 documents.
#[derive(Debug, Clone, Default)]
pub struct FeedMerger {
    channel: ChannelMeta,
    placement: Placement,
}

impl FeedMerger {
    pub fn new(channel: ChannelMeta, placement: Placement) -> Self {
        Self { channel, placement }
    }

    /// Produces the updated feed document.
    ///
    /// - No existing document, a blank one, or `Overwrite` → a fresh feed with one item
    /// - `Append` → the existing document with the item inserted into its channel;
    ///   everything else in the document is copied through unchanged
    ///
    /// # Errors
    ///
    /// Appending fails (rather than silently dropping the item) when the existing
    /// document is not well-formed, is not `<rss>`, or does not have exactly one
    /// `<channel>`.
    pub fn merge(
        &self,
        existing: Option<&str>,
        item: &Item,
        mode: MergeMode,
    ) -> Result<String, MergeError> {
        match existing {
            Some(doc) if !starts_fresh(existing, mode) => self.insert(doc, item),
            _ => self.fresh_document(item),
        }
    }

    fn fresh_document(&self, item: &Item) -> Result<String, MergeError> {
        let mut w = Writer::new(Vec::new());

        emit(
            &mut w,
            Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
        )?;
        whitespace(&mut w, "\n")?;

        let mut rss = BytesStart::new("rss");
        rss.push_attribute(("version", "2.0"));
        rss.push_attribute(("xmlns:content", CONTENT_NS));
        emit(&mut w, Event::Start(rss))?;

        whitespace(&mut w, "\n  ")?;
        emit(&mut w, Event::Start(BytesStart::new("channel")))?;
        text_element(&mut w, "\n    ", "title", &self.channel.title)?;
        text_element(&mut w, "\n    ", "link", &self.channel.link)?;
        text_element(&mut w, "\n    ", "description", &self.channel.description)?;

        let layout = Layout::indented("\n", "  ", "  ");
        whitespace(&mut w, &layout.item_ws)?;
        write_item(&mut w, item, &layout)?;
        whitespace(&mut w, &layout.close_ws)?;
        emit(&mut w, Event::End(BytesEnd::new("channel")))?;

        whitespace(&mut w, "\n")?;
        emit(&mut w, Event::End(BytesEnd::new("rss")))?;
        whitespace(&mut w, "\n")?;

        into_string(w)
    }

    fn insert(&self, doc: &str, item: &Item) -> Result<String, MergeError> {
        let mut reader = Reader::from_str(doc);
        let mut w = Writer::new(Vec::with_capacity(doc.len() + item.body_html.len() + 512));

        let mut depth: usize = 0;
        let mut root_seen = false;
        let mut channels = 0;
        let mut in_channel = false;
        let mut inserted = false;
        let mut layout = Layout::compact();
        // Last whitespace run seen between children of <rss>, used to infer indentation.
        let mut root_ws: Option<String> = None;
        // Whitespace between children of <channel>, held back so the item can go before it.
        let mut pending: Option<String> = None;

        loop {
            let event = reader.read_event().map_err(|e| {
                MergeError::Xml(format!("at byte {}: {}", reader.buffer_position(), e))
            })?;

            match event {
                Event::Eof => break,
                Event::Text(text) => {
                    let blank = blank_text(&text);
                    flush(&mut w, &mut pending)?;
                    if in_channel && depth == 2 && blank.is_some() {
                        pending = blank;
                        continue;
                    }
                    if depth == 1 {
                        root_ws = blank;
                    }
                    emit(&mut w, Event::Text(text))?;
                }
                Event::Start(start) => {
                    let first_item = in_channel
                        && depth == 2
                        && !inserted
                        && self.placement == Placement::NewestFirst
                        && start.name().as_ref() == b"item";
                    if first_item {
                        insert_before_item(&mut w, item, &layout, pending.take())?;
                        inserted = true;
                    } else {
                        flush(&mut w, &mut pending)?;
                    }

                    let start = match depth {
                        0 => {
                            check_root(&start)?;
                            root_seen = true;
                            with_content_namespace(start)
                        }
                        1 if start.name().as_ref() == b"channel" => {
                            channels += 1;
                            if channels > 1 {
                                return Err(MergeError::MultipleChannels);
                            }
                            in_channel = true;
                            layout = Layout::from_whitespace(root_ws.as_deref());
                            start
                        }
                        _ => start,
                    };
                    depth += 1;
                    emit(&mut w, Event::Start(start))?;
                }
                Event::Empty(empty) => {
                    let first_item = in_channel
                        && depth == 2
                        && !inserted
                        && self.placement == Placement::NewestFirst
                        && empty.name().as_ref() == b"item";
                    if first_item {
                        insert_before_item(&mut w, item, &layout, pending.take())?;
                        inserted = true;
                    } else {
                        flush(&mut w, &mut pending)?;
                    }

                    match depth {
                        0 => {
                            check_root(&empty)?;
                            return Err(MergeError::MissingChannel);
                        }
                        1 if empty.name().as_ref() == b"channel" => {
                            // <channel/> becomes <channel><item>...</item></channel>
                            channels += 1;
                            if channels > 1 {
                                return Err(MergeError::MultipleChannels);
                            }
                            layout = Layout::from_whitespace(root_ws.as_deref());
                            emit(&mut w, Event::Start(empty))?;
                            whitespace(&mut w, &layout.item_ws)?;
                            write_item(&mut w, item, &layout)?;
                            whitespace(&mut w, &layout.close_ws)?;
                            emit(&mut w, Event::End(BytesEnd::new("channel")))?;
                            inserted = true;
                        }
                        _ => emit(&mut w, Event::Empty(empty))?,
                    }
                }
                Event::End(end) => {
                    if in_channel && depth == 2 {
                        if !inserted {
                            whitespace(&mut w, &layout.item_ws)?;
                            write_item(&mut w, item, &layout)?;
                            inserted = true;
                        }
                        let closing = pending.take().unwrap_or_else(|| layout.close_ws.clone());
                        whitespace(&mut w, &closing)?;
                        in_channel = false;
                    } else {
                        flush(&mut w, &mut pending)?;
                    }
                    depth = depth.saturating_sub(1);
                    emit(&mut w, Event::End(end))?;
                }
                other => {
                    flush(&mut w, &mut pending)?;
                    emit(&mut w, other)?;
                }
            }
        }

        if !root_seen {
            return Err(MergeError::Xml("document has no root element".to_string()));
        }
        if depth != 0 {
            return Err(MergeError::Xml(format!(
                "document ends with {} unclosed element(s)",
                depth
            )));
        }
        if channels == 0 || !inserted {
            return Err(MergeError::MissingChannel);
        }

        into_string(w)
    }
}

/// Whitespace used around an inserted item.
struct Layout {
    /// Before `<item>` and before `</item>`.
    item_ws: String,
    /// Before each child element of the item.
    child_ws: String,
    /// Before `</channel>` when the document gave no whitespace of its own.
    close_ws: String,
}

impl Layout {
    /// `channel_indent` is the indentation of `<channel>`; each deeper level adds `unit`.
    fn indented(newline: &str, channel_indent: &str, unit: &str) -> Self {
        Self {
            item_ws: format!("{}{}{}", newline, channel_indent, unit),
            child_ws: format!("{}{}{}{}", newline, channel_indent, unit, unit),
            close_ws: format!("{}{}", newline, channel_indent),
        }
    }

    fn compact() -> Self {
        Self {
            item_ws: String::new(),
            child_ws: String::new(),
            close_ws: String::new(),
        }
    }

    /// Infers layout from the whitespace preceding `<channel>`: line ending
    /// (`\n` or `\r\n`) and indent unit (the channel's own indentation, since
    /// it sits one level deep). A document without line breaks there is
    /// treated as minified.
    fn from_whitespace(ws: Option<&str>) -> Self {
        let Some((ws, pos)) = ws.and_then(|ws| ws.rfind('\n').map(|pos| (ws, pos))) else {
            return Self::compact();
        };
        let newline = if ws[..pos].ends_with('\r') { "\r\n" } else { "\n" };
        let indent = &ws[pos + 1..];
        let unit = if indent.is_empty() {
            "  "
        } else if indent.starts_with('\t') {
            "\t"
        } else {
            indent
        };
        Self::indented(newline, indent, unit)
    }
}

fn emit(w: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), MergeError> {
    w.write_event(event)
        .map_err(|e| MergeError::Write(e.to_string()))
}

fn whitespace(w: &mut Writer<Vec<u8>>, ws: &str) -> Result<(), MergeError> {
    if ws.is_empty() {
        return Ok(());
    }
    emit(w, Event::Text(BytesText::from_escaped(ws)))
}

fn flush(w: &mut Writer<Vec<u8>>, pending: &mut Option<String>) -> Result<(), MergeError> {
    match pending.take() {
        Some(ws) => whitespace(w, &ws),
        None => Ok(()),
    }
}

fn insert_before_item(
    w: &mut Writer<Vec<u8>>,
    item: &Item,
    layout: &Layout,
    pending: Option<String>,
) -> Result<(), MergeError> {
    let lead = pending.unwrap_or_else(|| layout.item_ws.clone());
    whitespace(w, &lead)?;
    write_item(w, item, layout)?;
    whitespace(w, &lead)
}

fn text_element(
    w: &mut Writer<Vec<u8>>,
    ws: &str,
    name: &str,
    text: &str,
) -> Result<(), MergeError> {
    whitespace(w, ws)?;
    emit(w, Event::Start(BytesStart::new(name)))?;
    emit(w, Event::Text(BytesText::new(text)))?;
    emit(w, Event::End(BytesEnd::new(name)))
}

fn write_item(w: &mut Writer<Vec<u8>>, item: &Item, layout: &Layout) -> Result<(), MergeError> {
    let ws = layout.child_ws.as_str();
    emit(w, Event::Start(BytesStart::new("item")))?;
    text_element(w, ws, "title", &item.title)?;
    text_element(w, ws, "description", &item.summary)?;
    text_element(w, ws, "pubDate", &item.pub_date())?;

    whitespace(w, ws)?;
    let mut guid = BytesStart::new("guid");
    guid.push_attribute(("isPermaLink", "false"));
    emit(w, Event::Start(guid))?;
    emit(w, Event::Text(BytesText::new(&item.guid)))?;
    emit(w, Event::End(BytesEnd::new("guid")))?;

    whitespace(w, ws)?;
    emit(w, Event::Start(BytesStart::new("content:encoded")))?;
    for section in cdata_sections(&item.body_html) {
        emit(w, Event::CData(section))?;
    }
    emit(w, Event::End(BytesEnd::new("content:encoded")))?;

    whitespace(w, &layout.item_ws)?;
    emit(w, Event::End(BytesEnd::new("item")))
}

/// Splits `text` into CDATA sections so that no section contains `]]>`.
fn cdata_sections(text: &str) -> Vec<BytesCData<'static>> {
    let parts: Vec<&str> = text.split("]]>").collect();
    let last = parts.len() - 1;
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            let mut section = String::with_capacity(part.len() + 3);
            if i > 0 {
                section.push('>');
            }
            section.push_str(part);
            if i < last {
                section.push_str("]]");
            }
            BytesCData::new(section)
        })
        .collect()
}

fn check_root(start: &BytesStart<'_>) -> Result<(), MergeError> {
    if start.name().as_ref() == b"rss" {
        Ok(())
    } else {
        Err(MergeError::NotRss(
            String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        ))
    }
}

fn with_content_namespace(start: BytesStart<'_>) -> BytesStart<'_> {
    let declared = start
        .attributes()
        .flatten()
        .any(|attr| attr.key.as_ref() == b"xmlns:content");
    if declared {
        return start;
    }
    tracing::debug!("Adding missing content namespace to <rss>");
    let mut start = start;
    start.push_attribute(("xmlns:content", CONTENT_NS));
    start
}

fn blank_text(text: &BytesText<'_>) -> Option<String> {
    if text.iter().all(u8::is_ascii_whitespace) {
        std::str::from_utf8(text).ok().map(str::to_string)
    } else {
        None
    }
}

fn into_string(w: Writer<Vec<u8>>) -> Result<String, MergeError> {
    String::from_utf8(w.into_inner())
        .map_err(|_| MergeError::Write("generated feed contains invalid UTF-8".to_string()))
}
