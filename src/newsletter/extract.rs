use serde::Deserialize;
use thiserror::Error;

const FENCE: &str = "```";

/// Fields the model is asked to return.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeneratedContent {
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    pub summary: String,
    pub content: String,
}

/// The model output could not be interpreted as a newsletter object.
///
/// Carries the raw text so the caller can log it for diagnosis.
#[derive(Debug, Error)]
#[error("Generated content is not a valid newsletter object: {reason}")]
pub struct MalformedContentError {
    pub raw: String,
    pub reason: String,
}

impl MalformedContentError {
    fn new(raw: &str, reason: impl Into<String>) -> Self {
        Self {
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

/// Removes a Markdown code fence around `text`.
///
/// Text without a triple-backtick fence is returned unchanged. Otherwise the
/// content between the first fence (minus a language tag such as `json` on the
/// fence line) and the next fence is returned, trimmed. An unclosed fence runs to the end of
/// the text. Applying this twice gives the same result as applying it once.
pub fn strip_code_fences(text: &str) -> &str {
    let Some(open) = text.find(FENCE) else {
        return text;
    };

    let after_open = text[open + FENCE.len()..].trim_start_matches('`');

    // Only a lone word followed by a newline is a language tag
    let body = match after_open.find('\n') {
        Some(nl) if is_language_tag(after_open[..nl].trim()) => &after_open[nl + 1..],
        _ => after_open,
    };

    let inner = match body.find(FENCE) {
        Some(close) => &body[..close],
        None => body,
    };
    inner.trim()
}

fn is_language_tag(line: &str) -> bool {
    line.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+'))
}

/// Parses raw model output into [`GeneratedContent`].
///
/// The text is trimmed and unfenced first. A missing required field, a
/// non-string value or a blank title is rejected.
pub fn parse_content(raw: &str) -> Result<GeneratedContent, MalformedContentError> {
    let cleaned = strip_code_fences(raw.trim());
    if cleaned.is_empty() {
        return Err(MalformedContentError::new(raw, "response is empty"));
    }

    let content: GeneratedContent = serde_json::from_str(cleaned)
        .map_err(|e| MalformedContentError::new(raw, e.to_string()))?;

    if content.title.trim().is_empty() {
        return Err(MalformedContentError::new(raw, "title is empty"));
    }

    Ok(content)
}
