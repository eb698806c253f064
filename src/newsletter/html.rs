//! HTML tag allow-list enforcement for generated newsletter bodies.
//!
//! The scanner is deliberately shallow: it recognises `<name ...>`,
//! `</name>`, `<name/>`, comments and `<!...>`/`<?...>` directives, and
//! treats everything else (including a bare `<` in prose) as text. It does
//! not build a DOM; mail-friendly newsletter HTML does not need one.
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::BTreeSet;
use thiserror::Error;

/// Tags the mailing service accepts in a newsletter body.
pub const DEFAULT_ALLOWED_TAGS: &[&str] = &["p", "strong", "em", "br", "ul", "li"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HtmlPolicyError {
    #[error("Content uses tags outside the allow-list: {}", .0.join(", "))]
    DisallowedTags(Vec<String>),
}

/// What to do when a body contains tags outside the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationAction {
    /// Fail the run.
    #[default]
    Reject,
    /// Remove the offending tags, keeping their inner text.
    Strip,
}

/// Tag allow-list policy. `allowed_tags == None` means unrestricted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlPolicy {
    allowed_tags: Option<BTreeSet<String>>,
    on_violation: ViolationAction,
}

impl Default for HtmlPolicy {
    fn default() -> Self {
        Self::allow_list(DEFAULT_ALLOWED_TAGS.iter().copied(), ViolationAction::Reject)
    }
}

impl HtmlPolicy {
    /// A policy that accepts any markup unchanged.
    pub fn unrestricted() -> Self {
        Self {
            allowed_tags: None,
            on_violation: ViolationAction::Reject,
        }
    }

    /// A policy restricted to `tags` (compared case-insensitively).
    pub fn allow_list<I, S>(tags: I, on_violation: ViolationAction) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = tags
            .into_iter()
            .map(|t| t.as_ref().trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self {
            allowed_tags: Some(allowed),
            on_violation,
        }
    }

    pub fn allowed_tags(&self) -> Option<&BTreeSet<String>> {
        self.allowed_tags.as_ref()
    }

    pub fn on_violation(&self) -> ViolationAction {
        self.on_violation
    }

    fn permits(&self, name: &str) -> bool {
        self.allowed_tags
            .as_ref()
            .map_or(true, |allowed| allowed.contains(name))
    }

    /// Returns every disallowed tag name in `html`, sorted and deduplicated.
    pub fn check(&self, html: &str) -> Vec<String> {
        if self.allowed_tags.is_none() {
            return Vec::new();
        }
        let found: BTreeSet<String> = tokenize(html)
            .into_iter()
            .filter_map(|token| match token {
                Token::Tag { name, .. } if !self.permits(&name) => Some(name),
                _ => None,
            })
            .collect();
        found.into_iter().collect()
    }

    /// Removes disallowed tags, comments and directives, keeping text.
    pub fn sanitize<'a>(&self, html: &'a str) -> Cow<'a, str> {
        if self.allowed_tags.is_none() {
            return Cow::Borrowed(html);
        }
        let tokens = tokenize(html);
        let dirty = tokens.iter().any(|t| match t {
            Token::Tag { name, .. } => !self.permits(name),
            Token::Markup(_) => true,
            Token::Text(_) => false,
        });
        if !dirty {
            return Cow::Borrowed(html);
        }

        let mut out = String::with_capacity(html.len());
        for token in tokens {
            match token {
                Token::Text(text) => out.push_str(text),
                Token::Tag { name, raw } if self.permits(&name) => out.push_str(raw),
                Token::Tag { .. } | Token::Markup(_) => {}
            }
        }
        Cow::Owned(out)
    }

    /// Applies the policy: rejects or strips depending on `on_violation`.
    pub fn apply<'a>(&self, html: &'a str) -> Result<Cow<'a, str>, HtmlPolicyError> {
        match self.on_violation {
            ViolationAction::Reject => {
                let disallowed = self.check(html);
                if disallowed.is_empty() {
                    Ok(Cow::Borrowed(html))
                } else {
                    Err(HtmlPolicyError::DisallowedTags(disallowed))
                }
            }
            ViolationAction::Strip => {
                let cleaned = self.sanitize(html);
                if matches!(cleaned, Cow::Owned(_)) {
                    tracing::warn!(
                        removed = ?self.check(html),
                        "Stripped disallowed tags from generated content"
                    );
                }
                Ok(cleaned)
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    Tag { name: String, raw: &'a str },
    /// Comments, doctype and processing instructions.
    Markup(&'a str),
}

fn tokenize(html: &str) -> Vec<Token<'_>> {
    let bytes = html.as_bytes();
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }
        let rest = &html[i..];

        let markup_len = if rest.starts_with("<!--") {
            Some(rest.find("-->").map(|p| p + 3).unwrap_or(rest.len()))
        } else if rest.starts_with("<!") || rest.starts_with("<?") {
            Some(rest.find('>').map(|p| p + 1).unwrap_or(rest.len()))
        } else {
            None
        };
        if let Some(len) = markup_len {
            if text_start < i {
                tokens.push(Token::Text(&html[text_start..i]));
            }
            tokens.push(Token::Markup(&html[i..i + len]));
            i += len;
            text_start = i;
            continue;
        }

        match parse_tag(rest) {
            Some((name, len)) => {
                if text_start < i {
                    tokens.push(Token::Text(&html[text_start..i]));
                }
                tokens.push(Token::Tag {
                    name,
                    raw: &html[i..i + len],
                });
                i += len;
                text_start = i;
            }
            None => i += 1,
        }
    }

    if text_start < html.len() {
        tokens.push(Token::Text(&html[text_start..]));
    }
    tokens
}

/// Parses a tag at the start of `s` (which begins with `<`).
/// Returns the lowercased tag name and the byte length of the tag.
fn parse_tag(s: &str) -> Option<(String, usize)> {
    let after = &s[1..];
    let name_part = after.strip_prefix('/').unwrap_or(after);
    if !name_part.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }
    // The whole name up to whitespace, `/` or `>`, so `<p-x>` is not read as `<p>`
    let name_len = name_part
        .find(|c: char| c.is_ascii_whitespace() || c == '/' || c == '>')
        .unwrap_or(name_part.len());
    let close = s.find('>')?;
    Some((name_part[..name_len].to_ascii_lowercase(), close + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_markup_passes() {
        let policy = HtmlPolicy::default();
        let html = "<p><strong>Keimung</strong></p><ul><li>Kresse</li><li>Erbse</li></ul><br>";
        assert!(policy.check(html).is_empty());
        assert_eq!(policy.apply(html).unwrap(), html);
    }

    #[test]
    fn test_reject_lists_disallowed_tags_once() {
        let policy = HtmlPolicy::default();
        let html = "<h2>Titel</h2><div><span>a</span><span>b</span></div>";
        let err = policy.apply(html).unwrap_err();
        assert_eq!(
            err,
            HtmlPolicyError::DisallowedTags(vec![
                "div".to_string(),
                "h2".to_string(),
                "span".to_string()
            ])
        );
        assert!(err.to_string().contains("div, h2, span"));
    }

    #[test]
    fn test_tag_names_are_case_insensitive() {
        let policy = HtmlPolicy::default();
        assert!(policy.check("<P>Hallo</P><BR/>").is_empty());
        assert_eq!(policy.check("<IMG src=\"x.png\">"), vec!["img".to_string()]);
    }

    #[test]
    fn test_strip_keeps_inner_text() {
        let policy = HtmlPolicy::allow_list(DEFAULT_ALLOWED_TAGS, ViolationAction::Strip);
        let html = "<h1>Titel</h1><p>Text <span class=\"x\">mit</span> Span</p><!-- note -->";
        let cleaned = policy.apply(html).unwrap();
        assert_eq!(cleaned, "Titel<p>Text mit Span</p>");
    }

    #[test]
    fn test_strip_borrows_clean_input() {
        let policy = HtmlPolicy::allow_list(["p"], ViolationAction::Strip);
        let cleaned = policy.sanitize("<p>clean</p>");
        assert!(matches!(cleaned, Cow::Borrowed(_)));
    }

    #[test]
    fn test_unrestricted_accepts_anything() {
        let policy = HtmlPolicy::unrestricted();
        let html = "<div><h1>x</h1><style>p{}</style></div>";
        assert!(policy.check(html).is_empty());
        assert_eq!(policy.apply(html).unwrap(), html);
        assert!(policy.allowed_tags().is_none());
    }

    #[test]
    fn test_prefixed_tag_names_are_not_allowed() {
        let policy = HtmlPolicy::default();
        assert_eq!(
            policy.check("<p-evil onclick=x>hi</p-evil><li:x>y</li:x>"),
            vec!["li:x".to_string(), "p-evil".to_string()]
        );
        assert!(policy.apply("<p-x>hi</p-x>").is_err());
        assert!(policy.check("<br/><p class=\"a\">x</p>").is_empty());
    }

    #[test]
    fn test_bare_less_than_is_text() {
        let policy = HtmlPolicy::default();
        let html = "<p>3 < 5 und 2 <= 4</p>";
        assert!(policy.check(html).is_empty());
    }

    #[test]
    fn test_emoji_text_survives_strip() {
        let policy = HtmlPolicy::allow_list(["p"], ViolationAction::Strip);
        assert_eq!(
            policy.sanitize("<p>🌱 Sprossen</p><div>🌿</div>"),
            "<p>🌱 Sprossen</p>🌿"
        );
    }

    #[test]
    fn test_tokenize_unterminated_tag_is_text() {
        assert_eq!(tokenize("a <b"), vec![Token::Text("a <b")]);
    }
}
