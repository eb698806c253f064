use chrono::NaiveDate;
use std::path::Path;

use crate::newsletter::HtmlPolicy;

/// Weekly microgreens newsletter, in German. `{date}` and `{html_rules}` are
/// filled in by [`render_prompt`].
pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"Erstelle einen wöchentlichen Newsletter ausschließlich als reines JSON-Objekt.

Aktuelles Datum: {date}
Nutze dieses Datum, um die passende Jahreszeit und damit saisonale Empfehlungen abzuleiten.

Thema:
Microgreens, Keimlinge, Hanfsprossen, saisonale Sorten, Substratstärken, Licht- & Temperaturtipps, Keimung, Fehlerquellen, kulinarische Anwendungen.

FORMAT: GIB NUR FOLGENDES JSON OBJEKT AUS:

{
  "title": "kurzer deutscher Titel",
  "subtitle": "ein kurzer deutscher Untertitel",
  "summary": "1–2 Sätze Zusammenfassung",
  "content": "HTML-Inhalt (siehe HTML-Regeln)"
}

{html_rules}

EMOJIS ERLAUBT ✔

CONTENT-ANWEISUNGEN:
- 3–6 Absätze + gerne ein <ul><li>-Block.
- Überschriften bitte als:
  <p><strong>Mein Titel</strong></p>
- KEINE Markdown-Formatierung.
- KEINE Backticks.
- GIB NUR DAS JSON OBJEKT AUS, NICHTS ANDERES.
"#;

/// Fills `{date}` (ISO `YYYY-MM-DD`) and `{html_rules}` into `template`.
pub fn render_prompt(template: &str, date: NaiveDate, policy: &HtmlPolicy) -> String {
    template
        .replace("{date}", &date.format("%Y-%m-%d").to_string())
        .replace("{html_rules}", &html_rules(policy))
}

fn html_rules(policy: &HtmlPolicy) -> String {
    match policy.allowed_tags() {
        Some(tags) => {
            let mut rules = String::from("HTML-REGELN (sehr wichtig):\nERLAUBTE TAGS:\n");
            for tag in tags {
                rules.push_str(&format!("- <{}>\n", tag));
            }
            rules.push_str("Alle anderen Tags sind NICHT ERLAUBT. Keine Klassen, kein CSS.");
            rules
        }
        None => "HTML-REGELN:\nVerwende einfaches, sauberes HTML ohne Klassen und ohne CSS.".to_string(),
    }
}

/// Loads a prompt template from `path`, or the built-in one when `None`.
pub async fn load_template(path: Option<&Path>) -> std::io::Result<String> {
    let Some(path) = path else {
        return Ok(DEFAULT_PROMPT_TEMPLATE.to_string());
    };

    let template = tokio::fs::read_to_string(path).await?;
    if template.trim().is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("prompt file '{}' is empty", path.display()),
        ));
    }
    tracing::info!(path = %path.display(), "Loaded custom prompt template");
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    #[test]
    fn test_default_prompt_has_date_and_tags() {
        let prompt = render_prompt(DEFAULT_PROMPT_TEMPLATE, date(), &HtmlPolicy::default());
        assert!(prompt.contains("Aktuelles Datum: 2026-10-16"));
        assert!(prompt.contains("- <strong>"));
        assert!(prompt.contains("- <li>"));
        assert!(!prompt.contains("{date}"));
        assert!(!prompt.contains("{html_rules}"));
        // JSON braces in the template survive substitution
        assert!(prompt.contains("\"title\": \"kurzer deutscher Titel\""));
    }

    #[test]
    fn test_unrestricted_policy_rules() {
        let prompt = render_prompt(DEFAULT_PROMPT_TEMPLATE, date(), &HtmlPolicy::unrestricted());
        assert!(prompt.contains("einfaches, sauberes HTML"));
        assert!(!prompt.contains("ERLAUBTE TAGS"));
    }

    #[test]
    fn test_custom_template() {
        let prompt = render_prompt("Datum {date}", date(), &HtmlPolicy::default());
        assert_eq!(prompt, "Datum 2026-10-16");
    }

    #[tokio::test]
    async fn test_load_default_template() {
        let template = load_template(None).await.unwrap();
        assert_eq!(template, DEFAULT_PROMPT_TEMPLATE);
    }

    #[tokio::test]
    async fn test_load_empty_template_fails() {
        let dir = std::env::temp_dir().join("sprouts_feed_prompt_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("prompt.txt");
        std::fs::write(&path, "  \n").unwrap();

        let err = load_template(Some(&path)).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

        std::fs::remove_dir_all(&dir).ok();
    }
}
