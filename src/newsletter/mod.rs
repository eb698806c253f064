//! Turning raw model output into a newsletter [`Item`].
//!
//! - [`extract`] - code-fence stripping and JSON parsing into [`GeneratedContent`]
//! - [`html`] - tag allow-list policy for the HTML body
//! - [`item`] - the feed entry itself (GUID, publish date, rendered body)

mod extract;
mod html;
mod item;

pub use extract::{parse_content, strip_code_fences, GeneratedContent, MalformedContentError};
pub use html::{HtmlPolicy, HtmlPolicyError, ViolationAction, DEFAULT_ALLOWED_TAGS};
pub use item::{Item, ItemOptions};
