//! Content generation: the chat-completion client and the prompt it is sent.

mod openai;
mod prompt;

pub use openai::{CompletionClient, ContentError, DEFAULT_BASE_URL};
pub use prompt::{load_template, render_prompt, DEFAULT_PROMPT_TEMPLATE};
