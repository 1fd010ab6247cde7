//! `payrecover-content`
//!
//! **Responsibility:** produce the subject and body of each dunning message.
//!
//! - [`TemplateContentGenerator`] is deterministic and cannot fail.
//! - [`AiContentGenerator`] asks an OpenAI-compatible chat-completions API.
//! - [`FallbackContentGenerator`] composes the two so callers always get
//!   non-empty content, whatever happens to the AI path.
//!
//! This crate does not know about campaigns or stores; callers pass a
//! [`ContentRequest`] snapshot.

pub mod ai;
pub mod fallback;
pub mod generator;
pub mod layout;
pub mod request;
pub mod result;
pub mod template;

pub use ai::{AiContentGenerator, AiSettings};
pub use fallback::FallbackContentGenerator;
pub use generator::ContentGenerator;
pub use layout::render_email_html;
pub use request::{ContentRequest, MAX_STEP, MIN_STEP, MessageTemplate, Tone};
pub use result::{ContentError, GeneratedContent};
pub use template::{TemplateContentGenerator, html_to_text};
