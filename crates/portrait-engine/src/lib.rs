//! Portrait generation core: provider clients, dispatch, the image cache and
//! the background worker that ties them to a host.

mod cache;
mod dispatch;
mod error;
pub mod parse;
mod providers;
mod request;
mod service;
pub mod transport;
mod worker;

pub use cache::{list_style_references, load_reference_image, sanitize_file_name, Portrait, PortraitCache};
pub use dispatch::PortraitDispatcher;
pub use error::PortraitError;
pub use providers::{GeminiProvider, OpenAiProvider, PortraitProvider, ProviderCall};
pub use request::{looks_like_base64, AspectRatio, GeneratedPayload, GenerationRequest};
pub use service::PortraitService;
pub use transport::{HttpReply, ReqwestTransport, Transport};
pub use worker::{PortraitCompletion, PortraitJob, PortraitWorker};

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing: &String| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
