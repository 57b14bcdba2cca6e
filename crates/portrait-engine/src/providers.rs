use std::env;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use portrait_contracts::providers::{NamedProvider, ProviderKind};
use reqwest::header::AUTHORIZATION;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::error::PortraitError;
use crate::parse::{extract_inline_payload, extract_url_payload, inline_response_text};
use crate::request::{GeneratedPayload, GenerationRequest};
use crate::transport::Transport;
use crate::{error_chain_text, truncate_text};

const OPENAI_DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const GEMINI_DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_API_KEY_HEADER: &str = "x-goog-api-key";
/// The images endpoint only takes fixed sizes, so the requested aspect ratio
/// is not forwarded.
const OPENAI_IMAGE_SIZE: &str = "1024x1024";
const REFERENCE_IMAGE_MIME: &str = "image/png";
const ERROR_BODY_LOG_CHARS: usize = 2048;

/// Everything a provider needs for one call.
#[derive(Debug, Clone, Copy)]
pub struct ProviderCall<'a> {
    pub api_key: &'a str,
    pub model: &'a str,
    pub request: &'a GenerationRequest,
}

pub trait PortraitProvider: NamedProvider + Send + Sync {
    fn kind(&self) -> ProviderKind;
    fn generate(&self, call: &ProviderCall<'_>) -> Result<GeneratedPayload, PortraitError>;
}

impl NamedProvider for Box<dyn PortraitProvider> {
    fn name(&self) -> &str {
        (**self).name()
    }
}

/// URL-returning images/generations client.
pub struct OpenAiProvider {
    api_base: String,
    transport: Arc<dyn Transport>,
}

impl OpenAiProvider {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            api_base: api_base_from_env("PAWN_PORTRAIT_OPENAI_API_BASE", OPENAI_DEFAULT_API_BASE),
            transport,
        }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/images/generations", self.api_base)
    }

    fn build_payload(model: &str, request: &GenerationRequest) -> Value {
        json!({
            "model": model,
            "prompt": request.prompt(),
            "n": 1,
            "size": OPENAI_IMAGE_SIZE,
        })
    }
}

impl NamedProvider for OpenAiProvider {
    fn name(&self) -> &str {
        ProviderKind::OpenAi.name()
    }
}

impl PortraitProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn generate(&self, call: &ProviderCall<'_>) -> Result<GeneratedPayload, PortraitError> {
        let endpoint = self.endpoint();
        let payload = Self::build_payload(call.model, call.request);
        let bearer = format!("Bearer {}", call.api_key);
        debug!(provider = self.name(), model = call.model, "requesting image");
        let body = send_json(
            self.name(),
            self.transport.as_ref(),
            &endpoint,
            &[(AUTHORIZATION.as_str(), bearer.as_str())],
            &payload,
        )?;
        extract_url_payload(&body).ok_or_else(|| {
            error!(
                provider = self.name(),
                body = %truncate_text(&body, ERROR_BODY_LOG_CHARS),
                "failed to parse image URL from response"
            );
            PortraitError::Parse {
                provider: self.name().to_string(),
                body,
            }
        })
    }
}

/// Inline-data generateContent client. The model is chosen per call.
pub struct GeminiProvider {
    api_base: String,
    transport: Arc<dyn Transport>,
}

impl GeminiProvider {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            api_base: api_base_from_env("PAWN_PORTRAIT_GEMINI_API_BASE", GEMINI_DEFAULT_API_BASE),
            transport,
        }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim().trim_end_matches('/').to_string();
        self
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    /// Text first, then the subject image, then the style image. Prompts that
    /// reference "the second image" rely on this order.
    fn build_parts(request: &GenerationRequest) -> Vec<Value> {
        let mut parts = vec![json!({ "text": request.prompt() })];
        for bytes in [request.subject_image(), request.style_image()]
            .into_iter()
            .flatten()
        {
            parts.push(json!({
                "inlineData": {
                    "mimeType": REFERENCE_IMAGE_MIME,
                    "data": BASE64.encode(bytes),
                }
            }));
        }
        parts
    }

    fn build_payload(request: &GenerationRequest) -> Value {
        json!({
            "contents": [{ "parts": Self::build_parts(request) }],
            "generationConfig": {
                "imageConfig": { "aspectRatio": request.aspect_ratio().as_str() }
            }
        })
    }
}

impl NamedProvider for GeminiProvider {
    fn name(&self) -> &str {
        ProviderKind::Gemini.name()
    }
}

impl PortraitProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn generate(&self, call: &ProviderCall<'_>) -> Result<GeneratedPayload, PortraitError> {
        let endpoint = self.endpoint_for_model(call.model);
        let payload = Self::build_payload(call.request);
        debug!(
            provider = self.name(),
            model = call.model,
            aspect_ratio = call.request.aspect_ratio().as_str(),
            reference_images = call.request.has_reference_images(),
            "requesting image"
        );
        let body = send_json(
            self.name(),
            self.transport.as_ref(),
            &endpoint,
            &[(GEMINI_API_KEY_HEADER, call.api_key)],
            &payload,
        )?;
        extract_inline_payload(&body).ok_or_else(|| {
            error!(
                provider = self.name(),
                model_text = %inline_response_text(&body).unwrap_or_default(),
                body = %truncate_text(&body, ERROR_BODY_LOG_CHARS),
                "could not find inline image data in response"
            );
            PortraitError::Parse {
                provider: self.name().to_string(),
                body,
            }
        })
    }
}

/// POSTs `payload` and returns the body of a 2xx reply.
fn send_json(
    provider: &str,
    transport: &dyn Transport,
    endpoint: &str,
    headers: &[(&str, &str)],
    payload: &Value,
) -> Result<String, PortraitError> {
    let reply = transport
        .post_json(endpoint, headers, payload)
        .map_err(|err| {
            let message = error_chain_text(&err, 512);
            error!(provider, endpoint, error = %message, "request failed");
            PortraitError::Transport {
                provider: provider.to_string(),
                status: None,
                message,
                body: None,
            }
        })?;
    let body = reply.text();
    if !reply.is_success() {
        error!(
            provider,
            status = reply.status,
            body = %truncate_text(&body, ERROR_BODY_LOG_CHARS),
            "provider returned an error"
        );
        return Err(PortraitError::Transport {
            provider: provider.to_string(),
            status: Some(reply.status),
            message: truncate_text(&body, 512),
            body: Some(body),
        });
    }
    Ok(body)
}

fn api_base_from_env(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use base64::Engine as _;
    use serde_json::json;

    use super::{GeminiProvider, OpenAiProvider, PortraitProvider, ProviderCall, BASE64};
    use crate::request::{AspectRatio, GeneratedPayload, GenerationRequest};
    use crate::transport::stub::StubTransport;

    fn call<'a>(request: &'a GenerationRequest, model: &'a str) -> ProviderCall<'a> {
        ProviderCall {
            api_key: "test-key",
            model,
            request,
        }
    }

    #[test]
    fn openai_posts_fixed_size_payload_with_bearer_auth() -> anyhow::Result<()> {
        let stub = Arc::new(StubTransport::new().reply(200, r#"{"data":[{"url":"https://x/y.png"}]}"#));
        let provider = OpenAiProvider::new(stub.clone()).with_api_base("https://openai.test/v1/");
        let request = GenerationRequest::new(r#"a "quoted" \ knight"#)?
            .with_aspect_ratio(AspectRatio::Wide16x9);

        let payload = provider.generate(&call(&request, "dall-e-3"))?;
        assert_eq!(payload, GeneratedPayload::Url("https://x/y.png".to_string()));

        let requests = stub.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].url, "https://openai.test/v1/images/generations");
        assert_eq!(requests[0].header("authorization"), Some("Bearer test-key"));
        assert_eq!(
            requests[0].payload,
            Some(json!({
                "model": "dall-e-3",
                "prompt": "a \"quoted\" \\ knight",
                "n": 1,
                "size": "1024x1024",
            }))
        );
        Ok(())
    }

    #[test]
    fn openai_error_status_is_transport_error_with_body() -> anyhow::Result<()> {
        let stub = Arc::new(StubTransport::new().reply(401, r#"{"error":{"message":"bad key"}}"#));
        let provider = OpenAiProvider::new(stub);
        let request = GenerationRequest::new("a knight")?;

        let err = provider
            .generate(&call(&request, "dall-e-3"))
            .err()
            .map(|err| (err.kind(), err.response_body().map(str::to_string)));
        assert_eq!(
            err,
            Some((
                "transport",
                Some(r#"{"error":{"message":"bad key"}}"#.to_string())
            ))
        );
        Ok(())
    }

    #[test]
    fn openai_missing_url_is_parse_error() -> anyhow::Result<()> {
        let stub = Arc::new(StubTransport::new().reply(200, r#"{"created":1,"data":[]}"#));
        let provider = OpenAiProvider::new(stub);
        let request = GenerationRequest::new("a knight")?;
        let err = provider.generate(&call(&request, "dall-e-3")).err();
        assert_eq!(err.map(|err| err.kind()), Some("parse"));
        Ok(())
    }

    #[test]
    fn connection_failure_is_transport_error() -> anyhow::Result<()> {
        let provider = GeminiProvider::new(Arc::new(StubTransport::new()));
        let request = GenerationRequest::new("a knight")?;
        let err = provider
            .generate(&call(&request, "gemini-2.5-flash-image"))
            .err();
        assert_eq!(err.map(|err| err.kind()), Some("transport"));
        Ok(())
    }

    #[test]
    fn gemini_orders_parts_and_forwards_aspect_ratio() -> anyhow::Result<()> {
        let stub = Arc::new(StubTransport::new().reply(
            200,
            r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/png","data":"QUJD"}}]}}]}"#,
        ));
        let provider =
            GeminiProvider::new(stub.clone()).with_api_base("https://gemini.test/v1beta");
        let request = GenerationRequest::new("a knight")?
            .with_aspect_ratio(AspectRatio::Portrait3x4)
            .with_subject_image(b"subject".to_vec())
            .with_style_image(b"style".to_vec());

        let payload = provider.generate(&call(&request, "gemini-3-pro-image-preview"))?;
        assert_eq!(payload, GeneratedPayload::Base64("QUJD".to_string()));

        let requests = stub.requests();
        assert_eq!(
            requests[0].url,
            "https://gemini.test/v1beta/models/gemini-3-pro-image-preview:generateContent"
        );
        assert_eq!(requests[0].header("x-goog-api-key"), Some("test-key"));
        assert_eq!(requests[0].header("authorization"), None);
        assert_eq!(
            requests[0].payload,
            Some(json!({
                "contents": [{ "parts": [
                    { "text": "a knight" },
                    { "inlineData": { "mimeType": "image/png", "data": BASE64.encode(b"subject") } },
                    { "inlineData": { "mimeType": "image/png", "data": BASE64.encode(b"style") } },
                ]}],
                "generationConfig": { "imageConfig": { "aspectRatio": "3:4" } }
            }))
        );
        Ok(())
    }

    #[test]
    fn gemini_style_only_is_first_image_part() -> anyhow::Result<()> {
        let request = GenerationRequest::new("a knight")?.with_style_image(b"style".to_vec());
        let parts = GeminiProvider::build_parts(&request);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["inlineData"]["data"], json!(BASE64.encode(b"style")));
        Ok(())
    }

    #[test]
    fn gemini_refusal_is_parse_error() -> anyhow::Result<()> {
        let stub = Arc::new(StubTransport::new().reply(
            200,
            r#"{"candidates":[{"content":{"parts":[{"text":"I can't draw that."}]}}]}"#,
        ));
        let provider = GeminiProvider::new(stub);
        let request = GenerationRequest::new("a knight")?;
        let err = provider
            .generate(&call(&request, "models/gemini-2.5-flash-image"))
            .err();
        assert_eq!(err.map(|err| err.kind()), Some("parse"));
        Ok(())
    }
}
