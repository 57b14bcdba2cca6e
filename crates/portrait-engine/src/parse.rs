//! Image payload extraction from provider response bodies.
//!
//! Bodies are deserialized onto a small typed schema per provider first. When
//! that fails (unexpected envelope, truncated JSON) a literal key scan picks
//! the first quoted value after the provider's key, which is how the payload
//! has always been located.

use serde::Deserialize;

use crate::request::GeneratedPayload;

const URL_KEY: &str = "\"url\":";
const INLINE_DATA_KEY: &str = "\"data\": \"";

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageRow>,
}

#[derive(Debug, Deserialize)]
struct ImageRow {
    url: Option<String>,
    b64_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
    #[serde(rename = "inlineData", alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: Option<String>,
}

/// Payload from an images/generations style response. Rows carrying
/// `b64_json` instead of `url` yield inline data.
pub fn extract_url_payload(body: &str) -> Option<GeneratedPayload> {
    if let Ok(parsed) = serde_json::from_str::<ImagesResponse>(body) {
        for row in parsed.data {
            if let Some(url) = non_empty(row.url) {
                return Some(GeneratedPayload::Url(url));
            }
            if let Some(b64) = non_empty(row.b64_json) {
                return Some(GeneratedPayload::Base64(b64));
            }
        }
    }
    scan_quoted_after(body, URL_KEY).map(GeneratedPayload::Url)
}

/// Base64 image data from a generateContent style response.
pub fn extract_inline_payload(body: &str) -> Option<GeneratedPayload> {
    if let Ok(parsed) = serde_json::from_str::<GenerateContentResponse>(body) {
        let data = parsed
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .filter_map(|part| part.inline_data.and_then(|inline| non_empty(inline.data)))
            .next();
        if let Some(data) = data {
            return Some(GeneratedPayload::Base64(data));
        }
    }
    scan_quoted_after(body, INLINE_DATA_KEY).map(GeneratedPayload::Base64)
}

/// Text parts of a generateContent response, typically the model explaining
/// why it returned no image.
pub fn inline_response_text(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<GenerateContentResponse>(body).ok()?;
    let texts: Vec<String> = parsed
        .candidates
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .flat_map(|content| content.parts)
        .filter_map(|part| non_empty(part.text))
        .collect();
    if texts.is_empty() {
        return None;
    }
    Some(texts.join("\n"))
}

/// First quoted string following `key`. For a key that already ends in an
/// opening quote, the value starts right after the key.
fn scan_quoted_after(body: &str, key: &str) -> Option<String> {
    let key_idx = body.find(key)?;
    let after_key = key_idx + key.len();
    let start = if key.ends_with('"') {
        after_key
    } else {
        after_key + body[after_key..].find('"')? + 1
    };
    let end = start + body[start..].find('"')?;
    non_empty(Some(body[start..end].to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
