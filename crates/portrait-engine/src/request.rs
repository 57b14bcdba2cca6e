use std::fmt;
use std::str::FromStr;

use crate::error::PortraitError;

const MIN_BASE64_PAYLOAD_LEN: usize = 100;

/// Aspect ratios offered by the generation dialog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AspectRatio {
    #[default]
    Square,
    Portrait3x4,
    Landscape4x3,
    Tall9x16,
    Wide16x9,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Portrait3x4,
        AspectRatio::Landscape4x3,
        AspectRatio::Tall9x16,
        AspectRatio::Wide16x9,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait3x4 => "3:4",
            Self::Landscape4x3 => "4:3",
            Self::Tall9x16 => "9:16",
            Self::Wide16x9 => "16:9",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = PortraitError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let token = raw.trim();
        Self::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == token)
            .ok_or_else(|| PortraitError::configuration(format!("unsupported aspect ratio '{token}'")))
    }
}

/// One generation call. Reference images are raw encoded image bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    prompt: String,
    aspect_ratio: AspectRatio,
    subject_image: Option<Vec<u8>>,
    style_image: Option<Vec<u8>>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Result<Self, PortraitError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(PortraitError::configuration("prompt must not be empty"));
        }
        Ok(Self {
            prompt,
            aspect_ratio: AspectRatio::default(),
            subject_image: None,
            style_image: None,
        })
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_subject_image(mut self, bytes: Vec<u8>) -> Self {
        self.subject_image = Some(bytes);
        self
    }

    pub fn with_style_image(mut self, bytes: Vec<u8>) -> Self {
        self.style_image = Some(bytes);
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }

    pub fn subject_image(&self) -> Option<&[u8]> {
        self.subject_image.as_deref()
    }

    pub fn style_image(&self) -> Option<&[u8]> {
        self.style_image.as_deref()
    }

    pub fn has_reference_images(&self) -> bool {
        self.subject_image.is_some() || self.style_image.is_some()
    }

    pub(crate) fn without_reference_images(&self) -> Self {
        Self {
            prompt: self.prompt.clone(),
            aspect_ratio: self.aspect_ratio,
            subject_image: None,
            style_image: None,
        }
    }
}

impl fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("prompt", &self.prompt)
            .field("aspect_ratio", &self.aspect_ratio)
            .field("subject_image_bytes", &self.subject_image.as_ref().map(Vec::len))
            .field("style_image_bytes", &self.style_image.as_ref().map(Vec::len))
            .finish()
    }
}

/// What a provider hands back: something to download or inline image data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedPayload {
    Url(String),
    Base64(String),
}

impl GeneratedPayload {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Url(value) | Self::Base64(value) => value,
        }
    }

    /// Tags an untagged payload string. Short strings are never treated as
    /// inline data even when they fit the alphabet.
    pub fn classify(raw: &str) -> Self {
        if looks_like_base64(raw) {
            Self::Base64(raw.to_string())
        } else {
            Self::Url(raw.to_string())
        }
    }
}

pub fn looks_like_base64(raw: &str) -> bool {
    if raw.is_empty() {
        return false;
    }
    if raw
        .get(..4)
        .map(|prefix| prefix.eq_ignore_ascii_case("http"))
        .unwrap_or(false)
    {
        return false;
    }
    if raw.len() < MIN_BASE64_PAYLOAD_LEN || raw.len() % 4 != 0 {
        return false;
    }

    let body = raw.trim_end_matches('=');
    if raw.len() - body.len() > 2 {
        return false;
    }
    body.bytes()
        .all(|byte| byte.is_ascii_alphanumeric() || byte == b'+' || byte == b'/')
}
