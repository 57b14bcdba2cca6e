use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::providers::GeminiModel;

pub const MOD_DIR_NAME: &str = "PawnPortrait";
pub const CACHE_DIR_NAME: &str = "Cache";
pub const INDEX_FILE_NAME: &str = "portraits.json";
pub const EVENTS_FILE_NAME: &str = "events.jsonl";

const DEFAULT_REQUEST_TIMEOUT_S: f64 = 120.0;
const MIN_REQUEST_TIMEOUT_S: f64 = 5.0;
const MAX_REQUEST_TIMEOUT_S: f64 = 600.0;

/// User-facing configuration. Every field has a default so partial files
/// load cleanly.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortraitSettings {
    pub provider: String,
    pub gemini_model: GeminiModel,
    pub api_key: String,
    pub save_data_root: Option<PathBuf>,
    pub request_timeout_s: f64,
}

impl Default for PortraitSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            gemini_model: GeminiModel::default(),
            api_key: String::new(),
            save_data_root: None,
            request_timeout_s: DEFAULT_REQUEST_TIMEOUT_S,
        }
    }
}

impl fmt::Debug for PortraitSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortraitSettings")
            .field("provider", &self.provider)
            .field("gemini_model", &self.gemini_model)
            .field("api_key", &redacted(&self.api_key))
            .field("save_data_root", &self.save_data_root)
            .field("request_timeout_s", &self.request_timeout_s)
            .finish()
    }
}

impl PortraitSettings {
    /// Missing file yields defaults; an unreadable or malformed file is an
    /// error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading settings {}", path.display()))?;
        let parsed: Self = serde_json::from_str(&raw)
            .with_context(|| format!("invalid settings JSON in {}", path.display()))?;
        Ok(parsed)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(api_key) = non_empty_env("PAWN_PORTRAIT_API_KEY") {
            self.api_key = api_key;
        }
        if let Some(provider) = non_empty_env("PAWN_PORTRAIT_PROVIDER") {
            self.provider = provider;
        }
        if let Some(model) =
            non_empty_env("PAWN_PORTRAIT_GEMINI_MODEL").and_then(|raw| GeminiModel::from_name(&raw))
        {
            self.gemini_model = model;
        }
        if let Some(root) = non_empty_env("PAWN_PORTRAIT_SAVE_ROOT") {
            self.save_data_root = Some(PathBuf::from(root));
        }
        self
    }

    pub fn credential(&self) -> ProviderCredential {
        ProviderCredential {
            provider: self.provider.trim().to_string(),
            gemini_model: self.gemini_model,
            secret: self.api_key.trim().to_string(),
        }
    }

    pub fn request_timeout_s(&self) -> f64 {
        if !self.request_timeout_s.is_finite() {
            return DEFAULT_REQUEST_TIMEOUT_S;
        }
        self.request_timeout_s
            .clamp(MIN_REQUEST_TIMEOUT_S, MAX_REQUEST_TIMEOUT_S)
    }

    pub fn mod_dir(&self) -> PathBuf {
        let root = self
            .save_data_root
            .clone()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        root.join(MOD_DIR_NAME)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.mod_dir().join(CACHE_DIR_NAME)
    }

    pub fn index_path(&self) -> PathBuf {
        self.mod_dir().join(INDEX_FILE_NAME)
    }

    pub fn events_path(&self) -> PathBuf {
        self.mod_dir().join(EVENTS_FILE_NAME)
    }
}

/// Provider selection plus the secret used to call it.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderCredential {
    pub provider: String,
    pub gemini_model: GeminiModel,
    secret: String,
}

impl ProviderCredential {
    pub fn new(provider: impl Into<String>, gemini_model: GeminiModel, secret: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            gemini_model,
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn is_empty(&self) -> bool {
        self.secret.trim().is_empty()
    }
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("provider", &self.provider)
            .field("gemini_model", &self.gemini_model)
            .field("secret", &redacted(&self.secret))
            .finish()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.trim().is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
