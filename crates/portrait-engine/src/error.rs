use thiserror::Error;

/// Every way a portrait request can fail. None of these are retried; the
/// `Option`-returning surfaces log them and hand back absence.
#[derive(Debug, Error)]
pub enum PortraitError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("{provider} request failed{}: {message}", .status.map(|code| format!(" ({code})")).unwrap_or_default())]
    Transport {
        provider: String,
        status: Option<u16>,
        message: String,
        body: Option<String>,
    },
    #[error("{provider} response did not contain an image payload")]
    Parse { provider: String, body: String },
    #[error("image decode failed: {0}")]
    Decode(String),
    #[error("cache io error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl PortraitError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Short machine-readable tag for logs and the event journal.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Transport { .. } => "transport",
            Self::Parse { .. } => "parse",
            Self::Decode(_) => "decode",
            Self::Io { .. } => "io",
        }
    }

    /// Provider response body when one was received.
    pub fn response_body(&self) -> Option<&str> {
        match self {
            Self::Transport { body, .. } => body.as_deref(),
            Self::Parse { body, .. } => Some(body.as_str()),
            _ => None,
        }
    }
}
