use std::sync::Arc;

use portrait_contracts::models::{ModelRegistry, ModelSpec, CAPABILITY_REFERENCE_IMAGES};
use portrait_contracts::providers::{NamedProvider, ProviderKind, ProviderRegistry};
use portrait_contracts::settings::ProviderCredential;
use tracing::{error, info, warn};

use crate::error::PortraitError;
use crate::providers::{GeminiProvider, OpenAiProvider, PortraitProvider, ProviderCall};
use crate::request::{GeneratedPayload, GenerationRequest};
use crate::transport::Transport;

const OPENAI_IMAGE_MODEL: &str = "dall-e-3";

/// Picks the configured provider and model and forwards the request.
pub struct PortraitDispatcher {
    providers: ProviderRegistry<Box<dyn PortraitProvider>>,
    models: ModelRegistry,
}

impl PortraitDispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let mut dispatcher = Self::empty();
        dispatcher.register(OpenAiProvider::new(Arc::clone(&transport)));
        dispatcher.register(GeminiProvider::new(transport));
        dispatcher
    }

    pub fn empty() -> Self {
        Self {
            providers: ProviderRegistry::default(),
            models: ModelRegistry::default(),
        }
    }

    pub fn register<P: PortraitProvider + 'static>(&mut self, provider: P) {
        self.providers.register(Box::new(provider));
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.list()
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn generate_portrait(
        &self,
        credential: &ProviderCredential,
        request: &GenerationRequest,
    ) -> Result<GeneratedPayload, PortraitError> {
        let (provider, model) = self.resolve(credential).inspect_err(|err| {
            error!(error = %err, "portrait generation not attempted");
        })?;

        let stripped;
        let request = if request.has_reference_images()
            && !model.supports(CAPABILITY_REFERENCE_IMAGES)
        {
            warn!(
                provider = provider.name(),
                model = model.name.as_str(),
                "model does not accept reference images; generating from the prompt only"
            );
            stripped = request.without_reference_images();
            &stripped
        } else {
            request
        };

        info!(
            provider = provider.name(),
            model = model.name.as_str(),
            aspect_ratio = request.aspect_ratio().as_str(),
            "generating portrait"
        );
        provider.generate(&ProviderCall {
            api_key: credential.secret().trim(),
            model: &model.name,
            request,
        })
    }

    fn resolve(
        &self,
        credential: &ProviderCredential,
    ) -> Result<(&dyn PortraitProvider, ModelSpec), PortraitError> {
        if credential.is_empty() {
            return Err(PortraitError::configuration("no API key configured"));
        }
        let kind = ProviderKind::from_name(&credential.provider).ok_or_else(|| {
            PortraitError::configuration(format!("unknown provider '{}'", credential.provider))
        })?;
        let provider = self.providers.get(kind.name()).ok_or_else(|| {
            PortraitError::configuration(format!("no client registered for provider '{kind}'"))
        })?;
        let model_name = match kind {
            ProviderKind::OpenAi => OPENAI_IMAGE_MODEL,
            ProviderKind::Gemini => credential.gemini_model.model_name(),
        };
        let model = self
            .models
            .ensure_image_model(model_name, kind.name())
            .ok_or_else(|| {
                PortraitError::configuration(format!(
                    "model '{model_name}' is not an image model for '{kind}'"
                ))
            })?;
        Ok((&**provider, model))
    }
}
