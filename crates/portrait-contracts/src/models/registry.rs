use indexmap::IndexMap;

pub const CAPABILITY_IMAGE: &str = "image";
pub const CAPABILITY_REFERENCE_IMAGES: &str = "reference_images";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub label: String,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_provider(&self, provider: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.provider == provider)
            .cloned()
            .collect()
    }

    /// Returns the model only when it belongs to `provider` and can generate
    /// images.
    pub fn ensure_image_model(&self, name: &str, provider: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.provider == provider && model.supports(CAPABILITY_IMAGE) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, label: &str, capabilities: &[&str]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                label: label.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
            },
        );
    };

    insert("dall-e-3", "openai", "DALL-E 3", &[CAPABILITY_IMAGE]);
    insert(
        "gemini-2.5-flash-image",
        "gemini",
        "Gemini 2.5 Flash (Nano Banana)",
        &[CAPABILITY_IMAGE, CAPABILITY_REFERENCE_IMAGES],
    );
    insert(
        "gemini-3-pro-image-preview",
        "gemini",
        "Gemini 3 Pro (Nano Banana Pro)",
        &[CAPABILITY_IMAGE, CAPABILITY_REFERENCE_IMAGES],
    );

    map
}
