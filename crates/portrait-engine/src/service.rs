use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use portrait_contracts::events::{EventKind, EventWriter};
use portrait_contracts::settings::PortraitSettings;
use portrait_contracts::store::IdentityStore;
use serde_json::{json, Value};
use tracing::{error, warn};
use uuid::Uuid;

use crate::cache::{event_payload, Portrait, PortraitCache};
use crate::dispatch::PortraitDispatcher;
use crate::request::{GeneratedPayload, GenerationRequest};
use crate::transport::{ReqwestTransport, Transport};

/// Dispatcher and cache bound to one configuration. The cache directory is
/// fixed when the service is built; later settings changes only affect
/// provider selection and credentials.
pub struct PortraitService<S: IdentityStore> {
    settings: PortraitSettings,
    dispatcher: PortraitDispatcher,
    cache: PortraitCache<S>,
    events: Option<EventWriter>,
}

impl<S: IdentityStore> PortraitService<S> {
    /// Production wiring: HTTP transport with the configured timeout and an
    /// event journal next to the cache.
    pub fn from_settings(settings: PortraitSettings, store: S) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(settings.request_timeout_s())
            .context("failed to build HTTP client")?;
        let events = EventWriter::new(settings.events_path(), Uuid::new_v4().to_string());
        Ok(Self::with_transport(settings, store, Arc::new(transport)).with_events(events))
    }

    pub fn with_transport(
        settings: PortraitSettings,
        store: S,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let dispatcher = PortraitDispatcher::new(Arc::clone(&transport));
        let cache = PortraitCache::new(settings.cache_dir(), store, transport);
        Self::new(settings, dispatcher, cache)
    }

    pub fn new(
        settings: PortraitSettings,
        dispatcher: PortraitDispatcher,
        cache: PortraitCache<S>,
    ) -> Self {
        Self {
            settings,
            dispatcher,
            cache,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.cache = self.cache.with_events(events.clone());
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> &PortraitSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: PortraitSettings) {
        if settings.cache_dir() != self.cache.cache_dir() {
            warn!(
                cache_dir = %self.cache.cache_dir().display(),
                "save data root changed; keeping the current cache directory"
            );
        }
        self.settings = settings;
    }

    pub fn dispatcher(&self) -> &PortraitDispatcher {
        &self.dispatcher
    }

    pub fn store(&self) -> &S {
        self.cache.store()
    }

    pub fn store_mut(&mut self) -> &mut S {
        self.cache.store_mut()
    }

    pub fn into_store(self) -> S {
        self.cache.into_store()
    }

    pub fn style_references(&self) -> Vec<PathBuf> {
        self.cache.style_references()
    }

    /// Generates a new portrait and saves it for `identity`. Any failure is
    /// logged and journaled; the caller only sees absence.
    pub fn generate_and_cache(
        &mut self,
        identity: &str,
        request: &GenerationRequest,
        base_name: Option<&str>,
    ) -> Option<Portrait> {
        let credential = self.settings.credential();
        self.emit(
            EventKind::GenerationRequested,
            json!({
                "identity": identity,
                "provider": credential.provider,
                "aspect_ratio": request.aspect_ratio().as_str(),
                "reference_images": request.has_reference_images(),
            }),
        );

        match self.dispatcher.generate_portrait(&credential, request) {
            Ok(payload) => self.cache.resolve(Some(&payload), identity, base_name, true),
            Err(err) => {
                error!(identity, kind = err.kind(), error = %err, "portrait generation failed");
                self.emit(
                    EventKind::GenerationFailed,
                    json!({
                        "identity": identity,
                        "provider": credential.provider,
                        "error": err.to_string(),
                        "error_kind": err.kind(),
                    }),
                );
                None
            }
        }
    }

    /// Shows the cached portrait for `identity` without generating.
    pub fn redisplay(&mut self, identity: &str) -> Option<Portrait> {
        self.cache.resolve(None, identity, None, false)
    }

    /// Stores a payload obtained elsewhere, e.g. by a host that kept the
    /// provider's reply.
    pub fn resolve(
        &mut self,
        payload: Option<&GeneratedPayload>,
        identity: &str,
        base_name: Option<&str>,
        force_refresh: bool,
    ) -> Option<Portrait> {
        self.cache.resolve(payload, identity, base_name, force_refresh)
    }

    fn emit(&self, kind: EventKind, payload: Value) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events.emit(kind, event_payload(payload)) {
            warn!(event = kind.as_str(), error = %err, "failed to write event");
        }
    }
}
