use std::collections::HashMap;

use reqwest::Url;

use crate::models::{Model, ModelCatalog};

const OPENROUTER_HOST: &str = "openrouter.ai";

/// Key under which inference errors of a provider are recorded.
///
/// Providers are told apart by the host of the model's `base_url`; the
/// OpenRouter endpoint maps to `"openrouter"`.
pub fn provider_key(base_url: &str) -> String {
    match Url::parse(base_url).ok().as_ref().and_then(Url::host_str) {
        Some(OPENROUTER_HOST) => "openrouter".to_string(),
        Some(host) => host.to_string(),
        None => base_url.to_string(),
    }
}

/// Reference data about the backend's models plus provider error state.
#[derive(Debug, Default)]
pub struct ServiceStore {
    models: Option<ModelCatalog>,
    inference_errors: HashMap<String, u16>,
}

impl ServiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_models(&mut self, models: ModelCatalog) {
        self.models = Some(models);
    }

    pub fn models(&self) -> Option<&ModelCatalog> {
        self.models.as_ref()
    }

    pub fn find_model(&self, name: &str) -> Option<&Model> {
        self.models.as_ref()?.find_by_name(name)
    }

    pub fn set_inference_error(&mut self, provider: impl Into<String>, code: u16) {
        self.inference_errors.insert(provider.into(), code);
    }

    pub fn inference_error(&self, provider: &str) -> Option<u16> {
        self.inference_errors.get(provider).copied()
    }

    pub fn clear_inference_error(&mut self, provider: &str) -> Option<u16> {
        self.inference_errors.remove(provider)
    }
}
