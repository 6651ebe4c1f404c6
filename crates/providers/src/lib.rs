//! Model provider implementations for Hearth.
//!
//! All providers implement the `hearth_core::Provider` trait and emit raw
//! stream deltas. `build_from_config` picks the backend from `[model]`.

mod http;
pub mod ollama;
pub mod openai_compat;

use std::sync::Arc;

use hearth_config::{AppConfig, ModelApi};
use hearth_core::{Provider, ProviderError};

pub use http::LineBuffer;
pub use ollama::OllamaProvider;
pub use openai_compat::OpenAiCompatProvider;

/// Construct the provider described by the `[model]` section.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let model = &config.model;
    let timeout = std::time::Duration::from_secs(model.request_timeout_secs);

    let provider: Arc<dyn Provider> = match model.api {
        ModelApi::Ollama => Arc::new(OllamaProvider::new(&model.base_url, timeout)?),
        ModelApi::Openai => Arc::new(OpenAiCompatProvider::new(
            "openai",
            &model.base_url,
            model.api_key.clone().unwrap_or_default(),
            timeout,
        )?),
    };

    tracing::debug!(provider = provider.name(), base_url = %model.base_url, "Provider configured");
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_ollama_by_default() {
        let provider = build_from_config(&AppConfig::default()).unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn builds_openai_compat() {
        let mut config = AppConfig::default();
        config.model.api = ModelApi::Openai;
        config.model.base_url = "http://localhost:8080/v1".into();
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "openai");
    }
}
