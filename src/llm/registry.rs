use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AppConfig, LlmConfig, ProviderAdapter};
use crate::errors::{SidePilotError, SidePilotResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::gemini::GeminiProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    active: String,
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn new(active: String) -> Self {
        Self {
            providers: HashMap::new(),
            active,
            llm_config: LlmConfig::default(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn active_name(&self) -> &str {
        &self.active
    }

    pub fn get_active(&self) -> SidePilotResult<Arc<dyn LlmProvider>> {
        self.providers.get(&self.active).cloned().ok_or_else(|| {
            SidePilotError::Config(format!(
                "Active provider '{}' not found in registry",
                self.active
            ))
        })
    }

    pub fn set_active(&mut self, name: String) -> SidePilotResult<()> {
        if self.providers.contains_key(&name) {
            tracing::info!(provider = %name, "active provider switched");
            self.active = name;
            Ok(())
        } else {
            Err(SidePilotError::Config(format!("Provider '{name}' not registered")))
        }
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Display name from config, falling back to the id.
    pub fn display_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.llm_config
            .providers
            .get(name)
            .map(|p| p.display_name.as_str())
            .unwrap_or(name)
    }

    /// Active provider plus the model settings for one call.
    pub fn call_config(&self) -> SidePilotResult<(Arc<dyn LlmProvider>, CallConfig)> {
        let provider = self.get_active()?;
        let cfg = match self.llm_config.providers.get(&self.active) {
            Some(entry) => CallConfig {
                model: entry.model.clone(),
                stream: entry.stream,
                temperature: entry.temperature,
            },
            None => CallConfig {
                model: String::new(),
                stream: false,
                temperature: 1.0,
            },
        };
        tracing::debug!(
            provider = %self.active,
            model = %cfg.model,
            stream = cfg.stream,
            temperature = cfg.temperature,
            "resolved call config"
        );
        Ok((provider, cfg))
    }

    /// Build a registry from the loaded app config.
    /// API keys are read from environment variables named `SIDEPILOT_<ID>_API_KEY`,
    /// falling back to `api_key` in the file.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
            active: config.llm.active_provider.clone(),
            llm_config: config.llm.clone(),
        };
        for (id, entry) in &config.llm.providers {
            let api_key = std::env::var(format!("SIDEPILOT_{}_API_KEY", env_key(id)))
                .unwrap_or_else(|_| entry.api_key.clone().unwrap_or_default());
            if api_key.is_empty() {
                tracing::warn!(provider = %id, "no API key configured");
            }
            let provider: Arc<dyn LlmProvider> = match entry.adapter {
                ProviderAdapter::Openai => Arc::new(OpenAiCompatibleProvider::new(
                    id.clone(),
                    entry.api_base.clone(),
                    api_key,
                )),
                ProviderAdapter::Gemini => Arc::new(GeminiProvider::new(
                    id.clone(),
                    entry.api_base.clone(),
                    api_key,
                )),
            };
            registry.register(provider);
        }
        registry
    }
}

fn env_key(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}
