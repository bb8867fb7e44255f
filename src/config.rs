use crate::models::{Provider, Settings};

/// Environment variable consulted when no API key has been saved yet.
pub const API_KEY_ENV_VAR: &str = "NEOCHAT_API_KEY";

/// Documented base URL + model pair for a provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProviderDefaults {
    pub base_url: &'static str,
    pub model: &'static str,
}

/// Pure lookup table. `Custom` has no documented defaults; callers supply
/// their own pair, so it maps to the DeepSeek entry like any unknown provider.
pub fn defaults_for(provider: Provider) -> ProviderDefaults {
    match provider {
        Provider::OpenAI => ProviderDefaults {
            base_url: "https://api.openai.com/v1",
            model: "gpt-4o-mini",
        },
        Provider::DeepSeek | Provider::Custom => ProviderDefaults {
            base_url: "https://api.deepseek.com/v1",
            model: "deepseek-chat",
        },
    }
}

/// Recomputes `api_base_url`/`model` from the defaults table unless the
/// provider is `Custom`, in which case caller-supplied overrides stand.
/// Idempotent; applied on every provider change and before every save.
pub fn apply_provider_defaults(mut settings: Settings) -> Settings {
    if settings.provider != Provider::Custom {
        let defaults = defaults_for(settings.provider);
        settings.api_base_url = defaults.base_url.to_string();
        settings.model = defaults.model.to_string();
    }
    settings
}

/// Retrieves the API key from the environment, used as a fallback when the
/// persisted settings carry no key.
pub fn api_key_from_env() -> Option<String> {
    match std::env::var(API_KEY_ENV_VAR) {
        Ok(key) if !key.trim().is_empty() => {
            log::debug!("Using API key from environment variable {}", API_KEY_ENV_VAR);
            Some(key)
        }
        _ => None,
    }
}
