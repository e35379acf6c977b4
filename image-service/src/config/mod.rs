use crate::services::image_fetcher::DEFAULT_FETCH_TIMEOUT;
use crate::services::providers::openai::{OpenAiConfig, OPENAI_API_BASE};
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

const DEFAULT_IMAGE_MODEL: &str = "gpt-image-1";
const DEFAULT_STREAM_MODEL: &str = "gpt-4.1";

#[derive(Debug, Clone)]
pub struct ImageServiceConfig {
    pub common: core_config::Config,
    pub openai: OpenAiSettings,
    pub fetch: FetchSettings,
}

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: Secret<String>,
    pub base_url: String,
    /// Model for generate/edit (e.g., gpt-image-1)
    pub image_model: String,
    /// Model driving streamed generation (e.g., gpt-4.1)
    pub stream_model: String,
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout: Duration,
}

impl ImageServiceConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let api_key = get_env("OPENAI_API_KEY", None)?;
        if api_key.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OPENAI_API_KEY is set but empty"
            )));
        }

        let fetch_timeout = parse_fetch_timeout(&get_env(
            "IMAGE_FETCH_TIMEOUT_SECS",
            Some(&DEFAULT_FETCH_TIMEOUT.as_secs().to_string()),
        )?)?;

        Ok(ImageServiceConfig {
            common,
            openai: OpenAiSettings {
                api_key: Secret::new(api_key),
                base_url: get_env("OPENAI_BASE_URL", Some(OPENAI_API_BASE))?,
                image_model: get_env("IMAGE_MODEL", Some(DEFAULT_IMAGE_MODEL))?,
                stream_model: get_env("STREAM_MODEL", Some(DEFAULT_STREAM_MODEL))?,
            },
            fetch: FetchSettings {
                timeout: fetch_timeout,
            },
        })
    }

    /// Provider configuration derived from these settings.
    pub fn openai_config(&self) -> OpenAiConfig {
        OpenAiConfig {
            api_key: self.openai.api_key.clone(),
            base_url: self.openai.base_url.clone(),
            image_model: self.openai.image_model.clone(),
            stream_model: self.openai.stream_model.clone(),
        }
    }
}

/// Whole seconds, at least one.
fn parse_fetch_timeout(value: &str) -> Result<Duration, AppError> {
    let secs = value.trim().parse::<u64>().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!(
            "IMAGE_FETCH_TIMEOUT_SECS must be a whole number of seconds: {}",
            e
        ))
    })?;

    if secs == 0 {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "IMAGE_FETCH_TIMEOUT_SECS must be at least 1"
        )));
    }

    Ok(Duration::from_secs(secs))
}

fn get_env(key: &str, default: Option<&str>) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => match default {
            Some(def) => Ok(def.to_string()),
            None => Err(AppError::ConfigError(anyhow::anyhow!(
                "{} is required but not set",
                key
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_env_falls_back_to_default() {
        let value = get_env("IMAGE_SERVICE_TEST_UNSET_VARIABLE", Some("fallback")).unwrap();
        assert_eq!(value, "fallback");
    }

    #[test]
    fn get_env_without_default_is_a_config_error() {
        let err = get_env("IMAGE_SERVICE_TEST_UNSET_VARIABLE", None).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn fetch_timeout_parses_whole_seconds() {
        assert_eq!(parse_fetch_timeout("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn zero_or_invalid_fetch_timeout_is_a_config_error() {
        for value in ["0", "-5", "soon"] {
            let err = parse_fetch_timeout(value).unwrap_err();
            assert!(matches!(err, AppError::ConfigError(_)), "accepted {value}");
        }
    }
}
