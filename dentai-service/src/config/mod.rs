use crate::models::Coordinate;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::fmt::Display;
use std::str::FromStr;

/// Default transport timeout for calls to the generative API.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Fallback coordinate used when the client cannot supply a location.
const DEFAULT_LATITUDE: f64 = 37.7749;
const DEFAULT_LONGITUDE: f64 = -122.4194;

/// Workspaces untouched for this long are closed by the sweeper.
const DEFAULT_WORKSPACE_IDLE_TTL_SECS: u64 = 30 * 60;
const DEFAULT_WORKSPACE_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_WORKSPACES: usize = 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct DentaiConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub provider: ProviderKind,
    pub models: ModelConfig,
    pub google: GoogleConfig,
    pub default_location: Coordinate,
    pub workspaces: WorkspaceConfig,
}

/// Which generative backend the gateway talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Mock,
}

impl std::str::FromStr for ProviderKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(ProviderKind::Gemini),
            "mock" => Ok(ProviderKind::Mock),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "Unknown GENAI_PROVIDER '{}', expected 'gemini' or 'mock'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Lightweight text model for dashboard summaries.
    pub summary_model: String,
    /// Multimodal model for image edits.
    pub image_model: String,
    /// Model used with search and maps grounding tools.
    pub grounded_model: String,
    /// Higher-capability conversational model for the assistant.
    pub chat_model: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    /// Empty when no credential was provided; calls then fail downstream.
    pub api_key: String,
}

impl GoogleConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceConfig {
    pub idle_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// Opening beyond this many workspaces is refused.
    pub max_open: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: DEFAULT_WORKSPACE_IDLE_TTL_SECS,
            sweep_interval_secs: DEFAULT_WORKSPACE_SWEEP_INTERVAL_SECS,
            max_open: DEFAULT_MAX_WORKSPACES,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            summary_model: "gemini-flash-lite-latest".to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
            grounded_model: "gemini-2.5-flash".to_string(),
            chat_model: "gemini-3-pro-preview".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl DentaiConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";
        let defaults = ModelConfig::default();

        let provider: ProviderKind = get_env("GENAI_PROVIDER", Some("gemini"), is_prod)?.parse()?;

        Ok(DentaiConfig {
            common: common_config,
            provider,
            models: ModelConfig {
                summary_model: get_env(
                    "GENAI_SUMMARY_MODEL",
                    Some(&defaults.summary_model),
                    is_prod,
                )?,
                image_model: get_env("GENAI_IMAGE_MODEL", Some(&defaults.image_model), is_prod)?,
                grounded_model: get_env(
                    "GENAI_GROUNDED_MODEL",
                    Some(&defaults.grounded_model),
                    is_prod,
                )?,
                chat_model: get_env("GENAI_CHAT_MODEL", Some(&defaults.chat_model), is_prod)?,
                request_timeout_secs: parse_env(
                    "GENAI_REQUEST_TIMEOUT_SECS",
                    DEFAULT_REQUEST_TIMEOUT_SECS,
                    is_prod,
                )?,
            },
            google: GoogleConfig {
                api_key: load_api_key(),
            },
            default_location: Coordinate {
                lat: parse_env("DEFAULT_LATITUDE", DEFAULT_LATITUDE, false)?,
                lng: parse_env("DEFAULT_LONGITUDE", DEFAULT_LONGITUDE, false)?,
            },
            workspaces: WorkspaceConfig {
                idle_ttl_secs: parse_env(
                    "WORKSPACE_IDLE_TTL_SECS",
                    DEFAULT_WORKSPACE_IDLE_TTL_SECS,
                    is_prod,
                )?,
                sweep_interval_secs: parse_env(
                    "WORKSPACE_SWEEP_INTERVAL_SECS",
                    DEFAULT_WORKSPACE_SWEEP_INTERVAL_SECS,
                    is_prod,
                )?,
                max_open: parse_env("MAX_WORKSPACES", DEFAULT_MAX_WORKSPACES, is_prod)?,
            },
        })
    }

    /// Configuration for tests and offline runs: mock provider, random port.
    pub fn offline() -> Self {
        Self {
            common: core_config::Config {
                port: 0,
                ..Default::default()
            },
            provider: ProviderKind::Mock,
            models: ModelConfig::default(),
            google: GoogleConfig {
                api_key: String::new(),
            },
            default_location: Coordinate {
                lat: DEFAULT_LATITUDE,
                lng: DEFAULT_LONGITUDE,
            },
            workspaces: WorkspaceConfig::default(),
        }
    }
}

/// A missing credential never blocks startup; it is logged and requests fail
/// downstream.
fn load_api_key() -> String {
    match env::var("GOOGLE_API_KEY").or_else(|_| env::var("API_KEY")) {
        Ok(key) if !key.is_empty() => key,
        _ => {
            tracing::error!("GOOGLE_API_KEY is missing from environment variables");
            String::new()
        }
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod && default.is_none() {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

/// Read a variable and parse it, rejecting malformed values instead of
/// silently using the default.
fn parse_env<T>(key: &str, default: T, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr + ToString,
    T::Err: Display,
{
    let raw = get_env(key, Some(&default.to_string()), is_prod)?;
    raw.trim().parse().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e))
    })
}
