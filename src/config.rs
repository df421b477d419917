//! C8: process bootstrap configuration, resolved once at startup.
//!
//! Follows the corpus's configuration idiom: typed structs deserialised with
//! `serde`, secrets wrapped in [`SecretString`] so they never leak through a
//! `Debug` print or a log line, and `deny_unknown_fields` on file-sourced
//! structs so a routing-table typo fails fast at startup instead of being
//! silently ignored.

use std::collections::BTreeMap;
use std::env;

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingEnvVar(&'static str),

    #[error("invalid value for environment variable {name}: {value:?}")]
    InvalidEnvVar { name: &'static str, value: String },

    #[error("failed to read model routes file {path}: {source}")]
    RoutesFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse model routes: {0}")]
    RoutesParse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetProvider {
    OpenAi,
    Gemini,
    Anthropic,
}

impl TargetProvider {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "openai" => Some(Self::OpenAi),
            "gemini" => Some(Self::Gemini),
            "anthropic" => Some(Self::Anthropic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetProvider::OpenAi => "openai",
            TargetProvider::Gemini => "gemini",
            TargetProvider::Anthropic => "anthropic",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            TargetProvider::OpenAi => "https://api.openai.com/v1",
            TargetProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            TargetProvider::Anthropic => "https://api.anthropic.com/v1",
        }
    }
}

/// Credential and endpoint for the single configured upstream provider.
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: SecretString,
}

#[derive(Debug, Clone, Deserialize)]
struct RouteEntry {
    upstream_model: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RoutesFile {
    #[serde(default)]
    models: BTreeMap<String, RouteEntry>,
}

/// The caller-model → upstream-model lookup table consulted by the router (C2).
#[derive(Debug, Clone, Default)]
pub struct ModelRoutes {
    models: BTreeMap<String, String>,
}

impl ModelRoutes {
    /// Parses a routing table from TOML text (either the `MODEL_ROUTES`
    /// environment variable's inline value or the contents of the file it
    /// points at). Public so tests — unit and integration alike — can build a
    /// table without going through environment variables.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let parsed: RoutesFile = toml::from_str(contents)?;
        Ok(Self {
            models: parsed.models.into_iter().map(|(k, v)| (k, v.upstream_model)).collect(),
        })
    }

    pub fn resolve(&self, caller_model: &str) -> Option<&str> {
        self.models.get(caller_model).map(String::as_str)
    }
}

pub struct Config {
    pub port: u16,
    pub log_level: String,
    pub target_provider: TargetProvider,
    pub provider: ProviderConfig,
    pub routes: ModelRoutes,
}

impl Config {
    /// Resolves the process configuration from environment variables, with
    /// an optional `MODEL_ROUTES` TOML routing table (inline TOML text or a
    /// path to a TOML file).
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match env::var("PORT") {
            Ok(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidEnvVar { name: "PORT", value })?,
            Err(_) => 8080,
        };

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let target_provider = match env::var("TARGET_LLM_PROVIDER") {
            Ok(value) => TargetProvider::parse(&value)
                .ok_or_else(|| ConfigError::InvalidEnvVar { name: "TARGET_LLM_PROVIDER", value })?,
            Err(_) => TargetProvider::OpenAi,
        };

        let (key_var, base_url_var) = match target_provider {
            TargetProvider::OpenAi => ("OPENAI_API_KEY", "OPENAI_BASE_URL"),
            TargetProvider::Gemini => ("GEMINI_API_KEY", "GEMINI_BASE_URL"),
            TargetProvider::Anthropic => ("ANTHROPIC_API_KEY", "ANTHROPIC_BASE_URL"),
        };

        let api_key = env::var(key_var)
            .map_err(|_| ConfigError::MissingEnvVar(key_var))
            .map(SecretString::from)?;
        let base_url = env::var(base_url_var).unwrap_or_else(|_| target_provider.default_base_url().to_string());

        let routes = match env::var("MODEL_ROUTES") {
            Ok(value) => load_routes(&value)?,
            Err(_) => ModelRoutes::default(),
        };

        Ok(Self {
            port,
            log_level,
            target_provider,
            provider: ProviderConfig { base_url, api_key },
            routes,
        })
    }
}

/// `MODEL_ROUTES` may hold inline TOML (if it parses as a table) or a path
/// to a TOML file, matching the corpus's convention of accepting either form
/// for structured settings.
fn load_routes(value: &str) -> Result<ModelRoutes, ConfigError> {
    if let Ok(routes) = ModelRoutes::from_toml(value) {
        return Ok(routes);
    }
    let contents = std::fs::read_to_string(value).map_err(|source| ConfigError::RoutesFileRead {
        path: value.to_string(),
        source,
    })?;
    ModelRoutes::from_toml(&contents)
}
