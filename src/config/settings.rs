//! Application settings and configuration management

use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable that points at an alternative configuration file.
pub const CONFIG_PATH_ENV: &str = "VLM_SERVING_CONFIG";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    pub preprocess: PreprocessConfig,
    #[serde(default)]
    pub gate: GateConfig,
    pub batch: BatchConfig,
    pub model: ModelConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest accepted request body; data-URLs are ~4/3 of the image size.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_max_body_bytes() -> usize {
    20 * 1024 * 1024
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Expected `X-Moondream-Auth` value. Unset or empty disables the check.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl AuthConfig {
    /// The configured key, if authentication is enabled
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.is_empty())
    }

    pub fn enabled(&self) -> bool {
        self.api_key().is_some()
    }
}

/// Preprocessing pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreprocessConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum submitted-but-unfinished decodes; 0 means unbounded.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

fn default_workers() -> usize {
    4
}

fn default_max_pending() -> usize {
    1000
}

/// Inference gate configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GateConfig {
    /// How long a request may wait for the gate. Unset waits forever.
    #[serde(default)]
    pub acquire_timeout_ms: Option<u64>,
}

impl GateConfig {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }
}

/// Batching placeholders, reported by `/health` but not used in the request path
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_batch_size")]
    pub size: usize,
    #[serde(default = "default_batch_timeout")]
    pub timeout_secs: f64,
}

fn default_batch_size() -> usize {
    4
}

fn default_batch_timeout() -> f64 {
    0.1
}

/// Upstream model worker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_model_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Reported as `input_tokens`; the image prompt is not tokenized here.
    #[serde(default = "default_input_token_estimate")]
    pub input_token_estimate: usize,
}

fn default_model_name() -> String {
    "moondream-2b-2025-04-14".to_string()
}

fn default_model_endpoint() -> String {
    "http://127.0.0.1:2020".to_string()
}

fn default_timeout() -> u64 {
    120000
}

fn default_input_token_estimate() -> usize {
    735
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config/default".to_string());
        Self::load_from_path(path)
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("server.max_body_bytes", default_max_body_bytes() as i64)?
            .set_default("preprocess.workers", default_workers() as i64)?
            .set_default("preprocess.max_pending", default_max_pending() as i64)?
            .set_default("batch.enabled", false)?
            .set_default("batch.size", default_batch_size() as i64)?
            .set_default("batch.timeout_secs", default_batch_timeout())?
            .set_default("model.name", default_model_name())?
            .set_default("model.endpoint", default_model_endpoint())?
            .set_default("model.timeout_ms", default_timeout() as i64)?
            .set_default("model.input_token_estimate", default_input_token_estimate() as i64)?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", default_log_format())?
            // Load from configuration file
            .add_source(File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false))
            // Override with environment variables (prefixed with VLM_SERVING__)
            .add_source(
                Environment::with_prefix("VLM_SERVING")
                    .separator("__")
                    .try_parsing(true),
            )
            // Flat variable names used by existing deployments
            .set_override_option("preprocess.workers", env_var("PREPROCESS_WORKERS"))?
            .set_override_option("auth.api_key", env_var("VLM_API_KEY"))?
            .set_override_option("batch.enabled", env_var("BATCH_ENABLED").map(|v| v.eq_ignore_ascii_case("true")))?
            .set_override_option("batch.size", env_var("BATCH_SIZE"))?
            .set_override_option("batch.timeout_secs", env_var("BATCH_TIMEOUT"))?
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(invalid("Server port cannot be 0"));
        }
        if self.preprocess.workers == 0 {
            return Err(invalid("preprocess.workers must be at least 1"));
        }
        if self.batch.size == 0 {
            return Err(invalid("batch.size must be at least 1"));
        }
        if self.model.endpoint.trim().is_empty() {
            return Err(invalid("model.endpoint cannot be empty"));
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn invalid(message: &str) -> AppError {
    AppError::Config(config::ConfigError::Message(message.to_string()))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                max_body_bytes: default_max_body_bytes(),
            },
            auth: AuthConfig::default(),
            preprocess: PreprocessConfig {
                workers: default_workers(),
                max_pending: default_max_pending(),
            },
            gate: GateConfig::default(),
            batch: BatchConfig {
                enabled: false,
                size: default_batch_size(),
                timeout_secs: default_batch_timeout(),
            },
            model: ModelConfig {
                name: default_model_name(),
                endpoint: default_model_endpoint(),
                api_key: None,
                timeout_ms: default_timeout(),
                input_token_estimate: default_input_token_estimate(),
            },
            logging: LoggingConfig {
                level: default_log_level(),
                format: default_log_format(),
            },
        }
    }
}
