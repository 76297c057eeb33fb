//! Configuration module

pub mod settings;

pub use settings::{
    AuthConfig, BatchConfig, GateConfig, LoggingConfig, ModelConfig, PreprocessConfig,
    ServerConfig, Settings,
};
