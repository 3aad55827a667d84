//! Configuration loading
//!
//! Builds a [`ResilienceConfig`](execguard_core::ResilienceConfig) from
//! environment variables and TOML/JSON files.

pub mod loader;

use std::path::PathBuf;

use execguard_common::{
    impl_error_classification, impl_error_conversion, CommonError, ErrorClassification,
    ErrorSeverity,
};
use execguard_core::ConfigError;
use thiserror::Error;

pub use loader::{
    env_overrides_present, load, load_from_env, load_from_file, parse_config, probe_config_paths,
    ENV_VARS,
};

/// Errors raised while locating, reading, or parsing configuration
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("No config file found in any of the standard locations")]
    NoConfigFile,

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// An `EXECGUARD_*` variable could not be parsed
    #[error("Invalid value '{value}' for {var}: {message}")]
    InvalidEnv { var: &'static str, value: String, message: String },

    /// The values parsed but do not form a valid configuration
    #[error(transparent)]
    Invalid(#[from] ConfigError),

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl_error_conversion!(LoaderError, Common);

impl From<toml::de::Error> for LoaderError {
    fn from(err: toml::de::Error) -> Self {
        Self::Common(CommonError::from(err))
    }
}

impl_error_classification!(LoaderError, Common,
    Self::NotFound { .. }
    | Self::NoConfigFile
    | Self::UnsupportedFormat(_)
    | Self::InvalidEnv { .. }
    | Self::Invalid(_) => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: true,
    },
);

/// Loader result type
pub type LoaderResult<T> = Result<T, LoaderError>;
