//! Configuration loader
//!
//! ## Loading Strategy
//! 1. If any variable listed below is set, those values are overlaid on the
//!    first config file found (or on the defaults when there is none)
//! 2. Otherwise the first config file found is loaded as-is
//! 3. TOML and JSON are supported, detected by extension
//!
//! Every result is validated before it is returned.
//!
//! ## Environment Variables
//! - `EXECGUARD_CIRCUIT_FAILURE_THRESHOLD`: consecutive failures that open a
//!   circuit
//! - `EXECGUARD_CIRCUIT_SUCCESS_THRESHOLD`: half-open successes that close it
//! - `EXECGUARD_CIRCUIT_FAILURE_RATE_THRESHOLD`: failure rate in (0, 1]
//! - `EXECGUARD_CIRCUIT_TIMEOUT_SECONDS`: open-state cool-down
//! - `EXECGUARD_CIRCUIT_HALF_OPEN_MAX_CALLS`: concurrent trial calls
//! - `EXECGUARD_RETRY_MAX_ATTEMPTS`: attempts per operation
//! - `EXECGUARD_RETRY_INITIAL_DELAY_MS`: first backoff delay
//! - `EXECGUARD_RETRY_MAX_DELAY_MS`: backoff ceiling
//! - `EXECGUARD_RETRY_JITTER_ENABLED`: jitter on/off (true/false)
//! - `EXECGUARD_DLQ_CAPACITY`: dead letters kept before eviction
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./execguard.toml`, `./execguard.json`, `./config.toml`, `./config.json`
//! 2. The same names in the parent and grandparent directories
//! 3. The same names next to the executable

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use execguard_core::ResilienceConfig;

use super::{LoaderError, LoaderResult};

const CIRCUIT_FAILURE_THRESHOLD: &str = "EXECGUARD_CIRCUIT_FAILURE_THRESHOLD";
const CIRCUIT_SUCCESS_THRESHOLD: &str = "EXECGUARD_CIRCUIT_SUCCESS_THRESHOLD";
const CIRCUIT_FAILURE_RATE_THRESHOLD: &str = "EXECGUARD_CIRCUIT_FAILURE_RATE_THRESHOLD";
const CIRCUIT_TIMEOUT_SECONDS: &str = "EXECGUARD_CIRCUIT_TIMEOUT_SECONDS";
const CIRCUIT_HALF_OPEN_MAX_CALLS: &str = "EXECGUARD_CIRCUIT_HALF_OPEN_MAX_CALLS";
const RETRY_MAX_ATTEMPTS: &str = "EXECGUARD_RETRY_MAX_ATTEMPTS";
const RETRY_INITIAL_DELAY_MS: &str = "EXECGUARD_RETRY_INITIAL_DELAY_MS";
const RETRY_MAX_DELAY_MS: &str = "EXECGUARD_RETRY_MAX_DELAY_MS";
const RETRY_JITTER_ENABLED: &str = "EXECGUARD_RETRY_JITTER_ENABLED";
const DLQ_CAPACITY: &str = "EXECGUARD_DLQ_CAPACITY";

/// Every variable [`load_from_env`] reads
pub const ENV_VARS: [&str; 10] = [
    CIRCUIT_FAILURE_THRESHOLD,
    CIRCUIT_SUCCESS_THRESHOLD,
    CIRCUIT_FAILURE_RATE_THRESHOLD,
    CIRCUIT_TIMEOUT_SECONDS,
    CIRCUIT_HALF_OPEN_MAX_CALLS,
    RETRY_MAX_ATTEMPTS,
    RETRY_INITIAL_DELAY_MS,
    RETRY_MAX_DELAY_MS,
    RETRY_JITTER_ENABLED,
    DLQ_CAPACITY,
];

const FILE_NAMES: [&str; 4] = ["execguard.toml", "execguard.json", "config.toml", "config.json"];

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns [`LoaderError`] if no source is available, a source cannot be
/// parsed, or the merged result fails validation.
pub fn load() -> LoaderResult<ResilienceConfig> {
    if !env_overrides_present() {
        return load_from_file(None);
    }

    let base = match probe_config_paths() {
        Some(path) => read_config(&path)?,
        None => ResilienceConfig::default(),
    };
    let config = overlay_env(base)?;
    config.validate()?;
    tracing::info!("Configuration loaded with environment overrides");
    Ok(config)
}

/// Whether any `EXECGUARD_*` variable from [`ENV_VARS`] is set
pub fn env_overrides_present() -> bool {
    ENV_VARS.iter().any(|key| std::env::var_os(key).is_some())
}

/// Load configuration from environment variables over the defaults
///
/// Unset variables keep their default value.
///
/// # Errors
/// Returns [`LoaderError::InvalidEnv`] for unparsable values and
/// [`LoaderError::Invalid`] when the result fails validation.
pub fn load_from_env() -> LoaderResult<ResilienceConfig> {
    let config = overlay_env(ResilienceConfig::default())?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations.
///
/// # Errors
/// Returns [`LoaderError`] if the file is missing, unreadable, malformed, or
/// invalid.
pub fn load_from_file(path: Option<PathBuf>) -> LoaderResult<ResilienceConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(LoaderError::NotFound { path: p });
            }
            p
        }
        None => probe_config_paths().ok_or(LoaderError::NoConfigFile)?,
    };

    let config = read_config(&config_path)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from string content
///
/// Format is detected by the extension of `path`; a path without one is
/// treated as JSON.
///
/// # Errors
/// Returns [`LoaderError`] if the format is unsupported or parsing fails.
pub fn parse_config(contents: &str, path: &Path) -> LoaderResult<ResilienceConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => Ok(toml::from_str(contents)?),
        "json" => Ok(serde_json::from_str(contents)?),
        other => Err(LoaderError::UnsupportedFormat(other.to_string())),
    }
}

/// Probe the standard locations for a config file
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.extend([cwd.clone(), cwd.join(".."), cwd.join("../..")]);
    }
    if let Some(exe_dir) =
        std::env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        roots.push(exe_dir);
    }

    roots
        .iter()
        .flat_map(|root| FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.exists())
}

fn read_config(path: &Path) -> LoaderResult<ResilienceConfig> {
    tracing::info!(path = %path.display(), "Loading configuration from file");
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents, path)
}

fn overlay_env(mut config: ResilienceConfig) -> LoaderResult<ResilienceConfig> {
    let circuit = &mut config.circuit_defaults;
    if let Some(v) = env_parse(CIRCUIT_FAILURE_THRESHOLD)? {
        circuit.failure_threshold = v;
    }
    if let Some(v) = env_parse(CIRCUIT_SUCCESS_THRESHOLD)? {
        circuit.success_threshold = v;
    }
    if let Some(v) = env_parse(CIRCUIT_FAILURE_RATE_THRESHOLD)? {
        circuit.failure_rate_threshold = v;
    }
    if let Some(secs) = env_parse(CIRCUIT_TIMEOUT_SECONDS)? {
        circuit.timeout = Duration::from_secs(secs);
    }
    if let Some(v) = env_parse(CIRCUIT_HALF_OPEN_MAX_CALLS)? {
        circuit.half_open_max_calls = v;
    }

    let retry = &mut config.retry_default;
    if let Some(v) = env_parse(RETRY_MAX_ATTEMPTS)? {
        retry.max_attempts = v;
    }
    if let Some(v) = env_parse(RETRY_INITIAL_DELAY_MS)? {
        retry.initial_delay_ms = v;
    }
    if let Some(v) = env_parse(RETRY_MAX_DELAY_MS)? {
        retry.max_delay_ms = v;
    }
    if let Some(v) = env_bool(RETRY_JITTER_ENABLED)? {
        retry.jitter_enabled = v;
    }

    if let Some(v) = env_parse(DLQ_CAPACITY)? {
        config.dead_letter.capacity = v;
    }

    Ok(config)
}

/// Parse an optional environment variable
fn env_parse<T>(key: &'static str) -> LoaderResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let Ok(raw) = std::env::var(key) else {
        return Ok(None);
    };
    raw.trim().parse().map(Some).map_err(|e: T::Err| LoaderError::InvalidEnv {
        var: key,
        value: raw.clone(),
        message: e.to_string(),
    })
}

/// Parse a boolean environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &'static str) -> LoaderResult<Option<bool>> {
    let Ok(raw) = std::env::var(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(LoaderError::InvalidEnv {
            var: key,
            value: raw,
            message: "expected a boolean".to_string(),
        }),
    }
}
