//! # ExecGuard Infrastructure
//!
//! Process-level plumbing around `execguard-core`.
//!
//! This crate contains:
//! - Configuration loading from `EXECGUARD_*` variables and TOML/JSON files
//! - Tracing subscriber bootstrap
//!
//! ## Architecture
//! - Depends on `execguard-common` and `execguard-core`
//! - Contains the "impure" code (environment, filesystem, global subscriber)

#![forbid(unsafe_code)]

pub mod config;
pub mod observability;

pub use config::{load, load_from_env, load_from_file, LoaderError, LoaderResult};
pub use observability::{init_tracing, LogFormat, TracingInitError};
