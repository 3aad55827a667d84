//! Shared building blocks for the ExecGuard resilience crates.
//!
//! # Feature Tiers
//!
//! - `foundation`: error vocabulary ([`error`]) and serde helpers ([`utils`])
//! - `runtime`: time sources ([`clock`]) used by circuit breakers

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod clock;

#[cfg(feature = "runtime")]
pub use clock::{Clock, MockClock, SystemClock};
#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "foundation")]
pub use utils::{duration_millis, duration_secs};
