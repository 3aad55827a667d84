//! Shared error vocabulary for the ExecGuard crates
//!
//! Every crate in the workspace reports failures through its own
//! `thiserror` enum, and those enums embed [`CommonError`] for the few
//! failures they all share: lookups of unknown circuits or dead-lettered
//! operations, rejected input, and reading or decoding configuration.
//!
//! # Components
//!
//! 1. **`CommonError`**: the shared variants listed above.
//! 2. **`ErrorClassification`**: how a failure should be treated
//!    (retryability, severity, criticality, suggested retry delay).
//! 3. **`ErrorSeverity`**: unified levels used in structured log fields.
//!
//! ## Composing module errors
//!
//! ```rust,ignore
//! #[derive(Debug, thiserror::Error)]
//! pub enum ConfigError {
//!     #[error("Invalid configuration for '{field}': {message}")]
//!     Invalid { field: String, message: String },
//!
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//! }
//!
//! impl_error_classification!(ConfigError, Common,
//!     Self::Invalid { .. } => {
//!         retryable: false,
//!         severity: ErrorSeverity::Error,
//!         critical: false,
//!     }
//! );
//! ```
//!
//! ## Severity levels
//!
//! | Level | Use Case |
//! |-------|----------|
//! | **Info** | Expected conditions such as an unknown dead-letter id |
//! | **Warning** | Degraded but operational: open circuits, exhausted retries |
//! | **Error** | Needs attention: invalid policy, unreadable config |
//! | **Critical** | The process cannot start with what it was given |

use std::fmt;
use std::time::Duration;

/// Standard result type using CommonError
pub type CommonResult<T> = Result<T, CommonError>;

/// Error variants shared by every ExecGuard crate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// Unknown circuit or dead-letter entry
    NotFound { resource_type: String, identifier: String },

    /// Input that does not name anything known
    Validation { field: String, message: String, value: String },

    /// JSON or TOML that failed to decode
    Serialization { format: &'static str, message: String },

    /// File I/O while loading state or configuration
    Persistence { message: String },
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { resource_type, identifier } => {
                write!(f, "{resource_type} not found: '{identifier}'")
            }
            Self::Validation { field, message, value } => {
                write!(f, "Validation error for field '{field}' (value: '{value}'): {message}")
            }
            Self::Serialization { format, message } => {
                write!(f, "Serialization error ({format}): {message}")
            }
            Self::Persistence { message } => write!(f, "Persistence error: {message}"),
        }
    }
}

impl std::error::Error for CommonError {}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotFound { .. } => ErrorSeverity::Info,
            Self::Validation { .. } | Self::Serialization { .. } | Self::Persistence { .. } => {
                ErrorSeverity::Error
            }
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl CommonError {
    /// Lookup miss for `identifier` of kind `resource_type`
    pub fn not_found_with_id<T: Into<String>, I: Into<String>>(
        resource_type: T,
        identifier: I,
    ) -> Self {
        Self::NotFound { resource_type: resource_type.into(), identifier: identifier.into() }
    }

    /// Create a validation error with the invalid value
    pub fn validation_with_value<F: Into<String>, M: Into<String>, V: Into<String>>(
        field: F,
        message: M,
        value: V,
    ) -> Self {
        Self::Validation { field: field.into(), message: message.into(), value: value.into() }
    }
}

/// Error classification trait for consistent handling across crates
///
/// Log statements use [`severity`](Self::severity) as a structured field;
/// [`retry_after`](Self::retry_after) is a hint for callers that reschedule.
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient: deadlines, open circuits, flaky
    /// providers.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization { format: "JSON", message: err.to_string() }
    }
}

impl From<std::io::Error> for CommonError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence { message: err.to_string() }
    }
}

impl From<toml::de::Error> for CommonError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization { format: "TOML", message: err.to_string() }
    }
}

/// Generates `From<serde_json::Error>` and `From<std::io::Error>` for a
/// module error that embeds `CommonError`.
///
/// ```rust,ignore
/// #[derive(Debug, thiserror::Error)]
/// pub enum LoaderError {
///     #[error(transparent)]
///     Common(#[from] CommonError),
/// }
///
/// impl_error_conversion!(LoaderError, Common);
/// ```
#[macro_export]
macro_rules! impl_error_conversion {
    ($error_type:ty, $variant:ident) => {
        impl From<serde_json::Error> for $error_type {
            fn from(err: serde_json::Error) -> Self {
                Self::$variant($crate::error::CommonError::from(err))
            }
        }

        impl From<std::io::Error> for $error_type {
            fn from(err: std::io::Error) -> Self {
                Self::$variant($crate::error::CommonError::from(err))
            }
        }
    };
}

/// Implements `ErrorClassification` for a module error, delegating the
/// embedded `CommonError` variant and spelling out the rest.
///
/// ```rust,ignore
/// impl_error_classification!(PolicyError, Common,
///     Self::Invalid { .. } => {
///         retryable: false,
///         severity: ErrorSeverity::Error,
///         critical: false,
///     }
/// );
/// ```
#[macro_export]
macro_rules! impl_error_classification {
    (
        $error_type:ty,
        $common_variant:ident
        $(,
            $variant:pat => {
                retryable: $retryable:expr,
                severity: $severity:expr,
                critical: $critical:expr
                $(, retry_after: $retry_after:expr)?
                $(,)?
            }
        )*
        $(,)?
    ) => {
        impl $crate::error::ErrorClassification for $error_type {
            fn is_retryable(&self) -> bool {
                match self {
                    Self::$common_variant(e) => e.is_retryable(),
                    $(
                        $variant => $retryable,
                    )*
                }
            }

            fn severity(&self) -> $crate::error::ErrorSeverity {
                match self {
                    Self::$common_variant(e) => e.severity(),
                    $(
                        $variant => $severity,
                    )*
                }
            }

            fn is_critical(&self) -> bool {
                match self {
                    Self::$common_variant(e) => e.is_critical(),
                    $(
                        $variant => $critical,
                    )*
                }
            }

            fn retry_after(&self) -> Option<std::time::Duration> {
                match self {
                    Self::$common_variant(e) => e.retry_after(),
                    $(
                        $(
                            $variant => $retry_after,
                        )?
                    )*
                    #[allow(unreachable_patterns)]
                    _ => None,
                }
            }
        }
    };
}
