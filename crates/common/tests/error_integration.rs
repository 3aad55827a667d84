//! Integration tests for `execguard_common::error`.
//!
//! These suites validate classification and module error delegation
//! through the exported macros so downstream crates receive consistent
//! failure semantics.

use std::time::Duration;

use execguard_common::error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
use execguard_common::{impl_error_classification, impl_error_conversion};
use thiserror::Error;

#[derive(Debug, Error)]
enum RegistryError {
    #[error("circuit '{0}' is not registered")]
    UnknownCircuit(String),

    #[error("circuit '{circuit}' is draining")]
    Draining { circuit: String, retry_after: Duration },

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl_error_conversion!(RegistryError, Common);

impl_error_classification!(RegistryError, Common,
    Self::UnknownCircuit(_) => {
        retryable: false,
        severity: ErrorSeverity::Info,
        critical: false,
    },
    Self::Draining { retry_after, .. } => {
        retryable: true,
        severity: ErrorSeverity::Warning,
        critical: false,
        retry_after: Some(*retry_after),
    },
);

fn load_thresholds(raw: &str) -> Result<serde_json::Value, RegistryError> {
    Ok(serde_json::from_str(raw)?)
}

/// Validates `CommonError` classification for every variant.
///
/// Assertions:
/// - No shared failure is retryable or critical.
/// - Lookups are informational, everything else is an error.
#[test]
fn classification_matrix_matches_expected_contract() {
    let json = serde_json::from_str::<serde_json::Value>("[").unwrap_err();
    let cases = vec![
        (CommonError::not_found_with_id("Circuit", "bundler"), ErrorSeverity::Info),
        (
            CommonError::validation_with_value("error_kind", "unknown error kind", "GAS"),
            ErrorSeverity::Error,
        ),
        (CommonError::from(json), ErrorSeverity::Error),
        (CommonError::from(std::io::Error::other("disk full")), ErrorSeverity::Error),
    ];

    for (err, severity) in cases {
        assert!(!err.is_retryable(), "retryable mismatch for {err}");
        assert_eq!(err.severity(), severity, "severity mismatch for {err}");
        assert!(!err.is_critical(), "critical mismatch for {err}");
        assert_eq!(err.retry_after(), None);
    }
}

/// Validates module errors built with the macros.
///
/// Assertions:
/// - `?` converts `serde_json::Error` through the `Common` variant.
/// - The `Common` variant delegates classification.
/// - Module variants use their declared classification and retry hint.
#[test]
fn module_error_macros_and_delegation() {
    let err = load_thresholds("{ broken").unwrap_err();
    assert!(matches!(err, RegistryError::Common(CommonError::Serialization { .. })));
    assert_eq!(err.severity(), ErrorSeverity::Error);

    let err = RegistryError::from(CommonError::not_found_with_id("Circuit", "rpc"));
    assert!(!err.is_retryable());
    assert_eq!(err.severity(), ErrorSeverity::Info);

    let err = RegistryError::UnknownCircuit("bundler".to_string());
    assert!(!err.is_retryable());
    assert_eq!(err.severity(), ErrorSeverity::Info);
    assert_eq!(err.retry_after(), None);

    let err = RegistryError::Draining {
        circuit: "dex_router".to_string(),
        retry_after: Duration::from_secs(2),
    };
    assert!(err.is_retryable());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));

    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only volume");
    let err = RegistryError::from(io);
    assert!(matches!(err, RegistryError::Common(CommonError::Persistence { .. })));
}

/// Validates `CommonResult` propagates with `?` across helpers.
#[test]
fn common_result_propagates() {
    fn lookup(id: &str) -> CommonResult<u32> {
        Err(CommonError::not_found_with_id("Dead letter entry", id))
    }

    fn outer() -> CommonResult<u32> {
        let value = lookup("op-7")?;
        Ok(value + 1)
    }

    let err = outer().unwrap_err();
    assert_eq!(err.to_string(), "Dead letter entry not found: 'op-7'");
}
