//! Failure classification
//!
//! Collaborators report failures as free text (RPC errors, router reverts,
//! bundler rejections). [`ErrorClassifier`] maps that text onto the closed
//! [`ErrorKind`] taxonomy by walking an ordered list of rules; the first rule
//! whose predicate matches wins. Errors that already know their kind
//! implement [`ClassifyFailure::error_kind`] and skip the text heuristics.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use execguard_common::CommonError;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Taxonomy of execution failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Router returned less than the minimum output
    InsufficientOutput,
    /// Price moved beyond the allowed tolerance
    SlippageExceeded,
    /// Pool or provider cannot fill the requested size
    InsufficientLiquidity,
    /// Transaction ran out of gas or hit the block limit
    GasLimitExceeded,
    /// Generic on-chain revert
    ExecutionReverted,
    /// Amount rejected as zero, negative, or malformed
    InvalidAmount,
    /// Flash loan could not be opened or repaid
    FlashLoanFailed,
    /// Paymaster refused to sponsor the operation
    PaymasterFailed,
    /// Attempt deadline elapsed
    Timeout,
    /// Transport-level failure reaching the dependency
    Network,
    /// No rule matched
    Unknown,
}

impl ErrorKind {
    /// Every kind, in declaration order
    pub const ALL: [Self; 11] = [
        Self::InsufficientOutput,
        Self::SlippageExceeded,
        Self::InsufficientLiquidity,
        Self::GasLimitExceeded,
        Self::ExecutionReverted,
        Self::InvalidAmount,
        Self::FlashLoanFailed,
        Self::PaymasterFailed,
        Self::Timeout,
        Self::Network,
        Self::Unknown,
    ];

    /// Wire name, as used in config files and log fields
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientOutput => "INSUFFICIENT_OUTPUT",
            Self::SlippageExceeded => "SLIPPAGE_EXCEEDED",
            Self::InsufficientLiquidity => "INSUFFICIENT_LIQUIDITY",
            Self::GasLimitExceeded => "GAS_LIMIT_EXCEEDED",
            Self::ExecutionReverted => "EXECUTION_REVERTED",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::FlashLoanFailed => "FLASH_LOAN_FAILED",
            Self::PaymasterFailed => "PAYMASTER_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Network => "NETWORK",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| {
                CommonError::validation_with_value("error_kind", "unknown error kind", s)
            })
    }
}

/// Lets an error report its kind without text matching
///
/// The default returns `None`, so an empty impl opts a type into retry and
/// recovery handling while relying on its `Display` output for
/// classification.
pub trait ClassifyFailure: std::error::Error {
    /// Structured kind supplied by the collaborator, if any
    fn error_kind(&self) -> Option<ErrorKind> {
        None
    }
}

impl ClassifyFailure for CommonError {}

impl ClassifyFailure for std::io::Error {
    fn error_kind(&self) -> Option<ErrorKind> {
        use std::io::ErrorKind as Io;

        match self.kind() {
            Io::TimedOut => Some(ErrorKind::Timeout),
            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::BrokenPipe => Some(ErrorKind::Network),
            _ => None,
        }
    }
}

type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// One `(predicate, kind)` pair in the classifier
///
/// Predicates receive the message already lowercased.
#[derive(Clone)]
pub struct ClassificationRule {
    kind: ErrorKind,
    predicate: Predicate,
}

impl ClassificationRule {
    /// Rule with an arbitrary predicate over the lowercased message
    pub fn new<P>(kind: ErrorKind, predicate: P) -> Self
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self { kind, predicate: Arc::new(predicate) }
    }

    /// Rule that matches when any of `needles` occurs in the message
    pub fn contains_any(kind: ErrorKind, needles: &[&str]) -> Self {
        let needles: Vec<String> = needles.iter().map(|n| n.to_lowercase()).collect();
        Self::new(kind, move |message| needles.iter().any(|n| message.contains(n.as_str())))
    }

    /// Kind reported when this rule matches
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Whether the rule matches an already lowercased message
    pub fn matches(&self, lowercased: &str) -> bool {
        (self.predicate)(lowercased)
    }
}

impl fmt::Debug for ClassificationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassificationRule").field("kind", &self.kind).finish_non_exhaustive()
    }
}

/// Ordered rule list mapping failure text to an [`ErrorKind`]
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<ClassificationRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self { rules: default_rules() }
    }
}

impl ErrorClassifier {
    /// Classifier with no rules; everything is `Unknown` until rules are added
    pub const fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule after the existing ones
    #[must_use]
    pub fn with_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Insert a rule ahead of every existing one
    #[must_use]
    pub fn with_priority_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// Kind of the first matching rule, else `Unknown`
    pub fn classify(&self, message: &str) -> ErrorKind {
        let lowered = message.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map_or(ErrorKind::Unknown, ClassificationRule::kind)
    }

    /// Structured kind when the error supplies one, text heuristics otherwise
    pub fn classify_failure<E>(&self, error: &E) -> ErrorKind
    where
        E: ClassifyFailure + ?Sized,
    {
        error.error_kind().unwrap_or_else(|| self.classify(&error.to_string()))
    }
}

fn default_rules() -> Vec<ClassificationRule> {
    use ErrorKind as K;

    vec![
        ClassificationRule::contains_any(
            K::InsufficientOutput,
            &["insufficient_output", "insufficient output", "too little received"],
        ),
        ClassificationRule::contains_any(K::SlippageExceeded, &["slippage", "tolerance"]),
        ClassificationRule::contains_any(K::InsufficientLiquidity, &["liquidity"]),
        ClassificationRule::contains_any(K::GasLimitExceeded, &["gas"]),
        ClassificationRule::contains_any(K::FlashLoanFailed, &["flash"]),
        ClassificationRule::contains_any(K::PaymasterFailed, &["paymaster"]),
        ClassificationRule::contains_any(
            K::InvalidAmount,
            &["invalid amount", "zero amount", "amount must", "invalid_amount"],
        ),
        ClassificationRule::contains_any(K::Timeout, &["timeout", "timed out", "deadline"]),
        ClassificationRule::contains_any(
            K::Network,
            &["connection", "network", "unreachable", "dns"],
        ),
        ClassificationRule::contains_any(K::ExecutionReverted, &["revert"]),
        ClassificationRule::contains_any(K::InsufficientOutput, &["insufficient"]),
    ]
}

static DEFAULT_CLASSIFIER: Lazy<ErrorClassifier> = Lazy::new(ErrorClassifier::default);

/// Classify with the default rule set
pub fn classify_error(message: &str) -> ErrorKind {
    DEFAULT_CLASSIFIER.classify(message)
}

/// ABI selector of `Error(string)`
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Turn raw revert data into a readable reason
///
/// `Error(string)` payloads are ABI-decoded to their message. Any other hex
/// payload becomes `Revert: <first 50 chars>...`; plain text is returned
/// unchanged.
pub fn decode_revert_reason(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(hex_body) = trimmed.strip_prefix("0x") else {
        return trimmed.to_string();
    };

    if let Some(message) = decode_error_string(hex_body) {
        return message;
    }

    let preview: String = trimmed.chars().take(50).collect();
    format!("Revert: {preview}...")
}

fn decode_error_string(hex_body: &str) -> Option<String> {
    let bytes = hex::decode(hex_body).ok()?;
    if bytes.len() < 68 || bytes[..4] != ERROR_STRING_SELECTOR {
        return None;
    }

    // 4-byte selector, 32-byte offset word, 32-byte length word, then data
    let length_word = &bytes[36..68];
    if length_word[..24].iter().any(|b| *b != 0) {
        return None;
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&length_word[24..]);
    let len = usize::try_from(u64::from_be_bytes(len_bytes)).ok()?;

    let data = bytes.get(68..68usize.checked_add(len)?)?;
    String::from_utf8(data.to_vec()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct CodedError(&'static str, Option<ErrorKind>);

    impl ClassifyFailure for CodedError {
        fn error_kind(&self) -> Option<ErrorKind> {
            self.1
        }
    }

    /// Validates the canonical router and tolerance messages.
    ///
    /// Assertions:
    /// - Router output shortfall maps to `InsufficientOutput` even though the
    ///   text also mentions an amount.
    /// - Tolerance text maps to `SlippageExceeded`.
    /// - Unrelated text maps to `Unknown`.
    #[test]
    fn test_classify_canonical_messages() {
        assert_eq!(
            classify_error("UniswapV3Router: INSUFFICIENT_OUTPUT_AMOUNT"),
            ErrorKind::InsufficientOutput
        );
        assert_eq!(classify_error("Slippage tolerance exceeded"), ErrorKind::SlippageExceeded);
        assert_eq!(classify_error("some unrelated text"), ErrorKind::Unknown);
    }

    /// Validates the extended taxonomy.
    #[test]
    fn test_classify_extended_kinds() {
        assert_eq!(
            classify_error("Insufficient liquidity for swap"),
            ErrorKind::InsufficientLiquidity
        );
        assert_eq!(classify_error("Out of gas"), ErrorKind::GasLimitExceeded);
        assert_eq!(classify_error("Flash loan not repaid"), ErrorKind::FlashLoanFailed);
        assert_eq!(classify_error("paymaster deposit too low"), ErrorKind::PaymasterFailed);
        assert_eq!(classify_error("request timed out"), ErrorKind::Timeout);
        assert_eq!(classify_error("connection refused by peer"), ErrorKind::Network);
        assert_eq!(classify_error("execution reverted"), ErrorKind::ExecutionReverted);
        assert_eq!(classify_error("Invalid amount: 0"), ErrorKind::InvalidAmount);
        assert_eq!(classify_error("insufficient funds"), ErrorKind::InsufficientOutput);
    }

    /// Validates that rule order decides overlapping matches.
    ///
    /// Assertions:
    /// - "gas" wins over "revert" because its rule comes first.
    /// - A priority rule overrides the defaults.
    #[test]
    fn test_rule_order_decides_overlaps() {
        assert_eq!(classify_error("reverted: out of gas"), ErrorKind::GasLimitExceeded);

        let classifier = ErrorClassifier::default().with_priority_rule(
            ClassificationRule::contains_any(ErrorKind::ExecutionReverted, &["reverted"]),
        );
        assert_eq!(classifier.classify("reverted: out of gas"), ErrorKind::ExecutionReverted);
    }

    /// Validates custom predicates and the empty classifier.
    #[test]
    fn test_custom_predicate_rule() {
        let classifier = ErrorClassifier::empty()
            .with_rule(ClassificationRule::new(ErrorKind::Network, |m| m.starts_with("rpc ")));
        assert_eq!(classifier.classify("RPC 502 bad gateway"), ErrorKind::Network);
        assert_eq!(classifier.classify("bad gateway"), ErrorKind::Unknown);
    }

    /// Validates structured kinds take precedence over text.
    ///
    /// Assertions:
    /// - A supplied kind is returned even if the text says otherwise.
    /// - Without a supplied kind the text heuristics apply.
    #[test]
    fn test_structured_kind_precedence() {
        let classifier = ErrorClassifier::default();
        let coded = CodedError("out of gas", Some(ErrorKind::PaymasterFailed));
        assert_eq!(classifier.classify_failure(&coded), ErrorKind::PaymasterFailed);

        let legacy = CodedError("out of gas", None);
        assert_eq!(classifier.classify_failure(&legacy), ErrorKind::GasLimitExceeded);

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer hung up");
        assert_eq!(classifier.classify_failure(&io), ErrorKind::Network);
    }

    /// Validates ABI `Error(string)` decoding.
    #[test]
    fn test_decode_error_string_payload() {
        let message = "Too little received";
        let mut payload = ERROR_STRING_SELECTOR.to_vec();
        let mut offset = [0u8; 32];
        offset[31] = 0x20;
        payload.extend_from_slice(&offset);
        let mut len = [0u8; 32];
        len[31] = u8::try_from(message.len()).unwrap();
        payload.extend_from_slice(&len);
        let mut data = message.as_bytes().to_vec();
        data.resize(32, 0);
        payload.extend_from_slice(&data);

        let raw = format!("0x{}", hex::encode(payload));
        assert_eq!(decode_revert_reason(&raw), message);
        assert_eq!(classify_error(&decode_revert_reason(&raw)), ErrorKind::InsufficientOutput);
    }

    /// Validates fallback formatting for opaque payloads and plain text.
    #[test]
    fn test_decode_opaque_and_plain() {
        let raw = format!("0x{}", "ab".repeat(40));
        let decoded = decode_revert_reason(&raw);
        assert!(decoded.starts_with("Revert: 0xabab"));
        assert!(decoded.ends_with("..."));
        assert_eq!(decoded.len(), "Revert: ".len() + 50 + 3);

        assert_eq!(decode_revert_reason("execution reverted"), "execution reverted");
    }

    /// Validates wire names parse back case-insensitively.
    #[test]
    fn test_error_kind_from_str() {
        assert_eq!("gas_limit_exceeded".parse::<ErrorKind>().unwrap(), ErrorKind::GasLimitExceeded);
        assert!("NOT_A_KIND".parse::<ErrorKind>().is_err());
        assert_eq!(
            serde_json::to_string(&ErrorKind::SlippageExceeded).unwrap(),
            "\"SLIPPAGE_EXCEEDED\""
        );
    }
}
