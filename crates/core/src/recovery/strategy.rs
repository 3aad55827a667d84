//! Recovery strategies: pure parameter mutations applied before a retry
//!
//! A strategy never talks to the dependency. It takes the parameters of the
//! failed call and returns adjusted parameters; the caller decides whether
//! and how to re-invoke the action with them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use super::classifier::ErrorKind;

/// Position size field halved by [`RecoveryStrategy::reduce_position`]
pub const AMOUNT_FIELD: &str = "amount";
/// Tolerance field widened by [`RecoveryStrategy::widen_tolerance`]
pub const SLIPPAGE_FIELD: &str = "slippage_tolerance";
/// Provider field rotated by [`RecoveryStrategy::rotate_provider`]
pub const PROVIDER_FIELD: &str = "flash_loan_provider";
/// Resource limit field raised by [`RecoveryStrategy::raise_limit`]
pub const GAS_LIMIT_FIELD: &str = "gas_limit";

/// Flash loan providers in rotation order
pub const DEFAULT_PROVIDERS: [&str; 5] = ["aave_v3", "dydx", "uniswap_v3", "balancer", "euler"];

/// Upper bound applied when widening slippage tolerance (0.5%)
pub const MAX_SLIPPAGE_TOLERANCE: f64 = 0.005;

/// Parameters of an execution call, as a JSON object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(Map<String, Value>);

impl Params {
    /// Empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a field
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Raw field value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Numeric field as `f64`
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    /// Integer field as `i64`
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    /// String field
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Underlying JSON object
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into the underlying JSON object
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

type Mutation = Arc<dyn Fn(&Params) -> Params + Send + Sync>;

/// Named, pure mutation from failed-call parameters to retry parameters
#[derive(Clone)]
pub struct RecoveryStrategy {
    name: String,
    description: String,
    mutate: Mutation,
}

impl fmt::Debug for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryStrategy")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl RecoveryStrategy {
    /// Strategy from an arbitrary mutation
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, mutate: F) -> Self
    where
        F: Fn(&Params) -> Params + Send + Sync + 'static,
    {
        Self { name: name.into(), description: description.into(), mutate: Arc::new(mutate) }
    }

    /// Strategy name, used in logs and outcomes
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Produce the adjusted parameters; the input is left untouched
    pub fn apply(&self, params: &Params) -> Params {
        (self.mutate)(params)
    }

    /// Multiply `amount` by `factor` (0.5 halves the position)
    ///
    /// Integer amounts stay integers, truncated toward zero.
    pub fn reduce_position(factor: f64) -> Self {
        Self::new(
            "reduce_position",
            format!("Retry with position size scaled by {factor}"),
            move |params| scale_field(params, AMOUNT_FIELD, factor, None),
        )
    }

    /// Multiply `slippage_tolerance` by `factor`, never exceeding `cap`
    pub fn widen_tolerance(factor: f64, cap: f64) -> Self {
        Self::new(
            "increase_slippage",
            format!("Retry with slippage tolerance scaled by {factor} (cap {cap})"),
            move |params| scale_field(params, SLIPPAGE_FIELD, factor, Some(cap)),
        )
    }

    /// Move `flash_loan_provider` to the next entry of `providers`
    ///
    /// A missing or unknown current provider is treated as the first entry,
    /// so the result is always different from the current one when the list
    /// has at least two entries.
    pub fn rotate_provider<I, S>(providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let providers: Vec<String> = providers.into_iter().map(Into::into).collect();
        Self::new("switch_provider", "Try the next flash loan provider", move |params| {
            let mut next = params.clone();
            if providers.is_empty() {
                return next;
            }
            let current = params.get_str(PROVIDER_FIELD).unwrap_or(providers[0].as_str());
            let index = providers.iter().position(|p| p == current).unwrap_or(0);
            let chosen = &providers[(index + 1) % providers.len()];
            next.insert(PROVIDER_FIELD, chosen.clone());
            next
        })
    }

    /// Multiply a resource limit field such as `gas_limit`
    pub fn raise_limit(field: impl Into<String>, multiplier: f64) -> Self {
        let field = field.into();
        Self::new(
            "increase_gas",
            format!("Retry with {field} scaled by {multiplier}"),
            move |params| scale_field(params, &field, multiplier, None),
        )
    }
}

fn scale_field(params: &Params, field: &str, factor: f64, cap: Option<f64>) -> Params {
    let mut next = params.clone();
    if let Some(scaled) = params.get(field).and_then(|v| scale_number(v, factor, cap)) {
        next.insert(field, scaled);
    }
    next
}

/// Integers are scaled exactly when `factor` is a short decimal such as 0.5
/// or 1.5, so amounts above 2^53 keep every digit. Anything else goes
/// through `f64`.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn scale_number(value: &Value, factor: f64, cap: Option<f64>) -> Option<Value> {
    let clamp = |x: f64| cap.map_or(x, |c| x.min(c));

    if let Some(n) = value.as_i64() {
        let exact = scale_integer(i128::from(n), factor, cap).and_then(|v| i64::try_from(v).ok());
        let scaled = exact.unwrap_or_else(|| clamp(n as f64 * factor).trunc() as i64);
        return Some(Value::from(scaled));
    }
    if let Some(n) = value.as_u64() {
        let exact = scale_integer(i128::from(n), factor, cap).and_then(|v| u64::try_from(v).ok());
        let scaled = exact.unwrap_or_else(|| clamp(n as f64 * factor).trunc() as u64);
        return Some(Value::from(scaled));
    }
    let n = value.as_f64()?;
    Number::from_f64(clamp(n * factor)).map(Value::Number)
}

/// `n * factor` truncated toward zero, or `None` if `factor` has no short
/// decimal form or the product overflows
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn scale_integer(n: i128, factor: f64, cap: Option<f64>) -> Option<i128> {
    let (numerator, denominator) = [1_i128, 2, 4, 5, 8, 10, 100, 1_000, 10_000, 1_000_000]
        .into_iter()
        .find_map(|denominator| {
            let numerator = factor * denominator as f64;
            (numerator.is_finite() && numerator.abs() < 1e15 && numerator.fract() == 0.0)
                .then_some((numerator as i128, denominator))
        })?;

    let scaled = n.checked_mul(numerator)?.checked_div(denominator)?;
    Some(cap.map_or(scaled, |c| scaled.min(c.trunc() as i128)))
}

/// Ordered strategy chains per error kind
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    chains: BTreeMap<ErrorKind, Vec<RecoveryStrategy>>,
}

impl Default for StrategyRegistry {
    /// Stock chains for the canonical trade failures
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(ErrorKind::InsufficientOutput, RecoveryStrategy::reduce_position(0.5));
        registry.register(
            ErrorKind::SlippageExceeded,
            RecoveryStrategy::widen_tolerance(2.0, MAX_SLIPPAGE_TOLERANCE),
        );
        registry.register(
            ErrorKind::InsufficientLiquidity,
            RecoveryStrategy::rotate_provider(DEFAULT_PROVIDERS),
        );
        registry.register(ErrorKind::InsufficientLiquidity, RecoveryStrategy::reduce_position(0.5));
        registry.register(
            ErrorKind::GasLimitExceeded,
            RecoveryStrategy::raise_limit(GAS_LIMIT_FIELD, 1.5),
        );
        registry
    }
}

impl StrategyRegistry {
    /// Registry without any chains
    pub const fn empty() -> Self {
        Self { chains: BTreeMap::new() }
    }

    /// Append a strategy to the chain for `kind`
    pub fn register(&mut self, kind: ErrorKind, strategy: RecoveryStrategy) {
        self.chains.entry(kind).or_default().push(strategy);
    }

    /// Chain registered for `kind`, empty if none
    pub fn strategies_for(&self, kind: ErrorKind) -> &[RecoveryStrategy] {
        self.chains.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    /// Kinds that have at least one strategy
    pub fn kinds(&self) -> impl Iterator<Item = ErrorKind> + '_ {
        self.chains.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn trade() -> Params {
        Params::new()
            .with(AMOUNT_FIELD, 1000)
            .with(SLIPPAGE_FIELD, 0.001)
            .with(GAS_LIMIT_FIELD, 100_000)
    }

    /// Validates position reduction halves integer and float amounts.
    ///
    /// Assertions:
    /// - 1000 becomes 500 and stays an integer.
    /// - 1.5 becomes 0.75.
    /// - The input parameters are not modified.
    #[test]
    fn test_reduce_position() {
        let strategy = RecoveryStrategy::reduce_position(0.5);
        let input = trade();
        let out = strategy.apply(&input);
        assert_eq!(out.get(AMOUNT_FIELD), Some(&json!(500)));
        assert_eq!(input.get_i64(AMOUNT_FIELD), Some(1000));

        let fractional = Params::new().with(AMOUNT_FIELD, 1.5);
        assert_eq!(strategy.apply(&fractional).get_f64(AMOUNT_FIELD), Some(0.75));

        let odd = Params::new().with(AMOUNT_FIELD, 7);
        assert_eq!(strategy.apply(&odd).get_i64(AMOUNT_FIELD), Some(3));
    }

    /// Validates wei-scale integers above 2^53 are scaled without rounding.
    ///
    /// Assertions:
    /// - 2^60 + 1 halves to 2^59 exactly.
    /// - A `u64` beyond `i64::MAX` halves exactly.
    /// - Raising by 1.5 keeps the low digits.
    #[test]
    fn test_scaling_large_integers_is_exact() {
        let reduce = RecoveryStrategy::reduce_position(0.5);
        let wei = Params::new().with(AMOUNT_FIELD, 1_152_921_504_606_846_977_i64);
        assert_eq!(reduce.apply(&wei).get_i64(AMOUNT_FIELD), Some(576_460_752_303_423_488));

        let huge = Params::new().with(AMOUNT_FIELD, 18_446_744_073_709_551_615_u64);
        assert_eq!(
            reduce.apply(&huge).get(AMOUNT_FIELD),
            Some(&json!(9_223_372_036_854_775_807_u64))
        );

        let raise = RecoveryStrategy::raise_limit(AMOUNT_FIELD, 1.5);
        let odd = Params::new().with(AMOUNT_FIELD, 9_007_199_254_740_993_i64);
        assert_eq!(raise.apply(&odd).get_i64(AMOUNT_FIELD), Some(13_510_798_882_111_489));
    }

    /// Validates tolerance widening doubles and respects the cap.
    #[test]
    fn test_widen_tolerance_capped() {
        let strategy = RecoveryStrategy::widen_tolerance(2.0, MAX_SLIPPAGE_TOLERANCE);
        let out = strategy.apply(&trade());
        assert_eq!(out.get_f64(SLIPPAGE_FIELD), Some(0.002));

        let wide = Params::new().with(SLIPPAGE_FIELD, 0.004);
        assert_eq!(strategy.apply(&wide).get_f64(SLIPPAGE_FIELD), Some(MAX_SLIPPAGE_TOLERANCE));
    }

    /// Validates provider rotation walks the list and wraps.
    ///
    /// Assertions:
    /// - Missing provider is treated as the first, so `dydx` is chosen.
    /// - The last provider wraps to the first.
    /// - The result never equals the current provider.
    #[test]
    fn test_rotate_provider_wraps() {
        let strategy = RecoveryStrategy::rotate_provider(DEFAULT_PROVIDERS);

        let out = strategy.apply(&Params::new());
        assert_eq!(out.get_str(PROVIDER_FIELD), Some("dydx"));

        let last = Params::new().with(PROVIDER_FIELD, "euler");
        assert_eq!(strategy.apply(&last).get_str(PROVIDER_FIELD), Some("aave_v3"));

        for provider in DEFAULT_PROVIDERS {
            let current = Params::new().with(PROVIDER_FIELD, provider);
            assert_ne!(strategy.apply(&current).get_str(PROVIDER_FIELD), Some(provider));
        }
    }

    /// Validates gas limit scaling truncates to an integer.
    #[test]
    fn test_raise_limit() {
        let strategy = RecoveryStrategy::raise_limit(GAS_LIMIT_FIELD, 1.5);
        assert_eq!(strategy.apply(&trade()).get(GAS_LIMIT_FIELD), Some(&json!(150_000)));

        let odd = Params::new().with(GAS_LIMIT_FIELD, 21_001);
        assert_eq!(strategy.apply(&odd).get_i64(GAS_LIMIT_FIELD), Some(31_501));
    }

    /// Validates that strategies leave params alone when their field is absent.
    #[test]
    fn test_missing_field_is_noop() {
        let params = Params::new().with("token_in", "WETH");
        assert_eq!(RecoveryStrategy::reduce_position(0.5).apply(&params), params);
        assert_eq!(RecoveryStrategy::raise_limit(GAS_LIMIT_FIELD, 1.5).apply(&params), params);
    }

    /// Validates the stock chains and registration order.
    ///
    /// Assertions:
    /// - Liquidity failures rotate the provider before shrinking the trade.
    /// - Unknown failures have no chain.
    /// - Registering appends to the end of a chain.
    #[test]
    fn test_default_registry_chains() {
        let mut registry = StrategyRegistry::default();
        let names: Vec<&str> = registry
            .strategies_for(ErrorKind::InsufficientLiquidity)
            .iter()
            .map(RecoveryStrategy::name)
            .collect();
        assert_eq!(names, ["switch_provider", "reduce_position"]);
        assert!(registry.strategies_for(ErrorKind::Unknown).is_empty());

        registry.register(
            ErrorKind::GasLimitExceeded,
            RecoveryStrategy::new("bump_priority_fee", "Raise priority fee", Params::clone),
        );
        let gas = registry.strategies_for(ErrorKind::GasLimitExceeded);
        assert_eq!(gas.len(), 2);
        assert_eq!(gas[1].name(), "bump_priority_fee");
    }
}
