//! Named circuit breakers sharing one clock and default thresholds

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use execguard_common::{Clock, CommonError, CommonResult, SystemClock};
use tracing::info;

use super::breaker::CircuitBreaker;
use super::state::{CircuitState, CircuitStatus, CircuitThresholds};
use crate::config::{ConfigResult, DEFAULT_HISTORY_LIMIT};

/// Owns every [`CircuitBreaker`] by name
///
/// Circuits are created lazily on first use with the thresholds configured
/// for their name, or the registry defaults.
pub struct CircuitBreakerRegistry {
    circuits: DashMap<String, Arc<CircuitBreaker>>,
    defaults: CircuitThresholds,
    overrides: HashMap<String, CircuitThresholds>,
    history_limit: usize,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("circuits", &self.names())
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self {
            circuits: DashMap::new(),
            defaults: CircuitThresholds::default(),
            overrides: HashMap::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            clock: Arc::new(SystemClock),
        }
    }
}

impl CircuitBreakerRegistry {
    /// Registry with validated defaults and per-name thresholds
    pub fn new(
        defaults: CircuitThresholds,
        overrides: impl IntoIterator<Item = (String, CircuitThresholds)>,
    ) -> ConfigResult<Self> {
        defaults.validate()?;
        let overrides: HashMap<_, _> = overrides.into_iter().collect();
        for thresholds in overrides.values() {
            thresholds.validate()?;
        }
        Ok(Self { defaults, overrides, ..Self::default() })
    }

    /// Use `clock` for every circuit created from now on
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound each circuit's state history
    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Thresholds a new circuit named `name` would get
    pub fn thresholds_for(&self, name: &str) -> CircuitThresholds {
        self.overrides.get(name).cloned().unwrap_or_else(|| self.defaults.clone())
    }

    /// Create a circuit, or return the existing one unchanged
    pub fn register(
        &self,
        name: &str,
        thresholds: Option<CircuitThresholds>,
    ) -> ConfigResult<Arc<CircuitBreaker>> {
        if let Some(existing) = self.circuits.get(name) {
            return Ok(Arc::clone(existing.value()));
        }

        let thresholds = thresholds.unwrap_or_else(|| self.thresholds_for(name));
        let breaker = CircuitBreaker::with_clock(name, thresholds, Arc::clone(&self.clock))?
            .with_history_limit(self.history_limit);

        let entry = self.circuits.entry(name.to_string()).or_insert_with(|| {
            info!(circuit = %name, "Circuit registered");
            Arc::new(breaker)
        });
        Ok(Arc::clone(entry.value()))
    }

    /// Existing circuit, or a new one with configured thresholds
    pub fn get_or_create(&self, name: &str) -> ConfigResult<Arc<CircuitBreaker>> {
        self.register(name, None)
    }

    /// Existing circuit, without creating one
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.circuits.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.circuits.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered circuits
    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    /// Whether no circuit is registered
    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }

    /// Unregister a circuit; holders of its handle keep using it
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.circuits.remove(name).map(|(_, breaker)| breaker)
    }

    /// Status of `name`, or `NotFound`
    pub fn status(&self, name: &str) -> CommonResult<CircuitStatus> {
        Ok(self.require(name)?.status())
    }

    /// Status of every circuit, by name
    pub fn all_status(&self) -> BTreeMap<String, CircuitStatus> {
        self.snapshot().into_iter().map(|b| (b.name().to_string(), b.status())).collect()
    }

    /// Reset `name`, or `NotFound`
    pub fn reset(&self, name: &str) -> CommonResult<()> {
        self.require(name)?.reset();
        Ok(())
    }

    /// Reset every circuit, returning how many were reset
    pub fn reset_all(&self) -> usize {
        let circuits = self.snapshot();
        for breaker in &circuits {
            breaker.reset();
        }
        info!(count = circuits.len(), "All circuits reset");
        circuits.len()
    }

    /// Force or release the effective state of `name`
    pub fn set_manual_override(&self, name: &str, state: Option<CircuitState>) -> CommonResult<()> {
        self.require(name)?.set_manual_override(state);
        Ok(())
    }

    /// Drop every circuit, returning how many there were
    pub fn shutdown(&self) -> usize {
        let count = self.circuits.len();
        self.circuits.clear();
        info!(count, "Circuit registry shut down");
        count
    }

    fn require(&self, name: &str) -> CommonResult<Arc<CircuitBreaker>> {
        self.get(name).ok_or_else(|| CommonError::not_found_with_id("Circuit", name))
    }

    /// Clones the handles so no map shard lock is held while calling into a
    /// breaker
    fn snapshot(&self) -> Vec<Arc<CircuitBreaker>> {
        self.circuits.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}
