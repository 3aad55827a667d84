//! Circuit breakers guarding calls to unhealthy dependencies
//!
//! | From      | Condition                                   | To        |
//! |-----------|---------------------------------------------|-----------|
//! | CLOSED    | consecutive failures or failure rate        | OPEN      |
//! | OPEN      | cool-down elapsed                           | HALF_OPEN |
//! | HALF_OPEN | `success_threshold` consecutive successes   | CLOSED    |
//! | HALF_OPEN | any failure                                 | OPEN      |
//!
//! A manual override forces the effective state until cleared; ISOLATED is
//! only reachable that way.

mod breaker;
mod registry;
mod state;

pub use breaker::{CallPermit, CircuitBreaker, CircuitError, GateRejection};
pub use registry::CircuitBreakerRegistry;
pub use state::{
    CircuitMetrics, CircuitState, CircuitStatus, CircuitThresholds, StateControl, StateTransition,
};
