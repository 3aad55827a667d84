//! Serde helpers shared by config and status types

pub mod serde;

pub use self::serde::{duration_millis, duration_secs};
