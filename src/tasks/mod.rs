//! Background Tasks Module
//!
//! Per-key refresh loops that keep cached values warm.

mod refresh;

pub use refresh::{ErrorCallback, RefreshOptions, RefreshScheduler, RefreshTask, ShouldRefresh};
