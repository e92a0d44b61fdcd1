//! Maintenance Module
//!
//! Condition/action rules that reclaim storage and drop bad entries, run on
//! their own timers or on demand, with a capped outcome history.

mod engine;
mod history;
mod rules;

pub use engine::MaintenanceEngine;
pub use history::{EventHistory, EventStatus, MaintenanceEvent, MaintenanceSummary};
pub use rules::{
    builtin_rules, CompressionRule, ErrorRateRule, MaintenanceConfig, MaintenanceRule, RuleHandler,
    StorageLimitRule,
};
