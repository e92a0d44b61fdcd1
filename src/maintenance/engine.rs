//! Maintenance Engine
//!
//! Holds the registered rules, runs them on demand or on per-rule timers, and
//! keeps the event history.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::context::CacheContext;
use crate::error::{CacheError, Result};
use crate::maintenance::history::{EventHistory, EventStatus, MaintenanceEvent, MaintenanceSummary};
use crate::maintenance::rules::{builtin_rules, MaintenanceConfig, MaintenanceRule, RuleHandler};

struct RuleSlot {
    rule: MaintenanceRule,
    enabled: AtomicBool,
    handler: Arc<dyn RuleHandler>,
}

impl RuleSlot {
    fn snapshot(&self) -> MaintenanceRule {
        MaintenanceRule {
            enabled: self.enabled.load(Ordering::SeqCst),
            ..self.rule.clone()
        }
    }
}

struct Runner {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

type History = Arc<Mutex<EventHistory>>;

// == Maintenance Engine ==
pub struct MaintenanceEngine {
    ctx: CacheContext,
    rules: RwLock<Vec<Arc<RuleSlot>>>,
    history: History,
    runner: Mutex<Option<Runner>>,
}

impl std::fmt::Debug for MaintenanceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceEngine")
            .field("rules", &self.rules())
            .field("running", &self.is_running())
            .finish()
    }
}

impl MaintenanceEngine {
    /// Engine with no rules.
    pub fn new(ctx: CacheContext, history_limit: usize) -> Self {
        Self {
            ctx,
            rules: RwLock::new(Vec::new()),
            history: Arc::new(Mutex::new(EventHistory::new(history_limit))),
            runner: Mutex::new(None),
        }
    }

    /// Engine with the storage, error-rate and compression rules registered.
    pub fn with_builtin_rules(ctx: CacheContext, config: &MaintenanceConfig) -> Self {
        let engine = Self::new(ctx, config.history_limit);
        for (rule, handler) in builtin_rules(config) {
            // Built-in ids are distinct
            let _ = engine.register(rule, handler);
        }
        engine
    }

    fn read_rules(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<RuleSlot>>> {
        self.rules.read().unwrap_or_else(|e| e.into_inner())
    }

    fn find(&self, id: &str) -> Result<Arc<RuleSlot>> {
        self.read_rules()
            .iter()
            .find(|slot| slot.rule.id == id)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(format!("Maintenance rule '{}'", id)))
    }

    // == Registration ==
    /// Adds a rule. Rules registered while timers run are picked up on the next `start`.
    pub fn register(&self, rule: MaintenanceRule, handler: Arc<dyn RuleHandler>) -> Result<()> {
        let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
        if rules.iter().any(|slot| slot.rule.id == rule.id) {
            return Err(CacheError::InvalidRequest(format!(
                "Maintenance rule '{}' is already registered",
                rule.id
            )));
        }
        debug!("Registered maintenance rule '{}'", rule.id);
        rules.push(Arc::new(RuleSlot {
            enabled: AtomicBool::new(rule.enabled),
            rule,
            handler,
        }));
        Ok(())
    }

    /// Current rule descriptors in registration order.
    pub fn rules(&self) -> Vec<MaintenanceRule> {
        self.read_rules().iter().map(|slot| slot.snapshot()).collect()
    }

    // == Toggle ==
    /// Flips a rule's enabled flag. Takes effect from the next timer tick.
    pub fn toggle_rule(&self, id: &str) -> Result<MaintenanceRule> {
        let slot = self.find(id)?;
        let enabled = !slot.enabled.fetch_xor(true, Ordering::SeqCst);
        info!("Maintenance rule '{}' {}", id, if enabled { "enabled" } else { "disabled" });
        Ok(slot.snapshot())
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<MaintenanceRule> {
        let slot = self.find(id)?;
        slot.enabled.store(enabled, Ordering::SeqCst);
        Ok(slot.snapshot())
    }

    // == Manual Run ==
    /// Evaluates every enabled rule once, in order. Rule failures are recorded,
    /// never returned.
    pub async fn run_manual(&self) -> Vec<MaintenanceEvent> {
        let slots: Vec<Arc<RuleSlot>> = self.read_rules().iter().cloned().collect();
        info!("Running maintenance manually over {} rules", slots.len());

        let mut events = Vec::new();
        for slot in slots.iter().filter(|slot| slot.enabled.load(Ordering::SeqCst)) {
            if let Some(event) = evaluate(&self.ctx, slot, &self.history).await {
                events.push(event);
            }
        }
        events
    }

    // == Auto Maintenance ==
    /// Starts one timer task per registered rule. No-op when already running.
    pub fn start(&self) {
        let mut runner = self.runner.lock().unwrap_or_else(|e| e.into_inner());
        if runner.is_some() {
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handles = self
            .read_rules()
            .iter()
            .map(|slot| {
                tokio::spawn(rule_timer(
                    self.ctx.clone(),
                    slot.clone(),
                    self.history.clone(),
                    shutdown_rx.clone(),
                ))
            })
            .collect::<Vec<_>>();

        info!("Auto maintenance started with {} rule timers", handles.len());
        *runner = Some(Runner { shutdown, handles });
    }

    /// Stops all rule timers. An evaluation already running finishes first.
    pub fn stop(&self) {
        if let Some(runner) = self.runner.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = runner.shutdown.send(true);
            info!("Auto maintenance stopped ({} rule timers)", runner.handles.len());
        }
    }

    pub fn is_running(&self) -> bool {
        self.runner.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    // == History ==
    /// Up to `limit` most recent events, newest first.
    pub fn events(&self, limit: usize) -> Vec<MaintenanceEvent> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).recent(limit)
    }

    pub fn summary(&self) -> MaintenanceSummary {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).summary()
    }
}

impl Drop for MaintenanceEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn timestamp(ctx: &CacheContext) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ctx.now_ms() as i64).unwrap_or_else(Utc::now)
}

/// Evaluates one rule. Returns the recorded event, or `None` when the
/// condition did not hold.
async fn evaluate(ctx: &CacheContext, slot: &RuleSlot, history: &History) -> Option<MaintenanceEvent> {
    let rule = &slot.rule;
    let outcome = match slot.handler.condition(ctx).await {
        Ok(false) => {
            debug!("Maintenance rule '{}' condition not met", rule.id);
            return None;
        }
        Ok(true) => slot.handler.action(ctx).await,
        Err(e) => Err(e.context("condition check failed")),
    };

    let (status, details) = match outcome {
        Ok(details) => {
            info!("Maintenance rule '{}' ran: {}", rule.id, details);
            (EventStatus::Success, Some(details))
        }
        Err(e) => {
            error!("Maintenance rule '{}' failed: {:#}", rule.id, e);
            (EventStatus::Failure, Some(format!("{:#}", e)))
        }
    };

    let event = history.lock().unwrap_or_else(|e| e.into_inner()).record(
        &rule.id,
        &rule.name,
        status,
        &rule.action,
        details,
        timestamp(ctx),
    );
    Some(event)
}

async fn rule_timer(
    ctx: CacheContext,
    slot: Arc<RuleSlot>,
    history: History,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = slot.rule.interval();
    if period.is_zero() {
        warn!("Maintenance rule '{}' has no interval, not scheduling", slot.rule.id);
        return;
    }

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Maintenance timer for '{}' shutting down", slot.rule.id);
                    break;
                }
            }
            _ = ticker.tick() => {
                if slot.enabled.load(Ordering::SeqCst) {
                    evaluate(&ctx, &slot, &history).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;
    use crate::clock::SystemClock;
    use crate::config::Config;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn context() -> CacheContext {
        CacheContext::new(
            Config::default(),
            Arc::new(MemoryStorage::new()),
            Arc::new(SystemClock::new()),
        )
        .unwrap()
    }

    /// Condition always holds; action succeeds or fails and counts its calls.
    struct Scripted {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl RuleHandler for Scripted {
        async fn condition(&self, _ctx: &CacheContext) -> anyhow::Result<bool> {
            Ok(true)
        }

        async fn action(&self, _ctx: &CacheContext) -> anyhow::Result<String> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("action exploded")
            }
            Ok("done".to_string())
        }
    }

    struct Never;

    #[async_trait]
    impl RuleHandler for Never {
        async fn condition(&self, _ctx: &CacheContext) -> anyhow::Result<bool> {
            Ok(false)
        }

        async fn action(&self, _ctx: &CacheContext) -> anyhow::Result<String> {
            unreachable!("condition never holds")
        }
    }

    struct BrokenCondition;

    #[async_trait]
    impl RuleHandler for BrokenCondition {
        async fn condition(&self, _ctx: &CacheContext) -> anyhow::Result<bool> {
            anyhow::bail!("metrics unavailable")
        }

        async fn action(&self, _ctx: &CacheContext) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    fn rule(id: &str, interval_ms: u64) -> MaintenanceRule {
        MaintenanceRule::new(id, id.to_uppercase(), Duration::from_millis(interval_ms))
            .describe("test rule", format!("{} action", id))
    }

    fn scripted(fail: bool) -> (Arc<dyn RuleHandler>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Arc::new(Scripted {
                calls: calls.clone(),
                fail,
            }),
            calls,
        )
    }

    #[tokio::test]
    async fn test_failing_rule_does_not_block_others() {
        let engine = MaintenanceEngine::new(context(), 10);
        let (failing, _) = scripted(true);
        let (working, working_calls) = scripted(false);
        engine.register(rule("a", 1000), failing).unwrap();
        engine.register(rule("b", 1000), working).unwrap();

        let events = engine.run_manual().await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].rule_id, "a");
        assert_eq!(events[0].status, EventStatus::Failure);
        assert!(events[0].details.as_deref().unwrap().contains("action exploded"));
        assert_eq!(events[1].rule_id, "b");
        assert_eq!(events[1].status, EventStatus::Success);
        assert_eq!(events[1].action, "b action");
        assert_eq!(working_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let recent = engine.events(10);
        assert_eq!(recent[0].rule_id, "b", "Newest first");
    }

    #[tokio::test]
    async fn test_false_condition_records_nothing() {
        let engine = MaintenanceEngine::new(context(), 10);
        engine.register(rule("quiet", 1000), Arc::new(Never)).unwrap();

        assert!(engine.run_manual().await.is_empty());
        assert!(engine.events(10).is_empty());
    }

    #[tokio::test]
    async fn test_condition_error_is_recorded() {
        let engine = MaintenanceEngine::new(context(), 10);
        engine.register(rule("broken", 1000), Arc::new(BrokenCondition)).unwrap();

        let events = engine.run_manual().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::Failure);
        assert!(events[0].details.as_deref().unwrap().contains("metrics unavailable"));
    }

    #[tokio::test]
    async fn test_disabled_rules_skipped_in_manual_run() {
        let engine = MaintenanceEngine::new(context(), 10);
        let (handler, calls) = scripted(false);
        engine.register(rule("r", 1000), handler).unwrap();

        let toggled = engine.toggle_rule("r").unwrap();
        assert!(!toggled.enabled);
        assert!(engine.run_manual().await.is_empty());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        assert!(engine.toggle_rule("r").unwrap().enabled);
        assert_eq!(engine.run_manual().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_and_duplicate_rules() {
        let engine = MaintenanceEngine::with_builtin_rules(context(), &MaintenanceConfig::default());
        assert!(matches!(engine.toggle_rule("nope"), Err(CacheError::NotFound(_))));
        assert!(matches!(
            engine.set_enabled("nope", true),
            Err(CacheError::NotFound(_))
        ));

        let (handler, _) = scripted(false);
        assert!(matches!(
            engine.register(rule("compression", 10), handler),
            Err(CacheError::InvalidRequest(_))
        ));
        assert_eq!(engine.rules().len(), 3);
        assert!(!engine.set_enabled("error-rate", false).unwrap().enabled);
    }

    #[tokio::test]
    async fn test_summary_counts_beyond_window() {
        let engine = MaintenanceEngine::new(context(), 2);
        let (failing, _) = scripted(true);
        let (working, _) = scripted(false);
        engine.register(rule("a", 1000), failing).unwrap();
        engine.register(rule("b", 1000), working).unwrap();

        engine.run_manual().await;
        engine.run_manual().await;

        assert_eq!(engine.events(10).len(), 2);
        let summary = engine.summary();
        assert_eq!(summary.total_runs, 4);
        assert_eq!(summary.successes, 2);
        assert_eq!(summary.success_rate, 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rule_timers_fire_independently() {
        let engine = MaintenanceEngine::new(context(), 50);
        let (fast, fast_calls) = scripted(false);
        let (slow, slow_calls) = scripted(false);
        engine.register(rule("fast", 1000), fast).unwrap();
        engine.register(rule("slow", 3000), slow).unwrap();

        engine.start();
        engine.start();
        assert!(engine.is_running());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(fast_calls.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(slow_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        engine.stop();
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(fast_calls.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert!(!engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_applies_on_next_tick() {
        let engine = MaintenanceEngine::new(context(), 50);
        let (handler, calls) = scripted(false);
        engine.register(rule("r", 1000), handler).unwrap();
        engine.start();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        engine.toggle_rule("r").unwrap();
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        engine.toggle_rule("r").unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        engine.stop();
    }
}
