use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::oracle::{AdmissionDecision, BudgetOracle, DegradationLevel, OperationClass};
use crate::error::ConfigError;

/// Usage fractions at which each degradation level starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub light: f64,
    pub moderate: f64,
    pub severe: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            light: 0.60,
            moderate: 0.80,
            severe: 0.95,
        }
    }
}

impl Thresholds {
    pub fn level_for(&self, usage_fraction: f64) -> DegradationLevel {
        if usage_fraction >= self.severe {
            DegradationLevel::Severe
        } else if usage_fraction >= self.moderate {
            DegradationLevel::Moderate
        } else if usage_fraction >= self.light {
            DegradationLevel::Light
        } else {
            DegradationLevel::None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub daily_quota: u64,
    pub thresholds: Thresholds,
    /// The critical threshold: crossing it trips emergency shutdown when enabled.
    pub shutdown_threshold: f64,
    pub emergency_shutdown_enabled: bool,
    pub reset_interval_secs: u64,
    pub context_heavy_ceiling: u64,
    pub automatic_classes: Vec<OperationClass>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_quota: 1_000_000,
            thresholds: Thresholds::default(),
            shutdown_threshold: 0.95,
            emergency_shutdown_enabled: true,
            reset_interval_secs: 24 * 60 * 60,
            context_heavy_ceiling: 5000,
            automatic_classes: vec![
                OperationClass::AutoCritique,
                OperationClass::AutoSummarization,
            ],
        }
    }
}

impl BudgetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Thresholds {
            light,
            moderate,
            severe,
        } = self.thresholds;

        if !(0.0 < light && light < moderate && moderate < severe && severe <= 1.0) {
            return Err(ConfigError::Thresholds(format!(
                "expected 0 < light < moderate < severe <= 1, got {} / {} / {}",
                light, moderate, severe
            )));
        }
        if !(0.0 < self.shutdown_threshold && self.shutdown_threshold <= 1.0) {
            return Err(ConfigError::Thresholds(format!(
                "shutdown threshold {} outside (0, 1]",
                self.shutdown_threshold
            )));
        }
        if self.reset_interval_secs == 0 {
            return Err(ConfigError::Thresholds(
                "reset interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reset_interval(&self) -> Duration {
        Duration::seconds(self.reset_interval_secs as i64)
    }

    fn is_automatic(&self, class: OperationClass) -> bool {
        self.automatic_classes.contains(&class)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Normal,
    Warning,
    Critical,
    Emergency,
}

impl BudgetStatus {
    pub fn as_str(&self) -> &str {
        match self {
            BudgetStatus::Normal => "normal",
            BudgetStatus::Warning => "warning",
            BudgetStatus::Critical => "critical",
            BudgetStatus::Emergency => "emergency",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAnalytics {
    pub usage_fraction: f64,
    pub projected_daily_usage: u64,
    pub average_request_cost: f64,
    pub time_until_reset: std::time::Duration,
    pub status: BudgetStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub input_used: u64,
    pub output_used: u64,
    pub requests: u64,
    pub last_reset: DateTime<Utc>,
    pub next_reset: DateTime<Utc>,
    pub degradation: DegradationLevel,
    pub emergency_shutdown: bool,
}

impl BudgetSnapshot {
    pub fn total_used(&self) -> u64 {
        self.input_used.saturating_add(self.output_used)
    }
}

#[derive(Debug, Clone)]
struct LedgerState {
    input_used: u64,
    output_used: u64,
    requests: u64,
    last_reset: DateTime<Utc>,
    next_reset: DateTime<Utc>,
    degradation: DegradationLevel,
    emergency_shutdown: bool,
}

impl LedgerState {
    fn fresh(now: DateTime<Utc>, interval: Duration) -> Self {
        Self {
            input_used: 0,
            output_used: 0,
            requests: 0,
            last_reset: now,
            next_reset: now + interval,
            degradation: DegradationLevel::None,
            emergency_shutdown: false,
        }
    }

    fn total_used(&self) -> u64 {
        self.input_used.saturating_add(self.output_used)
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_reset
    }

    /// The state as of `now`: a fresh window if this one has elapsed.
    fn view_at(&self, now: DateTime<Utc>, interval: Duration) -> Self {
        if self.is_expired(now) {
            Self::fresh(now, interval)
        } else {
            self.clone()
        }
    }
}

/// Process-wide consumption ledger over a rolling quota window.
pub struct BudgetLedger {
    config: BudgetConfig,
    state: Mutex<LedgerState>,
}

impl BudgetLedger {
    pub fn new(config: BudgetConfig) -> Self {
        Self::new_at(config, Utc::now())
    }

    pub fn new_at(config: BudgetConfig, now: DateTime<Utc>) -> Self {
        let state = LedgerState::fresh(now, config.reset_interval());
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn usage_fraction(&self, used: u64) -> f64 {
        if self.config.daily_quota == 0 {
            return 1.0;
        }
        used as f64 / self.config.daily_quota as f64
    }

    /// Adds consumption. An elapsed window is reset first, so only this call's
    /// cost counts toward the new window.
    pub fn record_at(&self, now: DateTime<Utc>, input_cost: u64, output_cost: u64) {
        let mut state = self.state();

        if state.is_expired(now) {
            log::info!(
                "Budget window elapsed (started {}), resetting usage",
                state.last_reset
            );
            *state = LedgerState::fresh(now, self.config.reset_interval());
        }

        state.input_used = state.input_used.saturating_add(input_cost);
        state.output_used = state.output_used.saturating_add(output_cost);
        state.requests += 1;

        let fraction = self.usage_fraction(state.total_used());
        let level = self.config.thresholds.level_for(fraction);
        if level != state.degradation {
            log::info!(
                "Budget degradation {} -> {} at {:.1}% usage",
                state.degradation.as_str(),
                level.as_str(),
                fraction * 100.0
            );
            state.degradation = level;
        }

        if self.config.emergency_shutdown_enabled
            && !state.emergency_shutdown
            && fraction >= self.config.shutdown_threshold
        {
            log::warn!(
                "Emergency shutdown triggered at {:.1}% of daily quota",
                fraction * 100.0
            );
            state.emergency_shutdown = true;
        }
    }

    pub fn record(&self, input_cost: u64, output_cost: u64) {
        self.record_at(Utc::now(), input_cost, output_cost);
    }

    /// Pure admission decision. An elapsed window is evaluated as if already reset.
    pub fn admit_at(
        &self,
        now: DateTime<Utc>,
        estimated_cost: u64,
        class: OperationClass,
    ) -> AdmissionDecision {
        let (used, shutdown) = {
            let state = self.state().view_at(now, self.config.reset_interval());
            (state.total_used(), state.emergency_shutdown)
        };

        let usage_fraction = self.usage_fraction(used);
        let degradation = self.config.thresholds.level_for(usage_fraction);
        let remaining_quota = self.config.daily_quota.saturating_sub(used);

        let deny = |reason: String| AdmissionDecision {
            allowed: false,
            reason: Some(reason),
            degradation,
            remaining_quota,
            usage_fraction,
        };

        if shutdown {
            return deny("Emergency shutdown active: token budget exhausted".to_string());
        }

        if used.saturating_add(estimated_cost) > self.config.daily_quota {
            return deny(format!(
                "Request would exceed daily quota: {} used, {} requested, {} available",
                used, estimated_cost, remaining_quota
            ));
        }

        match degradation {
            DegradationLevel::Severe if !class.is_operator_initiated() => {
                return deny(format!(
                    "Severe budget degradation: only operator-initiated requests are allowed ({} denied)",
                    class.as_str()
                ));
            }
            DegradationLevel::Moderate if self.config.is_automatic(class) => {
                return deny(format!(
                    "Moderate budget degradation: automatic {} requests are disabled",
                    class.as_str()
                ));
            }
            DegradationLevel::Light
                if class.is_context_heavy() && estimated_cost > self.config.context_heavy_ceiling =>
            {
                return deny(format!(
                    "Light budget degradation: {} requests above {} units are deferred ({} requested)",
                    class.as_str(),
                    self.config.context_heavy_ceiling,
                    estimated_cost
                ));
            }
            _ => {}
        }

        AdmissionDecision {
            allowed: true,
            reason: None,
            degradation,
            remaining_quota,
            usage_fraction,
        }
    }

    pub fn admit(&self, estimated_cost: u64, class: OperationClass) -> AdmissionDecision {
        self.admit_at(Utc::now(), estimated_cost, class)
    }

    /// Sets the shutdown flag for the current window, resetting an elapsed one
    /// first so the flag never belongs to a window that is already over.
    pub fn trigger_shutdown_at(&self, now: DateTime<Utc>) {
        let mut state = self.state();
        if state.is_expired(now) {
            *state = LedgerState::fresh(now, self.config.reset_interval());
        }
        log::warn!("Emergency shutdown triggered manually");
        state.emergency_shutdown = true;
    }

    pub fn trigger_shutdown(&self) {
        self.trigger_shutdown_at(Utc::now());
    }

    /// Clears the shutdown flag if usage is back under the warning threshold or
    /// the window has elapsed. Returns whether the flag is now clear.
    pub fn clear_shutdown_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state();

        if state.is_expired(now) {
            *state = LedgerState::fresh(now, self.config.reset_interval());
            log::info!("Emergency shutdown cleared by budget window reset");
            return true;
        }

        let fraction = self.usage_fraction(state.total_used());
        if fraction < self.config.thresholds.light {
            state.emergency_shutdown = false;
            log::info!("Emergency shutdown cleared at {:.1}% usage", fraction * 100.0);
            true
        } else {
            log::warn!(
                "Emergency shutdown kept: usage {:.1}% is above the warning threshold",
                fraction * 100.0
            );
            !state.emergency_shutdown
        }
    }

    pub fn clear_shutdown(&self) -> bool {
        self.clear_shutdown_at(Utc::now())
    }

    pub fn is_shutdown(&self) -> bool {
        self.state().emergency_shutdown
    }

    pub fn analytics_at(&self, now: DateTime<Utc>) -> BudgetAnalytics {
        let state = self.state().view_at(now, self.config.reset_interval());
        let used = state.total_used();
        let usage_fraction = self.usage_fraction(used);

        let elapsed_secs = now.signed_duration_since(state.last_reset).num_seconds();
        let projected_daily_usage = if elapsed_secs > 0 {
            let scale = self.config.reset_interval_secs as f64 / elapsed_secs as f64;
            (used as f64 * scale).round() as u64
        } else {
            used
        };

        let average_request_cost = if state.requests > 0 {
            used as f64 / state.requests as f64
        } else {
            0.0
        };

        let time_until_reset = state
            .next_reset
            .signed_duration_since(now)
            .to_std()
            .unwrap_or_default();

        let status = if state.emergency_shutdown {
            BudgetStatus::Emergency
        } else if usage_fraction >= self.config.thresholds.moderate {
            BudgetStatus::Critical
        } else if usage_fraction >= self.config.thresholds.light {
            BudgetStatus::Warning
        } else {
            BudgetStatus::Normal
        };

        BudgetAnalytics {
            usage_fraction,
            projected_daily_usage,
            average_request_cost,
            time_until_reset,
            status,
        }
    }

    pub fn analytics(&self) -> BudgetAnalytics {
        self.analytics_at(Utc::now())
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let state = self.state();
        BudgetSnapshot {
            input_used: state.input_used,
            output_used: state.output_used,
            requests: state.requests,
            last_reset: state.last_reset,
            next_reset: state.next_reset,
            degradation: state.degradation,
            emergency_shutdown: state.emergency_shutdown,
        }
    }
}

impl BudgetOracle for BudgetLedger {
    fn admit(&self, estimated_cost: u64, class: OperationClass) -> AdmissionDecision {
        BudgetLedger::admit(self, estimated_cost, class)
    }

    fn record(&self, input_cost: u64, output_cost: u64) {
        BudgetLedger::record(self, input_cost, output_cost)
    }
}
