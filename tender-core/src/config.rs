//! Configuration types

use crate::{ConfigError, TenderError, TenderResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

pub const DEFAULT_BIDDING_WINDOW_SECS: u64 = 30;
pub const DEFAULT_ACK_GRACE_SECS: u64 = 10;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_WATCHDOG_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_BACKLOG_RETRY_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_MAX_BACKLOG_WAIT_SECS: u64 = 60;
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ANNOUNCEMENT_RETENTION_SECS: u64 = 300;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 250;
pub const DEFAULT_MIN_CAPABILITY_SCORE: f64 = 0.3;
pub const DEFAULT_PLAN_RETENTION_SECS: u64 = 300;

/// Longest duration any timeout may be configured to (one year).
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

// ============================================================================
// SCORING WEIGHTS
// ============================================================================

/// Weights of the bid scoring formula.
///
/// ```text
/// score = capability·capability_weight
///       + max(0, time_bonus_max − estimated_time / time_divisor)
///       + confidence·confidence_weight
///       − busy_penalty·[busy]
///       − min(distance_penalty_cap, distance·distance_penalty_per_unit)
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub capability_weight: f64,
    pub time_bonus_max: f64,
    pub time_divisor: f64,
    pub confidence_weight: f64,
    pub busy_penalty: f64,
    pub distance_penalty_cap: f64,
    pub distance_penalty_per_unit: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            capability_weight: 100.0,
            time_bonus_max: 50.0,
            time_divisor: 10.0,
            confidence_weight: 20.0,
            busy_penalty: 30.0,
            distance_penalty_cap: 20.0,
            distance_penalty_per_unit: 0.1,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> TenderResult<()> {
        let weights = [
            ("capability_weight", self.capability_weight),
            ("time_bonus_max", self.time_bonus_max),
            ("confidence_weight", self.confidence_weight),
            ("busy_penalty", self.busy_penalty),
            ("distance_penalty_cap", self.distance_penalty_cap),
            ("distance_penalty_per_unit", self.distance_penalty_per_unit),
        ];
        for (field, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(
                    field,
                    value.to_string(),
                    "weight must be a finite, non-negative number",
                ));
            }
        }

        if !self.time_divisor.is_finite() || self.time_divisor <= 0.0 {
            return Err(invalid(
                "time_divisor",
                self.time_divisor.to_string(),
                "time_divisor must be greater than 0",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// ALLOCATION CONFIG
// ============================================================================

/// Tunables for negotiation, recovery and the background tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// How long an announcement accepts bids
    pub bidding_window: Duration,
    /// How long a winner has to accept an award
    pub ack_grace: Duration,
    /// Award cycles a task may consume before it fails
    pub max_attempts: u32,
    /// Longest allowed silence from an executing agent
    pub watchdog_interval: Duration,
    /// How often parked tasks retry the fallback allocator
    pub backlog_retry_interval: Duration,
    /// How long a task may stay parked before it fails
    pub max_backlog_wait: Duration,
    /// Agents silent for longer than this are removed
    pub heartbeat_timeout: Duration,
    /// How long closed announcements are kept for inspection
    pub announcement_retention: Duration,
    /// How long a finished plan stays in the live tables before it is archived
    #[serde(default = "default_plan_retention")]
    pub plan_retention: Duration,
    /// Period of the background tick job
    pub tick_interval: Duration,
    /// Bids below this capability score are discarded before scoring
    pub min_capability_score: f64,
    /// Evaluate as soon as every eligible agent has bid
    pub evaluate_when_all_bid: bool,
    pub scoring: ScoringWeights,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            bidding_window: Duration::from_secs(DEFAULT_BIDDING_WINDOW_SECS),
            ack_grace: Duration::from_secs(DEFAULT_ACK_GRACE_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            watchdog_interval: Duration::from_secs(DEFAULT_WATCHDOG_INTERVAL_SECS),
            backlog_retry_interval: Duration::from_secs(DEFAULT_BACKLOG_RETRY_INTERVAL_SECS),
            max_backlog_wait: Duration::from_secs(DEFAULT_MAX_BACKLOG_WAIT_SECS),
            heartbeat_timeout: Duration::from_secs(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
            announcement_retention: Duration::from_secs(DEFAULT_ANNOUNCEMENT_RETENTION_SECS),
            plan_retention: Duration::from_secs(DEFAULT_PLAN_RETENTION_SECS),
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            min_capability_score: DEFAULT_MIN_CAPABILITY_SCORE,
            evaluate_when_all_bid: false,
            scoring: ScoringWeights::default(),
        }
    }
}

impl AllocationConfig {
    /// Create AllocationConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `TENDER_BIDDING_WINDOW_SECS`: Bidding window (default: 30)
    /// - `TENDER_ACK_GRACE_SECS`: Award acknowledgement grace (default: 10)
    /// - `TENDER_MAX_ATTEMPTS`: Award cycles per task (default: 3)
    /// - `TENDER_WATCHDOG_INTERVAL_SECS`: Execution watchdog (default: 60)
    /// - `TENDER_BACKLOG_RETRY_INTERVAL_SECS`: Backlog retry period (default: 5)
    /// - `TENDER_MAX_BACKLOG_WAIT_SECS`: Maximum backlog wait (default: 60)
    /// - `TENDER_HEARTBEAT_TIMEOUT_SECS`: Agent heartbeat timeout (default: 30)
    /// - `TENDER_ANNOUNCEMENT_RETENTION_SECS`: Closed announcement retention (default: 300)
    /// - `TENDER_PLAN_RETENTION_SECS`: Finished plan retention (default: 300)
    /// - `TENDER_TICK_INTERVAL_MS`: Background tick period (default: 250)
    /// - `TENDER_MIN_CAPABILITY_SCORE`: Capability threshold (default: 0.3)
    /// - `TENDER_EVALUATE_WHEN_ALL_BID`: Early evaluation (default: false)
    pub fn from_env() -> Self {
        let evaluate_when_all_bid = std::env::var("TENDER_EVALUATE_WHEN_ALL_BID")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        Self {
            bidding_window: env_secs("TENDER_BIDDING_WINDOW_SECS", DEFAULT_BIDDING_WINDOW_SECS),
            ack_grace: env_secs("TENDER_ACK_GRACE_SECS", DEFAULT_ACK_GRACE_SECS),
            max_attempts: std::env::var("TENDER_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            watchdog_interval: env_secs(
                "TENDER_WATCHDOG_INTERVAL_SECS",
                DEFAULT_WATCHDOG_INTERVAL_SECS,
            ),
            backlog_retry_interval: env_secs(
                "TENDER_BACKLOG_RETRY_INTERVAL_SECS",
                DEFAULT_BACKLOG_RETRY_INTERVAL_SECS,
            ),
            max_backlog_wait: env_secs("TENDER_MAX_BACKLOG_WAIT_SECS", DEFAULT_MAX_BACKLOG_WAIT_SECS),
            heartbeat_timeout: env_secs(
                "TENDER_HEARTBEAT_TIMEOUT_SECS",
                DEFAULT_HEARTBEAT_TIMEOUT_SECS,
            ),
            announcement_retention: env_secs(
                "TENDER_ANNOUNCEMENT_RETENTION_SECS",
                DEFAULT_ANNOUNCEMENT_RETENTION_SECS,
            ),
            plan_retention: env_secs("TENDER_PLAN_RETENTION_SECS", DEFAULT_PLAN_RETENTION_SECS),
            tick_interval: Duration::from_millis(
                std::env::var("TENDER_TICK_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_TICK_INTERVAL_MS),
            ),
            min_capability_score: std::env::var("TENDER_MIN_CAPABILITY_SCORE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MIN_CAPABILITY_SCORE),
            evaluate_when_all_bid,
            scoring: ScoringWeights::default(),
        }
    }

    /// Create a configuration for development/testing with shorter timeouts.
    pub fn development() -> Self {
        Self {
            bidding_window: Duration::from_secs(2),
            ack_grace: Duration::from_secs(1),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            watchdog_interval: Duration::from_secs(5),
            backlog_retry_interval: Duration::from_millis(500),
            max_backlog_wait: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(5),
            announcement_retention: Duration::from_secs(10),
            plan_retention: Duration::from_secs(10),
            tick_interval: Duration::from_millis(50),
            min_capability_score: DEFAULT_MIN_CAPABILITY_SCORE,
            evaluate_when_all_bid: true,
            scoring: ScoringWeights::default(),
        }
    }

    /// Parse a JSON document and validate it.
    pub fn from_json_str(json: &str) -> TenderResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            TenderError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - every duration is positive and at most [`MAX_DURATION_SECS`]
    /// - max_attempts >= 1
    /// - min_capability_score in [0.0, 1.0]
    /// - scoring weights are finite and non-negative
    pub fn validate(&self) -> TenderResult<()> {
        let durations = [
            ("bidding_window", self.bidding_window),
            ("ack_grace", self.ack_grace),
            ("watchdog_interval", self.watchdog_interval),
            ("backlog_retry_interval", self.backlog_retry_interval),
            ("max_backlog_wait", self.max_backlog_wait),
            ("heartbeat_timeout", self.heartbeat_timeout),
            ("announcement_retention", self.announcement_retention),
            ("plan_retention", self.plan_retention),
            ("tick_interval", self.tick_interval),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(invalid(
                    field,
                    format!("{:?}", value),
                    &format!("{} must be positive", field),
                ));
            }
            if value > Duration::from_secs(MAX_DURATION_SECS) {
                return Err(invalid(
                    field,
                    format!("{:?}", value),
                    &format!("{} must not exceed {} seconds", field, MAX_DURATION_SECS),
                ));
            }
        }

        if self.max_attempts == 0 {
            return Err(invalid(
                "max_attempts",
                self.max_attempts.to_string(),
                "max_attempts must be at least 1",
            ));
        }

        if !(0.0..=1.0).contains(&self.min_capability_score) {
            return Err(invalid(
                "min_capability_score",
                self.min_capability_score.to_string(),
                "min_capability_score must be between 0.0 and 1.0",
            ));
        }

        self.scoring.validate()
    }

    pub fn with_bidding_window(mut self, window: Duration) -> Self {
        self.bidding_window = window;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_evaluate_when_all_bid(mut self, enabled: bool) -> Self {
        self.evaluate_when_all_bid = enabled;
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringWeights) -> Self {
        self.scoring = scoring;
        self
    }
}

fn default_plan_retention() -> Duration {
    Duration::from_secs(DEFAULT_PLAN_RETENTION_SECS)
}

fn env_secs(var: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(var)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default),
    )
}

fn invalid(field: &str, value: String, reason: &str) -> TenderError {
    TenderError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value,
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() -> TenderResult<()> {
        let config = AllocationConfig::default();
        config.validate()?;
        assert_eq!(config.bidding_window, Duration::from_secs(30));
        assert_eq!(config.ack_grace, Duration::from_secs(10));
        assert_eq!(config.max_attempts, 3);
        assert!(!config.evaluate_when_all_bid);
        Ok(())
    }

    #[test]
    fn test_development_config_is_valid() -> TenderResult<()> {
        AllocationConfig::development().validate()
    }

    #[test]
    fn test_validate_rejects_zero_ack_grace() {
        let config = AllocationConfig {
            ack_grace: Duration::ZERO,
            ..AllocationConfig::default()
        };
        match config.validate() {
            Err(TenderError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "ack_grace")
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_unrepresentable_bidding_window() {
        let config = AllocationConfig::default()
            .with_bidding_window(Duration::from_secs(10_000_000_000_000));
        match config.validate() {
            Err(TenderError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "bidding_window")
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_accepts_one_year_limit() -> TenderResult<()> {
        AllocationConfig {
            max_backlog_wait: Duration::from_secs(MAX_DURATION_SECS),
            ..AllocationConfig::default()
        }
        .validate()
    }

    #[test]
    fn test_from_json_rejects_huge_window() {
        let mut value = match serde_json::to_value(AllocationConfig::default()) {
            Ok(v) => v,
            Err(e) => panic!("serialize default config: {}", e),
        };
        value["bidding_window"] = serde_json::json!({ "secs": 10_000_000_000_000u64, "nanos": 0 });
        let result = AllocationConfig::from_json_str(&value.to_string());
        assert!(matches!(
            result,
            Err(TenderError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_time_divisor() {
        let config = AllocationConfig::default().with_scoring(ScoringWeights {
            time_divisor: 0.0,
            ..ScoringWeights::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_round_trip() -> TenderResult<()> {
        let original = AllocationConfig::default().with_max_attempts(5);
        let json = serde_json::to_string(&original).map_err(|e| {
            TenderError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })?;
        let parsed = AllocationConfig::from_json_str(&json)?;
        assert_eq!(parsed, original);
        Ok(())
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let result = AllocationConfig::from_json_str("{not json");
        assert!(matches!(
            result,
            Err(TenderError::Config(ConfigError::ParseFailed { .. }))
        ));
    }
}
