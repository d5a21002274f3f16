use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DetectError, Result};

/// Longest look-back any window may span: 100 years.
pub const MAX_WINDOW_DAYS: i64 = 36_500;

/// Window and threshold settings shared by the four insider-trading rules.
///
/// Every field has a default; a JSON config file only needs to name the
/// fields it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub pre_announcement_window_days: i64,
    pub abnormal_volume_multiplier: f64,
    /// Accepted for compatibility with existing config files; no rule reads it.
    pub abnormal_return_threshold_pct: f64,
    /// Minimum post-announcement return, as a fraction (0.10 = 10%).
    pub profit_threshold_pct: f64,
    pub network_time_window_days: i64,
    pub leakage_cluster_window_hours: i64,
    pub leakage_min_accounts: usize,
    pub severity_high_occurrences: usize,
    pub severity_medium_occurrences: usize,
    /// Accepted but inert: "low" is whatever falls below medium.
    pub severity_low_occurrences: usize,
    pub save_intermediates: bool,
    pub min_suspicious_events: usize,
    /// Seed for the synthetic event fallback. `None` draws from the OS.
    pub synthetic_event_seed: Option<u64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            pre_announcement_window_days: 5,
            abnormal_volume_multiplier: 3.0,
            abnormal_return_threshold_pct: 0.05,
            profit_threshold_pct: 0.10,
            network_time_window_days: 3,
            leakage_cluster_window_hours: 48,
            leakage_min_accounts: 3,
            severity_high_occurrences: 5,
            severity_medium_occurrences: 3,
            severity_low_occurrences: 1,
            save_intermediates: false,
            min_suspicious_events: 2,
            synthetic_event_seed: None,
        }
    }
}

impl DetectorConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: DetectorConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(DetectError::InvalidConfig(msg.to_string()));

        for (name, value, limit) in [
            ("pre_announcement_window_days", self.pre_announcement_window_days, MAX_WINDOW_DAYS),
            ("network_time_window_days", self.network_time_window_days, MAX_WINDOW_DAYS),
            ("leakage_cluster_window_hours", self.leakage_cluster_window_hours, MAX_WINDOW_DAYS * 24),
        ] {
            if value <= 0 {
                return invalid(&format!("{name} must be positive"));
            }
            if value > limit {
                return invalid(&format!("{name} must not exceed {limit}"));
            }
        }
        if !(self.abnormal_volume_multiplier > 0.0) {
            return invalid("abnormal_volume_multiplier must be positive");
        }
        if !self.profit_threshold_pct.is_finite() {
            return invalid("profit_threshold_pct must be finite");
        }
        if self.leakage_min_accounts == 0 {
            return invalid("leakage_min_accounts must be at least 1");
        }
        if self.min_suspicious_events == 0 {
            return invalid("min_suspicious_events must be at least 1");
        }
        if self.severity_medium_occurrences > self.severity_high_occurrences {
            return invalid("severity_medium_occurrences exceeds severity_high_occurrences");
        }
        Ok(())
    }
}
