//! Static memory pressure rules
//!
//! Complements the trend detector with fixed limits on used memory and
//! swap. Each rule keeps its own [`AlertState`], so a rule that stays above
//! its limit fires once per cooldown interval.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alerter::{AlertState, DEFAULT_COOLDOWN_SECS};
use crate::error::{DiagError, Result};
use crate::models::{Subject, SystemMemory};

pub const DEFAULT_MEMORY_PERCENT: f64 = 85.0;
pub const DEFAULT_MEMORY_CRITICAL_PERCENT: f64 = 95.0;
pub const DEFAULT_SWAP_PERCENT: f64 = 80.0;

/// Limits for the memory pressure rules, in percent
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdConfig {
    pub memory_percent: f64,
    pub memory_critical_percent: f64,
    pub swap_percent: f64,
    pub cooldown: Duration,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            memory_percent: DEFAULT_MEMORY_PERCENT,
            memory_critical_percent: DEFAULT_MEMORY_CRITICAL_PERCENT,
            swap_percent: DEFAULT_SWAP_PERCENT,
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
        }
    }
}

impl ThresholdConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("memory", self.memory_percent),
            ("critical memory", self.memory_critical_percent),
            ("swap", self.swap_percent),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(DiagError::invalid_config(format!(
                    "{} alert threshold must be within (0, 100], got {}",
                    name, value
                )));
            }
        }
        if self.memory_critical_percent < self.memory_percent {
            return Err(DiagError::invalid_config(
                "critical memory threshold must not be below the memory threshold",
            ));
        }
        Ok(())
    }
}

/// Which limit was crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdRule {
    HighMemory,
    CriticalMemory,
    HighSwap,
}

impl ThresholdRule {
    pub const ALL: [ThresholdRule; 3] = [
        ThresholdRule::HighMemory,
        ThresholdRule::CriticalMemory,
        ThresholdRule::HighSwap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdRule::HighMemory => "high_memory",
            ThresholdRule::CriticalMemory => "critical_memory",
            ThresholdRule::HighSwap => "high_swap",
        }
    }
}

impl fmt::Display for ThresholdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A memory pressure limit was exceeded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdAlert {
    pub rule: ThresholdRule,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

impl ThresholdAlert {
    pub fn message(&self) -> String {
        match self.rule {
            ThresholdRule::HighMemory => format!(
                "Memory usage is above {}% ({:.1}%)",
                self.threshold, self.value
            ),
            ThresholdRule::CriticalMemory => format!(
                "CRITICAL: Memory usage is above {}% ({:.1}%)",
                self.threshold, self.value
            ),
            ThresholdRule::HighSwap => format!(
                "Swap usage is above {}% ({:.1}%)",
                self.threshold, self.value
            ),
        }
    }
}

/// Alert state for every rule, owned by the monitoring loop
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdStates {
    high_memory: AlertState,
    critical_memory: AlertState,
    high_swap: AlertState,
}

impl ThresholdStates {
    pub fn new() -> Self {
        Self {
            high_memory: AlertState::new(Subject::System),
            critical_memory: AlertState::new(Subject::System),
            high_swap: AlertState::new(Subject::System),
        }
    }

    pub fn get(&self, rule: ThresholdRule) -> &AlertState {
        match rule {
            ThresholdRule::HighMemory => &self.high_memory,
            ThresholdRule::CriticalMemory => &self.critical_memory,
            ThresholdRule::HighSwap => &self.high_swap,
        }
    }

    fn get_mut(&mut self, rule: ThresholdRule) -> &mut AlertState {
        match rule {
            ThresholdRule::HighMemory => &mut self.high_memory,
            ThresholdRule::CriticalMemory => &mut self.critical_memory,
            ThresholdRule::HighSwap => &mut self.high_swap,
        }
    }

    /// Alerts fired across all rules
    pub fn alerts_fired(&self) -> u64 {
        ThresholdRule::ALL
            .iter()
            .map(|rule| self.get(*rule).alerts_fired)
            .sum()
    }
}

impl Default for ThresholdStates {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluates the memory pressure rules against system readings
#[derive(Debug, Clone)]
pub struct ThresholdRules {
    config: ThresholdConfig,
}

impl ThresholdRules {
    pub fn new(config: ThresholdConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    /// Check one reading, returning the alerts to emit now
    ///
    /// A rule above its limit is active; it fires unless its last alert is
    /// still inside the cooldown, and drops back when the value falls to or
    /// below the limit. Swap rules are skipped on nodes without swap.
    pub fn check(
        &self,
        states: &mut ThresholdStates,
        memory: &SystemMemory,
        now: DateTime<Utc>,
    ) -> Vec<ThresholdAlert> {
        let mut alerts = Vec::new();

        for rule in ThresholdRule::ALL {
            let (value, threshold) = match rule {
                ThresholdRule::HighMemory => (Some(memory.used_percent), self.config.memory_percent),
                ThresholdRule::CriticalMemory => {
                    (Some(memory.used_percent), self.config.memory_critical_percent)
                }
                ThresholdRule::HighSwap => (memory.swap_percent, self.config.swap_percent),
            };

            let state = states.get_mut(rule);
            let Some(value) = value.filter(|v| v.is_finite()) else {
                state.active = false;
                continue;
            };

            state.active = value > threshold;
            if state.active && !state.should_suppress(now, self.config.cooldown) {
                state.record_alert(now);
                alerts.push(ThresholdAlert {
                    rule,
                    value,
                    threshold,
                    timestamp: now,
                });
            }
        }

        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn memory(used: f64, swap: Option<f64>) -> SystemMemory {
        SystemMemory {
            used_percent: used,
            swap_percent: swap,
        }
    }

    fn rules() -> ThresholdRules {
        ThresholdRules::new(ThresholdConfig {
            cooldown: Duration::from_secs(60),
            ..ThresholdConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_below_limits_is_quiet() {
        let rules = rules();
        let mut states = ThresholdStates::new();
        assert!(rules.check(&mut states, &memory(60.0, Some(10.0)), t(0)).is_empty());
        // Exactly at the limit does not count as above it
        assert!(rules.check(&mut states, &memory(85.0, Some(80.0)), t(1)).is_empty());
        assert_eq!(states.alerts_fired(), 0);
    }

    #[test]
    fn test_critical_memory_fires_both_memory_rules() {
        let rules = rules();
        let mut states = ThresholdStates::new();

        let alerts = rules.check(&mut states, &memory(97.0, None), t(0));
        let fired: Vec<_> = alerts.iter().map(|a| a.rule).collect();
        assert_eq!(fired, vec![ThresholdRule::HighMemory, ThresholdRule::CriticalMemory]);
        assert!(alerts[1].message().starts_with("CRITICAL: Memory usage is above 95%"));
    }

    #[test]
    fn test_cooldown_applies_per_rule() {
        let rules = rules();
        let mut states = ThresholdStates::new();

        assert_eq!(rules.check(&mut states, &memory(90.0, None), t(0)).len(), 1);
        assert!(rules.check(&mut states, &memory(91.0, None), t(30)).is_empty());
        assert!(states.get(ThresholdRule::HighMemory).active);

        // Swap has its own state and is not held back by the memory cooldown
        let alerts = rules.check(&mut states, &memory(91.0, Some(90.0)), t(31));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule, ThresholdRule::HighSwap);

        let alerts = rules.check(&mut states, &memory(92.0, None), t(60));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule, ThresholdRule::HighMemory);
        assert_eq!(states.alerts_fired(), 3);
    }

    #[test]
    fn test_rule_clears_when_value_drops() {
        let rules = rules();
        let mut states = ThresholdStates::new();

        rules.check(&mut states, &memory(90.0, None), t(0));
        rules.check(&mut states, &memory(50.0, None), t(1));
        assert!(!states.get(ThresholdRule::HighMemory).active);
    }

    #[test]
    fn test_config_validation() {
        assert!(ThresholdConfig::default().validate().is_ok());

        let inverted = ThresholdConfig {
            memory_percent: 90.0,
            memory_critical_percent: 80.0,
            ..ThresholdConfig::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(DiagError::InvalidConfiguration(_))
        ));

        let out_of_range = ThresholdConfig {
            swap_percent: 0.0,
            ..ThresholdConfig::default()
        };
        assert!(out_of_range.validate().is_err());
    }
}
