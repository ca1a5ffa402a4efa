//! Schedule definitions — the core data model for automated sends.

use chrono::{DateTime, Utc};
use rentrelay_core::error::{RentRelayError, Result};
use serde::{Deserialize, Serialize};

use crate::rules::RuleTree;

/// How a schedule's trigger value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    /// `"HH:MM"` — every day at that time.
    Daily,
    /// `"<dayname> HH:MM"` — e.g. `"monday 09:30"`.
    Weekly,
    /// `"<day 1-31> HH:MM"` — clamped to short months.
    Monthly,
    /// Five-field cron expression.
    Cron,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Daily => "daily",
            TriggerType::Weekly => "weekly",
            TriggerType::Monthly => "monthly",
            TriggerType::Cron => "cron",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "daily" => Ok(TriggerType::Daily),
            "weekly" => Ok(TriggerType::Weekly),
            "monthly" => Ok(TriggerType::Monthly),
            "cron" => Ok(TriggerType::Cron),
            other => Err(RentRelayError::Validation(format!(
                "unknown trigger type '{other}' (expected daily, weekly, monthly, or cron)"
            ))),
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schedule lifecycle status.
///
/// `active ⇄ paused`; either may be disabled. Deletion removes the
/// row entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Active,
    Paused,
    Disabled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Active => "active",
            ScheduleStatus::Paused => "paused",
            ScheduleStatus::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(ScheduleStatus::Active),
            "paused" => Ok(ScheduleStatus::Paused),
            "disabled" => Ok(ScheduleStatus::Disabled),
            other => Err(RentRelayError::Validation(format!(
                "unknown schedule status '{other}'"
            ))),
        }
    }
}

/// Statistics of the most recent execution, stored as JSON alongside
/// the schedule row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionStats {
    pub total_recipients: usize,
    pub successful_sends: usize,
    pub failed_sends: usize,
    /// Percentage, 0.0 when nothing was attempted.
    pub success_rate: f64,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionStats {
    pub fn new(
        total_recipients: usize,
        successful_sends: usize,
        failed_sends: usize,
        executed_at: DateTime<Utc>,
    ) -> Self {
        let success_rate = if total_recipients > 0 {
            (successful_sends as f64 / total_recipients as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        Self {
            total_recipients,
            successful_sends,
            failed_sends,
            success_rate,
            executed_at,
        }
    }
}

/// A persisted schedule.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub id: i64,
    pub name: String,
    pub message_template: String,
    pub trigger_type: TriggerType,
    pub trigger_value: String,
    /// Parsed once at create/update; `None` means "all active tenants".
    pub conditions: Option<RuleTree>,
    pub status: ScheduleStatus,
    /// Send through the gateway's test key.
    pub test_mode: bool,

    // Execution bookkeeping
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub run_count: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub last_execution_stats: Option<ExecutionStats>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Success percentage across all runs.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.success_count + self.failure_count;
        if attempted == 0 {
            return 0.0;
        }
        (self.success_count as f64 / attempted as f64 * 1000.0).round() / 10.0
    }
}

/// Input for creating a schedule. Status always starts active.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSchedule {
    pub name: String,
    pub message_template: String,
    pub trigger_type: TriggerType,
    pub trigger_value: String,
    #[serde(default)]
    pub conditions: Option<serde_json::Value>,
    #[serde(default)]
    pub test_mode: bool,
}

/// Partial update. `conditions: Some(Value::Null)` clears the tree.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleUpdate {
    pub name: Option<String>,
    pub message_template: Option<String>,
    pub trigger_type: Option<TriggerType>,
    pub trigger_value: Option<String>,
    pub conditions: Option<serde_json::Value>,
    pub test_mode: Option<bool>,
}

/// Reject names shorter than 3 characters after trimming.
pub fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.len() < 3 {
        return Err(RentRelayError::Validation(
            "schedule name must be at least 3 characters long".into(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Reject templates shorter than 10 characters after trimming.
pub fn validate_template(template: &str) -> Result<String> {
    let trimmed = template.trim();
    if trimmed.len() < 10 {
        return Err(RentRelayError::Validation(
            "message template must be at least 10 characters long".into(),
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stats_success_rate() {
        let at = Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap();
        let stats = ExecutionStats::new(3, 2, 1, at);
        assert_eq!(stats.success_rate, 66.7);

        let empty = ExecutionStats::new(0, 0, 0, at);
        assert_eq!(empty.success_rate, 0.0);
    }

    #[test]
    fn name_and_template_validation() {
        assert!(validate_name("ab").is_err());
        assert_eq!(validate_name("  rent reminder  ").unwrap(), "rent reminder");
        assert!(validate_template("too short").is_err());
        assert!(validate_template("Hello {name}, rent is due.").is_ok());
    }

    #[test]
    fn trigger_type_round_trip() {
        for s in ["daily", "weekly", "monthly", "cron"] {
            assert_eq!(TriggerType::parse(s).unwrap().as_str(), s);
        }
        assert!(TriggerType::parse("hourly").is_err());
    }
}
