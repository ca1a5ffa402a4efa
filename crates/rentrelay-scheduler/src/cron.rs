//! Five-field cron expression parser.
//! Fields: "MIN HOUR DOM MON DOW"; values: `*`, `*/N`, `N`, `N,M,...`.
//! Example: "0 9 1 * *" = 09:00 on the first of every month.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

/// A parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronExpr {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    /// 0-6, Sunday = 0 (also accepts 7 for Sunday on input).
    days_of_week: Vec<u32>,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpr {
    /// Parse an expression; `Err` carries the expected format.
    pub fn parse(expression: &str) -> Result<Self, String> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(format!(
                "cron expression '{expression}' must have 5 fields: MIN HOUR DOM MON DOW"
            ));
        }

        let minutes = parse_field(parts[0], 0, 59)
            .ok_or_else(|| format!("invalid cron minute field '{}'", parts[0]))?;
        let hours = parse_field(parts[1], 0, 23)
            .ok_or_else(|| format!("invalid cron hour field '{}'", parts[1]))?;
        let days_of_month = parse_field(parts[2], 1, 31)
            .ok_or_else(|| format!("invalid cron day-of-month field '{}'", parts[2]))?;
        let months = parse_field(parts[3], 1, 12)
            .ok_or_else(|| format!("invalid cron month field '{}'", parts[3]))?;
        let days_of_week = parse_field(parts[4], 0, 7)
            .ok_or_else(|| format!("invalid cron day-of-week field '{}'", parts[4]))?
            .into_iter()
            .map(|d| d % 7) // 7 is an alias for Sunday
            .collect();

        Ok(Self {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: parts[2] != "*",
            dow_restricted: parts[4] != "*",
        })
    }

    /// Next matching instant strictly after `after`, or None if no
    /// match exists within a year (e.g. "0 0 31 2 *").
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = (after + Duration::minutes(1))
            .with_second(0)
            .and_then(|c| c.with_nanosecond(0))
            .unwrap_or(after);

        // Minute-by-minute scan, bounded to 366 days.
        for _ in 0..(366 * 24 * 60) {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }

    fn matches(&self, t: DateTime<Utc>) -> bool {
        if !self.minutes.contains(&t.minute()) || !self.hours.contains(&t.hour()) {
            return false;
        }
        if !self.months.contains(&t.month()) {
            return false;
        }

        let dom_ok = self.days_of_month.contains(&t.day());
        let dow_ok = self
            .days_of_week
            .contains(&(t.weekday().num_days_from_sunday()));

        // Standard cron: when both DOM and DOW are restricted, either
        // may match; otherwise both must.
        if self.dom_restricted && self.dow_restricted {
            dom_ok || dow_ok
        } else {
            dom_ok && dow_ok
        }
    }
}

/// Parse the next run time of a cron expression after a reference.
pub fn next_run_from_cron(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match CronExpr::parse(expression) {
        Ok(expr) => expr.next_after(after),
        Err(e) => {
            tracing::warn!("{e}");
            None
        }
    }
}

/// Parse a cron field into a sorted list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    // */N — every N
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n as usize).collect());
    }

    // Comma-separated: "0,15,30,45"
    if field.contains(',') {
        let vals: Result<Vec<u32>, _> = field.split(',').map(|s| s.trim().parse()).collect();
        let vals = vals.ok()?;
        if vals.iter().any(|v| *v < min || *v > max) {
            return None;
        }
        return Some(vals);
    }

    // Single number
    let n: u32 = field.parse().ok()?;
    if n >= min && n <= max {
        Some(vec![n])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_every_hour() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 30, 0).unwrap();
        let next = next_run_from_cron("0 * * * *", after).unwrap();
        assert_eq!(next.hour(), 11);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_specific_time() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 7, 0, 0).unwrap();
        let next = next_run_from_cron("0 8 * * *", after).unwrap();
        assert_eq!(next.hour(), 8);
        assert_eq!(next.minute(), 0);
        assert_eq!(next.day(), 22);
    }

    #[test]
    fn test_every_15_minutes() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 2, 0).unwrap();
        let next = next_run_from_cron("*/15 * * * *", after).unwrap();
        assert_eq!(next.minute(), 15);
    }

    #[test]
    fn test_day_of_month() {
        // 2026-02-22 is past the 1st, so next match is March 1st.
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();
        let next = next_run_from_cron("0 9 1 * *", after).unwrap();
        assert_eq!((next.month(), next.day(), next.hour()), (3, 1, 9));
    }

    #[test]
    fn test_day_of_week() {
        // 2026-02-22 is a Sunday; next Monday 08:00 is the 23rd.
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();
        let next = next_run_from_cron("0 8 * * 1", after).unwrap();
        assert_eq!((next.month(), next.day(), next.hour()), (2, 23, 8));
    }

    #[test]
    fn test_dom_dow_either_matches() {
        // Both restricted: fires on the 15th OR on Mondays.
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();
        let next = next_run_from_cron("0 8 15 * 1", after).unwrap();
        // Monday the 23rd comes before the 15th of March.
        assert_eq!((next.day(), next.hour()), (23, 8));
    }

    #[test]
    fn test_strictly_after() {
        let at = Utc.with_ymd_and_hms(2026, 2, 22, 8, 0, 0).unwrap();
        let next = next_run_from_cron("0 8 * * *", at).unwrap();
        assert_eq!(next.day(), 23); // not the same instant
    }

    #[test]
    fn test_invalid_expression() {
        let after = Utc::now();
        assert!(next_run_from_cron("bad", after).is_none());
        assert!(next_run_from_cron("61 * * * *", after).is_none());
        assert!(CronExpr::parse("0 8 * *").is_err());
    }
}
