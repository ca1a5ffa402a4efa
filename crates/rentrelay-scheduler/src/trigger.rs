//! Trigger builder — turns a (type, value) pair into a next-fire-time
//! calculator. Validation happens here, at create/update time, so a
//! malformed value never reaches a timer.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use rentrelay_core::error::{RentRelayError, Result};

use crate::cron::CronExpr;
use crate::schedule::TriggerType;

/// A validated trigger specification.
#[derive(Debug, Clone)]
pub enum TriggerSpec {
    Daily { hour: u32, minute: u32 },
    Weekly { weekday: Weekday, hour: u32, minute: u32 },
    Monthly { day: u32, hour: u32, minute: u32 },
    Cron(CronExpr),
}

impl TriggerSpec {
    /// Parse and validate a trigger value against its declared type.
    pub fn parse(trigger_type: TriggerType, value: &str) -> Result<Self> {
        let value = value.trim();
        match trigger_type {
            TriggerType::Daily => {
                let (hour, minute) = parse_hhmm(value).ok_or_else(|| {
                    RentRelayError::Validation(format!(
                        "daily schedule must be in format \"HH:MM\" (e.g. \"09:30\"), got '{value}'"
                    ))
                })?;
                Ok(TriggerSpec::Daily { hour, minute })
            }
            TriggerType::Weekly => {
                let mut parts = value.split_whitespace();
                let spec = parts
                    .next()
                    .zip(parts.next())
                    .filter(|_| parts.next().is_none())
                    .and_then(|(day, time)| {
                        let weekday = parse_weekday(day)?;
                        let (hour, minute) = parse_hhmm(time)?;
                        Some(TriggerSpec::Weekly { weekday, hour, minute })
                    });
                spec.ok_or_else(|| {
                    RentRelayError::Validation(format!(
                        "weekly schedule must be in format \"DAYNAME HH:MM\" (e.g. \"monday 09:30\"), got '{value}'"
                    ))
                })
            }
            TriggerType::Monthly => {
                let mut parts = value.split_whitespace();
                let spec = parts
                    .next()
                    .zip(parts.next())
                    .filter(|_| parts.next().is_none())
                    .and_then(|(day, time)| {
                        let day: u32 = day.parse().ok()?;
                        if !(1..=31).contains(&day) {
                            return None;
                        }
                        let (hour, minute) = parse_hhmm(time)?;
                        Some(TriggerSpec::Monthly { day, hour, minute })
                    });
                spec.ok_or_else(|| {
                    RentRelayError::Validation(format!(
                        "monthly schedule must be in format \"DD HH:MM\" (e.g. \"5 14:30\"), got '{value}'"
                    ))
                })
            }
            TriggerType::Cron => {
                let expr = CronExpr::parse(value).map_err(RentRelayError::Validation)?;
                Ok(TriggerSpec::Cron(expr))
            }
        }
    }

    /// Next fire time strictly after `after`.
    ///
    /// Always `Some` for daily/weekly/monthly; cron expressions with
    /// no reachable instant (e.g. "0 0 31 2 *") return `None`.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TriggerSpec::Daily { hour, minute } => {
                let today = at_time(after.date_naive(), *hour, *minute);
                if today > after {
                    Some(today)
                } else {
                    Some(at_time(after.date_naive() + Duration::days(1), *hour, *minute))
                }
            }
            TriggerSpec::Weekly { weekday, hour, minute } => {
                let mut date = after.date_naive();
                for _ in 0..8 {
                    if date.weekday() == *weekday {
                        let candidate = at_time(date, *hour, *minute);
                        if candidate > after {
                            return Some(candidate);
                        }
                    }
                    date += Duration::days(1);
                }
                None // unreachable: a weekday recurs within 8 days
            }
            TriggerSpec::Monthly { day, hour, minute } => {
                // Clamp to the last day of short months instead of
                // overflowing into the next month.
                let (mut year, mut month) = (after.year(), after.month());
                for _ in 0..13 {
                    let clamped = (*day).min(days_in_month(year, month));
                    if let Some(date) = NaiveDate::from_ymd_opt(year, month, clamped) {
                        let candidate = at_time(date, *hour, *minute);
                        if candidate > after {
                            return Some(candidate);
                        }
                    }
                    month += 1;
                    if month > 12 {
                        month = 1;
                        year += 1;
                    }
                }
                None // unreachable: every month has a clamped day
            }
            TriggerSpec::Cron(expr) => expr.next_after(after),
        }
    }
}

fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

fn parse_weekday(s: &str) -> Option<Weekday> {
    match s.to_ascii_lowercase().as_str() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

fn at_time(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    // hour/minute are pre-validated; midnight fallback is unreachable.
    let naive = date
        .and_hms_opt(hour, minute, 0)
        .unwrap_or_else(|| date.and_time(chrono::NaiveTime::MIN));
    Utc.from_utc_datetime(&naive)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_y, next_m) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_next = NaiveDate::from_ymd_opt(next_y, next_m, 1);
    let first_this = NaiveDate::from_ymd_opt(year, month, 1);
    match (first_this, first_next) {
        (Some(a), Some(b)) => (b - a).num_days() as u32,
        _ => 28,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn daily_next_fire() {
        let spec = TriggerSpec::parse(TriggerType::Daily, "09:00").unwrap();
        // Before 09:00 → today
        assert_eq!(spec.next_fire(dt(2026, 8, 10, 8, 0)), Some(dt(2026, 8, 10, 9, 0)));
        // At 09:00 exactly → tomorrow (strictly after)
        assert_eq!(spec.next_fire(dt(2026, 8, 10, 9, 0)), Some(dt(2026, 8, 11, 9, 0)));
        // After 09:00 → tomorrow
        assert_eq!(spec.next_fire(dt(2026, 8, 10, 10, 30)), Some(dt(2026, 8, 11, 9, 0)));
    }

    #[test]
    fn weekly_next_fire() {
        let spec = TriggerSpec::parse(TriggerType::Weekly, "Monday 10:00").unwrap();
        // 2026-08-10 is a Monday.
        assert_eq!(spec.next_fire(dt(2026, 8, 10, 9, 0)), Some(dt(2026, 8, 10, 10, 0)));
        // Past Monday 10:00 → next Monday
        assert_eq!(spec.next_fire(dt(2026, 8, 10, 11, 0)), Some(dt(2026, 8, 17, 10, 0)));
    }

    #[test]
    fn monthly_next_fire_and_clamp() {
        let spec = TriggerSpec::parse(TriggerType::Monthly, "31 14:00").unwrap();
        // February 2026 has 28 days → clamped, not skipped to March.
        assert_eq!(spec.next_fire(dt(2026, 2, 1, 0, 0)), Some(dt(2026, 2, 28, 14, 0)));
        // After the clamped fire → March 31st.
        assert_eq!(spec.next_fire(dt(2026, 2, 28, 15, 0)), Some(dt(2026, 3, 31, 14, 0)));
        // Leap year clamps to the 29th.
        assert_eq!(spec.next_fire(dt(2028, 2, 1, 0, 0)), Some(dt(2028, 2, 29, 14, 0)));
    }

    #[test]
    fn monthly_regular_day() {
        let spec = TriggerSpec::parse(TriggerType::Monthly, "5 14:30").unwrap();
        assert_eq!(spec.next_fire(dt(2026, 8, 4, 0, 0)), Some(dt(2026, 8, 5, 14, 30)));
        assert_eq!(spec.next_fire(dt(2026, 8, 5, 15, 0)), Some(dt(2026, 9, 5, 14, 30)));
    }

    #[test]
    fn cron_next_fire() {
        let spec = TriggerSpec::parse(TriggerType::Cron, "0 9 * * *").unwrap();
        assert_eq!(spec.next_fire(dt(2026, 8, 10, 8, 0)), Some(dt(2026, 8, 10, 9, 0)));
    }

    #[test]
    fn validation_errors_name_the_format() {
        let err = TriggerSpec::parse(TriggerType::Daily, "25:00").unwrap_err();
        assert!(err.to_string().contains("HH:MM"));
        let err = TriggerSpec::parse(TriggerType::Weekly, "noday 09:00").unwrap_err();
        assert!(err.to_string().contains("DAYNAME"));
        let err = TriggerSpec::parse(TriggerType::Monthly, "32 09:00").unwrap_err();
        assert!(err.to_string().contains("DD HH:MM"));
        assert!(TriggerSpec::parse(TriggerType::Cron, "not a cron").is_err());
    }

    #[test]
    fn weekday_names_case_insensitive() {
        for name in ["monday", "MONDAY", "Mon"] {
            let value = format!("{name} 09:00");
            assert!(TriggerSpec::parse(TriggerType::Weekly, &value).is_ok());
        }
    }
}
