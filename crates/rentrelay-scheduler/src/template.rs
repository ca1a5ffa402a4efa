//! Message template rendering.
//!
//! Templates carry `{placeholder}` tokens substituted per tenant at
//! send time. Unknown tokens are left literal so a typo'd template is
//! visible in the delivered text rather than silently blanked.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rentrelay_core::types::Tenant;

/// Per-run values that don't come from the tenant row.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub company_name: String,
    /// Day of month used for `{rent_day}` / `{rent_date}`, capped at
    /// 28 so every month has it.
    pub rent_day: u32,
    pub now: DateTime<Utc>,
}

impl RenderContext {
    pub fn new(company_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            company_name: company_name.into(),
            rent_day: 5,
            now,
        }
    }
}

/// Render a template for one tenant.
pub fn render(template: &str, tenant: &Tenant, ctx: &RenderContext) -> String {
    let today = ctx.now.date_naive();

    let due_date = tenant
        .due_date
        .as_deref()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .or_else(|| today.with_day(1))
        .map(|d| d.format("%B %d").to_string())
        .unwrap_or_else(|| "the due date".to_string());

    let rent_day = ctx.rent_day.clamp(1, 28);
    let rent_date = today.with_day(rent_day).unwrap_or(today);

    let rent_amount = tenant
        .rent_amount
        .map(|r| r.to_string())
        .unwrap_or_else(|| "your rent amount".to_string());
    let building = tenant
        .building
        .clone()
        .unwrap_or_else(|| "your building".to_string());

    let pairs: &[(&str, String)] = &[
        ("name", tenant.name.clone()),
        ("tenant_name", tenant.name.clone()),
        ("phone", tenant.contact.clone()),
        ("tenant_phone", tenant.contact.clone()),
        ("tenant_contact", tenant.contact.clone()),
        ("building", building),
        ("due_date", due_date),
        ("rent_amount", rent_amount.clone()),
        ("rent", rent_amount),
        ("rent_day", ordinal_date(rent_date)),
        ("rent_date", rent_date.format("%B %d").to_string()),
        ("company_name", ctx.company_name.clone()),
    ];

    let mut out = template.to_string();
    for (key, value) in pairs {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// "August 5th", "August 21st", "August 12th".
fn ordinal_date(date: NaiveDate) -> String {
    let day = date.day();
    let suffix = match day % 100 {
        11..=13 => "th",
        _ => match day % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        },
    };
    format!("{} {day}{suffix}", date.format("%B"))
}
