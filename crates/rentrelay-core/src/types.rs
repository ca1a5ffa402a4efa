//! Domain types shared between the scheduler and the channel layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tenant — the recipient of scheduled messages.
///
/// The scheduler reads these rows; the only fields it is allowed to
/// mutate are the payment and opt-in tracking fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: i64,
    pub name: String,
    /// Phone number in the format the SMS gateway accepts.
    pub contact: String,
    pub building: Option<String>,
    /// residential, commercial, or mixed.
    pub tenant_type: String,
    pub rent_amount: Option<i64>,
    /// Day-of-month rent is due, as entered ("5", "2026-09-01", ...).
    pub due_date: Option<String>,
    pub active: bool,

    // Payment tracking
    pub is_current_month_rent_paid: bool,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub late_fee_applicable: bool,

    /// SMS opt-in for A2P compliance: pending, opted_in, opted_out.
    pub sms_opt_in_status: String,

    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Display form used in log lines and condition previews.
    pub fn display_name(&self) -> &str {
        &self.name
    }
}

/// Result of a single SMS submission to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub success: bool,
    /// Provider-side message id, when the provider returns one.
    pub message_id: Option<String>,
    pub error: Option<String>,
    /// Provider quota remaining after this send, if reported.
    pub quota_remaining: Option<i64>,
}

impl SendReceipt {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
            quota_remaining: None,
        }
    }
}

/// One per tenant per execution — append-only after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub id: i64,
    /// None for ad-hoc sends outside any schedule.
    pub schedule_id: Option<i64>,
    pub tenant_id: i64,
    /// Message body as rendered for this tenant.
    pub content: String,
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub test_mode: bool,
    pub sent_at: DateTime<Utc>,
}
