//! # RentRelay Core
//!
//! Shared foundation for the RentRelay workspace: configuration,
//! the error taxonomy, domain types, and the injectable clock.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RentRelayConfig;
pub use error::{RentRelayError, Result};
pub use types::{OutcomeRecord, SendReceipt, Tenant};
