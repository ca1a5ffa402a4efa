//! # RentRelay Channels
//! Outbound message transport implementations.

pub mod sms;

pub use sms::{ConsoleGateway, SmsGateway, TextbeltClient};
