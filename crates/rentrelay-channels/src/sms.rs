//! SMS gateway — TextBelt-compatible HTTP API client.
//!
//! The scheduler treats the transport as a black box: one attempt per
//! recipient, per-recipient success/failure, no retry loop here.

use async_trait::async_trait;
use rentrelay_core::error::{RentRelayError, Result};
use rentrelay_core::types::SendReceipt;
use serde::Deserialize;

/// Outbound SMS transport.
///
/// `test_mode` asks the provider to validate without delivering —
/// TextBelt implements this via a `_test` key suffix.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Submit one message. A provider-side rejection is an `Ok`
    /// receipt with `success == false`; `Err` means the request
    /// itself could not be made.
    async fn send(&self, phone: &str, body: &str, test_mode: bool) -> Result<SendReceipt>;
}

/// TextBelt API response envelope.
#[derive(Debug, Deserialize)]
struct TextbeltResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "textId")]
    text_id: Option<serde_json::Value>,
    error: Option<String>,
    #[serde(rename = "quotaRemaining")]
    quota_remaining: Option<i64>,
}

/// TextBelt HTTP client.
pub struct TextbeltClient {
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl TextbeltClient {
    pub fn new(api_base: &str, api_key: &str) -> Self {
        Self {
            api_base: api_base.to_string(),
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn key_for(&self, test_mode: bool) -> String {
        if test_mode {
            format!("{}_test", self.api_key)
        } else {
            self.api_key.clone()
        }
    }

    /// Probe the API key without delivering anything.
    pub async fn check_key(&self) -> Result<SendReceipt> {
        self.send("5555551234", "API key test", true).await
    }
}

#[async_trait]
impl SmsGateway for TextbeltClient {
    fn name(&self) -> &str {
        "textbelt"
    }

    async fn send(&self, phone: &str, body: &str, test_mode: bool) -> Result<SendReceipt> {
        if self.api_key.is_empty() {
            return Err(RentRelayError::Send("SMS API key not configured".into()));
        }

        let response = self
            .client
            .post(&self.api_base)
            .form(&[
                ("phone", phone),
                ("message", body),
                ("key", &self.key_for(test_mode)),
            ])
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| RentRelayError::Send(format!("SMS request failed: {e}")))?;

        let parsed: TextbeltResponse = response
            .json()
            .await
            .map_err(|e| RentRelayError::Send(format!("Invalid SMS API response: {e}")))?;

        // textId comes back as a number or a string depending on the
        // provider version; normalize to a string.
        let message_id = parsed.text_id.map(|v| match v {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });

        if parsed.success {
            tracing::debug!("SMS accepted for {phone} (id: {message_id:?})");
        } else {
            tracing::warn!(
                "SMS rejected for {phone}: {}",
                parsed.error.as_deref().unwrap_or("unknown error")
            );
        }

        Ok(SendReceipt {
            success: parsed.success,
            message_id,
            error: parsed.error,
            quota_remaining: parsed.quota_remaining,
        })
    }
}

/// No-network gateway — logs the message and reports success.
/// Used for dry runs and local development.
pub struct ConsoleGateway;

#[async_trait]
impl SmsGateway for ConsoleGateway {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(&self, phone: &str, body: &str, test_mode: bool) -> Result<SendReceipt> {
        tracing::info!("[console sms] to={phone} test={test_mode} body={body:?}");
        Ok(SendReceipt {
            success: true,
            message_id: None,
            error: None,
            quota_remaining: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_suffix() {
        let client = TextbeltClient::new("https://textbelt.com/text", "mykey");
        assert_eq!(client.key_for(true), "mykey_test");
        assert_eq!(client.key_for(false), "mykey");
    }

    #[tokio::test]
    async fn missing_key_is_a_send_error() {
        let client = TextbeltClient::new("https://textbelt.com/text", "");
        let err = client.send("5555551234", "hi", true).await.unwrap_err();
        assert!(matches!(err, RentRelayError::Send(_)));
    }

    #[tokio::test]
    async fn console_gateway_always_succeeds() {
        let receipt = ConsoleGateway.send("5555551234", "hi", false).await.unwrap();
        assert!(receipt.success);
        assert!(receipt.error.is_none());
    }
}
