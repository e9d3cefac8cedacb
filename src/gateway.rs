//! Payment gateway adapter.
//!
//! The gateway is an external collaborator; this module only creates remote
//! payment intents. The adapter is an injected trait object owned by the
//! service layer so tests can substitute a double.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{OrderError, Result};

/// Gateway-enforced minimum intent amount in minor units (10 major units).
pub const MIN_INTENT_AMOUNT_MINOR: i64 = 1000;

const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment intent for `amount_minor` and return the provider's
    /// order reference. `receipt` is the caller-supplied idempotency key,
    /// forwarded to the provider verbatim.
    async fn create_intent(&self, amount_minor: i64, currency: &str, receipt: &str)
        -> Result<String>;
}

/// Convert a major-unit total to the gateway's minor units: floor of
/// total x 100, floored again at the gateway minimum.
pub fn to_minor_units(total: Decimal) -> i64 {
    let minor = (total * Decimal::from(100)).floor().to_i64().unwrap_or(0);
    minor.max(MIN_INTENT_AMOUNT_MINOR)
}

pub struct RazorpayGateway {
    http: reqwest::Client,
    key_id: String,
    key_secret: String,
    base_url: String,
}

#[derive(Serialize)]
struct CreateIntentBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Deserialize)]
struct CreateIntentResponse {
    id: String,
}

impl RazorpayGateway {
    /// Fails if the HTTP client cannot be built; a client without the
    /// request timeout would leave gateway calls unbounded.
    pub fn new(
        key_id: String,
        key_secret: String,
        base_url: String,
    ) -> std::result::Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(GATEWAY_TIMEOUT).build()?;
        Ok(Self {
            http,
            key_id,
            key_secret,
            base_url,
        })
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&CreateIntentBody {
                amount: amount_minor,
                currency,
                receipt,
            })
            .send()
            .await
            .map_err(|err| {
                tracing::warn!(error = %err, "payment gateway request failed");
                OrderError::GatewayUnavailable
            })?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "payment gateway rejected intent");
            return Err(OrderError::GatewayUnavailable);
        }

        let body: CreateIntentResponse = response.json().await.map_err(|err| {
            tracing::warn!(error = %err, "payment gateway returned malformed intent");
            OrderError::GatewayUnavailable
        })?;
        Ok(body.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minor_units_floor() {
        assert_eq!(to_minor_units(Decimal::new(1234, 2)), 1234); // 12.34
        assert_eq!(to_minor_units(Decimal::new(105555, 4)), 1055); // 10.5555
    }

    #[test]
    fn test_gateway_constructs_with_timeout() {
        let gateway = RazorpayGateway::new(
            "key".into(),
            "secret".into(),
            "https://gateway.test/v1".into(),
        );
        assert!(gateway.is_ok());
    }

    #[test]
    fn test_minor_units_minimum() {
        assert_eq!(to_minor_units(Decimal::from(5)), MIN_INTENT_AMOUNT_MINOR);
        assert_eq!(to_minor_units(Decimal::ZERO), MIN_INTENT_AMOUNT_MINOR);
        assert_eq!(to_minor_units(Decimal::from(10)), MIN_INTENT_AMOUNT_MINOR);
        assert_eq!(to_minor_units(Decimal::new(1001, 2)), 1001); // 10.01
    }
}
