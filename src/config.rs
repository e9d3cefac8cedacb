//! Environment-driven configuration.

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Public key id handed to the storefront client for checkout.
    pub gateway_key_id: String,
    /// Shared secret for client payment-proof signatures.
    pub gateway_key_secret: String,
    /// Shared secret for webhook body signatures (distinct from the key secret).
    pub webhook_secret: String,
    pub gateway_base_url: String,
    pub nats_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8083".to_string())
                .parse()
                .context("PORT is not a valid port number")?,
            gateway_key_id: std::env::var("GATEWAY_KEY_ID").context("GATEWAY_KEY_ID is not set")?,
            gateway_key_secret: std::env::var("GATEWAY_KEY_SECRET")
                .context("GATEWAY_KEY_SECRET is not set")?,
            webhook_secret: std::env::var("GATEWAY_WEBHOOK_SECRET")
                .context("GATEWAY_WEBHOOK_SECRET is not set")?,
            gateway_base_url: std::env::var("GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.razorpay.com/v1".to_string()),
            nats_url: std::env::var("NATS_URL").ok(),
        })
    }
}
