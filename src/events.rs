//! Best-effort order lifecycle notifications over NATS.
//!
//! The publisher is optional; without a NATS_URL every publish is a no-op.
//! Publish failures are logged and never propagated into request handling.

use serde::Serialize;
use uuid::Uuid;

pub const ORDER_CREATED: &str = "orders.created";
pub const ORDER_PAID: &str = "orders.paid";
pub const ORDER_CANCELLED: &str = "orders.cancelled";

#[derive(Serialize)]
struct OrderEvent {
    order_id: Uuid,
    user_id: i64,
}

#[derive(Clone)]
pub struct EventPublisher {
    client: Option<async_nats::Client>,
}

impl EventPublisher {
    pub fn new(client: Option<async_nats::Client>) -> Self {
        Self { client }
    }

    pub fn disabled() -> Self {
        Self { client: None }
    }

    pub async fn publish(&self, subject: &'static str, order_id: Uuid, user_id: i64) {
        let Some(client) = &self.client else { return };
        let payload = match serde_json::to_vec(&OrderEvent { order_id, user_id }) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, subject, "failed to encode order event");
                return;
            }
        };
        if let Err(err) = client.publish(subject.to_string(), payload.into()).await {
            tracing::warn!(error = %err, subject, %order_id, "failed to publish order event");
        }
    }
}
