//! Webhook reconciler for asynchronous gateway notifications.
//!
//! Delivery is at-least-once and may be reordered; every transition here is
//! idempotent by target state, so no deduplication storage is needed. Once a
//! request's signature verifies, the gateway always receives an
//! acknowledgment. A failed signature is the one client-error rejection, so
//! a misconfigured secret shows up on the gateway side.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{OrderError, Result};
use crate::events::{self, EventPublisher};
use crate::signature;
use crate::store::{PaidOutcome, ReconciliationStore, RefLookup};

const PAID_EVENTS: &[&str] = &["payment.captured", "payment.authorized", "order.paid"];
const FAILED_EVENTS: &[&str] = &["payment.failed", "order.payment_failed"];

/// Acknowledgment body returned for every processed or ignored event.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookBody {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    payment: Option<EntityWrapper<PaymentEntity>>,
    #[serde(default)]
    order: Option<EntityWrapper<OrderEntity>>,
}

#[derive(Debug, Deserialize)]
struct EntityWrapper<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: Option<String>,
    order_id: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderEntity {
    id: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum EventClass {
    Paid,
    Failed,
    Other,
}

fn classify(event: Option<&str>, payment_status: Option<&str>) -> EventClass {
    let matches_kind = |set: &[&str]| event.is_some_and(|e| set.contains(&e));
    if matches_kind(PAID_EVENTS) || payment_status == Some("captured") {
        EventClass::Paid
    } else if matches_kind(FAILED_EVENTS) || payment_status == Some("failed") {
        EventClass::Failed
    } else {
        EventClass::Other
    }
}

pub struct Reconciler {
    store: Arc<dyn ReconciliationStore>,
    events: EventPublisher,
    webhook_secret: String,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ReconciliationStore>,
        events: EventPublisher,
        webhook_secret: String,
    ) -> Self {
        Self {
            store,
            events,
            webhook_secret,
        }
    }

    /// Authenticate the raw body, map the event to a local order and apply
    /// the idempotent transition. Returns `InvalidWebhookSignature` for a
    /// failed signature; every other outcome acknowledges.
    pub async fn handle(&self, raw_body: &[u8], signature_header: Option<&str>) -> Result<WebhookAck> {
        if !signature::verify_webhook(raw_body, signature_header, &self.webhook_secret) {
            tracing::warn!("webhook rejected: invalid signature");
            return Err(OrderError::InvalidWebhookSignature);
        }

        // Only parsed after the signature verified.
        let body: WebhookBody = serde_json::from_slice(raw_body).unwrap_or_default();
        let payment = body.payload.payment.as_ref().map(|w| &w.entity);
        let payment_ref = payment.and_then(|p| p.id.as_deref());
        let order_ref = payment
            .and_then(|p| p.order_id.as_deref())
            .or_else(|| body.payload.order.as_ref().and_then(|w| w.entity.id.as_deref()));
        let payment_status = payment.and_then(|p| p.status.as_deref());
        let event = body.event.as_deref();

        if payment_ref.is_none() && order_ref.is_none() {
            // Nothing to reconcile.
            return Ok(WebhookAck { received: true });
        }

        let order = match self.store.find_by_provider_refs(order_ref, payment_ref).await? {
            RefLookup::Found(order) => order,
            RefLookup::NotFound => {
                // The webhook may race ahead of order creation or refer to an
                // order outside this system's lifetime.
                tracing::warn!(?order_ref, ?payment_ref, ?event, "webhook for unknown order");
                return Ok(WebhookAck { received: true });
            }
            RefLookup::Conflict => {
                tracing::error!(
                    ?order_ref,
                    ?payment_ref,
                    "webhook references resolve to different orders; data integrity failure"
                );
                return Ok(WebhookAck { received: true });
            }
        };

        match classify(event, payment_status) {
            EventClass::Paid => {
                match self.store.apply_paid(order.id, payment_ref, order_ref).await {
                    Ok(PaidOutcome::Applied(order)) => {
                        self.events
                            .publish(events::ORDER_PAID, order.id, order.user_id)
                            .await;
                    }
                    Ok(PaidOutcome::AlreadySettled) => {
                        self.store
                            .backfill_refs(order.id, payment_ref, order_ref)
                            .await?;
                    }
                    Err(OrderError::InsufficientStock(product_id)) => {
                        // Retrying cannot conjure stock: acknowledge so the
                        // gateway stops redelivering, and escalate.
                        tracing::error!(
                            order_id = %order.id,
                            product_id,
                            "paid order cannot reserve stock; manual review required"
                        );
                    }
                    Err(err) => return Err(err),
                }
            }
            EventClass::Failed => {
                if let Some(cancelled) = self
                    .store
                    .apply_failed(order.id, payment_ref, order_ref)
                    .await?
                {
                    self.events
                        .publish(events::ORDER_CANCELLED, cancelled.id, cancelled.user_id)
                        .await;
                }
            }
            EventClass::Other => {
                self.store
                    .backfill_refs(order.id, payment_ref, order_ref)
                    .await?;
            }
        }

        Ok(WebhookAck { received: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use hmac::{Hmac, Mac};
    use rust_decimal::Decimal;
    use sha2::Sha256;
    use uuid::Uuid;

    use crate::models::{Order, OrderStatus};

    const SECRET: &str = "whsec_test123";

    fn sign(body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn pending_order() -> Order {
        Order {
            id: Uuid::new_v4(),
            user_id: 1,
            status: OrderStatus::Pending,
            total_amount: Decimal::from(350),
            payment_method: "razorpay".into(),
            provider_order_ref: Some("order_1".into()),
            provider_payment_ref: None,
            provider_signature: None,
            address_line1: None,
            address_line2: None,
            city: None,
            state: None,
            postal_code: None,
            country: None,
            phone: None,
            created_at: Utc::now(),
        }
    }

    struct StoreState {
        order: Order,
        stock: i32,
        line_quantity: i32,
        reservations: u32,
        conflict: bool,
    }

    /// In-memory double with one order and one product, mirroring the
    /// conditional-transition semantics of the real store.
    struct FakeStore(Mutex<StoreState>);

    impl FakeStore {
        fn with_stock(status: OrderStatus, stock: i32) -> Self {
            let mut order = pending_order();
            order.status = status;
            Self(Mutex::new(StoreState {
                order,
                stock,
                line_quantity: 2,
                reservations: 0,
                conflict: false,
            }))
        }

        fn conflicted() -> Self {
            let store = Self::with_stock(OrderStatus::Pending, 10);
            store.0.lock().unwrap().conflict = true;
            store
        }

        fn status(&self) -> OrderStatus {
            self.0.lock().unwrap().order.status
        }

        fn stock(&self) -> i32 {
            self.0.lock().unwrap().stock
        }

        fn reservations(&self) -> u32 {
            self.0.lock().unwrap().reservations
        }
    }

    #[async_trait]
    impl ReconciliationStore for FakeStore {
        async fn find_by_provider_refs(
            &self,
            provider_order_ref: Option<&str>,
            provider_payment_ref: Option<&str>,
        ) -> Result<RefLookup> {
            let state = self.0.lock().unwrap();
            if state.conflict {
                return Ok(RefLookup::Conflict);
            }
            let matches = provider_order_ref
                .is_some_and(|r| state.order.provider_order_ref.as_deref() == Some(r))
                || provider_payment_ref
                    .is_some_and(|r| state.order.provider_payment_ref.as_deref() == Some(r));
            if matches {
                Ok(RefLookup::Found(state.order.clone()))
            } else {
                Ok(RefLookup::NotFound)
            }
        }

        async fn apply_paid(
            &self,
            order_id: Uuid,
            provider_payment_ref: Option<&str>,
            provider_order_ref: Option<&str>,
        ) -> Result<PaidOutcome> {
            let mut state = self.0.lock().unwrap();
            assert_eq!(order_id, state.order.id);
            if state.order.status != OrderStatus::Pending {
                return Ok(PaidOutcome::AlreadySettled);
            }
            if state.stock < state.line_quantity {
                // The real store rolls the whole transaction back here.
                return Err(OrderError::InsufficientStock(1));
            }
            state.stock -= state.line_quantity;
            state.reservations += 1;
            state.order.status = OrderStatus::Paid;
            if state.order.provider_payment_ref.is_none() {
                state.order.provider_payment_ref = provider_payment_ref.map(str::to_string);
            }
            if state.order.provider_order_ref.is_none() {
                state.order.provider_order_ref = provider_order_ref.map(str::to_string);
            }
            Ok(PaidOutcome::Applied(state.order.clone()))
        }

        async fn apply_failed(
            &self,
            order_id: Uuid,
            _provider_payment_ref: Option<&str>,
            _provider_order_ref: Option<&str>,
        ) -> Result<Option<Order>> {
            let mut state = self.0.lock().unwrap();
            assert_eq!(order_id, state.order.id);
            if state.order.status != OrderStatus::Pending {
                return Ok(None);
            }
            state.order.status = OrderStatus::Cancelled;
            Ok(Some(state.order.clone()))
        }

        async fn backfill_refs(
            &self,
            order_id: Uuid,
            provider_payment_ref: Option<&str>,
            provider_order_ref: Option<&str>,
        ) -> Result<()> {
            let mut state = self.0.lock().unwrap();
            assert_eq!(order_id, state.order.id);
            if state.order.provider_payment_ref.is_none() {
                state.order.provider_payment_ref = provider_payment_ref.map(str::to_string);
            }
            if state.order.provider_order_ref.is_none() {
                state.order.provider_order_ref = provider_order_ref.map(str::to_string);
            }
            Ok(())
        }
    }

    fn reconciler(store: Arc<FakeStore>) -> Reconciler {
        Reconciler::new(store, EventPublisher::disabled(), SECRET.to_string())
    }

    fn paid_body() -> Vec<u8> {
        br#"{"event":"payment.captured","payload":{"payment":{"entity":{"id":"pay_1","order_id":"order_1","status":"captured"}}}}"#
            .to_vec()
    }

    fn failed_body() -> Vec<u8> {
        br#"{"event":"payment.failed","payload":{"payment":{"entity":{"id":"pay_1","order_id":"order_1","status":"failed"}}}}"#
            .to_vec()
    }

    async fn deliver(reconciler: &Reconciler, body: &[u8]) -> Result<WebhookAck> {
        let sig = sign(body);
        reconciler.handle(body, Some(&sig)).await
    }

    #[tokio::test]
    async fn test_redelivered_paid_event_reserves_once() {
        let store = Arc::new(FakeStore::with_stock(OrderStatus::Pending, 10));
        let reconciler = reconciler(store.clone());

        let body = paid_body();
        deliver(&reconciler, &body).await.unwrap();
        deliver(&reconciler, &body).await.unwrap();

        assert_eq!(store.status(), OrderStatus::Paid);
        assert_eq!(store.reservations(), 1);
        assert_eq!(store.stock(), 8);
    }

    #[tokio::test]
    async fn test_failed_after_paid_stays_paid() {
        let store = Arc::new(FakeStore::with_stock(OrderStatus::Pending, 10));
        let reconciler = reconciler(store.clone());

        deliver(&reconciler, &paid_body()).await.unwrap();
        deliver(&reconciler, &failed_body()).await.unwrap();

        assert_eq!(store.status(), OrderStatus::Paid);
        assert_eq!(store.stock(), 8);
    }

    #[tokio::test]
    async fn test_paid_after_failed_stays_cancelled_without_reservation() {
        let store = Arc::new(FakeStore::with_stock(OrderStatus::Pending, 10));
        let reconciler = reconciler(store.clone());

        deliver(&reconciler, &failed_body()).await.unwrap();
        deliver(&reconciler, &paid_body()).await.unwrap();

        assert_eq!(store.status(), OrderStatus::Cancelled);
        assert_eq!(store.reservations(), 0);
        assert_eq!(store.stock(), 10);
    }

    #[tokio::test]
    async fn test_insufficient_stock_acks_and_leaves_order_untouched() {
        let store = Arc::new(FakeStore::with_stock(OrderStatus::Pending, 1));
        let reconciler = reconciler(store.clone());

        let ack = deliver(&reconciler, &paid_body()).await.unwrap();

        assert!(ack.received);
        assert_eq!(store.status(), OrderStatus::Pending);
        assert_eq!(store.stock(), 1);
        assert_eq!(store.reservations(), 0);
    }

    #[tokio::test]
    async fn test_invalid_signature_rejected_without_processing() {
        let store = Arc::new(FakeStore::with_stock(OrderStatus::Pending, 10));
        let reconciler = reconciler(store.clone());

        let result = reconciler.handle(&paid_body(), Some("deadbeef")).await;

        assert!(matches!(result, Err(OrderError::InvalidWebhookSignature)));
        assert_eq!(store.status(), OrderStatus::Pending);
        assert_eq!(store.reservations(), 0);
    }

    #[tokio::test]
    async fn test_unknown_order_acknowledged() {
        let store = Arc::new(FakeStore::with_stock(OrderStatus::Pending, 10));
        let reconciler = reconciler(store.clone());

        let body = br#"{"event":"payment.captured","payload":{"payment":{"entity":{"id":"pay_x","order_id":"order_x","status":"captured"}}}}"#;
        let ack = deliver(&reconciler, body).await.unwrap();

        assert!(ack.received);
        assert_eq!(store.status(), OrderStatus::Pending);
        assert_eq!(store.reservations(), 0);
    }

    #[tokio::test]
    async fn test_reference_conflict_acknowledged_without_mutation() {
        let store = Arc::new(FakeStore::conflicted());
        let reconciler = reconciler(store.clone());

        let ack = deliver(&reconciler, &paid_body()).await.unwrap();

        assert!(ack.received);
        assert_eq!(store.status(), OrderStatus::Pending);
        assert_eq!(store.reservations(), 0);
    }

    #[tokio::test]
    async fn test_shipped_order_only_backfills_refs() {
        let store = Arc::new(FakeStore::with_stock(OrderStatus::Shipped, 10));
        let reconciler = reconciler(store.clone());

        deliver(&reconciler, &paid_body()).await.unwrap();
        deliver(&reconciler, &failed_body()).await.unwrap();

        assert_eq!(store.status(), OrderStatus::Shipped);
        assert_eq!(store.reservations(), 0);
        let state = store.0.lock().unwrap();
        assert_eq!(state.order.provider_payment_ref.as_deref(), Some("pay_1"));
    }

    #[test]
    fn test_classify_paid_events() {
        assert_eq!(classify(Some("payment.captured"), None), EventClass::Paid);
        assert_eq!(classify(Some("payment.authorized"), None), EventClass::Paid);
        assert_eq!(classify(Some("order.paid"), None), EventClass::Paid);
        assert_eq!(classify(Some("something.else"), Some("captured")), EventClass::Paid);
    }

    #[test]
    fn test_classify_failed_events() {
        assert_eq!(classify(Some("payment.failed"), None), EventClass::Failed);
        assert_eq!(classify(Some("order.payment_failed"), None), EventClass::Failed);
        assert_eq!(classify(None, Some("failed")), EventClass::Failed);
    }

    #[test]
    fn test_classify_paid_wins_over_failed_status() {
        // A captured-status report on an odd event kind is still paid.
        assert_eq!(classify(Some("payment.failed"), Some("captured")), EventClass::Paid);
    }

    #[test]
    fn test_classify_other() {
        assert_eq!(classify(Some("refund.created"), None), EventClass::Other);
        assert_eq!(classify(None, None), EventClass::Other);
        assert_eq!(classify(None, Some("created")), EventClass::Other);
    }

    #[test]
    fn test_body_extraction() {
        let raw = br#"{
            "event": "payment.captured",
            "payload": {
                "payment": { "entity": { "id": "pay_1", "order_id": "order_1", "status": "captured" } }
            }
        }"#;
        let body: WebhookBody = serde_json::from_slice(raw).unwrap();
        let payment = body.payload.payment.as_ref().map(|w| &w.entity).unwrap();
        assert_eq!(payment.id.as_deref(), Some("pay_1"));
        assert_eq!(payment.order_id.as_deref(), Some("order_1"));
        assert_eq!(body.event.as_deref(), Some("payment.captured"));
    }

    #[test]
    fn test_body_order_entity_fallback() {
        let raw = br#"{
            "event": "order.paid",
            "payload": { "order": { "entity": { "id": "order_9" } } }
        }"#;
        let body: WebhookBody = serde_json::from_slice(raw).unwrap();
        assert!(body.payload.payment.is_none());
        let order_ref = body
            .payload
            .order
            .as_ref()
            .and_then(|w| w.entity.id.as_deref());
        assert_eq!(order_ref, Some("order_9"));
    }

    #[test]
    fn test_malformed_body_defaults_to_empty() {
        let body: WebhookBody = serde_json::from_slice(b"not json").unwrap_or_default();
        assert!(body.event.is_none());
        assert!(body.payload.payment.is_none());
        assert!(body.payload.order.is_none());
    }
}
