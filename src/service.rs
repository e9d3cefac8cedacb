//! Order service: orchestrates pricing, inventory, persistence and the
//! payment gateway for the two creation flows.
//!
//! Reservation policy is reserve-at-payment-confirmation, uniformly: stock
//! is decremented in exactly the transaction that makes an order `PAID`.
//! A client-confirmed order with a verified proof is created `PAID` (and so
//! reserves at creation); everything else is created `PENDING` with no stock
//! held, and the webhook reconciler performs the deferred reservation.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::error::{OrderError, Result};
use crate::events::{self, EventPublisher};
use crate::gateway::{self, PaymentGateway};
use crate::inventory;
use crate::models::{AddressSnapshot, OrderStatus, Product, UserProfile};
use crate::pricing;
use crate::signature;
use crate::store::{NewOrder, NewOrderLine, OrderStore, OrderWithLines};

/// Payment method whose proofs are HMAC-signed by the checkout client.
pub const SIGNED_PAYMENT_METHOD: &str = "razorpay";

const DEFAULT_CURRENCY: &str = "INR";

/// Quantities below 1 are coerced to 1 at pricing time rather than
/// rejected, matching the checkout client's contract.
#[derive(Debug, Serialize, Deserialize)]
pub struct ItemRequest {
    pub product_id: i64,
    pub quantity: i32,
}

/// Flow A: client-confirmed order creation, optionally carrying a signed
/// payment proof.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "no items provided"))]
    pub items: Vec<ItemRequest>,
    pub payment_method: Option<String>,
    pub provider_payment_ref: Option<String>,
    pub provider_order_ref: Option<String>,
    pub provider_signature: Option<String>,
    #[serde(flatten)]
    pub address: AddressSnapshot,
}

/// Flow B: intent-first creation; no proof yet, payment confirms via webhook.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateIntentRequest {
    #[validate(length(min = 1, message = "no items provided"))]
    pub items: Vec<ItemRequest>,
    pub currency: Option<String>,
    pub receipt: Option<String>,
    #[serde(flatten)]
    pub address: AddressSnapshot,
}

#[derive(Debug, Serialize)]
pub struct CreatedOrder {
    #[serde(flatten)]
    pub order: OrderWithLines,
    pub shipping_fee: Decimal,
}

#[derive(Debug, Serialize)]
pub struct CreatedIntent {
    pub provider_order_ref: String,
    pub key_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub shipping_fee: Decimal,
    #[serde(flatten)]
    pub order: OrderWithLines,
}

struct PricedItems {
    lines: Vec<NewOrderLine>,
    subtotal: Decimal,
}

pub struct OrderService {
    pool: PgPool,
    store: OrderStore,
    gateway: Arc<dyn PaymentGateway>,
    events: EventPublisher,
    gateway_key_id: String,
    proof_secret: String,
}

impl OrderService {
    pub fn new(
        pool: PgPool,
        gateway: Arc<dyn PaymentGateway>,
        events: EventPublisher,
        gateway_key_id: String,
        proof_secret: String,
    ) -> Self {
        Self {
            store: OrderStore::new(pool.clone()),
            pool,
            gateway,
            events,
            gateway_key_id,
            proof_secret,
        }
    }

    pub fn store(&self) -> &OrderStore {
        &self.store
    }

    /// Flow A. A verified proof yields a `PAID` order with stock reserved in
    /// the creation transaction; absent proof fields yield `PENDING` without
    /// reservation. Supplied-but-unverifiable proof is a hard error.
    pub async fn create_order(
        &self,
        user: &UserProfile,
        request: CreateOrderRequest,
    ) -> Result<CreatedOrder> {
        request
            .validate()
            .map_err(|err| OrderError::Validation(err.to_string()))?;

        let priced = self.price_items(&request.items).await?;
        let shipping_fee = pricing::shipping_fee(priced.subtotal);
        let total = pricing::order_total(priced.subtotal);

        let address = AddressSnapshot::build(&request.address, user);
        self.persist_address(user.id, &address).await;

        let payment_method = request
            .payment_method
            .as_deref()
            .unwrap_or(SIGNED_PAYMENT_METHOD)
            .to_string();

        let proof_supplied = request.provider_payment_ref.is_some()
            || request.provider_order_ref.is_some()
            || request.provider_signature.is_some();

        let verified = signature::verify_payment_proof(
            request.provider_order_ref.as_deref(),
            request.provider_payment_ref.as_deref(),
            request.provider_signature.as_deref(),
            &self.proof_secret,
        );

        if payment_method == SIGNED_PAYMENT_METHOD && proof_supplied && !verified {
            return Err(OrderError::PaymentVerificationFailed);
        }

        let paid = payment_method == SIGNED_PAYMENT_METHOD && verified;
        let status = if paid {
            OrderStatus::Paid
        } else {
            OrderStatus::Pending
        };

        let created = self
            .store
            .create_with_lines(
                NewOrder {
                    user_id: user.id,
                    status,
                    total_amount: total,
                    payment_method,
                    provider_order_ref: request.provider_order_ref,
                    provider_payment_ref: request.provider_payment_ref,
                    provider_signature: request.provider_signature,
                    address,
                },
                priced.lines,
                paid,
            )
            .await?;

        self.events
            .publish(events::ORDER_CREATED, created.order.id, user.id)
            .await;
        if paid {
            self.events
                .publish(events::ORDER_PAID, created.order.id, user.id)
                .await;
        }

        Ok(CreatedOrder {
            order: created,
            shipping_fee,
        })
    }

    /// Flow B. Availability is checked read-only, the gateway intent is
    /// created before anything is persisted (a gateway failure leaves no
    /// partial order), and the order lands `PENDING` with no stock held.
    pub async fn create_payment_intent(
        &self,
        user: &UserProfile,
        request: CreateIntentRequest,
    ) -> Result<CreatedIntent> {
        request
            .validate()
            .map_err(|err| OrderError::Validation(err.to_string()))?;

        let priced = self.price_items(&request.items).await?;
        for line in &priced.lines {
            inventory::check_available(&self.pool, line.product_id, line.quantity).await?;
        }

        let shipping_fee = pricing::shipping_fee(priced.subtotal);
        let total = pricing::order_total(priced.subtotal);

        let address = AddressSnapshot::build(&request.address, user);
        self.persist_address(user.id, &address).await;

        let currency = request
            .currency
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        let receipt = request
            .receipt
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let amount_minor = gateway::to_minor_units(total);

        let provider_order_ref = self
            .gateway
            .create_intent(amount_minor, &currency, &receipt)
            .await?;

        let created = self
            .store
            .create_with_lines(
                NewOrder {
                    user_id: user.id,
                    status: OrderStatus::Pending,
                    total_amount: total,
                    payment_method: SIGNED_PAYMENT_METHOD.to_string(),
                    provider_order_ref: Some(provider_order_ref.clone()),
                    provider_payment_ref: None,
                    provider_signature: None,
                    address,
                },
                priced.lines,
                false,
            )
            .await?;

        self.events
            .publish(events::ORDER_CREATED, created.order.id, user.id)
            .await;

        Ok(CreatedIntent {
            provider_order_ref,
            key_id: self.gateway_key_id.clone(),
            amount_minor,
            currency,
            shipping_fee,
            order: created,
        })
    }

    pub async fn my_orders(&self, user: &UserProfile) -> Result<Vec<OrderWithLines>> {
        self.store.find_user_orders(user.id).await
    }

    pub async fn my_order(&self, user: &UserProfile, order_id: Uuid) -> Result<OrderWithLines> {
        self.store.find_user_order(user.id, order_id).await
    }

    pub async fn cancel_order(&self, user: &UserProfile, order_id: Uuid) -> Result<OrderWithLines> {
        let order = self.store.cancel_pending(user.id, order_id).await?;
        self.events
            .publish(events::ORDER_CANCELLED, order.id, user.id)
            .await;
        let lines = self.store.lines_for(order.id).await?;
        Ok(OrderWithLines { order, lines })
    }

    pub async fn user_profile(&self, user_id: i64) -> Result<Option<UserProfile>> {
        Ok(
            sqlx::query_as::<_, UserProfile>("SELECT * FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Load active products for the requested ids, silently dropping items
    /// whose product is missing or inactive, and snapshot unit prices.
    async fn price_items(&self, items: &[ItemRequest]) -> Result<PricedItems> {
        let ids: Vec<i64> = items.iter().map(|i| i.product_id).collect();
        let products = sqlx::query_as::<_, Product>(
            "SELECT * FROM products WHERE id = ANY($1) AND active",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        let by_id: HashMap<i64, &Product> = products.iter().map(|p| (p.id, p)).collect();

        let mut lines = Vec::new();
        let mut subtotal = Decimal::ZERO;
        for item in items {
            let Some(product) = by_id.get(&item.product_id) else {
                continue;
            };
            let quantity = item.quantity.max(1);
            subtotal += product.price * Decimal::from(quantity);
            lines.push(NewOrderLine {
                product_id: product.id,
                quantity,
                unit_price: product.price,
            });
        }

        if lines.is_empty() {
            return Err(OrderError::NoValidItems);
        }
        Ok(PricedItems { lines, subtotal })
    }

    /// Best-effort write-back of the snapshot onto the profile; failures are
    /// logged, never propagated.
    async fn persist_address(&self, user_id: i64, address: &AddressSnapshot) {
        let result = sqlx::query(
            "UPDATE users SET address_line1 = $2, address_line2 = $3, city = $4,
                 state = $5, postal_code = $6, country = $7, phone = $8
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(&address.address_line1)
        .bind(&address.address_line2)
        .bind(&address.city)
        .bind(&address.state)
        .bind(&address.postal_code)
        .bind(&address.country)
        .bind(&address.phone)
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            tracing::warn!(error = %err, user_id, "failed to persist address snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product_id: i64, quantity: i32) -> ItemRequest {
        ItemRequest {
            product_id,
            quantity,
        }
    }

    #[test]
    fn test_create_order_request_rejects_empty_items() {
        let request = CreateOrderRequest {
            items: vec![],
            payment_method: None,
            provider_payment_ref: None,
            provider_order_ref: None,
            provider_signature: None,
            address: AddressSnapshot::default(),
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_create_order_request_accepts_items() {
        let request = CreateOrderRequest {
            items: vec![item(1, 2)],
            payment_method: None,
            provider_payment_ref: None,
            provider_order_ref: None,
            provider_signature: None,
            address: AddressSnapshot::default(),
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_create_intent_request_rejects_empty_items() {
        let request = CreateIntentRequest {
            items: vec![],
            currency: None,
            receipt: None,
            address: AddressSnapshot::default(),
        };
        assert!(request.validate().is_err());
    }
}
