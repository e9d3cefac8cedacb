//! Persisted rows and the order status state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
    pub stock: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Order status. Legal transitions:
/// `PENDING -> PAID -> SHIPPED -> DELIVERED`, plus `PENDING -> CANCELLED`
/// and `PAID -> CANCELLED` (operator flows only, never webhook-driven).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid) | (Pending, Cancelled) | (Paid, Shipped) | (Paid, Cancelled) | (Shipped, Delivered)
        )
    }

    /// States the webhook reconciler never moves out of.
    pub fn is_reconciliation_terminal(self) -> bool {
        matches!(self, Self::Shipped | Self::Delivered | Self::Cancelled)
    }

    /// User-initiated cancellation is permitted from `PENDING` only.
    pub fn is_user_cancellable(self) -> bool {
        self == Self::Pending
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: i64,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub payment_method: String,
    pub provider_order_ref: Option<String>,
    pub provider_payment_ref: Option<String>,
    pub provider_signature: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderLine {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: i64,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Shipping address captured at order time, independent of later profile
/// edits. Request fields win over the stored profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddressSnapshot {
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
}

impl AddressSnapshot {
    pub fn build(request: &AddressSnapshot, profile: &UserProfile) -> Self {
        Self {
            address_line1: request.address_line1.clone().or_else(|| profile.address_line1.clone()),
            address_line2: request.address_line2.clone().or_else(|| profile.address_line2.clone()),
            city: request.city.clone().or_else(|| profile.city.clone()),
            state: request.state.clone().or_else(|| profile.state.clone()),
            postal_code: request.postal_code.clone().or_else(|| profile.postal_code.clone()),
            country: request.country.clone().or_else(|| profile.country.clone()),
            phone: request.phone.clone().or_else(|| profile.phone.clone()),
        }
    }
}
