//! HTTP surface: route wiring, the trusted-identity extractor and the
//! raw-body webhook endpoint.

use std::sync::Arc;

use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::OrderError;
use crate::models::UserProfile;
use crate::service::{
    CreateIntentRequest, CreateOrderRequest, CreatedIntent, CreatedOrder, OrderService,
};
use crate::store::OrderWithLines;
use crate::webhook::{Reconciler, WebhookAck};

/// Set by the upstream auth layer; the core trusts it without
/// re-authenticating.
const USER_ID_HEADER: &str = "x-user-id";

const SIGNATURE_HEADER: &str = "x-razorpay-signature";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OrderService>,
    pub reconciler: Arc<Reconciler>,
}

/// Acting user resolved from the trusted identity header plus the stored
/// profile row.
pub struct AuthUser(pub UserProfile);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = OrderError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user_id: i64 = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or(OrderError::Unauthorized)?;

        let profile = state
            .service
            .user_profile(user_id)
            .await?
            .ok_or(OrderError::Unauthorized)?;
        Ok(AuthUser(profile))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/health",
            get(|| async {
                Json(serde_json::json!({"status": "healthy", "service": "storefront-orders"}))
            }),
        )
        .route("/api/v1/orders", post(create_order).get(list_orders))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/payments/intent", post(create_intent))
        .route("/api/v1/payments/webhook", post(handle_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn create_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreatedOrder>), OrderError> {
    let created = state.service.create_order(&user, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_orders(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<OrderWithLines>>, OrderError> {
    Ok(Json(state.service.my_orders(&user).await?))
}

async fn get_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderWithLines>, OrderError> {
    Ok(Json(state.service.my_order(&user, id).await?))
}

async fn cancel_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderWithLines>, OrderError> {
    Ok(Json(state.service.cancel_order(&user, id).await?))
}

async fn create_intent(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<CreateIntentRequest>,
) -> Result<(StatusCode, Json<CreatedIntent>), OrderError> {
    let created = state.service.create_payment_intent(&user, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// The body arrives as raw bytes and is verified before any JSON decoding;
/// an extractor that parsed it first would break the signature.
async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, OrderError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let ack = state.reconciler.handle(&body, signature).await?;
    Ok(Json(ack))
}
