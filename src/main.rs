//! Storefront Orders - order, payment and inventory reconciliation service

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_orders::config::Config;
use storefront_orders::events::EventPublisher;
use storefront_orders::gateway::RazorpayGateway;
use storefront_orders::routes::{self, AppState};
use storefront_orders::service::OrderService;
use storefront_orders::webhook::Reconciler;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url).await {
            Ok(client) => Some(client),
            Err(err) => {
                tracing::warn!(error = %err, "NATS unavailable, order events disabled");
                None
            }
        },
        None => None,
    };
    let events = EventPublisher::new(nats);

    let gateway = Arc::new(RazorpayGateway::new(
        config.gateway_key_id.clone(),
        config.gateway_key_secret.clone(),
        config.gateway_base_url.clone(),
    )?);

    let service = Arc::new(OrderService::new(
        db,
        gateway,
        events.clone(),
        config.gateway_key_id.clone(),
        config.gateway_key_secret.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(service.store().clone()),
        events,
        config.webhook_secret.clone(),
    ));

    let app = routes::router(AppState {
        service,
        reconciler,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("storefront-orders listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app).await?;
    Ok(())
}
