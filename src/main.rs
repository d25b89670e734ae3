use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use servicebook::config::AppConfig;
use servicebook::db::{BookingStore, SqliteStore};
use servicebook::handlers;
use servicebook::services::booking::BookingManager;
use servicebook::services::catalog::Catalog;
use servicebook::services::clock::{Clock, SystemClock};
use servicebook::services::payment::{DecliningGateway, PaymentProvider, SimulatedGateway};
use servicebook::services::scheduler::LoggingScheduler;
use servicebook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let store: Arc<dyn BookingStore> = Arc::new(SqliteStore::open(&config.database_url)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let payments: Arc<dyn PaymentProvider> = match config.payment_gateway.as_str() {
        "decline" => {
            tracing::warn!("using declining payment gateway; every charge will fail");
            Arc::new(DecliningGateway)
        }
        other => {
            if other != "simulated" {
                tracing::warn!(gateway = other, "unknown payment gateway, falling back to simulated");
            }
            tracing::info!("using simulated payment gateway");
            Arc::new(SimulatedGateway)
        }
    };

    let state = Arc::new(AppState {
        catalog: Catalog::new(store.clone(), clock.clone(), config.services_page_size),
        bookings: BookingManager::new(
            store,
            payments,
            Arc::new(LoggingScheduler),
            clock,
            config.bookings_page_size,
        ),
    });

    let app = handlers::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
