use std::sync::Arc;

use event_bus::{EventBus, InMemoryBus, NatsBus};
use payments_charge_gateway::config::{BusType, Config};
use payments_charge_gateway::dispatcher::Dispatcher;
use payments_charge_gateway::metrics::Metrics;
use payments_charge_gateway::routes::router;
use payments_charge_gateway::state::AppState;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./db/migrations").run(&pool).await?;

    let bus: Arc<dyn EventBus> = match config.bus_type {
        BusType::Inmemory => Arc::new(InMemoryBus::new()),
        BusType::Nats => {
            let client = async_nats::connect(&config.bus_url).await?;
            Arc::new(NatsBus::new(client))
        }
    };

    let metrics = Arc::new(Metrics::new());

    let dispatcher = Dispatcher::new(pool.clone(), bus, config.clone(), metrics.clone());
    tokio::spawn(async move {
        dispatcher.run().await;
    });

    let state = AppState::new(pool, config.clone(), metrics);
    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(addr, "payments charge gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
