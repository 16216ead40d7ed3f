pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use error::{CatalogError, CatalogResult};

// Export the catalog operations
pub use logic::{
    EndpointOperations, IterationManager, OpenApiSynthesizer, ParamOrganizer, ParamTreeBuilder,
    ServiceOperations, TreeReplicator,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{CatalogStore, CatalogTx, MemoryStore, PostgresStore};

/// Build the store from configuration, migrate it and serve the HTTP API
pub async fn run_server(config: &config::AppConfig) -> anyhow::Result<()> {
    use anyhow::Context;
    use axum::serve;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    let database_url = config.database_url()?;
    let postgres_store =
        PostgresStore::new(&database_url, config.database.max_connections).await?;

    log::info!("Running database migrations...");
    postgres_store.migrate().await?;

    let store = Arc::new(postgres_store);

    if config.seed.enabled {
        log::info!("Loading seed data...");
        seed::load_seed_data(&*store).await?;
    }

    let app = routes::create_router().with_state(store);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    log::info!("Catalog server running on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}
