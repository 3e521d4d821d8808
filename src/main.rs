use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use region_indexer::{
    Config,
    handlers::{AppState, create_router},
    indexer::RegionIndexer,
    metadata::HttpMetadata,
    notify::Notifier,
    reader::RemoteReader,
    state::CycleStateStore,
    storage::{DocumentStore, ElasticStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store: Arc<dyn DocumentStore> = Arc::new(ElasticStore::new(
        &config.store_url,
        config.request_timeout(),
        config.bulk_chunk_size,
    )?);

    // Indexer state lives next to the primary indexer's, which may be another cluster
    let state_store: Arc<dyn DocumentStore> = match &config.state_url {
        Some(url) => Arc::new(ElasticStore::new(
            url,
            config.request_timeout(),
            config.bulk_chunk_size,
        )?),
        None => store.clone(),
    };

    std::fs::create_dir_all(&config.scratch_dir)?;
    let reader = RemoteReader::new(
        config.effective_file_host(),
        config.max_in_memory,
        config.scratch_dir.clone(),
        config.connect_timeout(),
    )?;

    let metadata = Arc::new(HttpMetadata::new(&config.metadata_url, config.request_timeout())?);

    let indexer = RegionIndexer::new(
        metadata,
        store,
        reader,
        CycleStateStore::new(state_store, config.state_settings()),
        Notifier::new(config.request_timeout())?,
        config.policy(),
        config.indexer_settings(),
    );

    let app = create_router(AppState {
        indexer: Arc::new(indexer),
    });

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting region indexer on {}", addr);
    tracing::info!("Metadata repository: {}", config.metadata_url);
    tracing::info!("Region store: {}", config.store_url);
    if config.testing {
        tracing::warn!("Test deployment: only allow-listed files will be indexed");
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
