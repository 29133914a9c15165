use std::sync::Arc;

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use lighthouse::{
    api::{self, ApiState},
    connect_source, BlocklistClient, ElasticClient, FileCheckpointStore, IndexWriter, Settings,
    StatusHandle, SyncWorker,
};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .context("Failed to initialize logger")?;

    // Load configuration
    let settings = Arc::new(
        Settings::new()
            .context("Failed to load config.yaml. Please ensure it exists and is valid")?,
    );

    let cancellation_token = CancellationToken::new();

    let source = connect_source(&settings.source)
        .await
        .context("Failed to initialize claim source")?;

    let elastic = ElasticClient::new(&settings.elastic)?;
    if let Err(e) = elastic.health_check().await {
        // Writes are best effort; the sync loop still runs and counts failures
        warn!("Elasticsearch is not reachable yet: {:#}", e);
    }

    let (writer, ingestor) = IndexWriter::new(Arc::new(elastic), &settings.writer);
    let ingestor_handle = tokio::spawn(async move {
        if let Err(e) = ingestor.run().await {
            error!("Bulk ingestor failed: {:#}", e);
        }
    });

    let status = StatusHandle::new();

    let worker = Arc::new(SyncWorker::new(
        source,
        Arc::new(BlocklistClient::new(&settings.blocklist)?),
        Arc::new(FileCheckpointStore::new(&settings.sync.state_file)),
        writer.clone(),
        status.clone(),
        &settings.sync,
    ));

    let worker_token = cancellation_token.child_token();
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker.run(worker_token).await {
            error!("Sync worker failed: {:#}", e);
        }
    });

    let api_handle = api::start_server(
        ApiState {
            status,
            writer: writer.clone(),
        },
        &settings.api,
        cancellation_token.child_token(),
    )
    .await?;

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Claim sync running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    cancellation_token.cancel();

    // A pass in progress finishes before the worker stops
    info!("Waiting for sync worker to stop...");
    let _ = worker_handle.await;

    info!("Shutting down bulk ingestor...");
    writer.shutdown().await;
    let _ = ingestor_handle.await;

    let _ = api_handle.await;

    let stats = writer.stats();
    info!(
        "Stopped: {} operations delivered, {} failed, {} retried",
        stats.delivered, stats.failed, stats.retried
    );
    Ok(())
}
