//! Consume probe results from Kafka and store them in PostgreSQL.
use envconfig::Envconfig;
use eyre::WrapErr;
use health::HealthRegistry;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{error, info};

use monitor_common::metrics::{serve, setup_status_router};
use monitor_common::setup_tracing;
use monitor_ingest::config::Config;
use monitor_ingest::consumer::IngestionLoop;

async fn shutdown(mut term: Signal, mut interrupt: Signal) {
    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("shutting down gracefully...");
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    setup_tracing();

    let config = Config::init_from_env().wrap_err("invalid configuration")?;

    let term = signal(SignalKind::terminate()).wrap_err("failed to register SIGTERM handler")?;
    let interrupt =
        signal(SignalKind::interrupt()).wrap_err("failed to register SIGINT handler")?;

    let liveness = HealthRegistry::new("liveness");
    let kafka_liveness = liveness.register("rdkafka", time::Duration::seconds(30));
    let loop_liveness = liveness.register("ingestion_loop", time::Duration::seconds(30));

    let router = setup_status_router(liveness)?;
    let bind = config.bind();
    tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("failed to serve status endpoints on {}: {}", bind, e);
        }
    });

    let ingestion = IngestionLoop::connect(&config, kafka_liveness)
        .await?
        .with_liveness(loop_liveness);
    let ingested = ingestion.run(shutdown(term, interrupt)).await?;

    info!("stored {} results", ingested);

    Ok(())
}
