//! The ingestion loop: messages in, result rows out.
use std::future::Future;
use std::time::Duration;

use health::HealthHandle;
use monitor_common::probe_result::{self, ProbeResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{Config, MalformedPolicy};
use crate::error::{IngestError, StoreError};
use crate::resolver::DedupResolver;
use crate::schema;
use crate::source::{InboundMessage, KafkaSource, MessageSource};
use crate::store::ResultRecord;

pub const MESSAGES_RECEIVED: &str = "ingest_messages_total";
pub const BATCH_COMMIT_TIME: &str = "ingest_batch_commit_seconds";
pub const BATCH_SIZE: &str = "ingest_batch_size";

// Must stay well below the liveness deadline the loop is registered with
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Disconnected,
    Bootstrapping,
    Polling,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    /// Messages per transaction, at least one.
    pub batch_size: usize,
    /// How long a partial batch waits for each further message.
    pub linger: Duration,
    pub on_malformed: MalformedPolicy,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            batch_size: 1,
            linger: Duration::from_millis(100),
            on_malformed: MalformedPolicy::Fail,
        }
    }
}

impl From<&Config> for LoopSettings {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            linger: config.batch_linger_ms.0,
            on_malformed: config.on_malformed,
        }
    }
}

pub struct IngestionLoop<S> {
    state: LoopState,
    pool: PgPool,
    source: S,
    resolver: DedupResolver,
    settings: LoopSettings,
    liveness: Option<HealthHandle>,
}

impl IngestionLoop<KafkaSource> {
    /// Connect to PostgreSQL and join the consumer group. Both must be
    /// reachable, there is no retry.
    pub async fn connect(config: &Config, kafka_liveness: HealthHandle) -> Result<Self, IngestError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_pg_connections)
            .connect(&config.database_url)
            .await
            .map_err(IngestError::Connect)?;
        info!("connected to PostgreSQL");

        let source = KafkaSource::new(
            &config.kafka,
            &config.kafka_consumer_group,
            &config.kafka_consumer_offset_reset,
            kafka_liveness,
        )
        .map_err(IngestError::Subscribe)?;

        Ok(Self::new(pool, source, LoopSettings::from(config)))
    }
}

impl<S: MessageSource> IngestionLoop<S> {
    pub fn new(pool: PgPool, source: S, settings: LoopSettings) -> Self {
        Self {
            state: LoopState::Disconnected,
            resolver: DedupResolver::new(pool.clone()),
            pool,
            source,
            settings: LoopSettings {
                batch_size: settings.batch_size.max(1),
                ..settings
            },
            liveness: None,
        }
    }

    /// Report to `liveness` on every poll tick.
    pub fn with_liveness(mut self, liveness: HealthHandle) -> Self {
        self.liveness = Some(liveness);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Apply the schema, then ingest until `shutdown` resolves or the source
    /// runs dry. The batch being processed when `shutdown` fires is still
    /// committed, and the pool is closed once polling has stopped. Returns
    /// the number of result rows written.
    pub async fn run<F>(mut self, shutdown: F) -> Result<u64, IngestError>
    where
        F: Future<Output = ()>,
    {
        self.transition(LoopState::Bootstrapping);
        schema::bootstrap(&self.pool).await?;

        self.transition(LoopState::Polling);
        let polled = self.poll(shutdown).await;

        self.transition(LoopState::ShuttingDown);
        self.pool.close().await;
        info!("database pool closed");

        polled
    }

    async fn poll<F>(&mut self, shutdown: F) -> Result<u64, IngestError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        let mut ingested: u64 = 0;

        loop {
            let received = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping polling");
                    break;
                }
                _ = heartbeat.tick() => {
                    self.report_healthy();
                    continue;
                }
                received = self.source.recv() => received.map_err(IngestError::Recv)?,
            };

            let Some(first) = received else {
                info!("message source exhausted");
                break;
            };

            let (batch, exhausted) = self.fill_batch(first).await?;
            ingested += self.ingest_batch(batch).await?;
            self.report_healthy();

            if exhausted {
                info!("message source exhausted");
                break;
            }
        }

        Ok(ingested)
    }

    /// Collect up to `batch_size` messages, giving up on more once the
    /// source stays quiet for `linger`. Also says whether the source ended.
    async fn fill_batch(
        &mut self,
        first: InboundMessage,
    ) -> Result<(Vec<InboundMessage>, bool), IngestError> {
        let mut batch = Vec::with_capacity(self.settings.batch_size);
        batch.push(first);

        while batch.len() < self.settings.batch_size {
            match tokio::time::timeout(self.settings.linger, self.source.recv()).await {
                Ok(Ok(Some(message))) => batch.push(message),
                Ok(Ok(None)) => return Ok((batch, true)),
                Ok(Err(error)) => return Err(IngestError::Recv(error)),
                Err(_) => break,
            }
        }

        Ok((batch, false))
    }

    async fn ingest_batch(&mut self, batch: Vec<InboundMessage>) -> Result<u64, IngestError> {
        metrics::histogram!(BATCH_SIZE).record(batch.len() as f64);

        // Resolve before opening the transaction: registry rows commit on
        // their own and must not wait on a connection held by the batch
        let mut records = Vec::with_capacity(batch.len());
        for message in &batch {
            let result = match decode(message) {
                Ok(result) => result,
                Err(error) if self.settings.on_malformed == MalformedPolicy::Skip => {
                    warn!("skipping message: {}", error);
                    metrics::counter!(MESSAGES_RECEIVED, &[("outcome", "skipped")]).increment(1);
                    continue;
                }
                Err(error) => {
                    metrics::counter!(MESSAGES_RECEIVED, &[("outcome", "malformed")]).increment(1);
                    return Err(error);
                }
            };

            debug!(
                "ingesting {} [{}] offset {}: {} {} -> {:?}",
                message.topic,
                message.partition,
                message.offset,
                result.method,
                result.url,
                result.status_code
            );
            let url_id = self.resolver.resolve_url(&result.url).await?;
            let pattern_id = self
                .resolver
                .resolve_pattern(result.pattern.as_deref())
                .await?;
            records.push(ResultRecord::new(&result, url_id, pattern_id));
        }

        if !records.is_empty() {
            let started = Instant::now();
            let mut tx = self.pool.begin().await.map_err(StoreError::Begin)?;
            for record in &records {
                record.append(&mut tx).await?;
            }
            tx.commit().await.map_err(StoreError::Commit)?;
            metrics::histogram!(BATCH_COMMIT_TIME).record(started.elapsed().as_secs_f64());
        }

        for message in &batch {
            self.source.ack(message).map_err(IngestError::Offset)?;
        }

        let stored = records.len() as u64;
        metrics::counter!(MESSAGES_RECEIVED, &[("outcome", "stored")]).increment(stored);
        debug!("committed {} results", stored);

        Ok(stored)
    }

    fn transition(&mut self, next: LoopState) {
        info!("ingestion loop {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn report_healthy(&self) {
        if let Some(liveness) = &self.liveness {
            liveness.report_healthy();
        }
    }
}

fn decode(message: &InboundMessage) -> Result<ProbeResult, IngestError> {
    let Some(payload) = message.payload.as_deref() else {
        return Err(IngestError::Empty {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
        });
    };

    probe_result::decode(payload).map_err(|error| IngestError::Malformed {
        topic: message.topic.clone(),
        partition: message.partition,
        offset: message.offset,
        error,
    })
}
