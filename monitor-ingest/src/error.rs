use rdkafka::error::KafkaError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("{table} lookup failed: {error}")]
    Query {
        table: &'static str,
        error: sqlx::Error,
    },
    #[error("{table} row for {value:?} not visible after {attempts} attempts")]
    NotVisible {
        table: &'static str,
        value: String,
        attempts: u64,
    },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to apply schema: {0}")]
    Bootstrap(sqlx::Error),
    #[error("failed to begin transaction: {0}")]
    Begin(sqlx::Error),
    #[error("failed to append result: {0}")]
    Append(sqlx::Error),
    #[error("failed to commit transaction: {0}")]
    Commit(sqlx::Error),
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to connect to PostgreSQL: {0}")]
    Connect(sqlx::Error),
    #[error("failed to set up Kafka consumer: {0}")]
    Subscribe(KafkaError),
    #[error("failed to receive from Kafka: {0}")]
    Recv(KafkaError),
    #[error("failed to store offset: {0}")]
    Offset(KafkaError),
    #[error("malformed message at {topic} [{partition}] offset {offset}: {error}")]
    Malformed {
        topic: String,
        partition: i32,
        offset: i64,
        error: serde_json::Error,
    },
    #[error("empty message at {topic} [{partition}] offset {offset}")]
    Empty {
        topic: String,
        partition: i32,
        offset: i64,
    },
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
