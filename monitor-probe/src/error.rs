use rdkafka::error::KafkaError;
use thiserror::Error;

/// Errors building a probe target or client. Failures of the probe itself are
/// never errors, they are recorded in the `ProbeResult`.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("{0} is not a valid HTTP method")]
    InvalidMethod(String),
    #[error("{url} is not a valid URL: {error}")]
    InvalidUrl { url: String, error: url::ParseError },
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to create Kafka producer: {0}")]
    Connect(KafkaError),
    #[error("failed to serialize probe result: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to produce to {topic}: {error}")]
    Produce { topic: String, error: KafkaError },
    #[error("failed to produce to {topic} (timeout)")]
    Canceled { topic: String },
}
