use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;
use health::HealthHandle;
use rdkafka::client::Client;
use rdkafka::consumer::ConsumerContext;
use rdkafka::error::KafkaError;
use rdkafka::{ClientConfig, ClientContext};
use tracing::{error, info};

use crate::env::{EnvMsDuration, ParseEnvError, TopicList};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityProtocol {
    Plaintext,
    SaslPlaintext,
    SaslSsl,
    Ssl,
}

impl SecurityProtocol {
    /// Value of librdkafka's `security.protocol`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "plaintext",
            SecurityProtocol::SaslPlaintext => "sasl_plaintext",
            SecurityProtocol::SaslSsl => "sasl_ssl",
            SecurityProtocol::Ssl => "ssl",
        }
    }

    pub fn uses_ssl(&self) -> bool {
        matches!(self, SecurityProtocol::Ssl | SecurityProtocol::SaslSsl)
    }

    pub fn uses_sasl(&self) -> bool {
        matches!(
            self,
            SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl
        )
    }
}

impl FromStr for SecurityProtocol {
    type Err = ParseEnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "plaintext" => Ok(SecurityProtocol::Plaintext),
            "sasl_plaintext" => Ok(SecurityProtocol::SaslPlaintext),
            "sasl_ssl" => Ok(SecurityProtocol::SaslSsl),
            "ssl" => Ok(SecurityProtocol::Ssl),
            _ => Err(ParseEnvError::Variant(
                s.to_owned(),
                "plaintext, sasl_plaintext, sasl_ssl, ssl",
            )),
        }
    }
}

impl fmt::Display for SecurityProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslMechanism {
    Plain,
    Gssapi,
    ScramSha256,
    ScramSha512,
    OAuthBearer,
}

impl SaslMechanism {
    /// Value of librdkafka's `sasl.mechanisms`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::Gssapi => "GSSAPI",
            SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
            SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
            SaslMechanism::OAuthBearer => "OAUTHBEARER",
        }
    }
}

impl FromStr for SaslMechanism {
    type Err = ParseEnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "PLAIN" => Ok(SaslMechanism::Plain),
            "GSSAPI" => Ok(SaslMechanism::Gssapi),
            "SCRAM-SHA-256" => Ok(SaslMechanism::ScramSha256),
            "SCRAM-SHA-512" => Ok(SaslMechanism::ScramSha512),
            "OAUTHBEARER" => Ok(SaslMechanism::OAuthBearer),
            _ => Err(ParseEnvError::Variant(
                s.to_owned(),
                "PLAIN, GSSAPI, SCRAM-SHA-256, SCRAM-SHA-512, OAUTHBEARER",
            )),
        }
    }
}

impl fmt::Display for SaslMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "http_monitor")]
    pub kafka_topics: TopicList,

    #[envconfig(default = "plaintext")]
    pub kafka_security_protocol: SecurityProtocol,

    #[envconfig(default = "PLAIN")]
    pub kafka_sasl_mechanism: SaslMechanism,

    pub kafka_sasl_username: Option<String>,

    pub kafka_sasl_password: Option<String>,

    pub kafka_ssl_ca_location: Option<String>, // CA certificate used to verify the brokers

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message

    #[envconfig(default = "10000")]
    pub kafka_connect_timeout_ms: EnvMsDuration, // Startup metadata fetch deadline
}

impl KafkaConfig {
    /// Settings shared by producers and consumers.
    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("security.protocol", self.kafka_security_protocol.as_str());

        if self.kafka_security_protocol.uses_ssl() {
            if let Some(ca_location) = non_empty(&self.kafka_ssl_ca_location) {
                client_config.set("ssl.ca.location", ca_location);
            }
        }

        if self.kafka_security_protocol.uses_sasl() {
            client_config.set("sasl.mechanisms", self.kafka_sasl_mechanism.as_str());
            if let Some(username) = non_empty(&self.kafka_sasl_username) {
                client_config.set("sasl.username", username);
            }
            if let Some(password) = non_empty(&self.kafka_sasl_password) {
                client_config.set("sasl.password", password);
            }
        }

        client_config
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Client context reporting liveness from librdkafka's statistics callback,
/// which only fires while the client's background loop is running.
#[derive(Default)]
pub struct KafkaContext {
    liveness: Option<HealthHandle>,
}

impl From<HealthHandle> for KafkaContext {
    fn from(liveness: HealthHandle) -> Self {
        KafkaContext {
            liveness: Some(liveness),
        }
    }
}

impl ClientContext for KafkaContext {
    fn stats(&self, _: rdkafka::Statistics) {
        if let Some(liveness) = &self.liveness {
            liveness.report_healthy();
        }
    }
}

impl ConsumerContext for KafkaContext {}

/// "Ping" the brokers by requesting cluster metadata, failing after `timeout`.
pub fn check_brokers<C: ClientContext>(
    client: &Client<C>,
    hosts: &str,
    timeout: Duration,
) -> Result<(), KafkaError> {
    match client.fetch_metadata(None, timeout) {
        Ok(metadata) => {
            info!(
                "connected to Kafka brokers at {}, found {} topics",
                hosts,
                metadata.topics().len()
            );
            Ok(())
        }
        Err(error) => {
            error!("unable to reach Kafka brokers at {}: {}", hosts, error);
            Err(error)
        }
    }
}
