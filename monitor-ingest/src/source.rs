use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use health::HealthHandle;
use monitor_common::kafka::{check_brokers, KafkaConfig, KafkaContext};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::Message;
use tracing::{debug, info};

/// A message pulled off the bus, detached from the client that received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
}

#[async_trait]
pub trait MessageSource: Send {
    /// The next message, or `None` once the source has nothing more to give.
    async fn recv(&mut self) -> Result<Option<InboundMessage>, KafkaError>;

    /// Mark `message` as done. Only called once whatever it produced is durable.
    fn ack(&mut self, message: &InboundMessage) -> Result<(), KafkaError>;
}

/// Consumer group member reading every configured topic.
///
/// Offsets are stored by `ack` and committed in the background, so a crash
/// between the database commit and the next offset commit redelivers
/// messages rather than losing them.
pub struct KafkaSource {
    consumer: StreamConsumer<KafkaContext>,
}

impl KafkaSource {
    pub fn new(
        config: &KafkaConfig,
        group: &str,
        offset_reset: &str,
        liveness: HealthHandle,
    ) -> Result<Self, KafkaError> {
        let mut client_config = config.client_config();
        client_config
            .set("group.id", group)
            .set("auto.offset.reset", offset_reset)
            .set("enable.auto.offset.store", "false");

        debug!("rdkafka configuration: {:?}", client_config);
        let consumer: StreamConsumer<KafkaContext> =
            client_config.create_with_context(KafkaContext::from(liveness))?;

        check_brokers(
            consumer.client(),
            &config.kafka_hosts,
            config.kafka_connect_timeout_ms.0,
        )?;

        let topics: Vec<&str> = config.kafka_topics.iter().collect();
        consumer.subscribe(&topics)?;
        info!("subscribed to {:?} as {}", topics, group);

        Ok(Self { consumer })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn recv(&mut self) -> Result<Option<InboundMessage>, KafkaError> {
        let message = self.consumer.recv().await?;

        Ok(Some(InboundMessage {
            topic: message.topic().to_owned(),
            partition: message.partition(),
            offset: message.offset(),
            payload: message.payload().map(<[u8]>::to_vec),
        }))
    }

    fn ack(&mut self, message: &InboundMessage) -> Result<(), KafkaError> {
        self.consumer
            .store_offset(&message.topic, message.partition, message.offset)
    }
}

/// Messages acked by a `MemorySource`, readable after the source was moved
/// into a loop.
#[derive(Debug, Clone, Default)]
pub struct AckLog {
    messages: Arc<Mutex<Vec<InboundMessage>>>,
}

impl AckLog {
    fn push(&self, message: InboundMessage) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    pub fn messages(&self) -> Vec<InboundMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Acked offsets, in ack order.
    pub fn offsets(&self) -> Vec<i64> {
        self.messages().iter().map(|m| m.offset).collect()
    }
}

/// A fixed list of messages, handed out in order. Useful to replay payloads
/// without a broker.
#[derive(Debug, Default)]
pub struct MemorySource {
    pending: VecDeque<InboundMessage>,
    acked: AckLog,
}

impl MemorySource {
    pub fn new(messages: impl IntoIterator<Item = InboundMessage>) -> Self {
        Self {
            pending: messages.into_iter().collect(),
            acked: AckLog::default(),
        }
    }

    /// Wrap `payloads` as consecutive offsets of partition 0 of `topic`.
    pub fn from_payloads(topic: &str, payloads: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self::new(
            payloads
                .into_iter()
                .zip(0..)
                .map(|(payload, offset)| InboundMessage {
                    topic: topic.to_owned(),
                    partition: 0,
                    offset,
                    payload: Some(payload),
                }),
        )
    }

    pub fn ack_log(&self) -> AckLog {
        self.acked.clone()
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<InboundMessage>, KafkaError> {
        Ok(self.pending.pop_front())
    }

    fn ack(&mut self, message: &InboundMessage) -> Result<(), KafkaError> {
        self.acked.push(message.clone());
        Ok(())
    }
}
