use std::future::Future;
use std::time::Duration;

use monitor_common::env::TopicList;
use monitor_common::kafka::{check_brokers, KafkaConfig, KafkaContext};
use monitor_common::probe_result::{self, ProbeResult};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tracing::{debug, info};

use crate::error::PublishError;
use crate::probe::{Prober, Target};

/// Appends probe results to every configured topic.
pub struct Publisher {
    producer: FutureProducer<KafkaContext>,
    topics: TopicList,
}

impl Publisher {
    /// Create the producer and make sure the brokers answer. An unreachable
    /// cluster fails here, before anything gets probed.
    pub fn new(config: &KafkaConfig) -> Result<Self, PublishError> {
        let mut client_config = config.client_config();
        client_config.set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        );

        debug!("rdkafka configuration: {:?}", client_config);
        let producer: FutureProducer<KafkaContext> = client_config
            .create_with_context(KafkaContext::default())
            .map_err(PublishError::Connect)?;

        check_brokers(
            producer.client(),
            &config.kafka_hosts,
            config.kafka_connect_timeout_ms.0,
        )
        .map_err(PublishError::Connect)?;

        Ok(Self {
            producer,
            topics: config.kafka_topics.clone(),
        })
    }

    /// Produce `result` to each topic in turn, waiting for every delivery.
    /// Messages are keyed by URL so one URL's results stay ordered in one partition.
    pub async fn publish(&self, result: &ProbeResult) -> Result<(), PublishError> {
        let payload = probe_result::encode(result)?;

        for topic in self.topics.iter() {
            let record = FutureRecord::to(topic)
                .key(result.url.as_str())
                .payload(&payload);

            let delivery = self
                .producer
                .send_result(record)
                .map_err(|(error, _)| PublishError::Produce {
                    topic: topic.to_owned(),
                    error,
                })?;

            match delivery.await {
                Ok(Ok((partition, offset))) => {
                    debug!("delivered to {} [{}] at offset {}", topic, partition, offset);
                    metrics::counter!("probe_results_published_total").increment(1);
                }
                Ok(Err((error, _))) => {
                    return Err(PublishError::Produce {
                        topic: topic.to_owned(),
                        error,
                    })
                }
                Err(_) => {
                    return Err(PublishError::Canceled {
                        topic: topic.to_owned(),
                    })
                }
            }
        }

        Ok(())
    }
}

/// How many times to probe, and how long to wait in between.
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub times: u32,
    pub wait: Duration,
}

impl Schedule {
    /// Call `each` with attempts `1..=times`, sleeping `wait` between two
    /// calls but never after the last one. Stops at the first error.
    pub async fn pace<F, Fut, E>(&self, mut each: F) -> Result<u32, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        for attempt in 1..=self.times {
            each(attempt).await?;

            if attempt != self.times {
                tokio::time::sleep(self.wait).await;
            }
        }

        Ok(self.times)
    }
}

/// Probe `target` `schedule.times` times, publishing every result. Returns
/// the number of results published.
pub async fn run(
    prober: &Prober,
    target: &Target,
    publisher: &Publisher,
    schedule: Schedule,
) -> Result<u32, PublishError> {
    schedule
        .pace(|attempt| async move {
            info!(
                "probing {} {} {}/{}",
                target.method(),
                target.url(),
                attempt,
                schedule.times
            );
            let result = prober.probe(target).await;

            info!("submitting results");
            publisher.publish(&result).await
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use rdkafka::consumer::{Consumer, StreamConsumer};
    use rdkafka::mocking::MockCluster;
    use rdkafka::producer::DefaultProducerContext;
    use rdkafka::{ClientConfig, Message};

    fn kafka_config(hosts: String, topics: &str) -> KafkaConfig {
        KafkaConfig {
            kafka_hosts: hosts,
            kafka_topics: topics.parse().unwrap(),
            kafka_security_protocol: "plaintext".parse().unwrap(),
            kafka_sasl_mechanism: "PLAIN".parse().unwrap(),
            kafka_sasl_username: None,
            kafka_sasl_password: None,
            kafka_ssl_ca_location: None,
            kafka_message_timeout_ms: 5000,
            kafka_connect_timeout_ms: "5000".parse().unwrap(),
        }
    }

    fn mock_consumer(
        cluster: &MockCluster<'static, DefaultProducerContext>,
        topic: &str,
    ) -> StreamConsumer {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", cluster.bootstrap_servers())
            .set("group.id", "mock")
            .set("auto.offset.reset", "earliest")
            .create()
            .expect("failed to create mock consumer");
        consumer.subscribe(&[topic]).unwrap();
        consumer
    }

    async fn next_result(consumer: &StreamConsumer) -> (String, ProbeResult) {
        let message = consumer.recv().await.unwrap();
        let key = String::from_utf8(message.key().unwrap().to_vec()).unwrap();
        let result = probe_result::decode(message.payload().unwrap()).unwrap();
        (key, result)
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_waits_only_between_attempts() {
        let schedule = Schedule {
            times: 3,
            wait: Duration::from_secs(60),
        };
        let start = tokio::time::Instant::now();
        let mut calls = Vec::new();

        let done = schedule
            .pace(|attempt| {
                calls.push((attempt, start.elapsed()));
                async { Ok::<(), PublishError>(()) }
            })
            .await
            .unwrap();

        assert_eq!(done, 3);
        assert_eq!(
            calls,
            vec![
                (1, Duration::ZERO),
                (2, Duration::from_secs(60)),
                (3, Duration::from_secs(120)),
            ]
        );
        // Two waits for three attempts, none after the last
        assert_eq!(start.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_never_waits() {
        let schedule = Schedule {
            times: 1,
            wait: Duration::from_secs(60),
        };
        let start = tokio::time::Instant::now();

        let done = schedule
            .pace(|_| async { Ok::<(), PublishError>(()) })
            .await
            .unwrap();

        assert_eq!(done, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_stops_at_first_error() {
        let schedule = Schedule {
            times: 3,
            wait: Duration::from_secs(60),
        };
        let start = tokio::time::Instant::now();
        let mut attempts = 0;

        let error = schedule
            .pace(|attempt| {
                attempts += 1;
                async move {
                    if attempt == 2 {
                        Err(PublishError::Canceled {
                            topic: "http_monitor".to_owned(),
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(error, PublishError::Canceled { .. }));
        assert_eq!(attempts, 2);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[test]
    fn unreachable_brokers_fail_at_startup() {
        let mut config = kafka_config("127.0.0.1:1".to_owned(), "http_monitor");
        config.kafka_connect_timeout_ms = "500".parse().unwrap();

        assert!(matches!(
            Publisher::new(&config),
            Err(PublishError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn publishes_to_every_topic() {
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        let config = kafka_config(cluster.bootstrap_servers(), "first,second");
        let publisher = Publisher::new(&config).expect("failed to create publisher");

        let result = ProbeResult {
            url: "http://localhost/".to_owned(),
            method: "GET".to_owned(),
            response_time_ms: 12,
            status_code: None,
            pattern: None,
            matched: false,
        };
        publisher.publish(&result).await.expect("failed to publish");

        for topic in ["first", "second"] {
            let consumer = mock_consumer(&cluster, topic);
            let (key, received) = next_result(&consumer).await;
            assert_eq!(key, "http://localhost/");
            assert_eq!(received, result);
        }
    }

    #[tokio::test]
    async fn run_probes_and_publishes_each_result() {
        let server = MockServer::start_async().await;
        let hits = server
            .mock_async(|when, then| {
                when.method(GET).path("/health");
                then.status(200).body("ok: all good");
            })
            .await;

        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        let config = kafka_config(cluster.bootstrap_servers(), "http_monitor");
        let publisher = Publisher::new(&config).expect("failed to create publisher");
        let prober = Prober::with_timeout(Duration::from_secs(2)).unwrap();
        let target = Target::new(&server.url("/health"), "GET", Some("ok")).unwrap();

        let schedule = Schedule {
            times: 3,
            wait: Duration::from_millis(10),
        };
        let published = run(&prober, &target, &publisher, schedule)
            .await
            .expect("run failed");

        assert_eq!(published, 3);
        hits.assert_hits_async(3).await;

        let consumer = mock_consumer(&cluster, "http_monitor");
        for _ in 0..3 {
            let (_, result) = next_result(&consumer).await;
            assert_eq!(result.status_code, Some(200));
            assert_eq!(result.pattern.as_deref(), Some("ok"));
            assert!(result.matched);
        }
    }
}
