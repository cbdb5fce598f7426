use envconfig::Envconfig;
use monitor_common::env::{EnvMsDuration, NonEmptyString};
use monitor_common::kafka::KafkaConfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    pub probe_url: NonEmptyString,

    #[envconfig(default = "GET")]
    pub probe_method: NonEmptyString,

    pub probe_pattern: Option<String>,

    #[envconfig(default = "1")]
    pub probe_times: u32,

    #[envconfig(default = "5000")]
    pub probe_wait_ms: EnvMsDuration,

    #[envconfig(default = "5000")]
    pub request_timeout_ms: EnvMsDuration,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,
}

impl Config {
    /// The configured pattern; an empty `PROBE_PATTERN` counts as no pattern.
    pub fn pattern(&self) -> Option<&str> {
        self.probe_pattern.as_deref().filter(|p| !p.is_empty())
    }
}
