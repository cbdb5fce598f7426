//! Issue one HTTP request against a target and describe how it went.
use std::time;

use monitor_common::probe_result::ProbeResult;
use regex::Regex;
use reqwest::{redirect, Method, StatusCode};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::ProbeError;

/// A regular expression that must match at the very start of a response body.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    anchored: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, ProbeError> {
        let anchored = Regex::new(&format!(r"\A(?:{source})"))?;
        Ok(Self {
            source: source.to_owned(),
            anchored,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True only when a match starts at position zero, a match further into
    /// `body` does not count.
    pub fn matches_start(&self, body: &str) -> bool {
        self.anchored.is_match(body)
    }
}

/// What to probe, validated once up front.
#[derive(Debug, Clone)]
pub struct Target {
    // As configured, this is what gets published and stored
    configured_url: String,
    url: reqwest::Url,
    method: Method,
    pattern: Option<Pattern>,
}

impl Target {
    pub fn new(
        configured_url: &str,
        method: &str,
        pattern: Option<&str>,
    ) -> Result<Self, ProbeError> {
        let url = reqwest::Url::parse(configured_url).map_err(|error| ProbeError::InvalidUrl {
            url: configured_url.to_owned(),
            error,
        })?;
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ProbeError::InvalidMethod(method.to_owned()))?;
        let pattern = pattern.map(Pattern::new).transpose()?;

        Ok(Self {
            configured_url: configured_url.to_owned(),
            url,
            method,
            pattern,
        })
    }

    /// The URL exactly as configured, not normalized.
    pub fn url(&self) -> &str {
        &self.configured_url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }
}

pub fn build_http_client(request_timeout: time::Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("http-monitor probe")
        .redirect(redirect::Policy::none())
        .timeout(request_timeout)
        .build()
}

/// Probes targets through a single pooled client, so repeated probes reuse
/// connections instead of paying for setup every time.
#[derive(Clone)]
pub struct Prober {
    client: reqwest::Client,
}

impl Prober {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn with_timeout(request_timeout: time::Duration) -> Result<Self, ProbeError> {
        Ok(Self::new(build_http_client(request_timeout)?))
    }

    /// Probe `target` once. Never fails: a request that could not complete is
    /// reported with no status code.
    pub async fn probe(&self, target: &Target) -> ProbeResult {
        let start = Instant::now();
        let outcome = self.fetch(target).await;
        let elapsed = start.elapsed();

        let (status_code, matched) = match outcome {
            Ok((status, body)) => {
                let matched = target
                    .pattern
                    .as_ref()
                    .is_some_and(|pattern| pattern.matches_start(&body));
                debug!(
                    "{} {} returned {} in {:?}",
                    target.method, target.url, status, elapsed
                );
                (Some(status.as_u16()), matched)
            }
            Err(error) => {
                info!("probe of {} {} failed: {}", target.method, target.url, error);
                (None, false)
            }
        };

        let outcome_label = if status_code.is_some() {
            "completed"
        } else {
            "failed"
        };
        metrics::counter!("probe_requests_total", "outcome" => outcome_label).increment(1);
        metrics::histogram!("probe_duration_seconds").record(elapsed.as_secs_f64());

        ProbeResult {
            url: target.configured_url.clone(),
            method: target.method.to_string(),
            response_time_ms: u32::try_from(elapsed.as_millis()).unwrap_or(u32::MAX),
            status_code,
            pattern: target.pattern.as_ref().map(|p| p.as_str().to_owned()),
            matched,
        }
    }

    /// Send the request and read the whole body, the probe is only complete once both are done.
    async fn fetch(&self, target: &Target) -> Result<(StatusCode, String), reqwest::Error> {
        let response = self
            .client
            .request(target.method.clone(), target.url.clone())
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        Ok((status, body))
    }
}
