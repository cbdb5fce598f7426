//! The message contract between `monitor-probe` and `monitor-ingest`.
//!
//! Messages are JSON objects internally tagged with a `version` field. Adding a
//! field that older consumers cannot ignore requires a new version variant;
//! consumers reject versions they do not know.
use serde::{Deserialize, Serialize};

/// The outcome of probing a URL once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub url: String,
    pub method: String,
    pub response_time_ms: u32,
    /// `None` when the request failed to complete
    pub status_code: Option<u16>,
    /// The pattern the body was tested against, if one was configured
    pub pattern: Option<String>,
    /// Whether `pattern` matched at the start of the body. Always `false`
    /// when there was no pattern or the request failed.
    pub matched: bool,
}

impl ProbeResult {
    pub fn is_failure(&self) -> bool {
        self.status_code.is_none()
    }
}

#[derive(Serialize)]
#[serde(tag = "version")]
enum OutgoingEnvelope<'a> {
    #[serde(rename = "1")]
    V1(&'a ProbeResult),
}

#[derive(Deserialize)]
#[serde(tag = "version")]
enum IncomingEnvelope {
    #[serde(rename = "1")]
    V1(ProbeResult),
}

/// Serialize a result with the current envelope version.
pub fn encode(result: &ProbeResult) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&OutgoingEnvelope::V1(result))
}

pub fn decode(payload: &[u8]) -> Result<ProbeResult, serde_json::Error> {
    match serde_json::from_slice(payload)? {
        IncomingEnvelope::V1(result) => Ok(result),
    }
}
