//! Value types parsed from environment variables by `envconfig`.
use std::str::FromStr;
use std::time;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseEnvError {
    #[error("{0:?} is not a duration in milliseconds")]
    Duration(String),
    #[error("value must not be empty")]
    Empty,
    #[error("{0:?} is not one of: {1}")]
    Variant(String, &'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

impl FromStr for EnvMsDuration {
    type Err = ParseEnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s
            .trim()
            .parse::<u64>()
            .map_err(|_| ParseEnvError::Duration(s.to_owned()))?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for NonEmptyString {
    type Err = ParseEnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            Err(ParseEnvError::Empty)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

/// Comma separated list of topic names, e.g. `http_monitor,http_monitor_eu`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicList(pub Vec<String>);

impl TopicList {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl FromStr for TopicList {
    type Err = ParseEnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let topics: Vec<String> = s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect();

        if topics.is_empty() {
            return Err(ParseEnvError::Empty);
        }
        Ok(TopicList(topics))
    }
}
