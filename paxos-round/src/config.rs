use std::{fs, path::Path, time::Duration};

use yaml_rust::{Yaml, YamlLoader};

use crate::error::ConfigError;
use crate::network::simulation::NetworkOptions;
use crate::paxos::proposer::RetryPolicy;

pub const DEFAULT_NODES: usize = 3;

/// Everything the orchestrator needs to build and run a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub nodes: usize,
    pub max_attempts: Option<u32>,
    pub round_timeout: Option<Duration>,
    pub call_timeout: Option<Duration>,
    pub retry_backoff: Option<Duration>,
    pub network_delay: Option<Duration>,
    pub log_level: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            nodes: DEFAULT_NODES,
            max_attempts: None,
            round_timeout: None,
            call_timeout: None,
            retry_backoff: None,
            network_delay: None,
            log_level: "info".to_string(),
        }
    }
}

impl ClusterConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(&path)?;
        Self::from_yaml_str(&s)
    }

    /// Parse a YAML document. Missing keys keep their defaults and unknown
    /// keys are ignored.
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        let docs = YamlLoader::load_from_str(s)?;
        let doc = docs.first().ok_or(ConfigError::Empty)?;
        let mut config = ClusterConfig::default();

        if let Some(nodes) = uint(doc, "nodes")? {
            config.nodes = nodes as usize;
        }
        if let Some(max) = uint(doc, "max_attempts")? {
            config.max_attempts = Some(u32::try_from(max).map_err(|_| ConfigError::InvalidValue {
                key: "max_attempts",
                expected: "a 32-bit count",
            })?);
        }
        config.round_timeout = millis(doc, "round_timeout_ms")?;
        config.call_timeout = millis(doc, "call_timeout_ms")?;
        config.retry_backoff = millis(doc, "retry_backoff_ms")?.filter(|d| !d.is_zero());
        config.network_delay = millis(doc, "network_delay_ms")?.filter(|d| !d.is_zero());
        match &doc["log_level"] {
            Yaml::BadValue => {}
            Yaml::String(level) => config.log_level = level.clone(),
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "log_level",
                    expected: "a string",
                })
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "nodes",
                expected: "at least 1",
            });
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "max_attempts",
                expected: "at least 1",
            });
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            round_timeout: self.round_timeout,
            backoff: self.retry_backoff,
        }
    }

    pub fn network_options(&self) -> NetworkOptions {
        NetworkOptions {
            call_timeout: self.call_timeout,
            max_delay: self.network_delay,
        }
    }
}

fn uint(doc: &Yaml, key: &'static str) -> Result<Option<u64>, ConfigError> {
    match &doc[key] {
        Yaml::BadValue => Ok(None),
        Yaml::Integer(v) if *v >= 0 => Ok(Some(*v as u64)),
        _ => Err(ConfigError::InvalidValue {
            key,
            expected: "a non-negative integer",
        }),
    }
}

fn millis(doc: &Yaml, key: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(uint(doc, key)?.map(Duration::from_millis))
}
