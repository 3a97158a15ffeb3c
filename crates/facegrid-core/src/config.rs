//! facegrid.toml configuration parser.
//!
//! Every field has a default, so an empty file (or no file at all) yields
//! a working single-process setup. Durations are written as strings such
//! as `"500ms"`, `"5s"` or `"2m"`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FacegridConfig {
    pub gateway: GatewayConfig,
    pub queues: QueueConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub autoscaler: AutoscalerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub listen: String,
    /// Longest gap between two checks of the pending-results map.
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
    /// How long a request waits for its result.
    #[serde(with = "duration_str")]
    pub result_timeout: Duration,
    /// Unclaimed results older than this are evicted.
    #[serde(with = "duration_str")]
    pub result_ttl: Duration,
    #[serde(with = "duration_str")]
    pub sweep_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8000".to_string(),
            poll_interval: Duration::from_millis(500),
            result_timeout: Duration::from_secs(60),
            result_ttl: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    pub request: String,
    pub response: String,
    pub dead_letter: Option<String>,
    #[serde(with = "duration_str")]
    pub visibility_timeout: Duration,
    /// Bound on a single blocking receive.
    #[serde(with = "duration_str")]
    pub receive_wait: Duration,
    /// Messages fetched per correlator receive.
    pub correlator_batch: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            request: "req-queue".to_string(),
            response: "resp-queue".to_string(),
            dead_letter: Some("dead-letter-queue".to_string()),
            visibility_timeout: Duration::from_secs(30),
            receive_wait: Duration::from_secs(5),
            correlator_batch: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub input_bucket: String,
    pub output_bucket: String,
    /// redb file for durable objects; in-memory when unset.
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            input_bucket: "in-bucket".to_string(),
            output_bucket: "out-bucket".to_string(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Pause after an empty receive.
    #[serde(with = "duration_str")]
    pub idle_pause: Duration,
    /// Pause after a failed receive.
    #[serde(with = "duration_str")]
    pub error_backoff: Duration,
    /// Deliveries allowed before a job is dead-lettered.
    pub max_receive_count: u32,
    /// JSON file holding the labelled reference embeddings.
    pub reference_set: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_pause: Duration::from_millis(500),
            error_backoff: Duration::from_secs(1),
            max_receive_count: 5,
            reference_set: PathBuf::from("references.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutoscalerConfig {
    pub max_instances: u32,
    /// How long over-capacity must persist before instances are stopped.
    #[serde(with = "duration_str")]
    pub grace_period: Duration,
    #[serde(with = "duration_str")]
    pub tick_interval: Duration,
    /// Name prefix identifying worker-role instances.
    pub worker_prefix: String,
    /// Number of worker instances provisioned in the local fleet.
    pub fleet_size: u32,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            max_instances: 15,
            grace_period: Duration::from_secs(5),
            tick_interval: Duration::from_secs(2),
            worker_prefix: "app-tier-instance-".to_string(),
            fleet_size: 15,
        }
    }
}

impl FacegridConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: FacegridConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Reject values the loops cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("gateway.poll_interval", self.gateway.poll_interval),
            ("gateway.sweep_interval", self.gateway.sweep_interval),
            ("autoscaler.tick_interval", self.autoscaler.tick_interval),
        ];
        for (field, value) in non_zero {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.queues.correlator_batch == 0 {
            return Err(ConfigError::Invalid {
                field: "queues.correlator_batch".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.queues.request == self.queues.response {
            return Err(ConfigError::Invalid {
                field: "queues.response".to_string(),
                reason: "must differ from queues.request".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse a duration string like `"500ms"`, `"5s"`, `"2m"` or `"30"`
/// (bare seconds).
pub fn parse_duration(field: &str, s: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration {
        field: field.to_string(),
        value: s.to_string(),
    };
    let s = s.trim();
    let (digits, unit_ms) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1_000)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60_000)
    } else {
        (s, 1_000)
    };
    let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
    let millis = value.checked_mul(unit_ms).ok_or_else(invalid)?;
    Ok(Duration::from_millis(millis))
}

fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis % 60_000 == 0 && millis > 0 {
        format!("{}m", millis / 60_000)
    } else if millis % 1_000 == 0 {
        format!("{}s", millis / 1_000)
    } else {
        format!("{millis}ms")
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration("duration", &raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: FacegridConfig = toml::from_str("").unwrap();
        assert_eq!(config, FacegridConfig::default());
        assert_eq!(config.gateway.result_timeout, Duration::from_secs(60));
        assert_eq!(config.autoscaler.max_instances, 15);
        assert_eq!(config.autoscaler.grace_period, Duration::from_secs(5));
    }

    #[test]
    fn parse_partial_sections() {
        let toml_str = r#"
[gateway]
poll_interval = "200ms"
result_timeout = "2m"

[autoscaler]
max_instances = 4
"#;
        let config: FacegridConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.gateway.poll_interval, Duration::from_millis(200));
        assert_eq!(config.gateway.result_timeout, Duration::from_secs(120));
        assert_eq!(config.gateway.listen, "0.0.0.0:8000");
        assert_eq!(config.autoscaler.max_instances, 4);
        assert_eq!(config.autoscaler.tick_interval, Duration::from_secs(2));
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let toml_str = r#"
[gateway]
poll_interval = "soon"
"#;
        assert!(toml::from_str::<FacegridConfig>(toml_str).is_err());
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("x", "500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("x", "5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("x", "2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("x", "30").unwrap(), Duration::from_secs(30));
        assert!(matches!(
            parse_duration("gateway.poll_interval", "fast"),
            Err(ConfigError::InvalidDuration { field, .. }) if field == "gateway.poll_interval"
        ));
    }

    #[test]
    fn toml_round_trip_keeps_durations_readable() {
        let toml_str = FacegridConfig::default().to_toml_string().unwrap();
        assert!(toml_str.contains("poll_interval = \"500ms\""));
        assert!(toml_str.contains("result_timeout = \"1m\""));
        let back: FacegridConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back, FacegridConfig::default());
    }

    #[test]
    fn validate_rejects_zero_poll_interval() {
        let mut config = FacegridConfig::default();
        config.gateway.poll_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn validate_rejects_shared_queue() {
        let mut config = FacegridConfig::default();
        config.queues.response = config.queues.request.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = std::env::temp_dir().join(format!("facegrid-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("facegrid.toml");
        std::fs::write(&path, "[queues]\nrequest = \"jobs\"\n").unwrap();

        let config = FacegridConfig::from_file(&path).unwrap();
        assert_eq!(config.queues.request, "jobs");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
