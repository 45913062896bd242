//! Engine configuration.

use crate::error::Result;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Sync engine configuration.
///
/// Deserializes from camelCase JSON; every field is optional and falls back
/// to its default.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Idle time after which a live stream gets a `ping` frame.
    #[serde(rename = "keepaliveIntervalMs", deserialize_with = "duration_from_millis")]
    pub keepalive_interval: Duration,

    /// Maximum admitted events returned by one catch-up.
    pub catch_up_limit: usize,

    /// Frames buffered per live subscriber before pushes fail.
    pub channel_buffer: usize,

    /// Entity types delivered in realtime.
    pub realtime_entity_types: Vec<String>,

    /// Entity types whose events carry transaction metadata.
    pub product_entity_types: Vec<String>,

    /// `live` query value that selects the live stream.
    pub live_token: String,

    /// Transaction ids remembered for replay detection.
    pub ledger_capacity: usize,

    /// Node id stamped into server-issued transaction ids.
    pub node_id: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(30),
            catch_up_limit: 500,
            channel_buffer: 1000,
            realtime_entity_types: vec![
                "attachment".to_string(),
                "membership".to_string(),
                "page".to_string(),
            ],
            product_entity_types: vec!["attachment".to_string(), "page".to_string()],
            live_token: "sse".to_string(),
            ledger_capacity: 10_000,
            node_id: "server".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn duration_from_millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.keepalive_interval, Duration::from_secs(30));
        assert_eq!(config.catch_up_limit, 500);
        assert_eq!(config.channel_buffer, 1000);
        assert_eq!(config.live_token, "sse");
    }

    #[test]
    fn test_partial_json() {
        let config =
            SyncConfig::from_json(r#"{"keepaliveIntervalMs": 250, "catchUpLimit": 20}"#).unwrap();
        assert_eq!(config.keepalive_interval, Duration::from_millis(250));
        assert_eq!(config.catch_up_limit, 20);
        assert_eq!(config.channel_buffer, 1000);
        assert!(config.product_entity_types.contains(&"page".to_string()));
    }

    #[test]
    fn test_invalid_json() {
        assert!(SyncConfig::from_json(r#"{"catchUpLimit": "many"}"#).is_err());
    }
}
