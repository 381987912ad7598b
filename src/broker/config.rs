//! Broker connection configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::BrokerError;

/// MQTT broker settings.
///
/// Empty strings mean "unset": the client id is generated from the process
/// id and the publish/subscribe topics derive from `base_topic`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
    /// CA certificate file; enables TLS when set
    pub ca_file: Option<PathBuf>,
    pub base_topic: String,
    pub publish_topic: String,
    pub subscribe_topic: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: String::new(),
            username: String::new(),
            password: String::new(),
            ca_file: None,
            base_topic: "intercom".to_string(),
            publish_topic: String::new(),
            subscribe_topic: String::new(),
        }
    }
}

impl BrokerConfig {
    /// Topic that outgoing events are published on
    pub fn event_topic(&self) -> String {
        if self.publish_topic.is_empty() {
            format!("{}/event", self.base_topic)
        } else {
            self.publish_topic.clone()
        }
    }

    /// Filter that incoming commands are matched against
    pub fn command_filter(&self) -> String {
        if self.subscribe_topic.is_empty() {
            format!("{}/command/+", self.base_topic)
        } else {
            self.subscribe_topic.clone()
        }
    }

    pub fn effective_client_id(&self) -> String {
        if self.client_id.is_empty() {
            format!("intercom-bridge-{}", std::process::id())
        } else {
            self.client_id.clone()
        }
    }

    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.host.is_empty() {
            return Err(BrokerError::InvalidConfig("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(BrokerError::InvalidConfig("port must not be zero".into()));
        }
        if self.base_topic.is_empty()
            && (self.publish_topic.is_empty() || self.subscribe_topic.is_empty())
        {
            return Err(BrokerError::InvalidConfig(
                "base_topic required when publish/subscribe topics are unset".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topics_derive_from_base() {
        let config = BrokerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 1883);
        assert_eq!(config.event_topic(), "intercom/event");
        assert_eq!(config.command_filter(), "intercom/command/+");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_topics_win() {
        let config = BrokerConfig {
            publish_topic: "store/telemetry".to_string(),
            subscribe_topic: "store/ctl/#".to_string(),
            ..Default::default()
        };
        assert_eq!(config.event_topic(), "store/telemetry");
        assert_eq!(config.command_filter(), "store/ctl/#");
    }

    #[test]
    fn test_validate_rejects_empty_host_and_zero_port() {
        let mut config = BrokerConfig {
            host: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.host = "broker.local".to_string();
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_generated_client_id_is_stable_within_process() {
        let config = BrokerConfig::default();
        assert_eq!(config.effective_client_id(), config.effective_client_id());
        assert!(config.effective_client_id().starts_with("intercom-bridge-"));
    }
}
