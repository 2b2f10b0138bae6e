//! Deployment configuration, read from a TOML file.
//!
//! ```toml
//! [broker]
//! host = "test.mosquitto.org"
//! port = 1883
//!
//! [topics]
//! publish = "devices/status"
//! subscribe = "devices/commands"
//! ```
//!
//! Every other section is optional and falls back to the defaults below.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::application::mqtt::client::{MAX_CLIENT_ID_LEN, MAX_CREDENTIAL_LEN};
use crate::network::application::mqtt::event::MAX_TOPIC_LEN;
use crate::network::application::mqtt::{Options, ProtocolVersion};

/// Largest PUBLISH or SUBSCRIBE header around a topic: fixed header with a
/// four-byte remaining length, topic length prefix, packet id and one QoS byte.
const TX_PACKET_OVERHEAD: usize = 1 + 4 + 2 + 2 + 1;

/// An inbound PUBLISH topic is read into the receive buffer with its packet id.
const RX_TOPIC_OVERHEAD: usize = 2;

/// Complete runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub broker: BrokerSection,
    #[serde(default)]
    pub client: ClientSection,
    pub topics: TopicsSection,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub buffers: BufferSection,
    #[serde(default)]
    pub status: StatusSection,
}

/// Where the broker lives and how to talk to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Hostname or IP literal, resolved once at startup
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keepalive in seconds; 0 disables liveness pings
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,
    /// "3.1.1" or "3.1"
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u16 {
    60
}

fn default_protocol() -> String {
    "3.1.1".to_string()
}

/// Client identifier settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Fixed client id; overrides the derived one when non-empty
    pub id: Option<String>,
    /// Prefix for ids derived from the device identity
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
    /// File holding the device identity (serial number, IMEI)
    pub device_id_path: Option<String>,
}

fn default_id_prefix() -> String {
    "dev".to_string()
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            id: None,
            id_prefix: default_id_prefix(),
            device_id_path: None,
        }
    }
}

/// The two fixed topics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicsSection {
    /// Topic the producer publishes status on
    pub publish: String,
    /// Topic filter subscribed after every CONNACK
    pub subscribe: String,
}

/// Delays and timeouts, all in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingSection {
    pub reconnect_delay_secs: u64,
    pub publish_period_secs: u64,
    pub connect_timeout_secs: u64,
    pub io_timeout_secs: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: 60,
            publish_period_secs: 5,
            connect_timeout_secs: 10,
            io_timeout_secs: 5,
        }
    }
}

impl TimingSection {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn publish_period(&self) -> Duration {
        Duration::from_secs(self.publish_period_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

/// Buffer sizes in bytes, allocated once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BufferSection {
    pub rx: usize,
    pub tx: usize,
    pub payload: usize,
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            rx: 128,
            tx: 128,
            payload: 128,
        }
    }
}

/// The status message the producer sends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatusSection {
    pub payload: String,
}

impl Default for StatusSection {
    fn default() -> Self {
        Self {
            payload: "1".to_string(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(invalid("broker.host must not be empty"));
        }
        self.protocol_version()?;

        for (name, value) in [
            ("broker.username", &self.broker.username),
            ("broker.password", &self.broker.password),
        ] {
            if value.as_ref().is_some_and(|v| v.len() > MAX_CREDENTIAL_LEN) {
                return Err(invalid(format!(
                    "{name} is longer than {MAX_CREDENTIAL_LEN} bytes"
                )));
            }
        }
        if self.client.id.as_ref().is_some_and(|id| id.len() > MAX_CLIENT_ID_LEN) {
            return Err(invalid(format!(
                "client.id is longer than {MAX_CLIENT_ID_LEN} bytes"
            )));
        }

        validate_topic("topics.publish", &self.topics.publish)?;
        if self.topics.publish.contains(['+', '#']) {
            return Err(invalid("topics.publish must not contain wildcards"));
        }
        validate_topic("topics.subscribe", &self.topics.subscribe)?;

        for (name, secs) in [
            ("timing.publish_period_secs", self.timing.publish_period_secs),
            ("timing.connect_timeout_secs", self.timing.connect_timeout_secs),
            ("timing.io_timeout_secs", self.timing.io_timeout_secs),
        ] {
            if secs == 0 {
                return Err(invalid(format!("{name} must be positive")));
            }
        }
        if self.buffers.rx == 0 || self.buffers.tx == 0 || self.buffers.payload == 0 {
            return Err(invalid("buffer sizes must be positive"));
        }

        for (name, topic) in [
            ("topics.publish", &self.topics.publish),
            ("topics.subscribe", &self.topics.subscribe),
        ] {
            if topic.len() + TX_PACKET_OVERHEAD > self.buffers.tx {
                return Err(invalid(format!(
                    "{name} does not fit buffers.tx ({} bytes)",
                    self.buffers.tx
                )));
            }
        }
        if self.topics.subscribe.len() + RX_TOPIC_OVERHEAD > self.buffers.rx {
            return Err(invalid(format!(
                "topics.subscribe does not fit buffers.rx ({} bytes)",
                self.buffers.rx
            )));
        }
        Ok(())
    }

    /// The configured protocol revision.
    pub fn protocol_version(&self) -> Result<ProtocolVersion, ConfigError> {
        match self.broker.protocol.trim() {
            "3.1.1" => Ok(ProtocolVersion::V3_1_1),
            "3.1" => Ok(ProtocolVersion::V3_1),
            other => Err(invalid(format!("unsupported MQTT protocol version: {other}"))),
        }
    }

    /// Session options for `client_id` with this configuration's keepalive,
    /// protocol and credentials.
    pub fn client_options(&self, client_id: &str) -> Result<Options, ConfigError> {
        let too_long = |what: &str| invalid(format!("{what} does not fit"));
        let mut options = Options::new(client_id).map_err(|_| too_long("client id"))?;
        options.keep_alive_seconds = self.broker.keep_alive_secs;
        options.protocol_version = self.protocol_version()?;
        options.username = self
            .broker
            .username
            .as_deref()
            .map(heapless::String::try_from)
            .transpose()
            .map_err(|_| too_long("broker.username"))?;
        options.password = self
            .broker
            .password
            .as_deref()
            .map(heapless::String::try_from)
            .transpose()
            .map_err(|_| too_long("broker.password"))?;
        Ok(options)
    }

    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            broker: BrokerSection {
                host: "localhost".to_string(),
                port: default_port(),
                keep_alive_secs: default_keep_alive(),
                protocol: default_protocol(),
                username: None,
                password: None,
            },
            client: ClientSection::default(),
            topics: TopicsSection {
                publish: "devices/status".to_string(),
                subscribe: "devices/commands".to_string(),
            },
            timing: TimingSection::default(),
            buffers: BufferSection::default(),
            status: StatusSection::default(),
        }
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidConfig(message.into())
}

fn validate_topic(name: &str, topic: &str) -> Result<(), ConfigError> {
    if topic.is_empty() {
        return Err(invalid(format!("{name} must not be empty")));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(invalid(format!("{name} is longer than {MAX_TOPIC_LEN} bytes")));
    }
    Ok(())
}
