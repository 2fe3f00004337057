//! Pilot configuration
//!
//! One immutable value built at startup (defaults, optionally overridden by a
//! TOML file) and handed to each component's constructor.

use anyhow::{Context, Result};
use pilot_shared::defaults;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub iot: IotConfig,
    pub provisioning: ProvisioningConfig,
    pub actuation: ActuationConfig,
}

/// Pub/sub endpoint and session settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IotConfig {
    /// Account-specific prefix of the IoT endpoint
    pub endpoint_prefix: String,
    pub region: String,
    /// Vehicle whose shadow topic carries commands
    pub thing_name: String,
    pub keep_alive_secs: u64,
    /// MQTT client id; a random one is generated per run when absent
    pub client_id: Option<String>,
}

impl Default for IotConfig {
    fn default() -> Self {
        Self {
            endpoint_prefix: "XXXXXXX".into(),
            region: "us-east-1".into(),
            thing_name: defaults::THING_NAME.into(),
            keep_alive_secs: defaults::KEEP_ALIVE_SECS,
            client_id: None,
        }
    }
}

impl IotConfig {
    /// Full broker host name
    pub fn endpoint(&self) -> String {
        format!("{}.iot.{}.amazonaws.com", self.endpoint_prefix, self.region)
    }

    pub fn topic(&self) -> String {
        defaults::command_topic(&self.thing_name)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Certificate issuance and local keystore settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Identity pool used to authorize issuance calls
    pub identity_pool_id: String,
    /// Policy attached to every newly issued certificate
    pub policy_name: String,
    pub keystore_path: PathBuf,
    pub keystore_name: String,
    pub keystore_password: String,
    pub certificate_alias: String,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            identity_pool_id: "<pool_id>".into(),
            policy_name: "Policy".into(),
            keystore_path: PathBuf::from("."),
            keystore_name: "iot_keystore".into(),
            keystore_password: "password".into(),
            certificate_alias: defaults::CERTIFICATE_ALIAS.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActuationConfig {
    pub command_duration_ms: u64,
}

impl Default for ActuationConfig {
    fn default() -> Self {
        Self {
            command_duration_ms: defaults::COMMAND_DURATION_MS,
        }
    }
}

impl ActuationConfig {
    pub fn command_duration(&self) -> Duration {
        Duration::from_millis(self.command_duration_ms)
    }
}

impl PilotConfig {
    /// Load configuration from a TOML file; missing keys keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
