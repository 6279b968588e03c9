use serde::Deserialize;
use std::time::Duration;

use crate::token::{parse_connection_string, ConnectionString, TokenError};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_VAR: &str = "REMOTE_MONITORING_CONFIG";
/// Configuration file read when [`CONFIG_PATH_VAR`] is unset
pub const DEFAULT_CONFIG_FILE: &str = "remote_monitoring.toml";
/// Prefix of environment variables overriding file settings, e.g. `RM_DEVICE_ID`
pub const ENV_PREFIX: &str = "RM";

/// Settings for the device agent
///
/// Hub credentials are given either as a connection string or as hostname, device id and key.
/// With no credentials at all the agent runs against an in-memory transport.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// IoT hub hostname, e.g. `myhub.azure-devices.net`
    pub hostname: Option<String>,
    /// Registered device id
    pub device_id: Option<String>,
    /// Base64 device key
    pub shared_access_key: Option<String>,
    /// `HostName=...;DeviceId=...;SharedAccessKey=...`
    pub connection_string: Option<String>,
    /// Seconds between telemetry messages until the cloud sets another value
    #[serde(default = "default_telemetry_interval_secs")]
    pub telemetry_interval_secs: u64,
    /// Pin driven by the light methods
    #[serde(default = "default_light_pin")]
    pub light_pin: u8,
    /// Status LED configured once the sensor reads successfully
    #[serde(default = "default_green_led_pin")]
    pub green_led_pin: u8,
    /// Half period of a blink
    #[serde(default = "default_blink_period_ms")]
    pub blink_period_ms: u64,
    /// Seconds between keep-alive pings
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// File locked to keep a single agent running
    #[serde(default = "default_lock_file")]
    pub lock_file: String,
}

fn default_telemetry_interval_secs() -> u64 {
    5
}

fn default_light_pin() -> u8 {
    7
}

fn default_green_led_pin() -> u8 {
    5
}

fn default_blink_period_ms() -> u64 {
    250
}

fn default_ping_interval_secs() -> u64 {
    8
}

fn default_lock_file() -> String {
    "/tmp/remote_monitoring.lock".to_string()
}

impl AgentConfig {
    /// Read the file named by [`CONFIG_PATH_VAR`] (or [`DEFAULT_CONFIG_FILE`]) and the environment
    pub fn load() -> Result<Self, ::config::ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::from_file(&path)
    }

    /// Read `path` if it exists, then apply `RM_*` environment overrides
    pub fn from_file(path: &str) -> Result<Self, ::config::ConfigError> {
        let mut cfg = ::config::Config::default();
        cfg.merge(::config::File::with_name(path).required(false))?;
        cfg.merge(::config::Environment::with_prefix(ENV_PREFIX))?;
        cfg.try_into()
    }

    /// Hub credentials, if any were configured
    ///
    /// A connection string wins over the individual settings. Giving only some of hostname,
    /// device id and key is an error.
    pub fn credentials(&self) -> Result<Option<ConnectionString>, TokenError> {
        if let Some(connection_string) = &self.connection_string {
            return parse_connection_string(connection_string).map(Some);
        }

        match (&self.hostname, &self.device_id, &self.shared_access_key) {
            (None, None, None) => Ok(None),
            (Some(hostname), Some(device_id), Some(shared_access_key)) => {
                Ok(Some(ConnectionString {
                    hostname: hostname.clone(),
                    device_id: device_id.clone(),
                    shared_access_key: shared_access_key.clone(),
                }))
            }
            (None, _, _) => Err(TokenError::MissingParameter("hostname")),
            (_, None, _) => Err(TokenError::MissingParameter("device_id")),
            (_, _, None) => Err(TokenError::MissingParameter("shared_access_key")),
        }
    }

    /// Agent settings for `device_id`
    pub fn settings(&self, device_id: impl Into<String>) -> AgentSettings {
        AgentSettings {
            device_id: device_id.into(),
            telemetry_interval: Duration::from_secs(self.telemetry_interval_secs.max(1)),
            light_pin: self.light_pin,
            green_led_pin: self.green_led_pin,
            blink_period: Duration::from_millis(self.blink_period_ms),
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
        }
    }
}

/// Runtime settings handed to the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    /// Device id used in telemetry and the device announcement
    pub device_id: String,
    /// Initial time between telemetry messages
    pub telemetry_interval: Duration,
    /// Pin driven by SetLight and BlinkLight
    pub light_pin: u8,
    /// Status LED configured after a good sensor read
    pub green_led_pin: u8,
    /// Time the light stays on, and then off, per blink
    pub blink_period: Duration,
    /// Time between keep-alive pings
    pub ping_interval: Duration,
}
