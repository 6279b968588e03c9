//! Payloads exchanged with the remote monitoring solution

use serde::{Deserialize, Serialize};

use crate::sensor::Reading;

/// Temperature reported while the sensor cannot be read
pub const DEFAULT_TEMPERATURE: i32 = 50;
/// External temperature reported while the sensor cannot be read
pub const DEFAULT_EXTERNAL_TEMPERATURE: i32 = 55;
/// Humidity reported while the sensor cannot be read
pub const DEFAULT_HUMIDITY: i32 = 50;

/// Firmware version announced in [`DeviceInfo`]
pub const DEVICE_VERSION: &str = "1.0";

/// Telemetry sample sent on every tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Thermostat {
    /// Device the sample came from
    pub device_id: String,
    /// Degrees Celsius
    pub temperature: i32,
    /// Degrees Celsius outside the enclosure
    pub external_temperature: i32,
    /// Relative humidity in percent
    pub humidity: i32,
}

impl Thermostat {
    /// Thermostat holding the fallback values
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            temperature: DEFAULT_TEMPERATURE,
            external_temperature: DEFAULT_EXTERNAL_TEMPERATURE,
            humidity: DEFAULT_HUMIDITY,
        }
    }

    /// Take temperature and humidity from a sensor reading, truncating to whole units
    pub fn apply_reading(&mut self, reading: &Reading) {
        self.temperature = reading.temperature_c as i32;
        self.humidity = reading.humidity_pct as i32;
    }

    /// Go back to the fallback values
    pub fn reset_to_defaults(&mut self) {
        self.temperature = DEFAULT_TEMPERATURE;
        self.external_temperature = DEFAULT_EXTERNAL_TEMPERATURE;
        self.humidity = DEFAULT_HUMIDITY;
    }
}

/// Announcement sent once at startup so the solution knows the device and its commands
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceInfo {
    /// Always `DeviceInfo`
    pub object_type: &'static str,
    /// Whether the readings come from a simulated sensor
    pub is_simulated_device: bool,
    /// Agent firmware version
    pub version: &'static str,
    /// Identity of the device
    pub device_properties: DeviceProperties,
    /// Cloud to device commands understood by [`Command`]
    pub commands: Vec<CommandMetadata>,
}

impl DeviceInfo {
    /// Announcement for `device_id` listing every supported command
    pub fn new(device_id: impl Into<String>, is_simulated_device: bool) -> Self {
        Self {
            object_type: "DeviceInfo",
            is_simulated_device,
            version: DEVICE_VERSION,
            device_properties: DeviceProperties {
                device_id: device_id.into(),
                hub_enabled_state: true,
            },
            commands: vec![
                CommandMetadata::new("SetTemperature", "temperature", "int"),
                CommandMetadata::new("SetHumidity", "humidity", "int"),
            ],
        }
    }
}

/// Identity block of [`DeviceInfo`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceProperties {
    /// Registered device id
    #[serde(rename = "DeviceID")]
    pub device_id: String,
    /// Whether the hub accepts traffic from the device
    pub hub_enabled_state: bool,
}

/// Name and parameters of a command
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandMetadata {
    /// Command name as sent in `Name`
    pub name: &'static str,
    /// Parameters in call order
    pub parameters: Vec<ParameterMetadata>,
}

impl CommandMetadata {
    fn new(name: &'static str, parameter: &'static str, kind: &'static str) -> Self {
        Self {
            name,
            parameters: vec![ParameterMetadata {
                name: parameter,
                kind,
            }],
        }
    }
}

/// Name and type of a command parameter
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParameterMetadata {
    /// Key in `Parameters`
    pub name: &'static str,
    /// Parameter type as the solution names it, e.g. `int`
    #[serde(rename = "Type")]
    pub kind: &'static str,
}

/// Command sent as a cloud to device message
///
/// On the wire: `{"Name":"SetTemperature","Parameters":{"temperature":30}}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "Name", content = "Parameters")]
pub enum Command {
    /// Overwrite the reported temperature
    SetTemperature {
        /// Degrees Celsius
        temperature: i32,
    },
    /// Overwrite the reported humidity
    SetHumidity {
        /// Relative humidity in percent
        humidity: i32,
    },
}

/// What to tell the hub about a cloud to device message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Executed
    Accepted,
    /// Understood as a message but not as a command; do not redeliver
    Rejected,
    /// Could not be processed at all
    Abandoned,
}
