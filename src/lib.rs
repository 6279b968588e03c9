//! Remote monitoring device agent for Azure IoT Hub
//!
//! The agent reads a temperature/humidity sensor, publishes telemetry to an IoT hub and answers
//! a small set of remote commands: switching a light, blinking it and starting a firmware update.
//! Desired property patches can change the telemetry interval at runtime.
//!
//! Hardware and the hub connection sit behind traits ([`Sensor`], [`Gpio`], [`FirmwareUpdater`],
//! [`Transport`]) so the agent can run against simulated devices and an in-memory hub.
//!
//! The [`strings`] module holds the two payload helpers the agent is built on: pulling the first
//! number out of a raw JSON fragment, and rendering type-checked format arguments into an exactly
//! sized buffer.
//!
//! # Examples
//!
//! A dry run against the in-memory transport
//! ```no_run
//! use remote_monitoring::{
//!     Agent, AgentConfig, LoggingFirmwareUpdater, MemoryTransport, RecordingGpio, Sensor,
//!     SimulatedSensor, Transport,
//! };
//!
//! #[tokio::main]
//! async fn main() -> remote_monitoring::Result<()> {
//!     let config = AgentConfig::load()?;
//!     let (mut transport, _commands) = MemoryTransport::new();
//!     let receiver = transport.get_receiver().await?;
//!
//!     let mut sensor = SimulatedSensor::new()?;
//!     sensor.init()?;
//!
//!     let mut agent = Agent::new(
//!         transport,
//!         sensor,
//!         RecordingGpio::default(),
//!         LoggingFirmwareUpdater::default(),
//!         config.settings("RaspPi"),
//!     );
//!     agent.start().await?;
//!     agent.run(receiver).await
//! }
//! ```

#![warn(missing_debug_implementations, rust_2018_idioms, missing_docs)]

#[macro_use]
extern crate log;

/// The device agent
pub mod agent;
/// Agent configuration
pub mod config;
mod error;
/// Firmware update hand-off
pub mod firmware;
/// Pin control
pub mod gpio;
/// Process lock and privilege handling
#[cfg(unix)]
pub mod lock;
/// Message types for communicating with the IoT Hub
pub mod message;
/// Telemetry and command payloads
pub mod model;
/// MQTT hub connection
pub mod mqtt_transport;
/// Environmental sensors
pub mod sensor;
pub mod strings;
/// Shared access signatures
pub mod token;
/// Transport types
pub mod transport;

pub use agent::{Agent, AgentState};
pub use config::{AgentConfig, AgentSettings};
pub use error::Error;
pub use firmware::{FirmwareUpdater, LoggingFirmwareUpdater};
pub use gpio::{Gpio, Level, PinMode, RecordingGpio};
pub use message::{DirectMethodInvocation, DirectMethodResponse, Message, MessageType};
pub use mqtt_transport::MqttTransport;
pub use sensor::{Reading, Sensor, SensorError, SimulatedSensor};
pub use strings::{extract_number, FormattedBuffer};
pub use token::{DeviceKeyTokenSource, TokenSource};
pub use transport::{MemoryTransport, Transport};

/// Result type for agent and hub operations
pub type Result<T> = std::result::Result<T, Error>;
