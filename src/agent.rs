//! The remote monitoring device agent
//!
//! Sends a device announcement and its reported properties on start, then alternates between
//! publishing telemetry and handling whatever the hub sends: desired property patches, direct
//! method invocations and cloud to device commands.

use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::AgentSettings;
use crate::firmware::FirmwareUpdater;
use crate::formatted;
use crate::gpio::{Gpio, Level, PinMode};
use crate::message::{DirectMethodInvocation, DirectMethodResponse, Message, MessageType};
use crate::model::{Command, DeviceInfo, Disposition, Thermostat};
use crate::sensor::Sensor;
use crate::strings::{extract_number, extract_number_after, ExtractError, FormattedBuffer};
use crate::transport::Transport;

/// Key preceding the telemetry interval in a desired properties patch
pub const TELEMETRY_INTERVAL_KEY: &[u8] = b"\"TelemetryInterval\":";

/// Upper bound on blinks per invocation
pub const MAX_BLINKS: i64 = 20;

/// Method status: done
pub const STATUS_OK: i32 = 200;
/// Method status: payload not understood
pub const STATUS_BAD_REQUEST: i32 = 400;
/// Method status: no such method
pub const STATUS_NOT_FOUND: i32 = 404;
/// Method status: hardware or updater failed
pub const STATUS_ERROR: i32 = 500;

/// Mutable agent state that the cloud can change
#[derive(Debug, Clone)]
pub struct AgentState {
    telemetry_interval: Duration,
    thermostat: Thermostat,
    messages_sent: u64,
    reports_sent: u64,
}

impl AgentState {
    /// Time between telemetry messages
    pub fn telemetry_interval(&self) -> Duration {
        self.telemetry_interval
    }

    /// Last values sent (or about to be sent) as telemetry
    pub fn thermostat(&self) -> &Thermostat {
        &self.thermostat
    }
}

#[derive(Debug, Deserialize)]
struct FirmwareUpdateRequest {
    #[serde(rename = "FwPackageUri")]
    fw_package_uri: String,
}

/// Status code and body answering a direct method
pub type MethodOutcome = (i32, FormattedBuffer);

fn reply(status: i32, message: impl fmt::Display) -> crate::Result<MethodOutcome> {
    let body = formatted!("{}", json!({ "message": message.to_string() }))?;
    Ok((status, body))
}

/// Device agent bound to a hub transport and its local hardware
#[derive(Debug)]
pub struct Agent<T, S, G, F> {
    transport: T,
    sensor: S,
    gpio: G,
    firmware: F,
    settings: AgentSettings,
    state: AgentState,
}

impl<T, S, G, F> Agent<T, S, G, F>
where
    T: Transport,
    S: Sensor,
    G: Gpio,
    F: FirmwareUpdater,
{
    /// Assemble an agent; nothing is sent until [`start`](Self::start)
    pub fn new(transport: T, sensor: S, gpio: G, firmware: F, settings: AgentSettings) -> Self {
        let state = AgentState {
            telemetry_interval: settings.telemetry_interval,
            thermostat: Thermostat::new(settings.device_id.clone()),
            messages_sent: 0,
            reports_sent: 0,
        };

        Self {
            transport,
            sensor,
            gpio,
            firmware,
            settings,
            state,
        }
    }

    /// State the cloud has changed so far
    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// Pins driven by the light methods
    pub fn gpio(&self) -> &G {
        &self.gpio
    }

    /// Updater handed firmware packages
    pub fn firmware(&self) -> &F {
        &self.firmware
    }

    /// Announce the device, its methods and its configuration
    pub async fn start(&mut self) -> crate::Result<()> {
        self.send_device_info().await?;
        self.report_supported_methods().await?;
        self.report_config().await
    }

    async fn send_device_info(&mut self) -> crate::Result<()> {
        let info = DeviceInfo::new(self.settings.device_id.clone(), self.sensor.is_simulated());
        let msg = Message::builder()
            .set_body(serde_json::to_vec(&info)?)
            .set_content_type("application/json")
            .set_content_encoding("utf-8")
            .build();

        self.transport.send_message(msg).await?;
        info!("Sent device info for {}", self.settings.device_id);
        Ok(())
    }

    async fn update_reported_properties(&mut self, report: FormattedBuffer) -> crate::Result<()> {
        self.state.reports_sent += 1;
        let request_id = self.state.reports_sent.to_string();

        match self
            .transport
            .send_property_update(&request_id, report.as_str())
            .await
        {
            Ok(()) => {
                info!("Succeeded in updating reported properties: {}", report);
                Ok(())
            }
            Err(err) => {
                error!("Failed to update reported properties {}: {}", report, err);
                Err(err)
            }
        }
    }

    async fn report_supported_methods(&mut self) -> crate::Result<()> {
        let report = formatted!(
            "{}",
            json!({
                "SupportedMethods": {
                    "SetLight--onoff-int": "Set light status 0 off 1 on",
                    "BlinkLight--count-int": "Blink the light count times",
                    "InitiateFirmwareUpdate--FwPackageUri-string":
                        "Updates device Firmware. Use parameter FwPackageUri to specify the URI of the firmware file",
                }
            })
        )?;
        self.update_reported_properties(report).await
    }

    async fn report_config(&mut self) -> crate::Result<()> {
        let report = formatted!(
            "{}",
            json!({ "Config": { "TelemetryInterval": self.state.telemetry_interval.as_secs() } })
        )?;
        self.update_reported_properties(report).await
    }

    /// Apply a desired properties patch
    ///
    /// The patch is echoed back as `Device.LastDesiredPropertyChange`. A positive
    /// `TelemetryInterval` replaces the current interval and is reported back under `Config`;
    /// anything else leaves the interval alone. Failed reports are logged and do not keep the
    /// interval from being applied.
    pub async fn on_desired_property_changed(&mut self, payload: &[u8]) -> crate::Result<()> {
        let text = String::from_utf8_lossy(payload);
        info!("Property changed: {}", text);

        let report = formatted!(
            "{}",
            json!({ "Device": { "LastDesiredPropertyChange": text } })
        )?;
        // update_reported_properties logs its own failures
        let _ = self.update_reported_properties(report).await;

        match extract_number_after(payload, TELEMETRY_INTERVAL_KEY) {
            Ok(seconds) if seconds > 0 => {
                self.state.telemetry_interval = Duration::from_secs(seconds as u64);
                info!("Telemetry interval set to {}", seconds);
                let _ = self.report_config().await;
            }
            Ok(seconds) => warn!("Ignoring telemetry interval {}", seconds),
            Err(ExtractError::KeyNotFound) => {}
            Err(err) => warn!("Ignoring telemetry interval: {}", err),
        }

        Ok(())
    }

    /// Apply the desired section of a full twin document
    pub async fn on_twin_response(&mut self, body: &[u8]) -> crate::Result<()> {
        if body.is_empty() {
            return Ok(());
        }

        let twin: serde_json::Value = match serde_json::from_slice(body) {
            Ok(twin) => twin,
            Err(err) => {
                warn!("Ignoring unparseable twin: {}", err);
                return Ok(());
            }
        };

        match twin.get("desired") {
            Some(desired) => {
                let desired = serde_json::to_vec(desired)?;
                self.on_desired_property_changed(&desired).await
            }
            None => Ok(()),
        }
    }

    /// Run the direct method `method_name`
    pub async fn on_method_invoked(
        &mut self,
        method_name: &str,
        payload: &[u8],
    ) -> crate::Result<MethodOutcome> {
        info!(
            "Method call: name = {}, payload = {}",
            method_name,
            String::from_utf8_lossy(payload)
        );

        match method_name {
            "SetLight" => self.set_light(payload),
            "BlinkLight" => self.blink_light(payload).await,
            "InitiateFirmwareUpdate" => self.initiate_firmware_update(payload),
            _ => reply(
                STATUS_NOT_FOUND,
                format_args!("Unknown method {}", method_name),
            ),
        }
    }

    fn set_light(&mut self, payload: &[u8]) -> crate::Result<MethodOutcome> {
        let status = match extract_number(payload) {
            Ok(status) => status,
            Err(_) => return reply(STATUS_BAD_REQUEST, "Invalid payload"),
        };

        let pin = self.settings.light_pin;
        let result = self
            .gpio
            .set_pin_mode(pin, PinMode::Output)
            .and_then(|_| self.gpio.write_pin(pin, Level::from(status != 0)));
        if let Err(err) = result {
            error!("Failed to set light: {}", err);
            return reply(STATUS_ERROR, format_args!("gpio failure: {}", err));
        }

        reply(STATUS_OK, format_args!("led status: {}", status))
    }

    async fn blink_light(&mut self, payload: &[u8]) -> crate::Result<MethodOutcome> {
        let count = match extract_number(payload) {
            Ok(count) => count.max(1).min(MAX_BLINKS),
            Err(ExtractError::NotFound) => 1,
            Err(_) => return reply(STATUS_BAD_REQUEST, "Invalid payload"),
        };

        let pin = self.settings.light_pin;
        if let Err(err) = self.blink(pin, count).await {
            error!("Failed to blink light: {}", err);
            return reply(STATUS_ERROR, format_args!("gpio failure: {}", err));
        }

        reply(STATUS_OK, format_args!("blinked {} times", count))
    }

    async fn blink(&mut self, pin: u8, count: i64) -> crate::Result<()> {
        self.gpio.set_pin_mode(pin, PinMode::Output)?;
        for _ in 0..count {
            self.gpio.write_pin(pin, Level::High)?;
            time::sleep(self.settings.blink_period).await;
            self.gpio.write_pin(pin, Level::Low)?;
            time::sleep(self.settings.blink_period).await;
        }
        Ok(())
    }

    fn initiate_firmware_update(&mut self, payload: &[u8]) -> crate::Result<MethodOutcome> {
        let request: FirmwareUpdateRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(_) => return reply(STATUS_BAD_REQUEST, "Invalid payload: expected FwPackageUri"),
        };

        if let Err(err) = self.firmware.initiate(&request.fw_package_uri) {
            error!("Firmware update failed: {}", err);
            return reply(STATUS_ERROR, format_args!("firmware update failed: {}", err));
        }

        reply(STATUS_OK, "firmware update initiated")
    }

    async fn handle_direct_method(
        &mut self,
        invocation: DirectMethodInvocation,
    ) -> crate::Result<()> {
        let (status, body) = self
            .on_method_invoked(&invocation.method_name, &invocation.message.body)
            .await?;
        self.transport
            .respond_to_direct_method(DirectMethodResponse::with_buffer(
                invocation.request_id,
                status,
                body,
            ))
            .await
    }

    /// Execute a command carried by a cloud to device message
    pub fn on_c2d_message(&mut self, message: &Message) -> Disposition {
        let text = match std::str::from_utf8(&message.body) {
            Ok(text) => text,
            Err(_) => {
                warn!("Cloud to device message is not UTF-8");
                return Disposition::Abandoned;
            }
        };

        match serde_json::from_str::<Command>(text) {
            Ok(Command::SetTemperature { temperature }) => {
                info!("Received temperature {}", temperature);
                self.state.thermostat.temperature = temperature;
                Disposition::Accepted
            }
            Ok(Command::SetHumidity { humidity }) => {
                info!("Received humidity {}", humidity);
                self.state.thermostat.humidity = humidity;
                Disposition::Accepted
            }
            Err(err) => {
                warn!("Rejecting command {}: {}", text, err);
                Disposition::Rejected
            }
        }
    }

    /// Read the sensor and publish one telemetry message
    ///
    /// A failed read publishes the fallback values instead.
    pub async fn sample_and_send(&mut self) -> crate::Result<()> {
        match self.sensor.read() {
            Ok(reading) => {
                self.state.thermostat.apply_reading(&reading);
                info!(
                    "Read Sensor Data: Humidity = {:.1}% Temperature = {:.1}*C",
                    reading.humidity_pct, reading.temperature_c
                );
                if let Err(err) = self
                    .gpio
                    .set_pin_mode(self.settings.green_led_pin, PinMode::Output)
                {
                    warn!("Failed to configure status LED: {}", err);
                }
            }
            Err(err) => {
                warn!("Sensor read failed, sending defaults: {}", err);
                self.state.thermostat.reset_to_defaults();
            }
        }

        info!(
            "Sending sensor value Temperature = {}, Humidity = {}",
            self.state.thermostat.temperature, self.state.thermostat.humidity
        );

        let msg = Message::builder()
            .set_body(serde_json::to_vec(&self.state.thermostat)?)
            .set_message_id(format!("{}-t", self.state.messages_sent))
            .set_content_type("application/json")
            .set_content_encoding("utf-8")
            .build();
        self.transport.send_message(msg).await?;
        self.state.messages_sent += 1;
        Ok(())
    }

    async fn dispatch(&mut self, incoming: MessageType) -> crate::Result<()> {
        match incoming {
            MessageType::C2DMessage(msg) => {
                let disposition = self.on_c2d_message(&msg);
                debug!("Cloud to device message {:?}", disposition);
                Ok(())
            }
            MessageType::DesiredPropertyUpdate(msg) => {
                self.on_desired_property_changed(&msg.body).await
            }
            MessageType::TwinResponse(msg) => self.on_twin_response(&msg.body).await,
            MessageType::DirectMethod(invocation) => self.handle_direct_method(invocation).await,
            MessageType::ErrorReceive(err) => {
                error!("Error during receive {:?}", err);
                Ok(())
            }
        }
    }

    /// Publish telemetry every interval and handle incoming traffic in between
    ///
    /// A due telemetry sample goes first, then a due keep-alive ping, then incoming traffic.
    /// Returns once `receiver` is closed, which happens when the connection goes away.
    pub async fn run(&mut self, mut receiver: Receiver<MessageType>) -> crate::Result<()> {
        let mut keep_alive = time::interval(self.settings.ping_interval);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if let Err(err) = self.sample_and_send().await {
                error!("Failed sending sensor value: {}", err);
            }

            let next_sample = Instant::now() + self.state.telemetry_interval;
            loop {
                tokio::select! {
                    biased;

                    _ = time::sleep_until(next_sample) => break,
                    _ = keep_alive.tick() => {
                        if let Err(err) = self.transport.ping().await {
                            warn!("Ping failed: {}", err);
                        }
                    }
                    incoming = receiver.recv() => match incoming {
                        Some(incoming) => {
                            if let Err(err) = self.dispatch(incoming).await {
                                error!("Failed handling message: {}", err);
                            }
                        }
                        None => {
                            info!("Hub connection closed");
                            return Ok(());
                        }
                    },
                }
            }
        }
    }
}
