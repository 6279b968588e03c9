use log::{info, warn};
use remote_monitoring::{
    Agent, AgentConfig, AgentSettings, DeviceKeyTokenSource, FirmwareUpdater, Gpio,
    LoggingFirmwareUpdater, MemoryTransport, MqttTransport, RecordingGpio, Sensor,
    SimulatedSensor, Transport,
};

// Outgoing messages of each kind kept by the in-memory hub
const DRY_RUN_HISTORY: usize = 32;

async fn run_agent<T, S, G, F>(
    mut transport: T,
    sensor: S,
    gpio: G,
    firmware: F,
    settings: AgentSettings,
) -> remote_monitoring::Result<()>
where
    T: Transport,
    S: Sensor,
    G: Gpio,
    F: FirmwareUpdater,
{
    let receiver = transport.get_receiver().await?;
    let mut agent = Agent::new(transport, sensor, gpio, firmware, settings);
    agent.start().await?;
    agent.run(receiver).await
}

#[tokio::main]
async fn main() -> remote_monitoring::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AgentConfig::load()?;

    #[cfg(unix)]
    let _lock = remote_monitoring::lock::InstanceLock::acquire(&config.lock_file)?;

    let mut sensor = SimulatedSensor::new()?;
    sensor.init()?;
    let reading = sensor.read()?;
    info!(
        "Sensor ready: Temperature = {:.1}*C Pressure = {:.0}Pa Humidity = {:.1}%",
        reading.temperature_c, reading.pressure_pa, reading.humidity_pct
    );

    #[cfg(unix)]
    remote_monitoring::lock::drop_privileges()?;

    let gpio = RecordingGpio::default();
    let firmware = LoggingFirmwareUpdater::default();

    match config.credentials()? {
        Some(credentials) => {
            let token_source = DeviceKeyTokenSource::new(
                &credentials.hostname,
                &credentials.device_id,
                &credentials.shared_access_key,
            )?;
            let transport = MqttTransport::new(
                &credentials.hostname,
                credentials.device_id.clone(),
                &token_source,
            )
            .await?;
            let settings = config.settings(credentials.device_id);
            run_agent(transport, sensor, gpio, firmware, settings).await
        }
        None => {
            warn!("No hub credentials configured, running against an in-memory hub");
            let device_id = config
                .device_id
                .clone()
                .unwrap_or_else(|| "RaspPi".to_string());
            let (transport, _commands) = MemoryTransport::with_limit(DRY_RUN_HISTORY);
            run_agent(transport, sensor, gpio, firmware, config.settings(device_id)).await
        }
    }
}
