use remote_monitoring::{
    Agent, AgentSettings, DeviceKeyTokenSource, DirectMethodInvocation, Level,
    LoggingFirmwareUpdater, MemoryTransport, Message, MessageType, MqttTransport, RecordingGpio,
    Sensor, SimulatedSensor, Transport,
};
use std::env;
use std::time::Duration;

fn settings() -> AgentSettings {
    AgentSettings {
        device_id: "RaspPi".to_string(),
        telemetry_interval: Duration::from_secs(3600),
        light_pin: 7,
        green_led_pin: 5,
        blink_period: Duration::from_millis(1),
        ping_interval: Duration::from_secs(3600),
    }
}

fn invocation(method_name: &str, request_id: &str, payload: &[u8]) -> MessageType {
    MessageType::DirectMethod(DirectMethodInvocation {
        method_name: method_name.to_string(),
        message: Message::new(payload.to_vec()),
        request_id: request_id.to_string(),
    })
}

#[tokio::test]
async fn agent_handles_hub_traffic_until_disconnect() {
    let (mut transport, commands) = MemoryTransport::new();
    let outbox = transport.outbox();
    let receiver = transport.get_receiver().await.unwrap();

    let mut sensor = SimulatedSensor::seeded(7).unwrap();
    sensor.init().unwrap();

    let mut agent = Agent::new(
        transport,
        sensor,
        RecordingGpio::default(),
        LoggingFirmwareUpdater::default(),
        settings(),
    );
    agent.start().await.unwrap();

    commands
        .send(invocation("SetLight", "1", b"{\"onoff\":1}"))
        .await
        .unwrap();
    commands
        .send(MessageType::DesiredPropertyUpdate(Message::new(
            br#"{"TelemetryInterval":42,"$version":2}"#.to_vec(),
        )))
        .await
        .unwrap();
    commands
        .send(MessageType::C2DMessage(Message::new(
            br#"{"Name":"SetHumidity","Parameters":{"humidity":33}}"#.to_vec(),
        )))
        .await
        .unwrap();
    commands
        .send(invocation("Reboot", "2", b"{}"))
        .await
        .unwrap();
    drop(commands);

    agent.run(receiver).await.unwrap();

    assert_eq!(agent.state().telemetry_interval(), Duration::from_secs(42));
    assert_eq!(agent.gpio().level(7), Some(Level::High));

    let outbox = outbox.lock().await;

    // Device info, then one telemetry sample before the receiver drained
    assert_eq!(outbox.messages.len(), 2);
    // The first keep-alive tick is due immediately, the next one an hour later
    assert_eq!(outbox.pings, 1);
    let telemetry: serde_json::Value = serde_json::from_slice(&outbox.messages[1].body).unwrap();
    assert_eq!(telemetry["DeviceId"], "RaspPi");

    let mut responses: Vec<_> = outbox
        .method_responses
        .iter()
        .map(|r| (r.request_id().to_string(), r.status()))
        .collect();
    responses.sort();
    assert_eq!(
        responses,
        vec![("1".to_string(), 200), ("2".to_string(), 404)]
    );

    // SupportedMethods, Config, echoed patch, new Config
    assert_eq!(outbox.property_updates.len(), 4);
    let config: serde_json::Value = serde_json::from_str(&outbox.property_updates[3].1).unwrap();
    assert_eq!(config["Config"]["TelemetryInterval"], 42);
}

#[tokio::test]
async fn receiver_can_only_be_taken_once() {
    let (mut transport, _commands) = MemoryTransport::new();
    assert!(transport.get_receiver().await.is_ok());
    assert!(transport.get_receiver().await.is_err());
}

fn test_config() -> (String, String, String) {
    (
        env::var("IOTHUB_HOSTNAME").unwrap_or_else(|_| "remote-monitoring.azure-devices.net".to_string()),
        env::var("IOT_DEVICE_ID").unwrap(),
        env::var("IOT_DEVICE_ACCESS_KEY").unwrap(),
    )
}

#[tokio::test]
#[ignore = "needs a live IoT hub"]
async fn test_connect() {
    let (hostname, device_id, access_key) = test_config();
    let token_source = DeviceKeyTokenSource::new(&hostname, &device_id, &access_key).unwrap();
    let transport = MqttTransport::new(&hostname, device_id, &token_source).await;
    assert!(transport.is_ok());
}
