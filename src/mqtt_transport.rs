use mqtt::control::variable_header::ConnectReturnCode;
use mqtt::packet::*;
use mqtt::Encodable;
use mqtt::TopicName;
use mqtt::{QualityOfService, TopicFilter};
use tokio::io::AsyncWriteExt;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::Mutex;
use tokio_native_tls::{TlsConnector, TlsStream};

use async_trait::async_trait;

use crate::message::{DirectMethodInvocation, DirectMethodResponse, Message, MessageType};
use crate::transport::RECEIVE_CHANNEL_CAPACITY;
use crate::{token::TokenSource, transport::Transport, Error};
use chrono::{Duration, Utc};
use std::sync::Arc;

const MQTT_TLS_PORT: u16 = 8883;
const KEEP_ALIVE: u16 = 10;
const API_VERSION: &str = "2018-06-30";
const SUBSCRIBE_PACKET_ID: u16 = 10;
// Request id of the twin fetched right after subscribing
const INITIAL_TWIN_REQUEST_ID: &str = "0";
// Receive loop stops after this many packet errors in a row
const MAX_CONSECUTIVE_RECEIVE_ERRORS: usize = 5;

const REQUEST_ID_PARAM: &str = "?$rid=";
const METHOD_POST_PREFIX: &str = "$iothub/methods/POST/";
const TWIN_RESPONSE_PREFIX: &str = "$iothub/twin/res/";
const TWIN_DESIRED_PREFIX: &str = "$iothub/twin/PATCH/properties/desired/";
const TWIN_REPORTED_PREFIX: &str = "$iothub/twin/PATCH/properties/reported/";

/// Topic layout of the hub's MQTT endpoint for one device
#[derive(Debug, Clone)]
struct Topics {
    events: String,
    device_bound: String,
}

impl Topics {
    fn new(device_id: &str) -> Self {
        Self {
            events: format!("devices/{}/messages/events/", device_id),
            device_bound: format!("devices/{}/messages/devicebound/", device_id),
        }
    }

    fn filter_patterns(&self) -> Vec<String> {
        [
            METHOD_POST_PREFIX,
            self.device_bound.as_str(),
            TWIN_RESPONSE_PREFIX,
            TWIN_DESIRED_PREFIX,
        ]
        .iter()
        .map(|prefix| format!("{}#", prefix))
        .collect()
    }

    fn filters(&self) -> crate::Result<Vec<TopicFilter>> {
        self.filter_patterns()
            .into_iter()
            .map(|pattern| TopicFilter::new(pattern).map_err(Error::from))
            .collect()
    }

    fn method_response(status: i32, request_id: &str) -> String {
        format!("$iothub/methods/res/{}/{}{}", status, REQUEST_ID_PARAM, request_id)
    }

    fn twin_get(request_id: &str) -> String {
        format!("$iothub/twin/GET/{}{}", REQUEST_ID_PARAM, request_id)
    }

    fn twin_reported(request_id: &str) -> String {
        format!("{}{}{}", TWIN_REPORTED_PREFIX, REQUEST_ID_PARAM, request_id)
    }

    /// Sort an incoming publish by the topic it arrived on
    fn classify(&self, topic: &str, mut message: Message) -> Option<MessageType> {
        if let Some(properties) = topic.strip_prefix(self.device_bound.as_str()) {
            let pairs =
                serde_urlencoded::from_str::<Vec<(String, String)>>(properties).unwrap_or_default();
            for (key, value) in pairs {
                if key.starts_with("$.") {
                    message.system_properties.insert(key, value);
                } else {
                    message.properties.insert(key, value);
                }
            }
            return Some(MessageType::C2DMessage(message));
        }

        if topic.starts_with(TWIN_DESIRED_PREFIX) {
            return Some(MessageType::DesiredPropertyUpdate(message));
        }

        if topic.starts_with(TWIN_RESPONSE_PREFIX) {
            return Some(MessageType::TwinResponse(message));
        }

        // $iothub/methods/POST/{method name}/?$rid={request id}
        let details = topic.strip_prefix(METHOD_POST_PREFIX)?;
        let (method_name, rest) = details.split_at(details.find('/')?);
        let request_id = rest[1..].strip_prefix(REQUEST_ID_PARAM)?;

        Some(MessageType::DirectMethod(DirectMethodInvocation {
            method_name: method_name.to_string(),
            message,
            request_id: request_id.to_string(),
        }))
    }
}

fn encode_error<E: std::fmt::Debug>(err: E) -> Error {
    Error::Other(format!("Failed to encode packet {:?}", err))
}

async fn tls_connect(hub_name: &str) -> crate::Result<TlsStream<TcpStream>> {
    let socket = TcpStream::connect((hub_name, MQTT_TLS_PORT)).await?;
    trace!("Connected to tcp socket {:?}", socket);

    let connector = TlsConnector::from(
        native_tls::TlsConnector::builder()
            .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
            .build()?,
    );
    Ok(connector.connect(hub_name, socket).await?)
}

async fn mqtt_connect(
    hub_name: &str,
    device_id: &str,
    user_name: String,
    password: String,
) -> crate::Result<TlsStream<TcpStream>> {
    let mut socket = tls_connect(hub_name).await?;

    let mut connect = ConnectPacket::new(device_id);
    connect.set_clean_session(false);
    connect.set_keep_alive(KEEP_ALIVE);
    connect.set_user_name(Some(user_name));
    connect.set_password(Some(password));

    let mut buf = Vec::new();
    connect.encode(&mut buf).map_err(encode_error)?;
    socket.write_all(&buf).await?;

    match VariablePacket::parse(&mut socket).await {
        Ok(VariablePacket::ConnackPacket(connack)) => {
            trace!("CONNACK {:?}", connack);
            match connack.connect_return_code() {
                ConnectReturnCode::ConnectionAccepted => Ok(socket),
                code => Err(Error::Connect(format!("return code {:?}", code))),
            }
        }
        Ok(packet) => Err(Error::Connect(format!(
            "expected CONNACK, received {:?}",
            packet
        ))),
        Err(err) => Err(Error::Connect(format!("unreadable CONNACK: {}", err))),
    }
}

/// Hub connection over MQTT on TLS
#[derive(Debug, Clone)]
pub struct MqttTransport {
    write_socket: Arc<Mutex<WriteHalf<TlsStream<TcpStream>>>>,
    read_socket: Arc<Mutex<ReadHalf<TlsStream<TcpStream>>>>,
    topics: Topics,
}

impl MqttTransport {
    /// Connect to `hub_name` as `device_id`, authenticating with a token from `token_source`
    ///
    /// The token is valid for one day.
    pub async fn new<TS>(
        hub_name: &str,
        device_id: String,
        token_source: &TS,
    ) -> crate::Result<MqttTransport>
    where
        TS: TokenSource + ?Sized,
    {
        let user_name = format!("{}/{}/?api-version={}", hub_name, device_id, API_VERSION);
        let expiry = Utc::now() + Duration::days(1);
        trace!("Generating token that will expire at {}", expiry);
        let token = token_source.get(&expiry);

        let socket = mqtt_connect(hub_name, &device_id, user_name, token).await?;
        info!("Connected to {} as {}", hub_name, device_id);

        let (read_socket, write_socket) = tokio::io::split(socket);
        Ok(Self {
            write_socket: Arc::new(Mutex::new(write_socket)),
            read_socket: Arc::new(Mutex::new(read_socket)),
            topics: Topics::new(&device_id),
        })
    }

    async fn write_packet(&self, buf: &[u8]) -> crate::Result<()> {
        self.write_socket.lock().await.write_all(buf).await?;
        Ok(())
    }

    async fn publish(&self, topic: TopicName, payload: Vec<u8>) -> crate::Result<()> {
        let packet = PublishPacket::new(topic, QoSWithPacketIdentifier::Level0, payload);
        let mut buf = Vec::new();
        packet.encode(&mut buf).map_err(encode_error)?;
        self.write_packet(&buf).await
    }

    async fn subscribe(&self) -> crate::Result<()> {
        let topics: Vec<_> = self
            .topics
            .filters()?
            .into_iter()
            .map(|filter| (filter, QualityOfService::Level0))
            .collect();
        trace!("Subscribing to {:?}", topics);

        let packet = SubscribePacket::new(SUBSCRIBE_PACKET_ID, topics);
        let mut buf = Vec::new();
        packet.encode(&mut buf).map_err(encode_error)?;
        self.write_packet(&buf).await
    }

    async fn unsubscribe(&self) -> crate::Result<()> {
        let packet = UnsubscribePacket::new(SUBSCRIBE_PACKET_ID, self.topics.filters()?);
        let mut buf = Vec::new();
        packet.encode(&mut buf).map_err(encode_error)?;
        self.write_packet(&buf).await
    }

    /// Read packets until the connection fails or `handler_tx` is closed
    async fn receive_loop(&self, handler_tx: Sender<MessageType>) {
        let mut consecutive_errors = 0;
        loop {
            let packet = {
                let mut socket = self.read_socket.lock().await;
                VariablePacket::parse(&mut *socket).await
            };

            let incoming = match packet {
                Ok(VariablePacket::PublishPacket(publish)) => {
                    consecutive_errors = 0;
                    let message = Message::new(publish.payload_ref().to_vec());
                    trace!("PUBLISH ({}): {:?}", publish.topic_name(), message);
                    match self.topics.classify(publish.topic_name(), message) {
                        Some(incoming) => incoming,
                        None => {
                            warn!("Ignoring publish on topic {}", publish.topic_name());
                            continue;
                        }
                    }
                }
                Ok(VariablePacket::PingrespPacket(..)) => {
                    consecutive_errors = 0;
                    debug!("PINGRESP");
                    continue;
                }
                Ok(packet) => {
                    consecutive_errors = 0;
                    trace!("Received {:?}", packet);
                    continue;
                }
                Err(err) => {
                    consecutive_errors += 1;
                    error!("Error in receiving packet {}", err);
                    MessageType::ErrorReceive(err)
                }
            };

            if handler_tx.send(incoming).await.is_err()
                || consecutive_errors >= MAX_CONSECUTIVE_RECEIVE_ERRORS
            {
                break;
            }
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn send_message(&mut self, message: Message) -> crate::Result<()> {
        let topic = build_topic_name(&self.topics.events, &message)?;
        trace!("Sending message {:?} to topic {:?}", message, topic);
        self.publish(topic, message.body).await
    }

    async fn send_property_update(&mut self, request_id: &str, body: &str) -> crate::Result<()> {
        trace!("Publishing reported properties with rid = {}", request_id);
        let topic = TopicName::new(Topics::twin_reported(request_id))?;
        self.publish(topic, body.as_bytes().to_vec()).await
    }

    async fn respond_to_direct_method(
        &mut self,
        response: DirectMethodResponse,
    ) -> crate::Result<()> {
        trace!(
            "Responding to direct method with rid = {}",
            response.request_id
        );
        let topic = TopicName::new(Topics::method_response(
            response.status,
            &response.request_id,
        ))?;
        self.publish(topic, response.body.into_bytes()).await
    }

    async fn ping(&mut self) -> crate::Result<()> {
        debug!("PINGREQ");
        let mut buf = Vec::new();
        PingreqPacket::new()
            .encode(&mut buf)
            .map_err(encode_error)?;
        self.write_packet(&buf).await
    }

    async fn get_receiver(&mut self) -> crate::Result<Receiver<MessageType>> {
        let (handler_tx, handler_rx) = channel::<MessageType>(RECEIVE_CHANNEL_CAPACITY);

        let receiving = self.clone();
        tokio::spawn(async move {
            receiving.receive_loop(handler_tx).await;
            if let Err(err) = receiving.unsubscribe().await {
                debug!("Unsubscribe after receive loop ended failed: {}", err);
            }
        });

        self.subscribe().await?;

        // Desired properties set while the device was offline arrive with the full twin
        trace!("Requesting twin with rid = {}", INITIAL_TWIN_REQUEST_ID);
        let topic = TopicName::new(Topics::twin_get(INITIAL_TWIN_REQUEST_ID))?;
        self.publish(topic, Vec::new()).await?;

        Ok(handler_rx)
    }
}

/// Append the message's properties to `base_topic` as a url-encoded query
fn build_topic_name(base_topic: &str, message: &Message) -> crate::Result<TopicName> {
    let encoded = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(message.system_properties.iter())
        .extend_pairs(message.properties.iter())
        .finish();
    Ok(TopicName::new(format!("{}{}", base_topic, encoded))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> Topics {
        Topics::new("RaspPi")
    }

    #[test]
    fn content_type_is_appended_to_topic_name() {
        let message = Message::builder()
            .set_content_type("application/json")
            .build();

        let topic = build_topic_name("topic/", &message).unwrap();
        assert_eq!(topic.to_string(), "topic/%24.ct=application%2Fjson");
    }

    #[test]
    fn no_properties() {
        let topic = build_topic_name("topic/", &Message::new(vec![])).unwrap();
        assert_eq!(topic.to_string(), "topic/");
    }

    #[test]
    fn app_properties_are_appended_to_topic_name() {
        let message = Message::builder()
            .add_message_property("foo", "bar")
            .build();

        let topic = build_topic_name("topic/", &message).unwrap();
        assert_eq!(topic.to_string(), "topic/foo=bar");
    }

    #[test]
    fn direct_method_topic_is_split() {
        let incoming = topics().classify(
            "$iothub/methods/POST/SetLight/?$rid=42",
            Message::new(b"{\"onoff\":1}".to_vec()),
        );

        match incoming {
            Some(MessageType::DirectMethod(invocation)) => {
                assert_eq!(invocation.method_name, "SetLight");
                assert_eq!(invocation.request_id, "42");
                assert_eq!(invocation.message.body, b"{\"onoff\":1}");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn malformed_direct_method_topic_is_dropped() {
        let topics = topics();
        assert!(topics
            .classify("$iothub/methods/POST/SetLight", Message::default())
            .is_none());
        assert!(topics
            .classify("$iothub/methods/POST/SetLight/42", Message::default())
            .is_none());
    }

    #[test]
    fn device_bound_properties_are_parsed() {
        let incoming = topics().classify(
            "devices/RaspPi/messages/devicebound/%24.mid=abc&kind=command",
            Message::new(b"{}".to_vec()),
        );

        match incoming {
            Some(MessageType::C2DMessage(msg)) => {
                assert_eq!(msg.system_property("$.mid"), Some("abc"));
                assert_eq!(msg.property("kind"), Some("command"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn other_devices_messages_are_dropped() {
        assert!(topics()
            .classify("devices/Other/messages/devicebound/", Message::default())
            .is_none());
    }

    #[test]
    fn twin_topics_are_classified() {
        let topics = topics();
        assert!(matches!(
            topics.classify(
                "$iothub/twin/PATCH/properties/desired/?$version=3",
                Message::default()
            ),
            Some(MessageType::DesiredPropertyUpdate(_))
        ));
        assert!(matches!(
            topics.classify("$iothub/twin/res/200/?$rid=0", Message::default()),
            Some(MessageType::TwinResponse(_))
        ));
    }

    #[test]
    fn subscription_filters() {
        let topics = topics();
        assert_eq!(topics.filters().unwrap().len(), 4);
        assert_eq!(
            topics.filter_patterns(),
            vec![
                "$iothub/methods/POST/#",
                "devices/RaspPi/messages/devicebound/#",
                "$iothub/twin/res/#",
                "$iothub/twin/PATCH/properties/desired/#",
            ]
        );
    }

    #[test]
    fn outgoing_topics() {
        assert_eq!(
            Topics::method_response(200, "7"),
            "$iothub/methods/res/200/?$rid=7"
        );
        assert_eq!(
            Topics::twin_reported("3"),
            "$iothub/twin/PATCH/properties/reported/?$rid=3"
        );
        assert_eq!(Topics::twin_get("0"), "$iothub/twin/GET/?$rid=0");
        assert_eq!(topics().events, "devices/RaspPi/messages/events/");
    }
}
