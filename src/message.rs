use mqtt::packet::VariablePacketError;
use std::collections::HashMap;

use crate::strings::FormattedBuffer;

/// System property key for the message id
pub const MESSAGE_ID: &str = "$.mid";
/// System property key for the content type
pub const CONTENT_TYPE: &str = "$.ct";
/// System property key for the content encoding
pub const CONTENT_ENCODING: &str = "$.ce";

/// Traffic arriving from the hub, sorted by the topic it came in on
#[derive(Debug)]
pub enum MessageType {
    /// Command or notification sent to this device
    C2DMessage(Message),
    /// Patch of the desired section of the twin
    DesiredPropertyUpdate(Message),
    /// Hub answering a twin request, such as the full twin fetched on subscribe
    TwinResponse(Message),
    /// Direct method call waiting for a [`DirectMethodResponse`]
    DirectMethod(DirectMethodInvocation),
    /// A packet could not be read off the connection
    ErrorReceive(VariablePacketError),
}

/// Status and JSON body answering a [`DirectMethodInvocation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMethodResponse {
    pub(crate) status: i32,
    pub(crate) request_id: String,
    pub(crate) body: String,
}

impl DirectMethodResponse {
    /// Answer `request_id`; a missing body is sent as an empty payload
    pub fn new(request_id: String, status: i32, body: Option<String>) -> Self {
        Self {
            status,
            request_id,
            body: body.unwrap_or_default(),
        }
    }

    /// Answer `request_id` with a rendered buffer as the body
    pub fn with_buffer(request_id: String, status: i32, body: FormattedBuffer) -> Self {
        Self::new(request_id, status, Some(body.into()))
    }

    /// Status code returned to the caller
    pub fn status(&self) -> i32 {
        self.status
    }

    /// Request being answered
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// JSON payload
    pub fn body(&self) -> &str {
        &self.body
    }
}

/// Payload plus the properties carried on its topic
#[derive(Default, Debug, Clone)]
pub struct Message {
    /// Raw payload, usually JSON
    pub body: Vec<u8>,
    pub(crate) properties: HashMap<String, String>,
    pub(crate) system_properties: HashMap<String, String>,
}

impl Message {
    /// Message with only a body
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            ..Default::default()
        }
    }

    /// Start a message with properties
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    /// Application property set on the message
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// System property such as [`CONTENT_TYPE`]
    pub fn system_property(&self, key: &str) -> Option<&str> {
        self.system_properties.get(key).map(String::as_str)
    }
}

/// Builds a [`Message`] one property at a time
#[derive(Debug, Default)]
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    /// Payload bytes
    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.message.body = body.into();
        self
    }

    /// Identifier the hub uses to deduplicate
    pub fn set_message_id(self, message_id: impl Into<String>) -> Self {
        self.system_property(MESSAGE_ID, message_id)
    }

    /// Set to `application/json` to let the hub route on the body
    pub fn set_content_type(self, content_type: impl Into<String>) -> Self {
        self.system_property(CONTENT_TYPE, content_type)
    }

    /// `utf-8`, `utf-16` or `utf-32` for JSON bodies
    pub fn set_content_encoding(self, content_encoding: impl Into<String>) -> Self {
        self.system_property(CONTENT_ENCODING, content_encoding)
    }

    fn system_property(mut self, key: &str, value: impl Into<String>) -> Self {
        self.message
            .system_properties
            .insert(key.to_owned(), value.into());
        self
    }

    /// Application property, routed and filtered on by the hub
    pub fn add_message_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.message.properties.insert(key.into(), value.into());
        self
    }

    ///
    pub fn build(self) -> Message {
        self.message
    }
}

/// A direct method call from the cloud
#[derive(Debug)]
pub struct DirectMethodInvocation {
    /// Name the method was invoked with
    pub method_name: String,
    /// Request payload
    pub message: Message,
    /// Identifier to echo back in the response
    pub request_id: String,
}
