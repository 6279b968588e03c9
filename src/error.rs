use std::path::PathBuf;
use thiserror::Error;

use crate::sensor::SensorError;
use crate::strings::FormatError;
use crate::token::TokenError;

/// Errors raised by the device agent and its hub connection
#[derive(Debug, Error)]
pub enum Error {
    ///
    #[error("i/o error: {0}")]
    IoError(#[from] std::io::Error),
    ///
    #[error("tls error: {0}")]
    TlsError(#[from] native_tls::Error),
    /// The broker refused the connection or answered with an unexpected packet
    #[error("failed to connect to hub: {0}")]
    Connect(String),
    /// A topic could not be built from the device id or message properties
    #[error("invalid topic name: {0}")]
    Topic(#[from] mqtt::topic_name::TopicNameError),
    /// A subscription filter could not be built from the device id
    #[error("invalid topic filter: {0}")]
    TopicFilter(#[from] mqtt::topic_filter::TopicFilterError),
    ///
    #[error("token error: {0}")]
    Token(#[from] TokenError),
    ///
    #[error("sensor error: {0}")]
    Sensor(#[from] SensorError),
    /// A pin could not be configured or written
    #[error("gpio error on pin {pin}: {reason}")]
    Gpio {
        /// Pin number
        pin: u8,
        /// What went wrong
        reason: String,
    },
    ///
    #[error("format error: {0}")]
    Format(#[from] FormatError),
    ///
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    ///
    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
    /// Another agent holds the instance lock
    #[error("another instance holds the lock on {}", .path.display())]
    AlreadyRunning {
        /// Lock file
        path: PathBuf,
    },
    /// The transport's receiver was already handed out
    #[error("receiver already taken")]
    ReceiverTaken,
    ///
    #[error("{0}")]
    Other(String),
}
