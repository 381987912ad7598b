//! Error types for the intercom bridge

use thiserror::Error;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream creation / configuration errors
///
/// These are the only errors surfaced synchronously to the caller; they are
/// never retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Device string error: {0}")]
    Device(#[from] crate::device::ParseError),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid stream parameters: {0}")]
    InvalidParams(String),

    #[error("Config file error: {0}")]
    File(String),
}

/// Audio relay errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Not enough buffered data: have {have} bytes, need {need}")]
    NotEnoughData { have: usize, need: usize },

    #[error("Processing graph error {code}: {message}")]
    Graph { code: i32, message: String },

    #[error("Stream is not running")]
    Stopped,
}

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Bus send failed: {0}")]
    BusSend(String),

    #[error("Bus subscription failed: {0}")]
    BusSubscribe(String),
}

/// Broker connection errors
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Not connected to broker")]
    NotConnected,

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Broker configuration invalid: {0}")]
    InvalidConfig(String),
}

/// Result type alias for the bridge
pub type Result<T> = std::result::Result<T, Error>;
