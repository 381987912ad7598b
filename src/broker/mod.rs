//! MQTT control plane
//!
//! A loosely coupled subsystem next to the audio relays: it maintains one
//! broker connection, publishes bus telemetry as JSON events and turns
//! JSON commands into bus messages. Broker availability never affects the
//! audio path: the link retries forever on a fixed delay and events that
//! cannot be published are dropped with a warning.

pub mod config;
pub mod connection;
pub mod publisher;
pub mod subscriber;

pub use config::BrokerConfig;
pub use connection::{BrokerConnection, BrokerHandle, CommandHandler, ConnectionState};
pub use publisher::EventPublisher;
pub use subscriber::CommandSubscriber;
