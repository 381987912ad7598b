//! MQTT broker connection
//!
//! Owns the rumqttc client and the event-loop thread behind it. The link
//! is self-healing: any connection error leads to a fixed-delay retry,
//! forever, and a successful reconnect re-subscribes the command filter.
//! Publishing fails per-call while the link is down; callers decide
//! whether that matters.

use parking_lot::Mutex;
use rumqttc::{
    Client, Event, Incoming, MqttOptions, Publish, QoS, TlsConfiguration,
    Transport as MqttTransport,
};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::broker::config::BrokerConfig;
use crate::constants::BROKER_RECONNECT_DELAY;
use crate::error::{BrokerError, Error};

/// Link state, observable by publishers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            2 => ConnectionState::Connected,
            1 => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Receives each command message (topic, UTF-8 payload); invoked on the
/// link thread
pub type CommandHandler = Box<dyn FnMut(&str, &str) + Send>;

struct ConnectionCore {
    client: Client,
    state: AtomicU8,
    run: AtomicBool,
    command_filter: String,
    event_topic: String,
    command_handler: Mutex<Option<CommandHandler>>,
}

impl ConnectionCore {
    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn resubscribe(&self) {
        if let Err(e) = self
            .client
            .try_subscribe(self.command_filter.clone(), QoS::AtMostOnce)
        {
            tracing::warn!(filter = %self.command_filter, error = %e, "broker: subscribe failed");
        }
    }

    fn dispatch(&self, publish: &Publish) {
        let payload = match std::str::from_utf8(&publish.payload) {
            Ok(payload) => payload,
            Err(_) => {
                tracing::warn!(topic = %publish.topic, "broker: dropping non-UTF-8 command");
                return;
            }
        };

        if !rumqttc::matches(&publish.topic, &self.command_filter) {
            tracing::debug!(topic = %publish.topic, "broker: ignoring message, topic mismatch");
            return;
        }

        if let Some(handler) = self.command_handler.lock().as_mut() {
            handler(&publish.topic, payload);
        }
    }
}

/// Cheap cloneable handle for publishing through the connection
#[derive(Clone)]
pub struct BrokerHandle {
    core: Arc<ConnectionCore>,
}

impl BrokerHandle {
    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    /// Publish a JSON event on the configured event topic
    pub fn publish_event(&self, payload: &serde_json::Value) -> Result<(), Error> {
        let topic = self.core.event_topic.clone();
        self.publish(&topic, &payload.to_string())
    }

    /// Publish a payload on an explicit topic.
    ///
    /// Fails immediately while the link is down; the retry policy lives in
    /// the link thread, not here.
    pub fn publish(&self, topic: &str, payload: &str) -> Result<(), Error> {
        if self.core.state() != ConnectionState::Connected {
            return Err(BrokerError::NotConnected.into());
        }

        self.core
            .client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| BrokerError::PublishFailed(e.to_string()))?;
        Ok(())
    }
}

/// The broker link: client options, event-loop thread and teardown
pub struct BrokerConnection {
    core: Arc<ConnectionCore>,
    link_thread: Option<JoinHandle<()>>,
}

impl BrokerConnection {
    /// Validate the configuration, start the client and spawn the link
    /// thread. Only configuration problems fail construction; an
    /// unreachable broker is retried in the background.
    pub fn connect(config: &BrokerConfig, handler: Option<CommandHandler>) -> Result<Self, Error> {
        config.validate()?;

        let mut options =
            MqttOptions::new(config.effective_client_id(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(60));

        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }

        if let Some(ca_file) = &config.ca_file {
            let ca = std::fs::read(ca_file).map_err(|e| {
                BrokerError::InvalidConfig(format!("CA file {}: {}", ca_file.display(), e))
            })?;
            options.set_transport(MqttTransport::Tls(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            }));
        }

        tracing::info!(
            host = %config.host,
            port = config.port,
            publish = %config.event_topic(),
            subscribe = %config.command_filter(),
            "broker: connecting"
        );

        let (client, mut link) = Client::new(options, 64);
        let core = Arc::new(ConnectionCore {
            client,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            run: AtomicBool::new(true),
            command_filter: config.command_filter(),
            event_topic: config.event_topic(),
            command_handler: Mutex::new(handler),
        });

        let loop_core = core.clone();
        let link_thread = thread::Builder::new()
            .name("broker-link".into())
            .spawn(move || {
                for event in link.iter() {
                    if !loop_core.run.load(Ordering::Relaxed) {
                        break;
                    }

                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            tracing::info!("broker: connected");
                            loop_core.set_state(ConnectionState::Connected);
                            loop_core.resubscribe();
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            loop_core.dispatch(&publish);
                        }
                        Ok(Event::Incoming(Incoming::Disconnect)) => {
                            loop_core.set_state(ConnectionState::Disconnected);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            loop_core.set_state(ConnectionState::Connecting);
                            tracing::warn!(error = %e, "broker: connection lost, retrying");
                            thread::sleep(BROKER_RECONNECT_DELAY);
                        }
                    }
                }
                loop_core.set_state(ConnectionState::Disconnected);
            })?;

        Ok(Self {
            core,
            link_thread: Some(link_thread),
        })
    }

    /// Publishing handle, freely cloneable across threads
    pub fn handle(&self) -> BrokerHandle {
        BrokerHandle {
            core: self.core.clone(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    /// Disconnect and join the link thread
    pub fn shutdown(&mut self) {
        self.core.run.store(false, Ordering::Relaxed);
        let _ = self.core.client.try_disconnect();

        if let Some(handle) = self.link_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BrokerConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_publish_fails_while_disconnected() {
        // No broker listens here; the handle must fail per-call without
        // blocking on the background retry loop.
        let config = BrokerConfig {
            host: "127.0.0.1".to_string(),
            port: 18_831,
            ..Default::default()
        };
        let mut connection = BrokerConnection::connect(&config, None).unwrap();
        let handle = connection.handle();

        let err = handle
            .publish_event(&serde_json::json!({"headset_id": 1}))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Broker(BrokerError::NotConnected)
        ));

        connection.shutdown();
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connect_rejects_invalid_config() {
        let config = BrokerConfig {
            port: 0,
            ..Default::default()
        };
        assert!(BrokerConnection::connect(&config, None).is_err());
    }
}
