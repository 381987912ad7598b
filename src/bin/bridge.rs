//! Intercom Bridge Application
//!
//! Opens the configured audio streams against a local bus fabric, wires
//! the MQTT control plane and runs until interrupted. The engine-side
//! handlers are demo stand-ins: outbound streams send a test tone and
//! inbound streams log what arrives.

use anyhow::Result;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use intercom_bridge::{
    broker::{BrokerConnection, CommandSubscriber, EventPublisher},
    config::{BridgeConfig, TransportKind},
    engine::{ReadHandler, WriteHandler},
    stream::{self, TransportBinding},
    transport::bus::LocalBusFabric,
};

/// Fills frames with a 440Hz tone so outbound streams carry audible audio
fn tone_writer() -> WriteHandler {
    let mut phase = 0usize;
    Box::new(move |frame| {
        let srate = frame.params.srate as f32;
        for sample in frame.data.chunks_exact_mut(2) {
            let t = phase as f32 / srate;
            let value = ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 8000.0) as i16;
            sample.copy_from_slice(&value.to_le_bytes());
            phase += 1;
        }
    })
}

/// Counts delivered frames and logs once a second
fn logging_reader(label: String) -> ReadHandler {
    let frames = AtomicUsize::new(0);
    Box::new(move |frame| {
        let n = frames.fetch_add(1, Ordering::Relaxed) + 1;
        let per_second = (1000 / frame.params.ptime_ms().max(1)) as usize;
        if n % per_second.max(1) == 0 {
            tracing::info!(stream = %label, frames = n, "inbound audio flowing");
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Intercom Bridge");

    let config = match std::env::args().nth(1) {
        Some(path) => BridgeConfig::load(Path::new(&path))?,
        None => {
            tracing::info!("no config file given, using defaults");
            BridgeConfig::default()
        }
    };

    let fabric = LocalBusFabric::new();

    // Control plane: commands from the broker go onto the bus, telemetry
    // from the bus goes to the broker.
    let subscriber = CommandSubscriber::new(Arc::new(fabric.endpoint()));
    let broker = BrokerConnection::connect(&config.broker, Some(subscriber.into_handler()))?;
    let _publisher = EventPublisher::to_broker(Arc::new(fabric.endpoint()), broker.handle())?;

    // Audio plane.
    let mut inbound = Vec::new();
    for (i, stream_config) in config.inbound.iter().enumerate() {
        let binding = match stream_config.transport {
            TransportKind::Udp => TransportBinding::Udp,
            TransportKind::Bus => TransportBinding::Bus(Arc::new(fabric.endpoint())),
        };
        let label = format!("inbound[{}] {}", i, stream_config.device);
        inbound.push(stream::open_inbound(
            stream_config,
            binding,
            logging_reader(label.clone()),
            Some(Box::new(move |code, message| {
                tracing::warn!(stream = %label, code, message, "stream ended");
            })),
        )?);
    }

    let mut outbound = Vec::new();
    for stream_config in &config.outbound {
        let binding = match stream_config.transport {
            TransportKind::Udp => TransportBinding::Udp,
            TransportKind::Bus => TransportBinding::Bus(Arc::new(fabric.endpoint())),
        };
        outbound.push(stream::open_outbound(stream_config, binding, tone_writer())?);
    }

    tracing::info!(
        inbound = inbound.len(),
        outbound = outbound.len(),
        "bridge running, press Ctrl+C to stop"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    for mut stream in inbound {
        stream.close();
    }
    for mut stream in outbound {
        stream.close();
    }
    drop(broker);

    Ok(())
}
