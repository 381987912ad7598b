//! Stream assembly
//!
//! Wires a device descriptor, negotiated parameters, a processing graph,
//! a transport binding and a relay into one running stream. Construction
//! is all-or-nothing: any failure returns the error and every thread
//! spawned so far is joined on the way out; no partially built stream is
//! ever observable.

use std::sync::Arc;

use crate::audio::{SampleFormat, StreamParams};
use crate::config::StreamConfig;
use crate::constants::BUS_CHUNK_BYTES;
use crate::device::DeviceDescriptor;
use crate::engine::{ErrorHandler, ReadHandler, WriteHandler};
use crate::error::{ConfigError, Error};
use crate::graph::{AudioGraph, PassthroughGraph};
use crate::relay::inbound::InboundRelay;
use crate::relay::outbound::OutboundRelay;
use crate::relay::pacing::SampleClock;
use crate::relay::RelayState;
use crate::transport::bus::{Bus, BusAudioReceiver, BusAudioSender};
use crate::transport::udp::{UdpAudioReceiver, UdpAudioSender};
use crate::transport::Transport;

/// Transport binding for a stream; bus streams share an injected endpoint
pub enum TransportBinding {
    Udp,
    Bus(Arc<dyn Bus>),
}

enum InboundSource {
    Udp(UdpAudioReceiver),
    Bus(BusAudioReceiver),
}

impl InboundSource {
    fn stop(&mut self) {
        match self {
            InboundSource::Udp(receiver) => receiver.stop(),
            InboundSource::Bus(receiver) => receiver.stop(),
        }
    }
}

/// A running transport-to-engine stream
pub struct InboundStream {
    relay: InboundRelay,
    graph: Arc<PassthroughGraph>,
    source: InboundSource,
}

impl InboundStream {
    pub fn state(&self) -> RelayState {
        self.relay.state()
    }

    pub fn graph(&self) -> Arc<PassthroughGraph> {
        self.graph.clone()
    }

    /// Stop the stream: transport first so no delivery lands on a
    /// stopping relay, then the graph, then the relay itself
    pub fn close(&mut self) {
        self.source.stop();
        self.graph.stop();
        self.relay.stop();
    }
}

impl Drop for InboundStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Parse and negotiate one stream definition
fn negotiate(config: &StreamConfig) -> Result<(DeviceDescriptor, StreamParams), Error> {
    let descriptor = DeviceDescriptor::parse(&config.device).map_err(ConfigError::from)?;
    let params = StreamParams::negotiate(
        SampleFormat::S16Le,
        config.srate,
        config.channels,
        config.ptime_ms,
    )?;
    Ok((descriptor, params))
}

/// Open a transport-to-engine stream
pub fn open_inbound(
    config: &StreamConfig,
    binding: TransportBinding,
    read_handler: ReadHandler,
    error_handler: Option<ErrorHandler>,
) -> Result<InboundStream, Error> {
    let (descriptor, params) = negotiate(config)?;

    let mut relay = InboundRelay::new(params, read_handler, error_handler);
    let core = relay.core();
    // A passthrough graph hands every push straight to its sink, so its
    // notional queue never fills: disable the backpressure watermark.
    let graph = PassthroughGraph::with_watermark(
        Box::new(move |event| core.handle_graph_event(event)),
        usize::MAX,
    );
    relay.start()?;

    let push_graph = graph.clone();
    let mut clock = SampleClock::new(params.srate);
    let deliver: Box<dyn FnMut(&[u8]) + Send> = Box::new(move |payload| {
        let timestamp = clock.timestamp();
        if push_graph.push(payload, timestamp).is_ok() {
            clock.advance((payload.len() / 2) as u64);
        }
    });

    // A dead receive path must surface as end-of-stream so the engine
    // gets its "end of file" notification.
    let eos_graph = graph.clone();
    let on_error: Box<dyn FnOnce() + Send> = Box::new(move || eos_graph.end_of_stream());

    let source = match binding {
        TransportBinding::Udp => {
            let port = descriptor.require_port().map_err(ConfigError::from)?;
            InboundSource::Udp(UdpAudioReceiver::start(port, deliver, on_error)?)
        }
        TransportBinding::Bus(bus) => {
            let ppid = descriptor.require_ppid().map_err(ConfigError::from)?;
            InboundSource::Bus(BusAudioReceiver::start(bus, ppid, deliver, on_error)?)
        }
    };

    tracing::info!(
        device = %config.device,
        srate = params.srate,
        ptime_ms = params.ptime_ms(),
        "inbound stream open"
    );

    Ok(InboundStream {
        relay,
        graph,
        source,
    })
}

/// A running engine-to-transport stream
pub struct OutboundStream {
    relay: OutboundRelay,
    graph: Arc<PassthroughGraph>,
}

impl OutboundStream {
    pub fn state(&self) -> RelayState {
        self.relay.state()
    }

    pub fn graph(&self) -> Arc<PassthroughGraph> {
        self.graph.clone()
    }

    /// Stop pacing and join; safe to call more than once
    pub fn close(&mut self) {
        self.relay.stop();
    }
}

impl Drop for OutboundStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Open an engine-to-transport stream
pub fn open_outbound(
    config: &StreamConfig,
    binding: TransportBinding,
    write_handler: WriteHandler,
) -> Result<OutboundStream, Error> {
    let (descriptor, params) = negotiate(config)?;

    // UDP sends one frame per packet; the bus uses its own chunk size.
    let chunk_bytes = match binding {
        TransportBinding::Udp => params.bytes_per_frame(),
        TransportBinding::Bus(_) => BUS_CHUNK_BYTES,
    };

    let mut relay = OutboundRelay::new(params, write_handler, chunk_bytes);
    let core = relay.core();
    // Same as inbound: output leaves the graph synchronously, so pacing
    // must never be throttled by the notional queue.
    let graph = PassthroughGraph::with_watermark(
        Box::new(move |event| core.handle_graph_event(event)),
        usize::MAX,
    );

    let transport: Arc<dyn Transport> = match binding {
        TransportBinding::Udp => {
            let ip = descriptor.require_ip().map_err(ConfigError::from)?;
            let port = descriptor.require_port().map_err(ConfigError::from)?;
            Arc::new(UdpAudioSender::new(ip, port, descriptor.iface.as_deref())?)
        }
        TransportBinding::Bus(bus) => {
            let ppid = descriptor.require_ppid().map_err(ConfigError::from)?;
            Arc::new(BusAudioSender::new(bus, ppid))
        }
    };

    relay.attach(graph.clone(), transport);
    relay.start()?;

    tracing::info!(
        device = %config.device,
        srate = params.srate,
        ptime_ms = params.ptime_ms(),
        chunk_bytes,
        "outbound stream open"
    );

    Ok(OutboundStream { relay, graph })
}
