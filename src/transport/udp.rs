//! UDP/RTP binding
//!
//! Carries wire audio as RTP L16 over UDP: outbound toward a configured
//! `ip:port` (optionally pinned to a multicast-capable interface), inbound
//! from a locally bound port. The header is the minimal fixed 12 bytes;
//! there is no reordering or loss concealment downstream, so sequence
//! numbers are emitted for the peer's benefit only.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::constants::RTP_PAYLOAD_TYPE;
use crate::error::{Error, TransportError};
use crate::transport::Transport;

/// Fixed RTP header length (no CSRC entries, no extensions)
pub const RTP_HEADER_BYTES: usize = 12;

/// Minimal RTP header state for one outgoing stream
#[derive(Debug)]
struct RtpState {
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
}

impl RtpState {
    /// Serialize the header for a payload of `samples` samples and advance
    /// the sequence/timestamp state
    fn next_header(&mut self, samples: u32) -> [u8; RTP_HEADER_BYTES] {
        let mut header = [0u8; RTP_HEADER_BYTES];
        header[0] = 0x80; // version 2, no padding/extension/CSRC
        header[1] = RTP_PAYLOAD_TYPE;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(samples);
        header
    }
}

/// Strip the RTP header off a received datagram
fn rtp_payload(datagram: &[u8]) -> Result<&[u8], TransportError> {
    if datagram.len() < RTP_HEADER_BYTES {
        return Err(TransportError::InvalidPacket(format!(
            "{} byte datagram shorter than RTP header",
            datagram.len()
        )));
    }

    if datagram[0] >> 6 != 2 {
        return Err(TransportError::InvalidPacket(format!(
            "unsupported RTP version {}",
            datagram[0] >> 6
        )));
    }

    let csrc_count = (datagram[0] & 0x0F) as usize;
    let header_len = RTP_HEADER_BYTES + 4 * csrc_count;
    datagram.get(header_len..).ok_or_else(|| {
        TransportError::InvalidPacket("datagram truncated after CSRC list".into())
    })
}

/// Outbound RTP sender toward a fixed destination
pub struct UdpAudioSender {
    socket: UdpSocket,
    target: SocketAddrV4,
    rtp: Mutex<RtpState>,
}

impl UdpAudioSender {
    /// Create a sender targeting `ip:port`, optionally pinned to a named
    /// interface for multicast delivery
    pub fn new(ip: Ipv4Addr, port: u16, iface: Option<&str>) -> Result<Self, Error> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

        if let Some(name) = iface {
            bind_to_interface(&socket, name)?;
        }

        socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())?;

        Ok(Self {
            socket: socket.into(),
            target: SocketAddrV4::new(ip, port),
            rtp: Mutex::new(RtpState {
                sequence: rand_seed() as u16,
                timestamp: 0,
                ssrc: rand_seed(),
            }),
        })
    }
}

impl Transport for UdpAudioSender {
    fn send(&self, chunk: &[u8]) -> Result<(), TransportError> {
        let samples = (chunk.len() / 2) as u32;
        let header = self.rtp.lock().next_header(samples);

        let mut packet = Vec::with_capacity(RTP_HEADER_BYTES + chunk.len());
        packet.extend_from_slice(&header);
        packet.extend_from_slice(chunk);

        self.socket
            .send_to(&packet, SocketAddr::V4(self.target))
            .map_err(|e| TransportError::SendFailed(format!("{}: {}", self.target, e)))?;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn bind_to_interface(socket: &Socket, name: &str) -> Result<(), Error> {
    socket
        .bind_device(Some(name.as_bytes()))
        .map_err(|e| TransportError::BindFailed(format!("interface {}: {}", name, e)))?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn bind_to_interface(_socket: &Socket, name: &str) -> Result<(), Error> {
    tracing::warn!(iface = name, "interface binding unsupported on this platform");
    Ok(())
}

/// Pseudo-random 32-bit seed for RTP sequence/SSRC initialization
fn rand_seed() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    nanos ^ (std::process::id().rotate_left(16))
}

/// Inbound RTP receiver: binds a local port and runs a receive thread
pub struct UdpAudioReceiver {
    run: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
    local_port: u16,
}

impl UdpAudioReceiver {
    /// Bind `port` and spawn the receive thread.
    ///
    /// `deliver` is invoked with each depacketized payload; `on_error` is
    /// invoked once if the receive path dies, never on a plain `stop`.
    pub fn start(
        port: u16,
        mut deliver: Box<dyn FnMut(&[u8]) + Send>,
        on_error: Box<dyn FnOnce() + Send>,
    ) -> Result<Self, Error> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
            .map_err(|e| TransportError::BindFailed(format!("port {}: {}", port, e)))?;
        socket.set_read_timeout(Some(Duration::from_millis(10)))?;
        let local_port = socket.local_addr()?.port();

        let run = Arc::new(AtomicBool::new(true));
        let run_for_loop = run.clone();

        let handle = thread::Builder::new()
            .name("udp-audio-rx".into())
            .spawn(move || {
                let mut on_error = Some(on_error);
                let mut buf = [0u8; 2048];
                while run_for_loop.load(Ordering::Relaxed) {
                    let len = match socket.recv_from(&mut buf) {
                        Ok((len, _peer)) => len,
                        Err(e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut =>
                        {
                            continue;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "udp-audio-rx: receive failed");
                            if let Some(on_error) = on_error.take() {
                                on_error();
                            }
                            break;
                        }
                    };

                    match rtp_payload(&buf[..len]) {
                        Ok(payload) if !payload.is_empty() => deliver(payload),
                        Ok(_) => {}
                        Err(e) => tracing::debug!(error = %e, "udp-audio-rx: dropping datagram"),
                    }
                }
            })?;

        Ok(Self {
            run,
            rx_thread: Some(handle),
            local_port,
        })
    }

    /// Actual bound port (useful when 0 was requested)
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn stop(&mut self) {
        self.run.store(false, Ordering::Relaxed);
        if let Some(handle) = self.rx_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for UdpAudioReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}
