//! Bus-to-broker event publisher
//!
//! Subscribes to the telemetry message types on the bus and translates
//! each into its JSON event shape. Translation is pure; delivery goes
//! through a sink so the thread never knows whether the link is up.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::broker::connection::BrokerHandle;
use crate::constants::BUS_RECV_TIMEOUT;
use crate::error::Error;
use crate::transport::bus::{msg, Bus, BusMessage, WILDCARD};

/// Message types forwarded to the broker
const SUBSCRIPTIONS: [u16; 5] = [
    msg::LANE_TALK_START,
    msg::LANE_TALK_STOP,
    msg::GROUPS_STATUS,
    msg::BUTTON_EVENT,
    msg::HEADSET_AVAIL_STATUS,
];

/// Receives each translated event; invoked on the publisher thread
pub type EventSink = Box<dyn FnMut(Value) + Send>;

/// Translate one bus message to its JSON event, or `None` when the
/// message is not an event or its payload is malformed
fn translate(message: &BusMessage) -> Option<Value> {
    match message.msg_type {
        msg::LANE_TALK_START | msg::LANE_TALK_STOP => {
            let data: Value = match serde_json::from_slice(&message.data) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(msg_type = message.msg_type, error = %e, "publisher: bad lane talk payload");
                    return None;
                }
            };
            let headset_id = data.get("headset_id")?.clone();
            let lane = if message.msg_type == msg::LANE_TALK_START {
                json!(message.index)
            } else {
                Value::Null
            };
            Some(json!({ "headset_id": headset_id, "lane": lane }))
        }

        msg::GROUPS_STATUS => {
            // Count byte, then one (headset_id, group_id) pair per entry.
            let count = *message.data.first()? as usize;
            if count == 0 {
                return None;
            }

            let expected = 1 + 2 * count;
            if message.data.len() < expected {
                tracing::warn!(
                    expected,
                    have = message.data.len(),
                    "publisher: invalid groups status payload"
                );
                return None;
            }

            let items: Vec<Value> = (0..count)
                .map(|i| {
                    json!({
                        "headset_id": message.data[1 + 2 * i],
                        "group_id": message.data[2 + 2 * i],
                    })
                })
                .collect();
            Some(Value::Array(items))
        }

        msg::BUTTON_EVENT => {
            // Three little-endian u32 fields: endpoint id, button id and
            // the press interval; the interval is not part of the event.
            if message.data.len() < 12 {
                return None;
            }
            let ppid = u32::from_le_bytes(message.data[0..4].try_into().ok()?);
            let button = u32::from_le_bytes(message.data[4..8].try_into().ok()?);
            Some(json!({ "headset_id": ppid, "button": button }))
        }

        msg::HEADSET_AVAIL_STATUS => {
            let data: Value = match serde_json::from_slice(&message.data) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(error = %e, "publisher: bad availability payload");
                    return None;
                }
            };
            Some(json!({
                "headset_id": data.get("headset_id")?.clone(),
                "status": data.get("status")?.clone(),
            }))
        }

        _ => None,
    }
}

/// Event publisher: bus subscriptions plus the translation thread
pub struct EventPublisher {
    run: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
}

impl EventPublisher {
    /// Subscribe the telemetry types and spawn the translation thread
    pub fn start(bus: Arc<dyn Bus>, mut sink: EventSink) -> Result<Self, Error> {
        for msg_type in SUBSCRIPTIONS {
            bus.subscribe(msg_type, WILDCARD)?;
        }

        let run = Arc::new(AtomicBool::new(true));
        let run_for_loop = run.clone();

        let handle = thread::Builder::new()
            .name("broker-publish".into())
            .spawn(move || {
                while run_for_loop.load(Ordering::Relaxed) {
                    let message = match bus.recv_timeout(BUS_RECV_TIMEOUT) {
                        Ok(Some(message)) => message,
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::warn!(error = %e, "broker-publish: receive failed");
                            break;
                        }
                    };

                    if let Some(event) = translate(&message) {
                        sink(event);
                    }
                }
            })?;

        Ok(Self {
            run,
            rx_thread: Some(handle),
        })
    }

    /// Publisher wired straight to a broker handle; events that cannot be
    /// published while the link is down are dropped with a warning
    pub fn to_broker(bus: Arc<dyn Bus>, broker: BrokerHandle) -> Result<Self, Error> {
        Self::start(
            bus,
            Box::new(move |event| {
                if let Err(e) = broker.publish_event(&event) {
                    tracing::warn!(error = %e, "broker-publish: event dropped");
                }
            }),
        )
    }

    pub fn stop(&mut self) {
        self.run.store(false, Ordering::Relaxed);
        if let Some(handle) = self.rx_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EventPublisher {
    fn drop(&mut self) {
        self.stop();
    }
}
