//! Broker-to-bus command subscriber
//!
//! Dispatches JSON group-management commands by topic suffix and emits the
//! fixed-layout bus messages. Validation failures are logged and skipped;
//! a command never takes the stream down.

use serde_json::Value;
use std::sync::Arc;

use crate::broker::connection::CommandHandler;
use crate::transport::bus::{msg, Bus, BusMessage};

/// Highest valid headset identity in a command
const MAX_HEADSET_ID: u64 = 100;
/// Highest valid group identity in a command
const MAX_GROUP_ID: u64 = 10;
/// Most pairs one bulk assignment can carry; the count byte is a u8
const MAX_ASSIGN_PAIRS: usize = 255;

/// Command dispatcher, wired behind the broker connection's message
/// callback
pub struct CommandSubscriber {
    bus: Arc<dyn Bus>,
}

impl CommandSubscriber {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    /// Adapt into the connection's command handler shape
    pub fn into_handler(self) -> CommandHandler {
        Box::new(move |topic, payload| self.handle(topic, payload))
    }

    /// Dispatch one command message by its topic suffix
    pub fn handle(&self, topic: &str, payload: &str) {
        tracing::debug!(topic, payload, "subscriber: got command");

        let data: Value = match serde_json::from_str(payload) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(topic, error = %e, "subscriber: unparseable command");
                return;
            }
        };

        if topic.ends_with("/join_group") {
            self.group_join(&data);
        } else if topic.ends_with("/leave_group") {
            self.group_leave(&data);
        } else if topic.ends_with("/get_groups") {
            self.groups_query();
        } else if topic.ends_with("/set_groups") {
            self.groups_assign(&data);
        } else {
            tracing::debug!(topic, "subscriber: unknown command topic");
        }
    }

    fn group_join(&self, data: &Value) {
        let Some((headset_id, group_id)) = id_pair(data) else {
            tracing::warn!("subscriber: join_group received invalid message");
            return;
        };

        tracing::debug!(headset_id, group_id, "subscriber: join group");
        self.send(BusMessage::new(
            msg::GROUP_JOIN,
            0,
            vec![headset_id, group_id],
        ));
    }

    fn group_leave(&self, data: &Value) {
        let Some(headset_id) = bounded_uint(data, "headset_id", MAX_HEADSET_ID) else {
            tracing::warn!("subscriber: leave_group received invalid message");
            return;
        };

        tracing::debug!(headset_id, "subscriber: leave group");
        self.send(BusMessage::new(msg::GROUP_LEAVE, 0, vec![headset_id]));
    }

    fn groups_query(&self) {
        // The command payload is not currently used.
        tracing::debug!("subscriber: groups query");
        self.send(BusMessage::new(msg::GROUPS_QUERY, 0, Vec::new()));
    }

    /// Bulk assignment: invalid array items are skipped and the leading
    /// count byte reflects only the pairs actually stored
    fn groups_assign(&self, data: &Value) {
        let Some(items) = data.as_array() else {
            tracing::warn!("subscriber: set_groups received invalid message");
            return;
        };

        let mut payload = vec![0u8];
        for item in items {
            if (payload.len() - 1) / 2 == MAX_ASSIGN_PAIRS {
                tracing::warn!(
                    items = items.len(),
                    limit = MAX_ASSIGN_PAIRS,
                    "subscriber: set_groups truncated"
                );
                break;
            }
            let Some((headset_id, group_id)) = id_pair(item) else {
                tracing::warn!(item = %item, "subscriber: set_groups skipping invalid item");
                continue;
            };
            payload.push(headset_id);
            payload.push(group_id);
        }
        payload[0] = ((payload.len() - 1) / 2) as u8;

        tracing::debug!(pairs = payload[0], "subscriber: groups assign");
        self.send(BusMessage::new(msg::GROUPS_ASSIGN, 0, payload));
    }

    fn send(&self, message: BusMessage) {
        let msg_type = message.msg_type;
        if let Err(e) = self.bus.send(message) {
            tracing::warn!(msg_type, error = %e, "subscriber: unable to send message");
        }
    }
}

/// Extract a validated (headset_id, group_id) pair from a command object
fn id_pair(data: &Value) -> Option<(u8, u8)> {
    let headset_id = bounded_uint(data, "headset_id", MAX_HEADSET_ID)?;
    let group_id = bounded_uint(data, "group_id", MAX_GROUP_ID)?;
    Some((headset_id, group_id))
}

fn bounded_uint(data: &Value, key: &str, max: u64) -> Option<u8> {
    let value = data.get(key)?.as_u64()?;
    if value > max {
        return None;
    }
    Some(value as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::bus::{LocalBus, LocalBusFabric, WILDCARD};
    use std::time::Duration;

    fn wire() -> (CommandSubscriber, LocalBus) {
        let fabric = LocalBusFabric::new();
        let monitor = fabric.endpoint();
        for msg_type in [
            msg::GROUP_JOIN,
            msg::GROUP_LEAVE,
            msg::GROUPS_QUERY,
            msg::GROUPS_ASSIGN,
        ] {
            monitor.subscribe(msg_type, WILDCARD).unwrap();
        }
        (CommandSubscriber::new(Arc::new(fabric.endpoint())), monitor)
    }

    fn recv(monitor: &LocalBus) -> BusMessage {
        monitor
            .recv_timeout(Duration::from_millis(100))
            .unwrap()
            .expect("expected a bus message")
    }

    fn assert_silent(monitor: &LocalBus) {
        assert!(monitor
            .recv_timeout(Duration::from_millis(20))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_join_group() {
        let (subscriber, monitor) = wire();
        subscriber.handle(
            "intercom/command/join_group",
            r#"{"headset_id": 5, "group_id": 3}"#,
        );

        let message = recv(&monitor);
        assert_eq!(message.msg_type, msg::GROUP_JOIN);
        assert_eq!(message.data, vec![5, 3]);
    }

    #[test]
    fn test_join_group_rejects_out_of_range() {
        let (subscriber, monitor) = wire();
        subscriber.handle(
            "intercom/command/join_group",
            r#"{"headset_id": 101, "group_id": 3}"#,
        );
        subscriber.handle(
            "intercom/command/join_group",
            r#"{"headset_id": 5, "group_id": 11}"#,
        );
        subscriber.handle("intercom/command/join_group", r#"{"headset_id": -2}"#);
        assert_silent(&monitor);
    }

    #[test]
    fn test_leave_group() {
        let (subscriber, monitor) = wire();
        subscriber.handle("intercom/command/leave_group", r#"{"headset_id": 42}"#);

        let message = recv(&monitor);
        assert_eq!(message.msg_type, msg::GROUP_LEAVE);
        assert_eq!(message.data, vec![42]);
    }

    #[test]
    fn test_get_groups_sends_empty_query() {
        let (subscriber, monitor) = wire();
        subscriber.handle("intercom/command/get_groups", "{}");

        let message = recv(&monitor);
        assert_eq!(message.msg_type, msg::GROUPS_QUERY);
        assert!(message.data.is_empty());
    }

    #[test]
    fn test_set_groups_skips_invalid_items() {
        let (subscriber, monitor) = wire();
        // Two valid pairs surrounded by an invalid object, an over-range
        // pair and a non-object item.
        subscriber.handle(
            "intercom/command/set_groups",
            r#"[
                {"headset_id": 1, "group_id": 2},
                {"bogus": true},
                {"headset_id": 200, "group_id": 3},
                "not an object",
                {"headset_id": 4, "group_id": 5}
            ]"#,
        );

        let message = recv(&monitor);
        assert_eq!(message.msg_type, msg::GROUPS_ASSIGN);
        // Count byte reflects only the stored pairs.
        assert_eq!(message.data, vec![2, 1, 2, 4, 5]);
    }

    #[test]
    fn test_set_groups_caps_pair_count() {
        let (subscriber, monitor) = wire();
        let items: Vec<String> = (0..300)
            .map(|i| {
                format!(
                    r#"{{"headset_id": {}, "group_id": {}}}"#,
                    i % 100 + 1,
                    i % 10 + 1
                )
            })
            .collect();
        subscriber.handle(
            "intercom/command/set_groups",
            &format!("[{}]", items.join(",")),
        );

        let message = recv(&monitor);
        // The count byte cannot represent more than 255 pairs; the rest
        // of the command is dropped.
        assert_eq!(message.data[0], 255);
        assert_eq!(message.data.len(), 1 + 2 * 255);
    }

    #[test]
    fn test_set_groups_rejects_non_array() {
        let (subscriber, monitor) = wire();
        subscriber.handle("intercom/command/set_groups", r#"{"headset_id": 1}"#);
        assert_silent(&monitor);
    }

    #[test]
    fn test_unknown_topic_and_bad_json_ignored() {
        let (subscriber, monitor) = wire();
        subscriber.handle("intercom/command/reboot", r#"{"headset_id": 1}"#);
        subscriber.handle("intercom/command/join_group", "not json at all");
        assert_silent(&monitor);
    }
}
