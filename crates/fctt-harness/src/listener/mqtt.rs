//! Pub/sub notification listening.

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::{LISTENER_TARGET, ListenerError, POLL_INTERVAL};
use crate::bus::{BusMessage, PubSubSession};
use crate::notifications::NotificationLog;
use crate::topics::parse_notification_topic;

/// Turns a message on a notification topic into a notification record.
///
/// Module and action come from the topic. The payload's `data` member, when
/// the payload is a JSON object carrying one, becomes the record's data.
/// Messages on other topics yield `None`.
#[must_use]
pub fn normalise_message(controller_id: &str, message: &BusMessage) -> Option<Value> {
    let (module, action) = parse_notification_topic(controller_id, &message.topic)?;
    let mut record = Map::new();
    record.insert("module".to_owned(), json!(module));
    record.insert("kind".to_owned(), json!("notification"));
    record.insert("action".to_owned(), json!(action));
    match serde_json::from_slice::<Value>(&message.payload) {
        Ok(payload) => {
            if let Some(data) = payload.get("data") {
                record.insert("data".to_owned(), data.clone());
            }
        }
        Err(error) => {
            debug!(target: LISTENER_TARGET, topic = %message.topic, %error, "payload is not JSON");
        }
    }
    Some(Value::Object(record))
}

pub(super) fn serve(
    session: &mut dyn PubSubSession,
    controller_id: &str,
    log: &NotificationLog,
    exit: &AtomicBool,
) -> Result<(), ListenerError> {
    while !exit.load(Ordering::SeqCst) {
        let Some(message) = session.next_message(POLL_INTERVAL)? else {
            continue;
        };
        let Some(record) = normalise_message(controller_id, &message) else {
            debug!(target: LISTENER_TARGET, topic = %message.topic, "ignoring message");
            continue;
        };
        if let Err(error) = log.append(&record) {
            warn!(target: LISTENER_TARGET, %error, "failed to log notification");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusError;
    use camino::Utf8PathBuf;
    use rstest::rstest;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const ID: &str = "0000000000000000";

    struct ScriptedSession {
        queue: VecDeque<BusMessage>,
        exit: Arc<AtomicBool>,
    }

    impl PubSubSession for ScriptedSession {
        fn subscribe(&mut self, _topic: &str) -> Result<(), BusError> {
            Ok(())
        }

        fn publish(&mut self, _topic: &str, _payload: &[u8]) -> Result<(), BusError> {
            Ok(())
        }

        fn next_message(&mut self, _timeout: Duration) -> Result<Option<BusMessage>, BusError> {
            let message = self.queue.pop_front();
            if message.is_none() {
                self.exit.store(true, Ordering::SeqCst);
            }
            Ok(message)
        }

        fn disconnect(&mut self) {}
    }

    fn message(topic: &str, payload: &str) -> BusMessage {
        BusMessage {
            topic: topic.to_owned(),
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[rstest]
    #[case(
        message(
            "foris-controller/0000000000000000/notification/updater/action/run",
            r#"{"module": "updater", "action": "run", "kind": "notification", "data": {"status": "exit"}}"#
        ),
        Some(json!({"module": "updater", "kind": "notification", "action": "run", "data": {"status": "exit"}}))
    )]
    #[case(
        message("foris-controller/0000000000000000/notification/wifi/action/reset", "{}"),
        Some(json!({"module": "wifi", "kind": "notification", "action": "reset"}))
    )]
    #[case(
        message("foris-controller/0000000000000000/notification/wifi/action/reset", "garbage"),
        Some(json!({"module": "wifi", "kind": "notification", "action": "reset"}))
    )]
    #[case(message("foris-controller/0000000000000000/reply/abc", "{}"), None)]
    fn messages_are_normalised(#[case] input: BusMessage, #[case] expected: Option<Value>) {
        assert_eq!(normalise_message(ID, &input), expected);
    }

    #[rstest]
    fn serve_logs_matching_topics_only() {
        let dir = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 path");
        let log = NotificationLog::new(root.join("notifications.json"));
        log.recreate().expect("recreate");
        let exit = Arc::new(AtomicBool::new(false));
        let mut session = ScriptedSession {
            queue: VecDeque::from([
                message("foris-controller/1111111111111111/notification/updater/action/run", "{}"),
                message("foris-controller/0000000000000000/notification/updater/action/run", "{}"),
            ]),
            exit: Arc::clone(&exit),
        };

        serve(&mut session, ID, &log, &exit).expect("serve");

        assert_eq!(log.read().expect("read").len(), 1);
    }
}
