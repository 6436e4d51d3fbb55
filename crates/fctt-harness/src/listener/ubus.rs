//! RPC bus notification listening.

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::{LISTENER_TARGET, ListenerError, POLL_INTERVAL};
use crate::bus::{RpcEvent, RpcEventStream};
use crate::notifications::NotificationLog;
use crate::transport::module_of_object;

/// Event name pattern covering every object the controller registers.
pub const EVENT_PATTERN: &str = "foris-controller-*";

/// Turns a bus event into a notification record.
///
/// Returns `None` for events from foreign objects or without an `action`.
#[must_use]
pub fn normalise_event(event: &RpcEvent) -> Option<Value> {
    let module = module_of_object(&event.name)?;
    let action = event.data.get("action")?.as_str()?;
    let mut record = Map::new();
    record.insert("module".to_owned(), json!(module));
    record.insert("kind".to_owned(), json!("notification"));
    record.insert("action".to_owned(), json!(action));
    if let Some(data) = event.data.get("data") {
        record.insert("data".to_owned(), data.clone());
    }
    Some(Value::Object(record))
}

pub(super) fn serve(
    events: &mut dyn RpcEventStream,
    log: &NotificationLog,
    exit: &AtomicBool,
) -> Result<(), ListenerError> {
    while !exit.load(Ordering::SeqCst) {
        let Some(event) = events.next_event(POLL_INTERVAL)? else {
            continue;
        };
        match normalise_event(&event) {
            Some(record) => {
                if let Err(error) = log.append(&record) {
                    warn!(target: LISTENER_TARGET, %error, "failed to log notification");
                }
            }
            None => debug!(target: LISTENER_TARGET, name = %event.name, "ignoring bus event"),
        }
    }
    Ok(())
}
