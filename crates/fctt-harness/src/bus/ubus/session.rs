//! One client connection to `ubusd`.

use std::collections::HashMap;
use std::io;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use camino::Utf8Path;
use serde_json::Value;
use tracing::debug;

use super::UBUS_TARGET;
use super::blob;
use super::wire::{
    ATTR_DATA, ATTR_METHOD, ATTR_OBJID, ATTR_OBJPATH, ATTR_STATUS, Message, MessageType,
    STATUS_NOT_FOUND,
};
use crate::bus::{BusError, RpcBusSession};

/// Socket timeouts must be non-zero.
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Lookups and method calls over one bus connection.
///
/// Requests are strictly sequential: each one is answered by zero or more
/// data messages and closed by a status message carrying its sequence number.
pub(super) struct UbusSession {
    stream: Option<UnixStream>,
    timeout: Duration,
    seq: u16,
    objects: HashMap<String, u32>,
}

impl UbusSession {
    /// Connects to the bus at `path` and consumes its greeting.
    pub(super) fn open(path: &Utf8Path, timeout: Duration) -> Result<Self, BusError> {
        let stream = UnixStream::connect(path).map_err(|source| BusError::Io {
            operation: "connect",
            source,
        })?;
        let bound = Some(timeout.max(MIN_TIMEOUT));
        stream
            .set_read_timeout(bound)
            .and_then(|()| stream.set_write_timeout(bound))
            .map_err(|source| BusError::Io {
                operation: "configure",
                source,
            })?;
        let mut session = Self {
            stream: Some(stream),
            timeout,
            seq: 0,
            objects: HashMap::new(),
        };
        let hello = session.receive("hello")?;
        if hello.kind != MessageType::Hello {
            return Err(BusError::Protocol(format!(
                "expected a hello message, got {:?}",
                hello.kind
            )));
        }
        debug!(target: UBUS_TARGET, %path, client = hello.peer, "connected to bus");
        Ok(session)
    }

    fn stream(&mut self) -> Result<&mut UnixStream, BusError> {
        self.stream
            .as_mut()
            .ok_or_else(|| BusError::Disconnected("session already released".to_owned()))
    }

    fn receive(&mut self, operation: &str) -> Result<Message, BusError> {
        let timeout = self.timeout;
        Message::read_from(self.stream()?).map_err(|error| timed_out(error, operation, timeout))
    }

    fn next_seq(&mut self) -> u16 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    /// Sends `message` and collects its data replies up to the closing status.
    fn request(&mut self, message: &Message, operation: &str) -> Result<Vec<Message>, BusError> {
        let timeout = self.timeout;
        message
            .write_to(self.stream()?)
            .map_err(|error| timed_out(error, operation, timeout))?;
        let mut replies = Vec::new();
        loop {
            let reply = self.receive(operation)?;
            if reply.seq != message.seq {
                debug!(target: UBUS_TARGET, seq = reply.seq, "skipping message for another request");
                continue;
            }
            match reply.kind {
                MessageType::Data => replies.push(reply),
                MessageType::Status => {
                    return match reply.u32_attr(ATTR_STATUS)?.unwrap_or_default() {
                        0 => Ok(replies),
                        code => Err(BusError::Status {
                            operation: operation.to_owned(),
                            code,
                        }),
                    };
                }
                other => debug!(target: UBUS_TARGET, kind = ?other, "ignoring unexpected message"),
            }
        }
    }

    /// Resolves `object` to its id, or `None` when the bus does not know it.
    pub(super) fn lookup(&mut self, object: &str) -> Result<Option<u32>, BusError> {
        if let Some(id) = self.objects.get(object) {
            return Ok(Some(*id));
        }
        let message = Message::new(MessageType::Lookup, self.next_seq(), 0)
            .with_string(ATTR_OBJPATH, object)?;
        let replies = match self.request(&message, &format!("lookup {object}")) {
            Err(BusError::Status {
                code: STATUS_NOT_FOUND,
                ..
            }) => return Ok(None),
            other => other?,
        };
        let mut found = None;
        for reply in &replies {
            if reply.string_attr(ATTR_OBJPATH)?.as_deref() == Some(object) {
                found = reply.u32_attr(ATTR_OBJID)?;
            }
        }
        if let Some(id) = found {
            self.objects.insert(object.to_owned(), id);
        }
        Ok(found)
    }
}

impl RpcBusSession for UbusSession {
    fn call(&mut self, object: &str, method: &str, payload: &Value) -> Result<Vec<Value>, BusError> {
        let Value::Object(table) = payload else {
            return Err(BusError::Protocol("call arguments must be a JSON object".to_owned()));
        };
        let operation = format!("call {object} {method}");
        let id = self.lookup(object)?.ok_or_else(|| BusError::Status {
            operation: operation.clone(),
            code: STATUS_NOT_FOUND,
        })?;
        let message = Message::new(MessageType::Invoke, self.next_seq(), id)
            .with_u32(ATTR_OBJID, id)?
            .with_string(ATTR_METHOD, method)?
            .with_raw(ATTR_DATA, &blob::encode_table(table)?)?;
        debug!(target: UBUS_TARGET, %operation, bytes = message.encoded_len(), "invoking");
        let mut responses = Vec::new();
        for reply in self.request(&message, &operation)? {
            if let Some(data) = reply.attr(ATTR_DATA)? {
                responses.push(Value::Object(blob::decode_table(data.payload)?));
            }
        }
        Ok(responses)
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take()
            && let Err(error) = stream.shutdown(Shutdown::Both)
        {
            debug!(target: UBUS_TARGET, %error, "bus connection already closed");
        }
    }
}

fn timed_out(error: BusError, operation: &str, timeout: Duration) -> BusError {
    match error {
        BusError::Io { source, .. }
            if matches!(source.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
        {
            BusError::Timeout {
                operation: operation.to_owned(),
                timeout,
            }
        }
        other => other,
    }
}
