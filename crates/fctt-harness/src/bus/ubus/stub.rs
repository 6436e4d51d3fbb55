//! In-process `ubusd` stand-in serving lookups and calls on a unix socket.

use std::collections::HashMap;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;

use super::blob;
use super::wire::{
    ATTR_DATA, ATTR_METHOD, ATTR_OBJID, ATTR_OBJPATH, ATTR_STATUS, Message, MessageType,
    STATUS_NOT_FOUND,
};
use crate::bus::BusError;

/// Client id announced in the greeting.
const CLIENT_ID: u32 = 0x1000;
/// Id given to the first registered object.
const FIRST_OBJECT_ID: u32 = 100;
const STATUS_INVALID_COMMAND: u32 = 1;

type Responder = dyn Fn(&str, &Value) -> Vec<Value> + Send + Sync;

/// A method call as the bus received it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ReceivedCall {
    pub(crate) object: String,
    pub(crate) method: String,
    pub(crate) payload: Value,
}

struct Shared {
    objects: HashMap<String, u32>,
    respond: Box<Responder>,
    calls: Mutex<Vec<ReceivedCall>>,
}

/// Bus serving `objects`; every call is answered by `respond(method, payload)`.
pub(crate) struct StubBus {
    path: Utf8PathBuf,
    shared: Arc<Shared>,
    exit: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
}

impl StubBus {
    pub(crate) fn serve(
        path: &Utf8Path,
        objects: &[&str],
        respond: impl Fn(&str, &Value) -> Vec<Value> + Send + Sync + 'static,
    ) -> Self {
        let listener = UnixListener::bind(path).expect("bind stub bus");
        let shared = Arc::new(Shared {
            objects: objects
                .iter()
                .zip(FIRST_OBJECT_ID..)
                .map(|(name, id)| ((*name).to_owned(), id))
                .collect(),
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        });
        let exit = Arc::new(AtomicBool::new(false));
        let accept = {
            let shared = Arc::clone(&shared);
            let exit = Arc::clone(&exit);
            thread::spawn(move || {
                for stream in listener.incoming() {
                    if exit.load(Ordering::SeqCst) {
                        break;
                    }
                    let Ok(stream) = stream else { continue };
                    let shared = Arc::clone(&shared);
                    thread::spawn(move || {
                        // Clients hanging up mid-request end the connection.
                        let _ = serve_connection(stream, &shared);
                    });
                }
            })
        };
        Self {
            path: path.to_owned(),
            shared,
            exit,
            accept: Some(accept),
        }
    }

    /// Calls received so far, in arrival order.
    pub(crate) fn calls(&self) -> Vec<ReceivedCall> {
        self.shared
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for StubBus {
    fn drop(&mut self) {
        self.exit.store(true, Ordering::SeqCst);
        // Wake the accept loop so it sees the flag.
        if UnixStream::connect(&self.path).is_ok()
            && let Some(accept) = self.accept.take()
        {
            let _ = accept.join();
        }
    }
}

fn serve_connection(mut stream: UnixStream, shared: &Shared) -> Result<(), BusError> {
    Message::new(MessageType::Hello, 0, CLIENT_ID).write_to(&mut stream)?;
    loop {
        let request = match Message::read_from(&mut stream) {
            Ok(request) => request,
            Err(BusError::Disconnected(_)) => return Ok(()),
            Err(error) => return Err(error),
        };
        let status = match request.kind {
            MessageType::Lookup => lookup(&mut stream, &request, shared)?,
            MessageType::Invoke => invoke(&mut stream, &request, shared)?,
            _ => STATUS_INVALID_COMMAND,
        };
        Message::new(MessageType::Status, request.seq, CLIENT_ID)
            .with_u32(ATTR_STATUS, status)?
            .write_to(&mut stream)?;
    }
}

fn lookup(stream: &mut UnixStream, request: &Message, shared: &Shared) -> Result<u32, BusError> {
    let path = request.string_attr(ATTR_OBJPATH)?.unwrap_or_default();
    let Some(id) = shared.objects.get(&path) else {
        return Ok(STATUS_NOT_FOUND);
    };
    Message::new(MessageType::Data, request.seq, CLIENT_ID)
        .with_string(ATTR_OBJPATH, &path)?
        .with_u32(ATTR_OBJID, *id)?
        .write_to(stream)?;
    Ok(0)
}

fn invoke(stream: &mut UnixStream, request: &Message, shared: &Shared) -> Result<u32, BusError> {
    let id = request.u32_attr(ATTR_OBJID)?;
    let Some(object) = shared
        .objects
        .iter()
        .find_map(|(name, known)| (Some(*known) == id).then(|| name.clone()))
    else {
        return Ok(STATUS_NOT_FOUND);
    };
    let method = request.string_attr(ATTR_METHOD)?.unwrap_or_default();
    let payload = match request.attr(ATTR_DATA)? {
        Some(data) => Value::Object(blob::decode_table(data.payload)?),
        None => Value::Object(serde_json::Map::new()),
    };
    let responses = (shared.respond)(&method, &payload);
    shared
        .calls
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(ReceivedCall {
            object,
            method,
            payload,
        });
    for response in responses {
        let Value::Object(table) = response else { continue };
        Message::new(MessageType::Data, request.seq, CLIENT_ID)
            .with_raw(ATTR_DATA, &blob::encode_table(&table)?)?
            .write_to(stream)?;
    }
    Ok(0)
}
