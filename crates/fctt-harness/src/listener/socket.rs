//! Notification socket served for the direct-socket transport.
//!
//! The controller connects and pushes length-prefixed notifications. Each
//! frame is decoded and appended to the log re-encoded as one compact JSON
//! line; frames that are not JSON are logged and skipped.

use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tracing::{debug, warn};

use super::LISTENER_TARGET;
use crate::framing::{self, FrameError};
use crate::notifications::NotificationLog;
use crate::server::SocketServer;

/// Serves `server` until `exit` is set, logging every received frame.
pub(super) fn serve(server: SocketServer, log: &Arc<NotificationLog>, exit: &AtomicBool) {
    let log = Arc::clone(log);
    server.serve(exit, move |stream| log_frames(stream, &log));
}

/// Appends every frame received on `stream` until the peer disconnects.
fn log_frames(mut stream: UnixStream, log: &NotificationLog) {
    loop {
        match framing::read_json(&mut stream) {
            Ok(Some(record)) => {
                if let Err(error) = log.append(&record) {
                    warn!(target: LISTENER_TARGET, %error, "failed to log notification");
                }
            }
            Ok(None) => break,
            Err(FrameError::Json(error)) => {
                warn!(target: LISTENER_TARGET, %error, "dropping frame that is not JSON");
            }
            Err(error) => {
                debug!(target: LISTENER_TARGET, %error, "notification connection ended");
                break;
            }
        }
    }
}
