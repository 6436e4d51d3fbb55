//! Polling the notification log for new entries.

use std::time::{Duration, Instant};

use fctt_messages::{Notification, NotificationFilter};

use super::{NotificationLog, NotificationLogError};
use crate::wait::{PollStep, wait_until};

const CHANGE_POLL: PollStep = PollStep::Fixed(Duration::from_millis(50));

/// Waits until the filtered log differs from the filtered `previous`
/// snapshot and returns the filtered log.
///
/// With no `previous` snapshot the current filtered content is returned as
/// soon as the log exists. Passing the result of one call as the snapshot of
/// the next blocks until a genuinely new matching entry lands. Both the wait
/// for the log to appear and the wait for it to change share `timeout`.
pub fn get_notifications(
    log: &NotificationLog,
    previous: Option<&[Notification]>,
    filter: &NotificationFilter,
    timeout: Duration,
) -> Result<Vec<Notification>, NotificationLogError> {
    let deadline = Instant::now() + timeout;
    let timed_out = || NotificationLogError::Timeout {
        path: log.path().to_owned(),
        timeout,
    };

    wait_until(timeout, PollStep::FILESYSTEM, || log.exists().then_some(())).ok_or_else(timed_out)?;

    let baseline = previous.map(|snapshot| filter.apply(snapshot));
    let remaining = deadline.saturating_duration_since(Instant::now());
    let outcome = wait_until(remaining, CHANGE_POLL, || match log.read() {
        Ok(current) => {
            let filtered = filter.apply(&current);
            (baseline.as_ref() != Some(&filtered)).then_some(Ok(filtered))
        }
        Err(error) => Some(Err(error)),
    });
    outcome.unwrap_or_else(|| Err(timed_out()))
}
