//! Topic grammar of the controller's pub/sub interface.
//!
//! Every topic starts with `foris-controller/<controller id>/`; requests,
//! replies and notifications then branch as
//! `request/<module>/action/<action>`, `reply/<message id>` and
//! `notification/<module>/action/<action>`.

use uuid::Uuid;

const PREFIX: &str = "foris-controller";

/// Topic a request for `module`/`action` is published on.
#[must_use]
pub fn request_topic(controller_id: &str, module: &str, action: &str) -> String {
    format!("{PREFIX}/{controller_id}/request/{module}/action/{action}")
}

/// Topic the reply to message `reply_id` arrives on.
#[must_use]
pub fn reply_topic(controller_id: &str, reply_id: Uuid) -> String {
    format!("{PREFIX}/{controller_id}/reply/{reply_id}")
}

/// Wildcard matching every notification of one controller.
#[must_use]
pub fn notification_wildcard(controller_id: &str) -> String {
    format!("{PREFIX}/{controller_id}/notification/+/action/+")
}

/// Topic the controller announces its state on.
#[must_use]
pub fn advertize_topic(controller_id: &str) -> String {
    format!("{PREFIX}/{controller_id}/notification/remote/action/advertize")
}

/// Extracts `(module, action)` from a notification topic of
/// `controller_id`, or `None` for any other topic.
#[must_use]
pub fn parse_notification_topic<'a>(controller_id: &str, topic: &'a str) -> Option<(&'a str, &'a str)> {
    let mut segments = topic.split('/');
    let expected = [Some(PREFIX), Some(controller_id), Some("notification")];
    if expected.iter().any(|segment| segments.next() != *segment) {
        return None;
    }
    let module = segments.next().filter(|module| !module.is_empty())?;
    if segments.next() != Some("action") {
        return None;
    }
    let action = segments.next().filter(|action| !action.is_empty())?;
    segments.next().is_none().then_some((module, action))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const ID: &str = "0000000000000000";

    #[rstest]
    #[case("foris-controller/0000000000000000/notification/updater/action/run", Some(("updater", "run")))]
    #[case("foris-controller/0000000000000000/notification/remote/action/advertize", Some(("remote", "advertize")))]
    #[case("foris-controller/1111111111111111/notification/updater/action/run", None)]
    #[case("foris-controller/0000000000000000/reply/abc", None)]
    #[case("foris-controller/0000000000000000/notification/updater/run", None)]
    #[case("foris-controller/0000000000000000/notification/updater/action/run/extra", None)]
    #[case("foris-controller/0000000000000000/notification//action/run", None)]
    fn notification_topics(#[case] topic: &str, #[case] expected: Option<(&str, &str)>) {
        assert_eq!(parse_notification_topic(ID, topic), expected);
    }

    #[rstest]
    fn advertize_topic_parses_as_notification() {
        assert_eq!(
            parse_notification_topic(ID, &advertize_topic(ID)),
            Some(("remote", "advertize"))
        );
    }

    #[rstest]
    fn request_and_reply_topics() {
        assert_eq!(
            request_topic(ID, "about", "get"),
            "foris-controller/0000000000000000/request/about/action/get"
        );
        assert_eq!(
            reply_topic(ID, Uuid::nil()),
            "foris-controller/0000000000000000/reply/00000000-0000-0000-0000-000000000000"
        );
    }
}
