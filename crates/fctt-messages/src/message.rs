//! Request, reply and notification records.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminates the three message shapes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A call issued by test code.
    Request,
    /// The single synchronous answer to a request.
    Reply,
    /// An unsolicited event pushed by the controller.
    Notification,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => formatter.write_str("request"),
            Self::Reply => formatter.write_str("reply"),
            Self::Notification => formatter.write_str("notification"),
        }
    }
}

const fn notification_kind() -> MessageKind {
    MessageKind::Notification
}

/// Identifies a controller capability to invoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Controller module name, e.g. `about`.
    pub module: String,
    /// Action exported by the module, e.g. `get`.
    pub action: String,
    /// Optional action arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Request {
    /// Builds a request without a payload.
    #[must_use]
    pub fn new(module: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            action: action.into(),
            data: None,
        }
    }

    /// Attaches a payload to the request.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Serialises the request into the `{module, action, kind, data?}` form
    /// understood by the controller's framed socket.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        let mut object = serde_json::Map::new();
        object.insert("module".to_owned(), Value::String(self.module.clone()));
        object.insert("action".to_owned(), Value::String(self.action.clone()));
        object.insert(
            "kind".to_owned(),
            Value::String(MessageKind::Request.to_string()),
        );
        if let Some(data) = &self.data {
            object.insert("data".to_owned(), data.clone());
        }
        Value::Object(object)
    }
}

/// The controller's answer to a [`Request`].
///
/// Application level failures travel in [`Reply::errors`]; they are data for
/// the test to inspect and never surface as transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// Module echoed from the request.
    pub module: String,
    /// Action echoed from the request.
    pub action: String,
    /// Always [`MessageKind::Reply`] for well-formed replies.
    pub kind: MessageKind,
    /// Result payload, absent for bare acknowledgements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Application errors reported by the controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<Value>>,
}

impl Reply {
    /// Builds a bare acknowledgement for `request`.
    #[must_use]
    pub fn ack(request: &Request) -> Self {
        Self {
            module: request.module.clone(),
            action: request.action.clone(),
            kind: MessageKind::Reply,
            data: None,
            errors: None,
        }
    }

    /// Builds a reply carrying `data` for `request`.
    #[must_use]
    pub fn with_data(request: &Request, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::ack(request)
        }
    }

    /// Builds a reply carrying application `errors` for `request`.
    #[must_use]
    pub fn with_errors(request: &Request, errors: Vec<Value>) -> Self {
        Self {
            errors: Some(errors),
            ..Self::ack(request)
        }
    }

    /// Returns `true` when the controller reported application errors.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.errors.as_ref().is_some_and(|errors| !errors.is_empty())
    }
}

/// An asynchronous event emitted by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Emitting module.
    pub module: String,
    /// Action the event relates to.
    pub action: String,
    /// Always [`MessageKind::Notification`]; lines lacking it default to it.
    #[serde(default = "notification_kind")]
    pub kind: MessageKind,
    /// Optional event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Notification {
    /// Builds a notification record.
    #[must_use]
    pub fn new(module: impl Into<String>, action: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            module: module.into(),
            action: action.into(),
            kind: MessageKind::Notification,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn reply_omits_absent_fields() {
        let request = Request::new("about", "get");
        let reply = Reply::with_data(&request, json!({"ok": true}));
        let encoded = serde_json::to_value(&reply).expect("encode reply");
        assert_eq!(
            encoded,
            json!({"module": "about", "action": "get", "kind": "reply", "data": {"ok": true}})
        );
    }

    #[rstest]
    fn notification_kind_defaults_when_missing() {
        let decoded: Notification =
            serde_json::from_value(json!({"module": "updater", "action": "run"}))
                .expect("decode notification");
        assert_eq!(decoded.kind, MessageKind::Notification);
        assert_eq!(decoded.data, None);
    }

    #[rstest]
    fn request_wire_form_marks_kind() {
        let request = Request::new("about", "get").with_data(json!({"a": 1}));
        assert_eq!(
            request.to_wire(),
            json!({"module": "about", "action": "get", "kind": "request", "data": {"a": 1}})
        );
    }

    #[rstest]
    #[case(None, false)]
    #[case(Some(vec![]), false)]
    #[case(Some(vec![json!({"description": "boom"})]), true)]
    fn reply_error_detection(#[case] errors: Option<Vec<Value>>, #[case] expected: bool) {
        let reply = Reply {
            errors,
            ..Reply::ack(&Request::new("m", "a"))
        };
        assert_eq!(reply.is_error(), expected);
    }
}
