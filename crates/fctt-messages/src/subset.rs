//! Structural containment check for JSON assertions.

use serde_json::Value;

/// Returns `true` when every key of `expected` exists in `obtained` with an
/// equal value, descending recursively into nested objects.
///
/// `obtained` may carry extra keys. Non-object values must be equal.
///
/// # Examples
///
/// ```
/// use fctt_messages::matches_subset;
/// use serde_json::json;
///
/// let reply = json!({"data": {"status": "ok", "extra": 1}, "kind": "reply"});
/// assert!(matches_subset(&json!({"data": {"status": "ok"}}), &reply));
/// assert!(!matches_subset(&json!({"data": {"status": "failed"}}), &reply));
/// ```
#[must_use]
pub fn matches_subset(expected: &Value, obtained: &Value) -> bool {
    match (expected, obtained) {
        (Value::Object(wanted), Value::Object(present)) => wanted.iter().all(|(key, value)| {
            present
                .get(key)
                .is_some_and(|found| matches_subset(value, found))
        }),
        (Value::Object(_), _) => false,
        _ => expected == obtained,
    }
}
