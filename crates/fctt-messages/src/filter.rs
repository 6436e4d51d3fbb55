//! Projection of notification lists onto `(module, action)` pairs.

use std::collections::BTreeSet;

use crate::Notification;

/// Set of `(module, action)` pairs selecting notifications.
///
/// An empty filter selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationFilter {
    pairs: BTreeSet<(String, String)>,
}

impl NotificationFilter {
    /// Builds a filter that keeps every notification.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds a `(module, action)` pair to the filter.
    #[must_use]
    pub fn with(mut self, module: impl Into<String>, action: impl Into<String>) -> Self {
        self.pairs.insert((module.into(), action.into()));
        self
    }

    /// Returns `true` when the filter keeps everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Returns `true` when `notification` passes the filter.
    #[must_use]
    pub fn accepts(&self, notification: &Notification) -> bool {
        self.pairs.is_empty()
            || self
                .pairs
                .iter()
                .any(|(module, action)| *module == notification.module && *action == notification.action)
    }

    /// Keeps the notifications that pass the filter, preserving order.
    #[must_use]
    pub fn apply(&self, notifications: &[Notification]) -> Vec<Notification> {
        notifications
            .iter()
            .filter(|notification| self.accepts(notification))
            .cloned()
            .collect()
    }
}

impl<M, A> FromIterator<(M, A)> for NotificationFilter
where
    M: Into<String>,
    A: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (M, A)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(module, action)| (module.into(), action.into()))
                .collect(),
        }
    }
}
