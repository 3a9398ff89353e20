//! Recent phone notifications.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// A notification the dashboard has seen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedNotification {
    /// Originating phone app.
    pub app: String,
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub content: String,
    /// When it was cached.
    pub received_at: DateTime<Utc>,
}

/// Bounded cache, newest last.
#[derive(Clone, Debug)]
pub struct NotificationCache {
    entries: VecDeque<CachedNotification>,
    capacity: usize,
}

impl NotificationCache {
    /// Cache remembering at most `capacity` notifications (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a notification. Returns `false` for a duplicate.
    ///
    /// Only the most recent entry is compared, on title and content.
    pub fn record(&mut self, app: &str, title: &str, content: &str) -> bool {
        if self
            .entries
            .back()
            .is_some_and(|last| last.title == title && last.content == content)
        {
            return false;
        }
        if self.entries.len() == self.capacity {
            let _ = self.entries.pop_front();
        }
        self.entries.push_back(CachedNotification {
            app: app.to_owned(),
            title: title.to_owned(),
            content: content.to_owned(),
            received_at: Utc::now(),
        });
        true
    }

    /// Cached notifications, newest first.
    pub fn recent(&self) -> impl Iterator<Item = &CachedNotification> {
        self.entries.iter().rev()
    }

    /// Number of cached notifications.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
