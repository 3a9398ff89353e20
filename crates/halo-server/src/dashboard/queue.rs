//! Per-mode content queue.
//!
//! Newest item first, at most one item per package, capped length. Upserts
//! report whether the visible head changed so callers can skip redundant
//! renders.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// One TPA's contribution to a mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentItem {
    /// Contributing package.
    pub package_name: String,
    /// Text to show.
    pub content: String,
    /// When the contribution arrived.
    pub updated_at: DateTime<Utc>,
}

impl ContentItem {
    /// Item stamped with the current time.
    pub fn new(package_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            content: content.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Result of removing a package.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Removal {
    /// Whether the package had an item.
    pub removed: bool,
    /// Whether the visible head changed.
    pub visible_changed: bool,
}

/// Bounded newest-first queue.
#[derive(Clone, Debug)]
pub struct ContentQueue {
    items: VecDeque<ContentItem>,
    capacity: usize,
}

impl ContentQueue {
    /// Queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert or replace the package's item at the front.
    ///
    /// Returns whether the first `visible` items changed.
    pub fn upsert(&mut self, item: ContentItem, visible: usize) -> bool {
        let before = self.head(visible);
        if let Some(pos) = self.position(&item.package_name) {
            let _ = self.items.remove(pos);
        }
        self.items.push_front(item);
        self.items.truncate(self.capacity);
        before != self.head(visible)
    }

    /// Remove the package's item.
    pub fn remove_package(&mut self, package_name: &str, visible: usize) -> Removal {
        let Some(pos) = self.position(package_name) else {
            return Removal::default();
        };
        let _ = self.items.remove(pos);
        Removal {
            removed: true,
            visible_changed: pos < visible,
        }
    }

    /// The newest `n` items.
    pub fn visible(&self, n: usize) -> impl Iterator<Item = &ContentItem> {
        self.items.iter().take(n)
    }

    /// All items, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &ContentItem> {
        self.items.iter()
    }

    /// The package's item, if queued.
    pub fn get(&self, package_name: &str) -> Option<&ContentItem> {
        self.items.iter().find(|i| i.package_name == package_name)
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every item.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn position(&self, package_name: &str) -> Option<usize> {
        self.items.iter().position(|i| i.package_name == package_name)
    }

    fn head(&self, n: usize) -> Vec<(String, String)> {
        self.items
            .iter()
            .take(n)
            .map(|i| (i.package_name.clone(), i.content.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packages(q: &ContentQueue) -> Vec<&str> {
        q.iter().map(|i| i.package_name.as_str()).collect()
    }

    #[test]
    fn newest_first() {
        let mut q = ContentQueue::new(5);
        assert!(q.upsert(ContentItem::new("a", "1"), 2));
        assert!(q.upsert(ContentItem::new("b", "2"), 2));
        assert_eq!(packages(&q), vec!["b", "a"]);
    }

    #[test]
    fn one_item_per_package() {
        let mut q = ContentQueue::new(5);
        let _ = q.upsert(ContentItem::new("a", "1"), 2);
        let _ = q.upsert(ContentItem::new("b", "2"), 2);
        let _ = q.upsert(ContentItem::new("a", "3"), 2);
        assert_eq!(packages(&q), vec!["a", "b"]);
        assert_eq!(q.get("a").unwrap().content, "3");
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn capped_drops_oldest() {
        let mut q = ContentQueue::new(2);
        for p in ["a", "b", "c"] {
            let _ = q.upsert(ContentItem::new(p, p), 1);
        }
        assert_eq!(packages(&q), vec!["c", "b"]);
    }

    #[test]
    fn identical_resubmission_is_not_a_change() {
        let mut q = ContentQueue::new(5);
        let _ = q.upsert(ContentItem::new("a", "sunny"), 2);
        assert!(!q.upsert(ContentItem::new("a", "sunny"), 2));
    }

    #[test]
    fn change_outside_visible_head_is_quiet() {
        let mut q = ContentQueue::new(5);
        let _ = q.upsert(ContentItem::new("a", "1"), 1);
        let _ = q.upsert(ContentItem::new("b", "2"), 1);
        // "a" sits at index 1; visible head is just "b".
        assert!(!q.remove_package("a", 1).visible_changed);
        assert_eq!(packages(&q), vec!["b"]);
    }

    #[test]
    fn remove_visible_item_reports_change() {
        let mut q = ContentQueue::new(5);
        let _ = q.upsert(ContentItem::new("a", "1"), 2);
        let removal = q.remove_package("a", 2);
        assert!(removal.removed);
        assert!(removal.visible_changed);
        assert!(q.is_empty());
        assert_eq!(q.remove_package("a", 2), Removal::default());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut q = ContentQueue::new(0);
        let _ = q.upsert(ContentItem::new("a", "1"), 1);
        assert_eq!(q.len(), 1);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn invariants_hold(ops in proptest::collection::vec((0u8..6, "[a-z]{0,3}"), 0..40), cap in 1usize..6) {
                let mut q = ContentQueue::new(cap);
                for (pkg, content) in ops {
                    let _ = q.upsert(ContentItem::new(format!("p{pkg}"), content), 2);
                    prop_assert!(q.len() <= cap);
                    let mut seen = std::collections::HashSet::new();
                    for item in q.iter() {
                        prop_assert!(seen.insert(item.package_name.clone()));
                    }
                }
            }
        }
    }
}
