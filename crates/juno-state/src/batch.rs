//! Batch queue.
//!
//! While a batch is active, writes are queued instead of applied. The queue
//! is deduplicated by path: a later write to the same path replaces the
//! earlier entry and moves to the back.

use serde_json::Value;
use web_time::Instant;

/// One deferred write.
#[derive(Debug, Clone)]
pub struct QueuedWrite {
    /// Target path.
    pub path: String,
    /// Value to write.
    pub value: Value,
    /// Caller context, passed to middleware when the batch ends.
    pub context: Value,
    /// When the write was queued.
    pub queued_at: Instant,
}

#[derive(Debug, Default)]
pub(crate) struct BatchQueue {
    active: bool,
    entries: Vec<QueuedWrite>,
}

impl BatchQueue {
    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    /// Returns `false` when a batch was already active.
    pub(crate) fn begin(&mut self) -> bool {
        !std::mem::replace(&mut self.active, true)
    }

    pub(crate) fn push(&mut self, path: &str, value: Value, context: Value) {
        self.entries.retain(|entry| entry.path != path);
        self.entries.push(QueuedWrite {
            path: path.to_owned(),
            value,
            context,
            queued_at: Instant::now(),
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Deactivate and hand back the queued writes; `None` when no batch was
    /// active.
    pub(crate) fn finish(&mut self) -> Option<Vec<QueuedWrite>> {
        if !self.active {
            return None;
        }
        self.active = false;
        Some(std::mem::take(&mut self.entries))
    }

    pub(crate) fn clear(&mut self) {
        self.active = false;
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn last_write_wins_and_moves_to_back() {
        let mut queue = BatchQueue::default();
        assert!(queue.begin());
        queue.push("x", json!(1), Value::Null);
        queue.push("y", json!(1), Value::Null);
        queue.push("x", json!(2), Value::Null);
        let entries = queue.finish().unwrap_or_default();
        let got: Vec<(&str, &Value)> = entries.iter().map(|e| (e.path.as_str(), &e.value)).collect();
        assert_eq!(got, vec![("y", &json!(1)), ("x", &json!(2))]);
    }

    #[test]
    fn finish_without_begin_is_none() {
        let mut queue = BatchQueue::default();
        assert!(queue.finish().is_none());
    }

    #[test]
    fn second_begin_reports_already_active() {
        let mut queue = BatchQueue::default();
        assert!(queue.begin());
        assert!(!queue.begin());
        queue.clear();
        assert!(!queue.is_active());
        assert_eq!(queue.len(), 0);
    }
}
