//! Time inference for items the server sends without a timestamp.

use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use crate::item::ChatItem;

/// Holds untimed items until the next timed item, which lends them its time.
///
/// Emission order is: the timed item first, then the resolved items in the
/// order they were submitted.
#[derive(Debug, Default)]
pub struct TimeInferenceQueue {
    pending: Vec<(Arc<Value>, ChatItem)>,
}

impl TimeInferenceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit one classified item together with the notice it came from.
    ///
    /// Returns the items that are ready, which is empty while `item` is
    /// still waiting for a time.
    pub fn submit(&mut self, raw: Arc<Value>, item: ChatItem) -> Vec<ChatItem> {
        let Some(time) = item.time() else {
            self.pending.push((raw, item));
            trace!("{} item(s) waiting for a timestamp", self.pending.len());
            return Vec::new();
        };

        let mut ready = Vec::with_capacity(self.pending.len() + 1);
        ready.push(item);
        ready.extend(self.pending.drain(..).map(|(_, mut pending)| {
            pending.set_time(time);
            pending
        }));
        ready
    }

    /// Number of items waiting for a time.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Raw notices behind the pending items, oldest first.
    pub fn pending_notices(&self) -> impl Iterator<Item = &Value> {
        self.pending.iter().map(|(raw, _)| raw.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Counter, MessageItem};
    use serde_json::json;

    fn notice(cmd: &str) -> Arc<Value> {
        Arc::new(json!({ "cmd": cmd }))
    }

    fn message(time: Option<i64>, text: &str) -> ChatItem {
        ChatItem::Message(MessageItem::new(time, 1, "u", text))
    }

    #[test]
    fn test_timed_item_passes_through() {
        let mut queue = TimeInferenceQueue::new();
        let out = queue.submit(notice("DANMU_MSG"), message(Some(10), "a"));
        assert_eq!(out, vec![message(Some(10), "a")]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pending_items_take_next_time_in_order() {
        let mut queue = TimeInferenceQueue::new();

        // a wire time of 0 was already mapped to None by the classifier
        assert!(queue.submit(notice("DANMU_MSG"), message(None, "first")).is_empty());
        assert!(
            queue
                .submit(notice("WATCHED_CHANGE"), ChatItem::counter(Counter::Watched(5)))
                .is_empty()
        );
        assert!(
            queue
                .submit(notice("ONLINE_RANK_COUNT"), ChatItem::counter(Counter::Interacted(7)))
                .is_empty()
        );
        assert_eq!(queue.len(), 3);
        assert_eq!(
            queue
                .pending_notices()
                .filter_map(|n| n["cmd"].as_str())
                .collect::<Vec<_>>(),
            vec!["DANMU_MSG", "WATCHED_CHANGE", "ONLINE_RANK_COUNT"]
        );

        let out = queue.submit(notice("DANMU_MSG"), message(Some(1700), "timed"));
        assert!(queue.is_empty());

        let mut first = message(None, "first");
        first.set_time(1700);
        let mut watched = ChatItem::counter(Counter::Watched(5));
        watched.set_time(1700);
        let mut interacted = ChatItem::counter(Counter::Interacted(7));
        interacted.set_time(1700);

        assert_eq!(
            out,
            vec![message(Some(1700), "timed"), first, watched, interacted]
        );
    }

    #[test]
    fn test_pending_never_gets_earlier_time() {
        let mut queue = TimeInferenceQueue::new();
        queue.submit(notice("A"), message(Some(100), "old"));
        queue.submit(notice("B"), ChatItem::counter(Counter::Fans(1)));
        let out = queue.submit(notice("C"), message(Some(200), "new"));

        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|i| i.time() == Some(200)));
    }
}
