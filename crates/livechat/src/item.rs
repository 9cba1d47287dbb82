//! Normalized chat items.
//!
//! Every notice the classifier accepts becomes one (or two) [`ChatItem`]s.
//! Each variant carries `time` in epoch seconds; `None` means the server did
//! not say when it happened and the time is inferred later.

use serde::{Deserialize, Serialize};

/// Membership ("fan medal") badge shown next to a user's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberBadge {
    pub level: u64,
    pub name: String,
    /// Integer RGB.
    pub color: u32,
    pub owner_name: String,
    pub owner_room_id: u64,
    pub owner_user_id: u64,
    /// Display hint: inactive badges are rendered dimmed.
    pub active: bool,
}

/// A danmu or super chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageItem {
    pub time: Option<i64>,
    pub user_id: u64,
    pub user_name: String,
    pub text: String,
    /// Danmu text color, integer RGB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    /// Super chat price in currency units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoticon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<MemberBadge>,
    #[serde(default)]
    pub manager: bool,
}

impl MessageItem {
    /// Create a plain message with no decorations.
    pub fn new(
        time: Option<i64>,
        user_id: u64,
        user_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            time,
            user_id,
            user_name: user_name.into(),
            text: text.into(),
            color: None,
            price: None,
            emoticon: None,
            badge: None,
            manager: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftItem {
    pub time: Option<i64>,
    pub user_id: u64,
    pub user_name: String,
    pub action: String,
    pub num: u64,
    pub gift_name: String,
    /// Paid value in currency units, 0 for free gifts.
    pub price: u64,
    /// Free-currency amount, 0 for paid gifts.
    pub coins: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardPurchaseItem {
    pub time: Option<i64>,
    pub user_id: u64,
    pub user_name: String,
    pub num: u64,
    pub gift_name: String,
    pub price: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryItem {
    pub time: Option<i64>,
    pub user_id: u64,
    /// May be truncated by the platform; `user_id` is authoritative.
    pub user_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivePhase {
    Start,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleItem {
    pub time: Option<i64>,
    pub phase: LivePhase,
}

/// Room counters and room info updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    Fans(u64),
    FansClub(u64),
    Watched(u64),
    Interacted(u64),
    Title(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterItem {
    pub time: Option<i64>,
    pub counter: Counter,
}

/// A single item in the chat stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatItem {
    Message(MessageItem),
    Gift(GiftItem),
    GuardPurchase(GuardPurchaseItem),
    Entry(EntryItem),
    Lifecycle(LifecycleItem),
    Counter(CounterItem),
}

impl ChatItem {
    /// Epoch seconds, or `None` while pending inference.
    pub fn time(&self) -> Option<i64> {
        match self {
            Self::Message(item) => item.time,
            Self::Gift(item) => item.time,
            Self::GuardPurchase(item) => item.time,
            Self::Entry(item) => item.time,
            Self::Lifecycle(item) => item.time,
            Self::Counter(item) => item.time,
        }
    }

    pub fn set_time(&mut self, time: i64) {
        let slot = match self {
            Self::Message(item) => &mut item.time,
            Self::Gift(item) => &mut item.time,
            Self::GuardPurchase(item) => &mut item.time,
            Self::Entry(item) => &mut item.time,
            Self::Lifecycle(item) => &mut item.time,
            Self::Counter(item) => &mut item.time,
        };
        *slot = Some(time);
    }

    /// Short name of the variant, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Gift(_) => "gift",
            Self::GuardPurchase(_) => "guard_purchase",
            Self::Entry(_) => "entry",
            Self::Lifecycle(_) => "lifecycle",
            Self::Counter(_) => "counter",
        }
    }

    pub(crate) fn counter(counter: Counter) -> Self {
        Self::Counter(CounterItem {
            time: None,
            counter,
        })
    }

    pub(crate) fn lifecycle(time: Option<i64>, phase: LivePhase) -> Self {
        Self::Lifecycle(LifecycleItem { time, phase })
    }
}

/// Wire timestamps use 0 for "unknown".
pub(crate) fn known_time(secs: i64) -> Option<i64> {
    (secs > 0).then_some(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_time_resolves_pending() {
        let mut item = ChatItem::counter(Counter::Watched(12));
        assert_eq!(item.time(), None);

        item.set_time(1_700_000_000);
        assert_eq!(item.time(), Some(1_700_000_000));
    }

    #[test]
    fn test_serialize_tagged() {
        let item = ChatItem::Message(MessageItem::new(Some(1000), 123, "alice", "hello"));
        let json = serde_json::to_value(&item).unwrap();

        assert_eq!(json["kind"], "message");
        assert_eq!(json["time"], 1000);
        assert_eq!(json["user_name"], "alice");
        assert!(json.get("badge").is_none());

        let counter = serde_json::to_value(ChatItem::counter(Counter::FansClub(7))).unwrap();
        assert_eq!(counter["kind"], "counter");
        assert_eq!(counter["counter"]["fans_club"], 7);
        assert!(counter["time"].is_null());
    }

    #[test]
    fn test_known_time() {
        assert_eq!(known_time(0), None);
        assert_eq!(known_time(-5), None);
        assert_eq!(known_time(42), Some(42));
    }
}
