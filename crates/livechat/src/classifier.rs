//! Notice classification.
//!
//! Turns one decoded notice (a JSON object with a `cmd` discriminator) into
//! zero, one or two [`ChatItem`]s. Field positions and names follow the
//! platform's wire format and must not be "tidied up".
//!
//! A recognized notice with a missing or malformed field is skipped and
//! counted in [`ClassifierStats::mismatched`]; it never aborts the session.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{LiveChatError, Result};
use crate::item::{
    ChatItem, Counter, EntryItem, GiftItem, GuardPurchaseItem, LivePhase, MemberBadge,
    MessageItem, known_time,
};

/// Notices that are understood and deliberately dropped: rankings, banners,
/// and notices that duplicate information carried by another notice.
pub const IGNORED_COMMANDS: &[&str] = &[
    "HOT_RANK_CHANGED",
    "HOT_RANK_CHANGED_V2",
    "HOT_RANK_SETTLEMENT",
    "HOT_RANK_SETTLEMENT_V2",
    "ONLINE_RANK_V2",
    "ONLINE_RANK_TOP3",
    "STOP_LIVE_ROOM_LIST",
    "COMMON_NOTICE_DANMAKU",
    "WIDGET_BANNER",
    "ACTIVITY_BANNER_CHANGE",
    "ACTIVITY_BANNER_CHANGE_V2",
    "ROOM_SKIN_MSG",
    "INTERACT_WORD",
    "LIKE_INFO_V3_UPDATE",
    "LIKE_INFO_V3_CLICK",
    // references an earlier super chat by id
    "SUPER_CHAT_MESSAGE_DELETE",
    "ROOM_BLOCK_MSG",
    // sent alongside GUARD_BUY
    "USER_TOAST_MSG",
    // sent alongside SEND_GIFT, does not change the total
    "COMBO_SEND",
    // translated copy of SUPER_CHAT_MESSAGE
    "SUPER_CHAT_MESSAGE_JPN",
    // sent alongside DANMU_MSG
    "LIVE_INTERACTIVE_GAME",
    "GUARD_HONOR_THOUSAND",
    "LIVE_MULTI_VIEW_CHANGE",
    "NOTICE_MSG",
];

/// Per-session classification counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassifierStats {
    /// Items produced.
    pub classified: u64,
    /// Notices dropped on purpose (denylist, zero-time LIVE).
    pub ignored: u64,
    /// Notices with an unknown or missing `cmd`.
    pub unrecognized: u64,
    /// Recognized notices missing an expected field.
    pub mismatched: u64,
}

/// Classify one notice. An empty result means the notice was discarded.
pub fn classify(raw: &Value, stats: &mut ClassifierStats) -> Vec<ChatItem> {
    let Some(cmd) = raw.get("cmd").and_then(Value::as_str) else {
        stats.unrecognized += 1;
        warn!("Notice without cmd: {}", raw);
        return Vec::new();
    };

    // Variants such as "DANMU_MSG:4:0:2:2:2:0" share the base command.
    let cmd = cmd.split(':').next().unwrap_or(cmd);

    if IGNORED_COMMANDS.contains(&cmd) {
        stats.ignored += 1;
        return Vec::new();
    }

    let result = match cmd {
        "DANMU_MSG" => parse_danmu_msg(raw).map(|item| vec![item]),
        "SUPER_CHAT_MESSAGE" => parse_super_chat(raw).map(|item| vec![item]),
        "SEND_GIFT" => parse_gift(raw).map(|item| vec![item]),
        "GUARD_BUY" => parse_guard_buy(raw).map(|item| vec![item]),
        "ENTRY_EFFECT" => parse_entry_effect(raw).map(|item| vec![item]),
        "WATCHED_CHANGE" => data_number(raw, cmd, "num")
            .map(|n| vec![ChatItem::counter(Counter::Watched(n))]),
        "ONLINE_RANK_COUNT" => data_number(raw, cmd, "count")
            .map(|n| vec![ChatItem::counter(Counter::Interacted(n))]),
        "ROOM_REAL_TIME_MESSAGE_UPDATE" => parse_fans_update(raw),
        "ROOM_CHANGE" => parse_room_change(raw).map(|item| vec![item]),
        "LIVE" => Ok(parse_live(raw).into_iter().collect()),
        "PREPARING" => Ok(vec![ChatItem::lifecycle(None, LivePhase::Stop)]),
        _ => {
            stats.unrecognized += 1;
            warn!("Unrecognized notice {}: {}", cmd, raw);
            return Vec::new();
        }
    };

    match result {
        Ok(items) if items.is_empty() => {
            stats.ignored += 1;
            trace!("Dropped {} notice", cmd);
            items
        }
        Ok(items) => {
            stats.classified += items.len() as u64;
            debug!("Classified {} into {} item(s)", cmd, items.len());
            items
        }
        Err(e) => {
            stats.mismatched += 1;
            warn!("{}: {}", e, raw);
            Vec::new()
        }
    }
}

fn require<T>(value: Option<T>, cmd: &str, path: &str) -> Result<T> {
    value.ok_or_else(|| LiveChatError::mismatch(cmd, format!("missing or invalid `{path}`")))
}

/// Deserialize `raw.data` into a typed shape.
fn data<'a, T: Deserialize<'a>>(raw: &'a Value, cmd: &str) -> Result<T> {
    let data = require(raw.get("data").filter(|d| d.is_object()), cmd, "data")?;
    T::deserialize(data).map_err(|e| LiveChatError::mismatch(cmd, format!("data: {e}")))
}

/// Integers arrive as JSON numbers, occasionally as floats or strings.
fn number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn data_number(raw: &Value, cmd: &str, key: &str) -> Result<u64> {
    let data = require(raw.get("data"), cmd, "data")?;
    require(data.get(key).and_then(number), cmd, key)
}

/// Accept `true`/`false` as well as `0`/`1`.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    })
}

/// `ceil(amount / 1000)`, the coin to currency conversion.
fn coins_to_price(coins: u64) -> u64 {
    coins.div_ceil(1000)
}

/// Danmu text sometimes carries bare CR/LF.
fn clean_text(text: &str) -> String {
    text.trim().replace(&['\r', '\n'][..], "")
}

fn parse_danmu_msg(raw: &Value) -> Result<ChatItem> {
    const CMD: &str = "DANMU_MSG";

    let info = require(raw.get("info").and_then(Value::as_array), CMD, "info")?;
    let meta = require(info.first().and_then(Value::as_array), CMD, "info[0]")?;
    let text = require(info.get(1).and_then(Value::as_str), CMD, "info[1]")?;
    let user = require(info.get(2).and_then(Value::as_array), CMD, "info[2]")?;
    let medal = require(info.get(3).and_then(Value::as_array), CMD, "info[3]")?;
    let extra = require(info.get(9).filter(|v| v.is_object()), CMD, "info[9]")?;

    let user_id = require(user.first().and_then(number), CMD, "info[2][0]")?;
    let user_name = require(user.get(1).and_then(Value::as_str), CMD, "info[2][1]")?;
    let time = extra.get("ts").and_then(Value::as_i64).and_then(known_time);

    let mut message = MessageItem::new(time, user_id, user_name, clean_text(text));
    message.color = meta.get(3).and_then(number).and_then(|c| u32::try_from(c).ok());
    message.emoticon = meta
        .get(13)
        .and_then(|v| v.get("emoticon_unique"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string);
    message.manager = user.get(2).and_then(number).is_some_and(|m| m != 0);

    if !medal.is_empty() {
        message.badge = parse_medal_array(medal);
        if message.badge.is_none() {
            debug!("Incomplete badge in DANMU_MSG from {}: {:?}", user_id, medal);
        }
    }

    Ok(ChatItem::Message(message))
}

/// `info[3]`: level, name, owner name, owner room id, color, ..., active at 11,
/// owner user id at 12. `None` when a required position is missing.
fn parse_medal_array(medal: &[Value]) -> Option<MemberBadge> {
    Some(MemberBadge {
        level: medal.first().and_then(number)?,
        name: medal.get(1).and_then(Value::as_str)?.to_string(),
        owner_name: medal
            .get(2)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        owner_room_id: medal.get(3).and_then(number)?,
        color: medal.get(4).and_then(number).and_then(|c| u32::try_from(c).ok())?,
        active: medal.get(11).and_then(number).is_some_and(|a| a != 0),
        owner_user_id: medal.get(12).and_then(number).unwrap_or_default(),
    })
}

#[derive(Debug, Deserialize)]
struct SuperChatData {
    uid: u64,
    #[serde(default)]
    start_time: i64,
    message: String,
    price: u64,
    #[serde(default, deserialize_with = "flag")]
    manager: bool,
    user_info: SuperChatUser,
    #[serde(default)]
    medal_info: Option<MedalInfo>,
}

#[derive(Debug, Deserialize)]
struct SuperChatUser {
    uname: String,
}

#[derive(Debug, Deserialize)]
struct MedalInfo {
    #[serde(default)]
    medal_color: Option<String>,
    #[serde(default)]
    medal_level: u64,
    #[serde(default)]
    medal_name: String,
    #[serde(default)]
    anchor_uname: String,
    #[serde(default)]
    anchor_roomid: u64,
    #[serde(default)]
    target_id: u64,
    #[serde(default, deserialize_with = "flag")]
    is_lighted: bool,
}

/// `#RRGGBB` to integer RGB.
fn parse_hex_color(color: &str) -> Option<u32> {
    let hex = color.strip_prefix('#').filter(|_| color.len() <= 7)?;
    u32::from_str_radix(hex, 16).ok()
}

fn parse_super_chat(raw: &Value) -> Result<ChatItem> {
    const CMD: &str = "SUPER_CHAT_MESSAGE";

    let data: SuperChatData = data(raw, CMD)?;

    let mut message = MessageItem::new(
        known_time(data.start_time),
        data.uid,
        data.user_info.uname,
        data.message,
    );
    message.price = Some(data.price);
    message.manager = data.manager;

    if let Some(medal) = data.medal_info {
        let color = require(
            medal.medal_color.as_deref().and_then(parse_hex_color),
            CMD,
            "data.medal_info.medal_color",
        )?;
        message.badge = Some(MemberBadge {
            level: medal.medal_level,
            name: medal.medal_name,
            color,
            owner_name: medal.anchor_uname,
            owner_room_id: medal.anchor_roomid,
            owner_user_id: medal.target_id,
            active: medal.is_lighted,
        });
    }

    Ok(ChatItem::Message(message))
}

#[derive(Debug, Deserialize)]
struct GiftData {
    uid: u64,
    uname: String,
    #[serde(default)]
    action: String,
    num: u64,
    #[serde(rename = "giftName")]
    gift_name: String,
    coin_type: String,
    total_coin: u64,
    #[serde(default)]
    start_time: i64,
    #[serde(default)]
    timestamp: i64,
}

fn parse_gift(raw: &Value) -> Result<ChatItem> {
    const CMD: &str = "SEND_GIFT";

    let data: GiftData = data(raw, CMD)?;

    // silver is the free currency, gold the paid one
    let (price, coins) = match data.coin_type.as_str() {
        "silver" => (0, data.total_coin),
        "gold" => (coins_to_price(data.total_coin), 0),
        other => {
            return Err(LiveChatError::mismatch(
                CMD,
                format!("unknown coin type `{other}`"),
            ));
        }
    };

    Ok(ChatItem::Gift(GiftItem {
        time: known_time(data.start_time).or_else(|| known_time(data.timestamp)),
        user_id: data.uid,
        user_name: data.uname,
        action: data.action,
        num: data.num,
        gift_name: data.gift_name,
        price,
        coins,
    }))
}

#[derive(Debug, Deserialize)]
struct GuardBuyData {
    uid: u64,
    username: String,
    num: u64,
    gift_name: String,
    price: u64,
    #[serde(default)]
    start_time: i64,
}

fn parse_guard_buy(raw: &Value) -> Result<ChatItem> {
    let data: GuardBuyData = data(raw, "GUARD_BUY")?;

    Ok(ChatItem::GuardPurchase(GuardPurchaseItem {
        time: known_time(data.start_time),
        user_id: data.uid,
        user_name: data.username,
        num: data.num,
        gift_name: data.gift_name,
        price: coins_to_price(data.price),
    }))
}

#[derive(Debug, Deserialize)]
struct EntryEffectData {
    uid: u64,
    copy_writing: String,
    /// Nanoseconds.
    #[serde(default)]
    trigger_time: u64,
}

/// The user name is the `<%...%>` part of e.g. `欢迎 <%alice%> 进入直播间`.
fn delimited_name(text: &str) -> Option<&str> {
    let start = text.find("<%")? + 2;
    let len = text[start..].find("%>")?;
    Some(&text[start..start + len])
}

fn parse_entry_effect(raw: &Value) -> Result<ChatItem> {
    const CMD: &str = "ENTRY_EFFECT";

    let data: EntryEffectData = data(raw, CMD)?;
    let user_name = require(
        delimited_name(&data.copy_writing),
        CMD,
        "data.copy_writing <%...%>",
    )?;

    let secs = data.trigger_time.div_ceil(1_000_000_000);
    Ok(ChatItem::Entry(EntryItem {
        time: known_time(i64::try_from(secs).unwrap_or_default()),
        user_id: data.uid,
        user_name: user_name.to_string(),
    }))
}

fn parse_fans_update(raw: &Value) -> Result<Vec<ChatItem>> {
    const CMD: &str = "ROOM_REAL_TIME_MESSAGE_UPDATE";

    let fans = data_number(raw, CMD, "fans")?;
    let fans_club = data_number(raw, CMD, "fans_club")?;
    Ok(vec![
        ChatItem::counter(Counter::Fans(fans)),
        ChatItem::counter(Counter::FansClub(fans_club)),
    ])
}

fn parse_room_change(raw: &Value) -> Result<ChatItem> {
    const CMD: &str = "ROOM_CHANGE";

    let data = require(raw.get("data"), CMD, "data")?;
    let title = require(data.get("title").and_then(Value::as_str), CMD, "data.title")?;
    Ok(ChatItem::counter(Counter::Title(title.to_string())))
}

/// Two LIVE notices arrive per stream start; only one carries `live_time`.
fn parse_live(raw: &Value) -> Option<ChatItem> {
    let live_time = raw.get("live_time").and_then(Value::as_i64).and_then(known_time)?;
    Some(ChatItem::lifecycle(Some(live_time), LivePhase::Start))
}
