//! OneBot v11 线上数据结构

use serde::{Serialize, Serializer};
use serde_json::Value;

/// 数字 ID
///
/// 宿主 ID 是字符串，OneBot 要求数字。无法解析的 ID 序列化为 `null`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireId {
    Int(i64),
    NaN,
}

impl Serialize for WireId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            WireId::Int(v) => serializer.serialize_i64(*v),
            WireId::NaN => serializer.serialize_none(),
        }
    }
}

/// 宽松整数解析
///
/// 跳过前导空白，接受可选符号，取最长的十进制数字前缀，后续字符忽略。
/// 没有数字或溢出时得到 [`WireId::NaN`]。
pub fn coerce_id(raw: &str) -> WireId {
    let s = raw.trim_start();
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let digits_end = rest
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(rest.len(), |(i, _)| i);
    let digits = &rest[..digits_end];
    if digits.is_empty() {
        return WireId::NaN;
    }

    match digits.parse::<i64>() {
        Ok(v) if negative => WireId::Int(-v),
        Ok(v) => WireId::Int(v),
        Err(_) => WireId::NaN,
    }
}

/// 消息发送者
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Sender {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    pub sex: String,
    pub age: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card: Option<String>,
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Sender {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            nickname: None,
            sex: "unknown".into(),
            age: 0,
            card: None,
            level: String::new(),
            role: None,
        }
    }
}

/// 上报事件
///
/// 除 `post_type` / `time` / `self_id` 外，其余字段缺省时不出现在 JSON 中。
/// `anonymous` 为 `Some(Value::Null)` 时输出 `"anonymous": null`。
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OneBotEvent {
    pub post_type: String,
    pub time: i64,
    pub self_id: WireId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<WireId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<WireId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<WireId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<WireId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<WireId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<WireId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_id: Option<WireId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_seq: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<Sender>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anonymous: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
}

impl OneBotEvent {
    pub fn new(post_type: impl Into<String>, time: i64, self_id: WireId) -> Self {
        Self {
            post_type: post_type.into(),
            time,
            self_id,
            message_type: None,
            notice_type: None,
            request_type: None,
            sub_type: None,
            message_id: None,
            user_id: None,
            group_id: None,
            guild_id: None,
            channel_id: None,
            target_id: None,
            operator_id: None,
            message: None,
            raw_message: None,
            font: None,
            message_seq: None,
            sender: None,
            anonymous: None,
            comment: None,
            flag: None,
        }
    }
}

/// 元事件（生命周期与心跳）
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetaEvent {
    pub self_id: WireId,
    pub time: i64,
    pub post_type: &'static str,
    pub meta_event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
}

impl MetaEvent {
    pub fn lifecycle(self_id: WireId, sub_type: &'static str) -> Self {
        Self {
            self_id,
            time: now_secs(),
            post_type: "meta_event",
            meta_event_type: "lifecycle",
            sub_type: Some(sub_type),
            interval: None,
        }
    }

    pub fn heartbeat(self_id: WireId, interval_ms: u64) -> Self {
        Self {
            self_id,
            time: now_secs(),
            post_type: "meta_event",
            meta_event_type: "heartbeat",
            sub_type: None,
            interval: Some(interval_ms),
        }
    }
}

pub const ACK_PLACEHOLDER: &str = "balabla";
pub const RETCODE_FAILED: i32 = 1400;

/// 动作响应
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActionResponse {
    pub retcode: i32,
    pub status: &'static str,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo: Option<Value>,
}

impl ActionResponse {
    /// 转发后的固定确认，不携带 echo
    pub fn ok() -> Self {
        Self {
            retcode: 0,
            status: "ok",
            data: Value::from(ACK_PLACEHOLDER),
            echo: None,
        }
    }

    pub fn failed(echo: Option<Value>) -> Self {
        Self {
            retcode: RETCODE_FAILED,
            status: "failed",
            data: Value::Null,
            echo,
        }
    }
}

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
