use serde::{Deserialize, Serialize};

use crate::element::Element;

/// 私聊频道前缀，`private:<用户 ID>`
pub const PRIVATE_PREFIX: &str = "private:";

/// 会话事件类型常量
pub mod session_types {
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_SENT: &str = "message-sent";
    pub const MESSAGE_DELETED: &str = "message-deleted";
    pub const FRIEND_REQUEST: &str = "friend-request";
    pub const FRIEND_ADDED: &str = "friend-added";
    pub const GUILD_REQUEST: &str = "guild-request";
    pub const GUILD_MEMBER_REQUEST: &str = "guild-member-request";
    pub const GUILD_ADDED: &str = "guild-added";
    pub const GUILD_DELETED: &str = "guild-deleted";
    pub const GUILD_MEMBER: &str = "guild-member";
    pub const GUILD_MEMBER_ADDED: &str = "guild-member-added";
    pub const GUILD_MEMBER_DELETED: &str = "guild-member-deleted";
    pub const GUILD_FILE_ADDED: &str = "guild-file-added";
    pub const NOTICE: &str = "notice";
    pub const ONEBOT: &str = "onebot";
}

/// 消息作者
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Author {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

impl Author {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }
}

/// 被引用的消息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Quote {
    pub message_id: String,
    pub content: String,
    pub elements: Vec<Element>,
    pub author: Option<Author>,
    pub channel_id: Option<String>,
    pub timestamp: Option<i64>,
}

/// 宿主会话
///
/// 频道以 `private:` 开头时为私聊，否则为群聊。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub event_type: String,
    pub subtype: Option<String>,
    pub subsubtype: Option<String>,
    pub platform: Option<String>,
    pub self_id: String,
    pub user_id: Option<String>,
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    pub target_id: Option<String>,
    pub operator_id: Option<String>,
    pub message_id: Option<String>,
    /// 毫秒时间戳
    pub timestamp: i64,
    pub content: String,
    pub elements: Vec<Element>,
    pub author: Option<Author>,
    pub quote: Option<Box<Quote>>,
}

impl Session {
    pub fn new(event_type: impl Into<String>, self_id: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            self_id: self_id.into(),
            ..Default::default()
        }
    }

    /// 私聊对端 ID
    pub fn private_peer(&self) -> Option<&str> {
        self.channel_id.as_deref()?.strip_prefix(PRIVATE_PREFIX)
    }
}
