use crate::cqcode;
use crate::element::Element;
use crate::message::Segment;
use crate::payload::{OneBotEvent, Sender, coerce_id};
use crate::session::{PRIVATE_PREFIX, Session, session_types};

/// 可映射到 OneBot 的会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Message,
    MessageSent,
    FriendRequest,
    GuildMemberRequest,
    GuildRequest,
    MessageDeleted,
    FriendAdded,
    GuildFileAdded,
    GuildMember,
}

impl SessionKind {
    pub fn parse(event_type: &str) -> Option<Self> {
        let kind = match event_type {
            session_types::MESSAGE => SessionKind::Message,
            session_types::MESSAGE_SENT | "message_sent" => SessionKind::MessageSent,
            session_types::FRIEND_REQUEST => SessionKind::FriendRequest,
            session_types::GUILD_MEMBER_REQUEST => SessionKind::GuildMemberRequest,
            session_types::GUILD_REQUEST => SessionKind::GuildRequest,
            session_types::MESSAGE_DELETED => SessionKind::MessageDeleted,
            session_types::FRIEND_ADDED => SessionKind::FriendAdded,
            session_types::GUILD_FILE_ADDED => SessionKind::GuildFileAdded,
            session_types::GUILD_MEMBER => SessionKind::GuildMember,
            _ => return None,
        };
        Some(kind)
    }

    pub fn post_type(self) -> &'static str {
        match self {
            SessionKind::Message => "message",
            SessionKind::MessageSent => "message_sent",
            SessionKind::FriendRequest
            | SessionKind::GuildMemberRequest
            | SessionKind::GuildRequest => "request",
            _ => "notice",
        }
    }
}

/// 宿主会话 -> OneBot 上报事件
///
/// 无法映射的会话返回 `None`，调用方直接丢弃即可。
pub fn session_to_onebot(session: &Session) -> Option<OneBotEvent> {
    let kind = SessionKind::parse(&session.event_type)?;
    let mut data = OneBotEvent::new(
        kind.post_type(),
        session.timestamp.div_euclid(1000),
        coerce_id(&session.self_id),
    );

    match kind {
        SessionKind::Message | SessionKind::MessageSent => {
            adapt_message(session, kind, &mut data);
        }
        _ => {
            copy_common_fields(session, &mut data);
            adapt_notice(session, kind, &mut data)?;
        }
    }
    Some(data)
}

fn adapt_message(session: &Session, kind: SessionKind, data: &mut OneBotEvent) {
    data.message_type = session.subsubtype.clone().or_else(|| session.subtype.clone());
    data.sub_type = session.subtype.clone();

    let body = if session.content.is_empty() {
        let segments: Vec<Segment> = session.elements.iter().map(Element::to_segment).collect();
        cqcode::stringify(&segments)
    } else {
        session.content.clone()
    };
    data.message = Some(body.clone());
    data.raw_message = Some(body);

    if let Some(id) = &session.message_id {
        data.message_id = Some(coerce_id(id));
    }

    if let Some(peer) = session.private_peer() {
        data.message_type = Some("private".into());
        data.user_id = Some(coerce_id(peer));
        if kind == SessionKind::MessageSent {
            data.target_id = Some(coerce_id(peer));
        }
    } else if let (Some(guild), Some(channel)) = (&session.guild_id, &session.channel_id) {
        data.message_type = Some("group".into());
        data.group_id = Some(coerce_id(guild));
        data.channel_id = Some(coerce_id(channel));
    }

    // 发送者以作者为准，自身发出的消息里 userId 可能指向对端
    if let Some(author) = &session.author {
        data.user_id = Some(coerce_id(&author.user_id));
        data.sender = Some(Sender {
            nickname: author.nickname.clone(),
            card: author.username.clone(),
            role: author.roles.first().cloned(),
            ..Sender::new(author.user_id.clone())
        });
    } else if data.user_id.is_none()
        && let Some(user) = &session.user_id
    {
        data.user_id = Some(coerce_id(user));
    }

    data.font = Some(0);
    data.message_seq = Some(0);
    data.anonymous = Some(serde_json::Value::Null);
}

fn copy_common_fields(session: &Session, data: &mut OneBotEvent) {
    let id = |value: &Option<String>| value.as_deref().map(coerce_id);

    data.sub_type = session.subtype.clone();
    data.user_id = id(&session.user_id);
    data.target_id = id(&session.target_id);
    data.operator_id = id(&session.operator_id);
    data.message_id = id(&session.message_id);

    if let Some(guild) = &session.guild_id {
        let guild = coerce_id(guild);
        data.guild_id = Some(guild);
        data.group_id = Some(guild);
    }

    // 私聊频道只是标记，对端已在 user_id 中
    match &session.channel_id {
        Some(channel) if !channel.starts_with(PRIVATE_PREFIX) => {
            data.channel_id = Some(coerce_id(channel));
        }
        Some(_) => {}
        None => data.channel_id = data.guild_id,
    }
}

fn adapt_notice(session: &Session, kind: SessionKind, data: &mut OneBotEvent) -> Option<()> {
    match kind {
        SessionKind::FriendRequest => {
            data.request_type = Some("friend".into());
            data.channel_id = None;
            data.group_id = None;
            data.guild_id = None;
            attach_request_payload(session, data);
        }
        SessionKind::GuildMemberRequest => {
            data.request_type = Some("group".into());
            data.sub_type = Some("add".into());
            attach_request_payload(session, data);
        }
        SessionKind::GuildRequest => {
            data.request_type = Some("group".into());
            attach_request_payload(session, data);
        }
        SessionKind::MessageDeleted => {
            let notice = match session.subsubtype.as_deref()? {
                "group" => "group_recall",
                "private" => "friend_recall",
                "guild" => "guild_channel_recall",
                _ => return None,
            };
            data.notice_type = Some(notice.into());
        }
        SessionKind::FriendAdded => data.notice_type = Some("friend_add".into()),
        SessionKind::GuildFileAdded => data.notice_type = Some("group_upload".into()),
        SessionKind::GuildMember => {
            let notice = match session.subtype.as_deref()? {
                "role" => "group_admin",
                "ban" => "group_ban",
                "nickname" => "group_card",
                _ => return None,
            };
            data.notice_type = Some(notice.into());
            if session.subsubtype.as_deref() == Some("deleted") {
                data.sub_type = Some("leave".into());
            }
        }
        SessionKind::Message | SessionKind::MessageSent => return None,
    }
    Some(())
}

fn attach_request_payload(session: &Session, data: &mut OneBotEvent) {
    data.comment = Some(session.content.clone());
    data.flag = session.message_id.clone();
}
