use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

use crate::cqcode;
use crate::element::Element;
use crate::host::{FaceResolver, HostBot};
use crate::message::Segment;
use crate::session::{Author, PRIVATE_PREFIX, Session, session_types};

/// 元素转换时可用的上下文
pub struct TransformContext<'a> {
    pub platform: &'a str,
    pub faces: &'a dyn FaceResolver,
}

/// 单个消息段的转换规则，返回 `None` 表示丢弃该段
pub type TransformFn = Arc<dyn Fn(&Segment, &TransformContext<'_>) -> Option<Element> + Send + Sync>;

/// 按消息段类型分发的转换表
///
/// 未注册的类型保留为 [`Element::Unknown`]。
#[derive(Clone)]
pub struct ElementTransform {
    rules: HashMap<String, TransformFn>,
}

impl ElementTransform {
    /// 空转换表
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// 注册或覆盖一个类型的转换规则
    pub fn register<F>(mut self, kind: &str, rule: F) -> Self
    where
        F: Fn(&Segment, &TransformContext<'_>) -> Option<Element> + Send + Sync + 'static,
    {
        self.rules.insert(kind.to_string(), Arc::new(rule));
        self
    }

    pub fn apply(&self, segments: &[Segment], ctx: &TransformContext<'_>) -> Vec<Element> {
        segments
            .iter()
            .filter_map(|seg| match self.rules.get(&seg.kind) {
                Some(rule) => rule(seg, ctx),
                None => Some(unknown(seg)),
            })
            .collect()
    }
}

impl Default for ElementTransform {
    fn default() -> Self {
        Self::empty()
            .register("text", |seg, _| {
                Some(Element::Text(seg.attr("text").unwrap_or_default()))
            })
            .register("at", |seg, _| match seg.attr("qq").as_deref() {
                Some("all") => Some(Element::at_all()),
                Some(qq) => Some(Element::at(qq)),
                None => None,
            })
            .register("face", |seg, ctx| {
                let id = seg.attr("id")?;
                let children = ctx
                    .faces
                    .face_url(&id)
                    .map(|url| vec![Element::image(url)])
                    .unwrap_or_default();
                Some(Element::Face {
                    id,
                    platform: Some(ctx.platform.to_string()),
                    children,
                })
            })
            .register("record", |seg, _| {
                Some(Element::Audio {
                    src: media_source(seg)?,
                    title: seg.attr("name"),
                })
            })
            .register("image", |seg, _| {
                Some(Element::Image {
                    src: media_source(seg)?,
                    title: seg.attr("summary").filter(|s| !s.is_empty()),
                })
            })
            .register("reply", |seg, _| {
                Some(Element::Quote {
                    id: seg.attr("id"),
                    children: Vec::new(),
                })
            })
    }
}

fn media_source(seg: &Segment) -> Option<String> {
    seg.attr("url")
        .filter(|s| !s.is_empty())
        .or_else(|| seg.attr("file"))
}

fn unknown(seg: &Segment) -> Element {
    let attrs: BTreeMap<String, String> = seg
        .data
        .iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), v)
        })
        .collect();
    Element::Unknown {
        tag: seg.kind.clone(),
        attrs,
        children: Vec::new(),
    }
}

/// 字符串化 ID；缺失、空串与 0 视为不存在
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_i64() != Some(0) => Some(n.to_string()),
        _ => None,
    }
}

/// 下划线与驼峰转为连字符形式
fn hyphenate(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '_' {
            out.push('-');
        } else if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// OneBot 事件 -> 宿主会话
#[derive(Clone)]
pub struct InboundTranslator {
    transform: ElementTransform,
    faces: Arc<dyn FaceResolver>,
}

impl InboundTranslator {
    pub fn new(faces: Arc<dyn FaceResolver>) -> Self {
        Self {
            transform: ElementTransform::default(),
            faces,
        }
    }

    pub fn with_transform(mut self, transform: ElementTransform) -> Self {
        self.transform = transform;
        self
    }

    /// 翻译一条 OneBot 事件
    ///
    /// 未知的 `notice_type` 与非 message/request/notice 的 `post_type` 返回 `None`。
    pub async fn translate(&self, bot: &dyn HostBot, raw: &Value) -> Option<Session> {
        let self_id = id_string(&raw["self_tiny_id"])
            .or_else(|| id_string(&raw["self_id"]))
            .unwrap_or_default();
        let post_type = raw["post_type"].as_str()?;

        let mut session = Session::new(post_type, self_id);
        session.platform = Some(bot.platform().to_string());
        session.timestamp = raw["time"].as_i64().unwrap_or_default().saturating_mul(1000);

        match post_type {
            "message" | "message_sent" => {
                self.adapt_message(bot, raw, &mut session).await;

                if post_type == "message_sent" && session.guild_id.is_none() {
                    let target = id_string(&raw["target_id"]).unwrap_or_default();
                    session.channel_id = Some(format!("{}{}", PRIVATE_PREFIX, target));
                }

                let message_type = raw["message_type"].as_str().map(str::to_string);
                session.event_type = session_types::MESSAGE.into();
                session.subtype = match message_type.as_deref() {
                    Some("guild") => Some("group".into()),
                    _ => message_type.clone(),
                };
                session.subsubtype = message_type;
                Some(session)
            }
            "request" => {
                copy_ids(raw, &mut session);
                adapt_request(raw, &mut session);
                Some(session)
            }
            "notice" => {
                copy_ids(raw, &mut session);
                adapt_notice(raw, &mut session)?;
                Some(session)
            }
            _ => None,
        }
    }

    async fn adapt_message(&self, bot: &dyn HostBot, raw: &Value, session: &mut Session) {
        let sender = &raw["sender"];
        let user_id = id_string(&sender["user_id"])
            .or_else(|| id_string(&raw["user_id"]))
            .unwrap_or_default();
        let author = Author {
            user_id: user_id.clone(),
            username: sender["card"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            nickname: sender["nickname"].as_str().map(str::to_string),
            avatar: None,
            roles: sender["role"]
                .as_str()
                .map(|r| vec![r.to_string()])
                .unwrap_or_default(),
        };

        session.user_id = Some(user_id.clone());
        session.author = Some(author);
        session.message_id = match &raw["message_id"] {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        };

        if let Some(guild) = id_string(&raw["guild_id"]) {
            session.guild_id = Some(guild);
            session.channel_id = id_string(&raw["channel_id"]);
        } else if let Some(group) = id_string(&raw["group_id"]) {
            session.guild_id = Some(group.clone());
            session.channel_id = Some(group);
        } else {
            session.channel_id = Some(format!("{}{}", PRIVATE_PREFIX, user_id));
        }

        let segments = cqcode::parse_value(&raw["message"]);
        let ctx = TransformContext {
            platform: bot.platform(),
            faces: self.faces.as_ref(),
        };
        let mut elements = self.transform.apply(&segments, &ctx);

        if let Some(Element::Quote { id, .. }) = elements.first() {
            let reply_id = id.clone().unwrap_or_default();
            elements.remove(0);
            let channel = session.channel_id.clone().unwrap_or_default();
            match bot.get_message(&channel, &reply_id).await {
                Ok(quote) => session.quote = Some(Box::new(quote)),
                Err(e) => {
                    warn!(target: "Translate", "引用消息 {} 解析失败: {}", reply_id, e);
                }
            }
        }

        session.content = Element::render(&elements);
        session.elements = elements;
    }
}

fn copy_ids(raw: &Value, session: &mut Session) {
    session.subtype = raw["sub_type"].as_str().map(str::to_string);

    if let Some(user) = id_string(&raw["user_id"]) {
        session.user_id = Some(user);
    }
    if let Some(group) = id_string(&raw["group_id"]) {
        session.guild_id = Some(group.clone());
        session.channel_id = Some(group);
    }
    if let Some(guild) = id_string(&raw["guild_id"]) {
        session.guild_id = Some(guild);
    }
    if let Some(channel) = id_string(&raw["channel_id"]) {
        session.channel_id = Some(channel);
    }
    if let Some(target) = id_string(&raw["target_id"]) {
        session.target_id = Some(target);
    }
    if let Some(operator) = id_string(&raw["operator_id"]) {
        session.operator_id = Some(operator);
    }
    if let Some(message) = id_string(&raw["message_id"]) {
        session.message_id = Some(message);
    }
}

fn private_channel(session: &Session) -> String {
    format!("{}{}", PRIVATE_PREFIX, session.user_id.as_deref().unwrap_or_default())
}

fn adapt_request(raw: &Value, session: &mut Session) {
    session.content = raw["comment"].as_str().unwrap_or_default().to_string();
    session.message_id = raw["flag"].as_str().map(str::to_string);

    if raw["request_type"].as_str() == Some("friend") {
        session.event_type = session_types::FRIEND_REQUEST.into();
        session.channel_id = Some(private_channel(session));
    } else if raw["sub_type"].as_str() == Some("add") {
        session.event_type = session_types::GUILD_MEMBER_REQUEST.into();
    } else {
        session.event_type = session_types::GUILD_REQUEST.into();
    }
}

fn adapt_notice(raw: &Value, session: &mut Session) -> Option<()> {
    let set = |session: &mut Session, event_type: &str, subtype: &str| {
        session.event_type = event_type.into();
        session.subtype = Some(subtype.into());
    };

    match raw["notice_type"].as_str()? {
        "group_recall" => {
            set(session, session_types::MESSAGE_DELETED, "group");
            session.subsubtype = Some("group".into());
        }
        "friend_recall" => {
            set(session, session_types::MESSAGE_DELETED, "private");
            session.channel_id = Some(private_channel(session));
            session.subsubtype = Some("private".into());
        }
        "guild_channel_recall" => {
            set(session, session_types::MESSAGE_DELETED, "guild");
            session.subsubtype = Some("guild".into());
        }
        "friend_add" => session.event_type = session_types::FRIEND_ADDED.into(),
        "group_upload" => session.event_type = session_types::GUILD_FILE_ADDED.into(),
        "group_admin" => set(session, session_types::GUILD_MEMBER, "role"),
        "group_ban" => set(session, session_types::GUILD_MEMBER, "ban"),
        "group_card" => set(session, session_types::GUILD_MEMBER, "nickname"),
        kind @ ("group_decrease" | "group_increase") => {
            let is_self = session.user_id.as_deref() == Some(session.self_id.as_str());
            let event_type = match (kind, is_self) {
                ("group_decrease", true) => session_types::GUILD_DELETED,
                ("group_decrease", false) => session_types::GUILD_MEMBER_DELETED,
                (_, true) => session_types::GUILD_ADDED,
                (_, false) => session_types::GUILD_MEMBER_ADDED,
            };
            let active = session.user_id.is_some() && session.user_id == session.operator_id;
            set(session, event_type, if active { "active" } else { "passive" });
        }
        "notify" => {
            let subtype = hyphenate(raw["sub_type"].as_str().unwrap_or_default());
            set(session, session_types::NOTICE, &subtype);
            match subtype.as_str() {
                "poke" if session.channel_id.is_none() => {
                    session.channel_id = Some(private_channel(session));
                }
                "honor" => {
                    session.subsubtype = raw["honor_type"].as_str().map(hyphenate);
                }
                _ => {}
            }
        }
        kind @ ("message_reactions_updated" | "channel_created" | "channel_updated"
        | "channel_destroyed") => {
            set(session, session_types::ONEBOT, &hyphenate(kind));
        }
        _ => return None,
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{NoFaces, RecordingHost, TemplateFaces};
    use crate::session::Quote;
    use serde_json::json;

    fn translator() -> InboundTranslator {
        InboundTranslator::new(Arc::new(TemplateFaces::new("https://faces.test/{id}.png")))
    }

    #[tokio::test]
    async fn group_message_with_reply() {
        let mut bot = RecordingHost::new("10000");
        bot.messages.insert(
            "77".into(),
            Quote {
                message_id: "77".into(),
                content: "earlier".into(),
                ..Default::default()
            },
        );

        let raw = json!({
            "post_type": "message",
            "message_type": "group",
            "sub_type": "normal",
            "self_id": 10000,
            "time": 1_700_000_000,
            "group_id": 300,
            "user_id": 1,
            "message_id": -12,
            "message": "[CQ:reply,id=77][CQ:at,qq=10000] hi [CQ:face,id=178]",
            "sender": {"user_id": 1, "nickname": "nick", "card": "card", "role": "admin"},
        });

        let session = translator().translate(&bot, &raw).await.unwrap();
        assert_eq!(session.event_type, "message");
        assert_eq!(session.subtype.as_deref(), Some("group"));
        assert_eq!(session.subsubtype.as_deref(), Some("group"));
        assert_eq!(session.self_id, "10000");
        assert_eq!(session.guild_id.as_deref(), Some("300"));
        assert_eq!(session.channel_id.as_deref(), Some("300"));
        assert_eq!(session.message_id.as_deref(), Some("-12"));
        assert_eq!(session.timestamp, 1_700_000_000_000);
        assert_eq!(session.quote.as_ref().unwrap().content, "earlier");

        let author = session.author.as_ref().unwrap();
        assert_eq!(author.user_id, "1");
        assert_eq!(author.username.as_deref(), Some("card"));
        assert_eq!(author.roles, vec!["admin".to_string()]);

        assert_eq!(
            session.content,
            "<at id=\"10000\"/> hi <face id=\"178\" platform=\"onebot\"><img src=\"https://faces.test/178.png\"/></face>"
        );
        assert_eq!(session.elements.len(), 3);
    }

    #[tokio::test]
    async fn out_of_range_time_saturates() {
        let bot = RecordingHost::new("10000");
        let raw = json!({
            "post_type": "request",
            "request_type": "friend",
            "self_id": 10000,
            "time": i64::MAX,
            "user_id": 42,
            "flag": "f1",
        });

        let session = translator().translate(&bot, &raw).await.unwrap();
        assert_eq!(session.timestamp, i64::MAX);
    }

    #[tokio::test]
    async fn failed_quote_lookup_is_not_fatal() {
        let bot = RecordingHost::new("10000");
        let raw = json!({
            "post_type": "message",
            "message_type": "private",
            "self_id": 10000,
            "time": 1,
            "user_id": 42,
            "message_id": 3,
            "message": [
                {"type": "reply", "data": {"id": "404"}},
                {"type": "text", "data": {"text": "a<b"}},
            ],
            "sender": {"user_id": 42},
        });

        let session = translator().translate(&bot, &raw).await.unwrap();
        assert!(session.quote.is_none());
        assert_eq!(session.channel_id.as_deref(), Some("private:42"));
        assert_eq!(session.content, "a&lt;b");
    }

    #[tokio::test]
    async fn sent_private_message_uses_target() {
        let bot = RecordingHost::new("10000");
        let raw = json!({
            "post_type": "message_sent",
            "message_type": "private",
            "self_id": 10000,
            "self_tiny_id": "144115218677563300",
            "time": 1,
            "target_id": 42,
            "message_id": 3,
            "message": "[CQ:at,qq=all][CQ:record,file=a.amr][CQ:shake]",
            "sender": {"user_id": 10000},
        });

        let session = InboundTranslator::new(Arc::new(NoFaces))
            .translate(&bot, &raw)
            .await
            .unwrap();
        assert_eq!(session.self_id, "144115218677563300");
        assert_eq!(session.channel_id.as_deref(), Some("private:42"));
        assert_eq!(session.content, "<at type=\"all\"/><audio src=\"a.amr\"/><shake/>");
    }

    #[tokio::test]
    async fn guild_message_maps_to_group_subtype() {
        let bot = RecordingHost::new("10000");
        let raw = json!({
            "post_type": "message",
            "message_type": "guild",
            "self_id": 10000,
            "time": 1,
            "guild_id": "g1",
            "channel_id": "c1",
            "message_id": "m1",
            "message": "x",
            "sender": {"user_id": "u1"},
        });

        let session = translator().translate(&bot, &raw).await.unwrap();
        assert_eq!(session.subtype.as_deref(), Some("group"));
        assert_eq!(session.subsubtype.as_deref(), Some("guild"));
        assert_eq!(session.guild_id.as_deref(), Some("g1"));
        assert_eq!(session.channel_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn custom_transform_rule() {
        let bot = RecordingHost::new("1");
        let transform = ElementTransform::default().register("image", |_, _| None);
        let raw = json!({
            "post_type": "message", "message_type": "private", "self_id": 1, "time": 1,
            "message_id": 1, "message": "a[CQ:image,file=x.png]b", "sender": {"user_id": 2},
        });

        let session = translator()
            .with_transform(transform)
            .translate(&bot, &raw)
            .await
            .unwrap();
        assert_eq!(session.content, "ab");
    }

    #[tokio::test]
    async fn requests() {
        let bot = RecordingHost::new("1");
        let friend = json!({
            "post_type": "request", "request_type": "friend", "self_id": 1, "time": 1,
            "user_id": 42, "comment": "hi", "flag": "f1",
        });
        let session = translator().translate(&bot, &friend).await.unwrap();
        assert_eq!(session.event_type, session_types::FRIEND_REQUEST);
        assert_eq!(session.channel_id.as_deref(), Some("private:42"));
        assert_eq!(session.content, "hi");
        assert_eq!(session.message_id.as_deref(), Some("f1"));

        let join = json!({
            "post_type": "request", "request_type": "group", "sub_type": "add",
            "self_id": 1, "time": 1, "group_id": 300, "user_id": 42, "flag": "f2",
        });
        let session = translator().translate(&bot, &join).await.unwrap();
        assert_eq!(session.event_type, session_types::GUILD_MEMBER_REQUEST);
        assert_eq!(session.guild_id.as_deref(), Some("300"));

        let invite = json!({
            "post_type": "request", "request_type": "group", "sub_type": "invite",
            "self_id": 1, "time": 1, "group_id": 300, "flag": "f3",
        });
        let session = translator().translate(&bot, &invite).await.unwrap();
        assert_eq!(session.event_type, session_types::GUILD_REQUEST);
        assert_eq!(session.subtype.as_deref(), Some("invite"));
    }

    #[tokio::test]
    async fn notice_switch() {
        let bot = RecordingHost::new("1");
        let notice = |extra: Value| {
            let mut raw = json!({"post_type": "notice", "self_id": 1, "time": 1});
            if let (Value::Object(base), Value::Object(extra)) = (&mut raw, extra) {
                base.extend(extra);
            }
            raw
        };
        let t = translator();

        let s = t
            .translate(&bot, &notice(json!({"notice_type": "friend_recall", "user_id": 42, "message_id": 9})))
            .await
            .unwrap();
        assert_eq!(s.event_type, session_types::MESSAGE_DELETED);
        assert_eq!(s.subtype.as_deref(), Some("private"));
        assert_eq!(s.channel_id.as_deref(), Some("private:42"));
        assert_eq!(s.message_id.as_deref(), Some("9"));

        let s = t
            .translate(&bot, &notice(json!({"notice_type": "group_decrease", "group_id": 3, "user_id": 1, "operator_id": 1})))
            .await
            .unwrap();
        assert_eq!(s.event_type, session_types::GUILD_DELETED);
        assert_eq!(s.subtype.as_deref(), Some("active"));

        let s = t
            .translate(&bot, &notice(json!({"notice_type": "group_increase", "group_id": 3, "user_id": 5, "operator_id": 6})))
            .await
            .unwrap();
        assert_eq!(s.event_type, session_types::GUILD_MEMBER_ADDED);
        assert_eq!(s.subtype.as_deref(), Some("passive"));

        let s = t
            .translate(&bot, &notice(json!({"notice_type": "notify", "sub_type": "lucky_king", "group_id": 3})))
            .await
            .unwrap();
        assert_eq!(s.event_type, session_types::NOTICE);
        assert_eq!(s.subtype.as_deref(), Some("lucky-king"));

        let s = t
            .translate(&bot, &notice(json!({"notice_type": "notify", "sub_type": "poke", "user_id": 7})))
            .await
            .unwrap();
        assert_eq!(s.channel_id.as_deref(), Some("private:7"));

        let s = t
            .translate(&bot, &notice(json!({"notice_type": "notify", "sub_type": "honor", "honor_type": "talkative", "group_id": 3})))
            .await
            .unwrap();
        assert_eq!(s.subsubtype.as_deref(), Some("talkative"));

        let s = t
            .translate(&bot, &notice(json!({"notice_type": "channel_created", "guild_id": "g"})))
            .await
            .unwrap();
        assert_eq!(s.event_type, session_types::ONEBOT);
        assert_eq!(s.subtype.as_deref(), Some("channel-created"));

        let s = t
            .translate(&bot, &notice(json!({"notice_type": "group_card", "group_id": 3, "user_id": 4})))
            .await
            .unwrap();
        assert_eq!(s.event_type, session_types::GUILD_MEMBER);
        assert_eq!(s.subtype.as_deref(), Some("nickname"));
    }

    #[tokio::test]
    async fn unknown_kinds_are_dropped() {
        let bot = RecordingHost::new("1");
        let t = translator();
        let unknown_notice = json!({"post_type": "notice", "notice_type": "essence", "self_id": 1});
        assert!(t.translate(&bot, &unknown_notice).await.is_none());

        let meta = json!({"post_type": "meta_event", "meta_event_type": "heartbeat", "self_id": 1});
        assert!(t.translate(&bot, &meta).await.is_none());

        assert!(t.translate(&bot, &json!({"self_id": 1})).await.is_none());
    }

    #[test]
    fn hyphenate_snake_and_camel() {
        assert_eq!(hyphenate("lucky_king"), "lucky-king");
        assert_eq!(hyphenate("groupHonor"), "group-honor");
    }
}
