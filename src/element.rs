//! 宿主侧消息元素
//!
//! 与 Satori 消息元素同构，`Display` 输出 Satori XML 形式的内容字符串。

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::message::Segment;

/// 宿主标准消息元素
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// 纯文本
    Text(String),

    /// 提及用户 <at>
    At {
        id: Option<String>,
        name: Option<String>,
        role: Option<String>,
        at_type: Option<String>, // type 字段
    },

    /// 平台表情 <face>，可携带一张预览图
    Face {
        id: String,
        platform: Option<String>,
        children: Vec<Element>,
    },

    /// 图片 <img>
    Image { src: String, title: Option<String> },
    /// 音频 <audio>
    Audio { src: String, title: Option<String> },

    /// 引用 <quote>
    Quote {
        id: Option<String>,
        children: Vec<Element>,
    },

    /// 未知元素
    Unknown {
        tag: String,
        attrs: BTreeMap<String, String>,
        children: Vec<Element>,
    },
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_xml(s).replace('"', "&quot;")
}

fn write_opt(f: &mut fmt::Formatter<'_>, key: &str, value: &Option<String>) -> fmt::Result {
    match value {
        Some(v) => write!(f, " {}=\"{}\"", key, escape_attr(v)),
        None => Ok(()),
    }
}

fn write_children(f: &mut fmt::Formatter<'_>, tag: &str, children: &[Element]) -> fmt::Result {
    if children.is_empty() {
        return write!(f, "/>");
    }
    write!(f, ">")?;
    for c in children {
        write!(f, "{}", c)?;
    }
    write!(f, "</{}>", tag)
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Text(t) => write!(f, "{}", escape_xml(t)),
            Element::At {
                id,
                name,
                role,
                at_type,
            } => {
                write!(f, "<at")?;
                write_opt(f, "id", id)?;
                write_opt(f, "name", name)?;
                write_opt(f, "role", role)?;
                write_opt(f, "type", at_type)?;
                write!(f, "/>")
            }
            Element::Face {
                id,
                platform,
                children,
            } => {
                write!(f, "<face id=\"{}\"", escape_attr(id))?;
                write_opt(f, "platform", platform)?;
                write_children(f, "face", children)
            }
            Element::Image { src, title } => {
                write!(f, "<img src=\"{}\"", escape_attr(src))?;
                write_opt(f, "title", title)?;
                write!(f, "/>")
            }
            Element::Audio { src, title } => {
                write!(f, "<audio src=\"{}\"", escape_attr(src))?;
                write_opt(f, "title", title)?;
                write!(f, "/>")
            }
            Element::Quote { id, children } => {
                write!(f, "<quote")?;
                write_opt(f, "id", id)?;
                write_children(f, "quote", children)
            }
            Element::Unknown {
                tag,
                attrs,
                children,
            } => {
                write!(f, "<{}", tag)?;
                for (k, v) in attrs {
                    write!(f, " {}=\"{}\"", k, escape_attr(v))?;
                }
                write_children(f, tag, children)
            }
        }
    }
}

impl Element {
    pub fn text(content: impl Into<String>) -> Self {
        Element::Text(content.into())
    }

    pub fn at(id: impl Into<String>) -> Self {
        Element::At {
            id: Some(id.into()),
            name: None,
            role: None,
            at_type: None,
        }
    }

    pub fn at_all() -> Self {
        Element::At {
            id: None,
            name: None,
            role: None,
            at_type: Some("all".into()),
        }
    }

    pub fn image(src: impl Into<String>) -> Self {
        Element::Image {
            src: src.into(),
            title: None,
        }
    }

    /// 转为 OneBot 消息段
    pub fn to_segment(&self) -> Segment {
        fn single(kind: &str, key: &str, value: &str) -> Segment {
            let mut data = Map::new();
            data.insert(key.into(), Value::from(value));
            Segment::new(kind, data)
        }

        match self {
            Element::Text(t) => Segment::text(t.clone()),
            Element::At { id, at_type, .. } => {
                let target = match (id, at_type.as_deref()) {
                    (_, Some("all")) => "all",
                    (Some(id), _) => id.as_str(),
                    (None, _) => "",
                };
                single("at", "qq", target)
            }
            Element::Face { id, .. } => single("face", "id", id),
            Element::Image { src, .. } => single("image", "file", src),
            Element::Audio { src, .. } => single("record", "file", src),
            Element::Quote { id, .. } => single("reply", "id", id.as_deref().unwrap_or_default()),
            Element::Unknown { tag, attrs, .. } => Segment::new(
                tag.clone(),
                attrs
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
                    .collect(),
            ),
        }
    }

    /// 渲染为 Satori 内容字符串
    pub fn render(elements: &[Element]) -> String {
        elements.iter().map(ToString::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_escapes_text_and_attrs() {
        let elements = vec![
            Element::text("a<b & c"),
            Element::at("1\"2"),
            Element::Face {
                id: "178".into(),
                platform: Some("onebot".into()),
                children: vec![Element::image("http://f/178.png")],
            },
        ];
        assert_eq!(
            Element::render(&elements),
            "a&lt;b &amp; c<at id=\"1&quot;2\"/><face id=\"178\" platform=\"onebot\"><img src=\"http://f/178.png\"/></face>"
        );
    }

    #[test]
    fn unknown_renders_sorted_attrs() {
        let el = Element::Unknown {
            tag: "shake".into(),
            attrs: BTreeMap::from([("b".into(), "2".into()), ("a".into(), "1".into())]),
            children: vec![],
        };
        assert_eq!(el.to_string(), "<shake a=\"1\" b=\"2\"/>");
    }

    #[test]
    fn to_segment_maps_onebot_names() {
        assert_eq!(Element::at_all().to_segment().attr("qq").as_deref(), Some("all"));
        let audio = Element::Audio {
            src: "a.amr".into(),
            title: None,
        };
        assert_eq!(audio.to_segment().kind, "record");
        let quote = Element::Quote {
            id: Some("9".into()),
            children: vec![],
        };
        assert_eq!(quote.to_segment().attr("id").as_deref(), Some("9"));
    }
}
