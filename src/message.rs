use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// OneBot 消息段 (Segment)
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Segment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Segment {
    pub fn new(kind: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// 纯文本段
    pub fn text(content: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("text".into(), Value::from(content.into()));
        Self::new("text", data)
    }

    pub fn is_text(&self) -> bool {
        self.kind == "text"
    }

    /// 读取属性并转为字符串，数字与布尔值按字面量处理
    pub fn attr(&self, key: &str) -> Option<String> {
        match self.data.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// 文本段的内容
    pub fn text_content(&self) -> Option<String> {
        if self.is_text() { self.attr("text") } else { None }
    }
}
