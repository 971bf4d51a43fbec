//! 宿主接口
//!
//! 转接层只依赖这里的两个 trait：机器人传输与表情 URL 解析。

use async_trait::async_trait;

use crate::BridgeResult;
use crate::session::Quote;

/// 宿主机器人句柄
#[async_trait]
pub trait HostBot: Send + Sync {
    /// 机器人自身 ID
    fn self_id(&self) -> String;

    /// 平台名，用于填充会话的 platform 字段
    fn platform(&self) -> &str {
        "onebot"
    }

    /// 把一帧原始文本原样交给宿主底层连接
    async fn send_raw(&self, frame: &str) -> BridgeResult<()>;

    /// 查询一条消息，用于解析引用
    async fn get_message(&self, channel_id: &str, message_id: &str) -> BridgeResult<Quote>;
}

/// 表情 ID -> 图片 URL
pub trait FaceResolver: Send + Sync {
    fn face_url(&self, id: &str) -> Option<String>;
}

/// 不解析任何表情
pub struct NoFaces;

impl FaceResolver for NoFaces {
    fn face_url(&self, _id: &str) -> Option<String> {
        None
    }
}

/// 基于 URL 模板的表情解析，模板中的 `{id}` 会被替换
pub struct TemplateFaces {
    template: String,
}

impl TemplateFaces {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl FaceResolver for TemplateFaces {
    fn face_url(&self, id: &str) -> Option<String> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(self.template.replace("{id}", id))
    }
}

#[cfg(test)]
pub(crate) use recording::RecordingHost;
