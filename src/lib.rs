// lib.rs
//
// ================================================================================
// Sanae Bridge - OneBot v11 反向 WebSocket 转接层
//
// 理念：宿主会话进，OneBot 事件出；OneBot 动作进，宿主原样转发。
// 架构：会话模型 | CQ 码编解码 | 双向事件翻译 | 反向 WS 连接管理
// ================================================================================

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, info};

pub mod config;
pub mod connection;
pub mod cqcode;
pub mod dispatcher;
pub mod element;
pub mod host;
pub mod log;
pub mod message;
pub mod payload;
pub mod scheduler;
pub mod session;
pub mod translate;

use config::BridgeConfig;
use connection::ConnectionManager;
use host::{FaceResolver, HostBot, NoFaces};
use session::Session;
use translate::InboundTranslator;

// ============================================================================
// 1. Error Types (统一错误处理)
// ============================================================================

/// 转接层错误类型
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("传输错误: {0}")]
    Transport(String),

    #[error("协议错误: {0}")]
    Protocol(String),

    #[error("消息查询失败: {0}")]
    Lookup(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML 解析失败: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML 序列化失败: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("WebSocket 错误: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("后台任务异常: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

// ============================================================================
// 2. Bridge (转接层门面)
// ============================================================================

/// 转接层门面
///
/// 宿主只需要关心三件事：机器人上线时调用 [`Bridge::on_bot_status`]，
/// 每个会话事件调用 [`Bridge::on_session`]，退出时调用 [`Bridge::dispose`]。
pub struct Bridge {
    config: BridgeConfig,
    inbound: InboundTranslator,
    manager: Mutex<Option<ConnectionManager>>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            inbound: InboundTranslator::new(Arc::new(NoFaces)),
            manager: Mutex::new(None),
        }
    }

    /// 替换表情 URL 解析器（默认不解析）
    pub fn with_face_resolver(mut self, faces: Arc<dyn FaceResolver>) -> Self {
        self.inbound = InboundTranslator::new(faces);
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// 机器人状态变更
    ///
    /// 仅在第一次变为在线时启动连接，之后的状态变化不会重复启动。
    pub fn on_bot_status(&self, bot: Arc<dyn HostBot>, online: bool) -> BridgeResult<()> {
        if !online {
            debug!(target: "Bridge", "机器人 {} 离线，忽略", bot.self_id());
            return Ok(());
        }

        let mut slot = self.manager.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            debug!(target: "Bridge", "转接层已启动，忽略重复的上线通知");
            return Ok(());
        }

        let manager = ConnectionManager::new(bot, &self.config)?;
        manager.start();
        info!(
            target: "Bridge",
            "转接层已启动，目标: {}",
            manager.endpoints().join(", ")
        );
        *slot = Some(manager);
        Ok(())
    }

    /// 会话事件入口
    ///
    /// 返回事件是否被翻译并广播。没有元素的会话、启动前到达的会话、
    /// 以及无法映射的事件都会被丢弃。
    pub fn on_session(&self, session: &Session) -> bool {
        if session.elements.is_empty() {
            return false;
        }

        let Some(manager) = self.manager() else {
            debug!(target: "Bridge", "转接层尚未启动，丢弃事件 {}", session.event_type);
            return false;
        };

        match translate::session_to_onebot(session) {
            Some(event) => {
                manager.dispatch(&event);
                true
            }
            None => {
                debug!(target: "Translate", "事件 {} 无 OneBot 映射，已忽略", session.event_type);
                false
            }
        }
    }

    /// 把 OneBot 事件翻译为宿主会话（反向能力）
    pub async fn session_from_onebot(&self, bot: &dyn HostBot, raw: &Value) -> Option<Session> {
        self.inbound.translate(bot, raw).await
    }

    /// 当前连接管理器（启动后可用）
    pub fn manager(&self) -> Option<ConnectionManager> {
        self.manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 关闭所有连接与定时器
    pub fn dispose(&self) {
        let manager = self
            .manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(manager) = manager {
            manager.shutdown();
            info!(target: "Bridge", "转接层已关闭");
        }
    }
}

// ============================================================================
// 3. Re-exports (重新导出)
// ============================================================================

pub mod prelude {
    pub use super::config::{BridgeConfig, ConfigManager};
    pub use super::connection::ConnectionManager;
    pub use super::element::Element;
    pub use super::host::{FaceResolver, HostBot, NoFaces, TemplateFaces};
    pub use super::message::Segment;
    pub use super::session::{Author, Quote, Session, session_types};
    pub use super::{Bridge, BridgeError, BridgeResult};
    pub use async_trait::async_trait;
}
