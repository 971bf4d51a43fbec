//! 事件翻译
//!
//! `outbound`：宿主会话 -> OneBot 上报事件
//! `inbound`：OneBot 事件 -> 宿主会话

mod inbound;
mod outbound;

pub use inbound::{ElementTransform, InboundTranslator, TransformContext, TransformFn};
pub use outbound::{SessionKind, session_to_onebot};
