use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::host::HostBot;
use crate::payload::ActionResponse;
use crate::{BridgeError, BridgeResult};

/// 动作分发器
///
/// 每个入站帧都会原样交给宿主，然后在同一连接上回复且只回复一帧。
/// 转发进入队列后立即回复，宿主发送卡住不会阻塞回复与读取。
pub struct ActionDispatcher {
    bot: Arc<dyn HostBot>,
    log_traffic: bool,
    queue: OnceLock<mpsc::UnboundedSender<String>>,
}

impl ActionDispatcher {
    pub fn new(bot: Arc<dyn HostBot>, log_traffic: bool) -> Self {
        Self {
            bot,
            log_traffic,
            queue: OnceLock::new(),
        }
    }

    /// 处理一帧，返回需要回复的文本；控制帧返回 `None`
    pub async fn handle(&self, frame: &WsMessage) -> Option<String> {
        let response = match frame {
            WsMessage::Text(text) => self.forward(text.as_str()),
            WsMessage::Binary(bytes) => match decode_binary(bytes) {
                Ok(text) => self.forward(text),
                Err(e) => {
                    warn!(target: "Action", "{}", e);
                    ActionResponse::failed(extract_echo(bytes))
                }
            },
            _ => return None,
        };

        match serde_json::to_string(&response) {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!(target: "Action", "序列化响应失败: {}", e);
                None
            }
        }
    }

    fn forward(&self, text: &str) -> ActionResponse {
        if self.log_traffic {
            info!(target: "Action", "收到动作: {}", text);
        } else {
            debug!(target: "Action", "收到动作: {}", text);
        }

        if self.sender().send(text.to_string()).is_err() {
            warn!(target: "Action", "转发队列已关闭，丢弃动作");
        }
        ActionResponse::ok()
    }

    /// 首次使用时启动转发任务，保证按到达顺序交给宿主
    fn sender(&self) -> &mpsc::UnboundedSender<String> {
        self.queue.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(forward_loop(self.bot.clone(), rx));
            tx
        })
    }
}

async fn forward_loop(bot: Arc<dyn HostBot>, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = bot.send_raw(&frame).await {
            warn!(target: "Action", "转发动作到宿主失败: {}", e);
        }
    }
}

fn decode_binary(bytes: &[u8]) -> BridgeResult<&str> {
    std::str::from_utf8(bytes)
        .map_err(|e| BridgeError::Protocol(format!("二进制帧不是合法的 UTF-8: {}", e)))
}

/// 尽力从帧中取出 `echo` 字段
fn extract_echo(raw: &[u8]) -> Option<Value> {
    let mut buf = raw.to_vec();
    let parsed: Value = match simd_json::serde::from_slice(&mut buf) {
        Ok(v) => v,
        Err(_) => {
            // 非 UTF-8 的帧里也可能有一段可读的 JSON
            let lossy = String::from_utf8_lossy(raw).into_owned();
            serde_json::from_str(&lossy).ok()?
        }
    };
    parsed.get("echo").filter(|v| !v.is_null()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RecordingHost;
    use crate::session::Quote;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn parse(reply: Option<String>) -> Value {
        serde_json::from_str(&reply.unwrap()).unwrap()
    }

    async fn wait_sent(bot: &RecordingHost, count: usize) -> Vec<String> {
        timeout(Duration::from_secs(2), async {
            loop {
                let sent = bot.sent();
                if sent.len() >= count {
                    return sent;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("host never received the frames")
    }

    /// 发送永远不完成的宿主
    struct StalledHost;

    #[async_trait]
    impl HostBot for StalledHost {
        fn self_id(&self) -> String {
            "1".into()
        }

        async fn send_raw(&self, _frame: &str) -> BridgeResult<()> {
            std::future::pending().await
        }

        async fn get_message(&self, _channel_id: &str, message_id: &str) -> BridgeResult<Quote> {
            Err(BridgeError::Lookup(message_id.to_string()))
        }
    }

    #[tokio::test]
    async fn forwards_and_acks() {
        let bot = Arc::new(RecordingHost::new("1"));
        let dispatcher = ActionDispatcher::new(bot.clone(), false);
        let frame = r#"{"action":"send_msg","params":{"message":"hi"},"echo":"e1"}"#;

        let reply = parse(dispatcher.handle(&WsMessage::Text(frame.into())).await);
        assert_eq!(reply, json!({"retcode": 0, "status": "ok", "data": "balabla"}));
        assert_eq!(wait_sent(&bot, 1).await, vec![frame.to_string()]);
    }

    #[tokio::test]
    async fn stalled_host_does_not_delay_ack() {
        let dispatcher = ActionDispatcher::new(Arc::new(StalledHost), false);

        for echo in 0..3 {
            let frame = WsMessage::Text(format!(r#"{{"echo":{}}}"#, echo).into());
            let reply = timeout(Duration::from_secs(1), dispatcher.handle(&frame))
                .await
                .expect("ack waited on the host");
            assert_eq!(parse(reply)["retcode"], 0);
        }
    }

    #[tokio::test]
    async fn forwards_in_arrival_order() {
        let bot = Arc::new(RecordingHost::new("1"));
        let dispatcher = ActionDispatcher::new(bot.clone(), false);
        let frames: Vec<String> = (0..5).map(|i| format!(r#"{{"echo":{}}}"#, i)).collect();

        for frame in &frames {
            dispatcher.handle(&WsMessage::Text(frame.as_str().into())).await;
        }
        assert_eq!(wait_sent(&bot, frames.len()).await, frames);
    }

    #[tokio::test]
    async fn acks_even_when_host_fails() {
        let mut host = RecordingHost::new("1");
        host.fail_send = true;
        let host = Arc::new(host);
        let dispatcher = ActionDispatcher::new(host.clone(), true);

        let reply = parse(dispatcher.handle(&WsMessage::Text("not json".into())).await);
        assert_eq!(reply["retcode"], 0);
        assert_eq!(wait_sent(&host, 1).await, vec!["not json".to_string()]);
    }

    #[tokio::test]
    async fn utf8_binary_is_forwarded() {
        let bot = Arc::new(RecordingHost::new("1"));
        let dispatcher = ActionDispatcher::new(bot.clone(), false);
        let frame = br#"{"action":"get_status"}"#.to_vec();

        let reply = parse(dispatcher.handle(&WsMessage::Binary(frame.into())).await);
        assert_eq!(reply["status"], "ok");
        assert_eq!(
            wait_sent(&bot, 1).await,
            vec![r#"{"action":"get_status"}"#.to_string()]
        );
    }

    #[tokio::test]
    async fn invalid_binary_fails_with_echo() {
        let bot = Arc::new(RecordingHost::new("1"));
        let dispatcher = ActionDispatcher::new(bot.clone(), false);
        let mut frame = br#"{"action":"x","echo":42,"pad":""#.to_vec();
        frame.push(0xff);
        frame.extend_from_slice(br#""}"#);

        let reply = parse(dispatcher.handle(&WsMessage::Binary(frame.into())).await);
        assert_eq!(
            reply,
            json!({"retcode": 1400, "status": "failed", "data": null, "echo": 42})
        );
        assert!(bot.sent().is_empty());
    }

    #[tokio::test]
    async fn invalid_binary_without_json_has_no_echo() {
        let dispatcher = ActionDispatcher::new(Arc::new(RecordingHost::new("1")), false);
        let reply = parse(
            dispatcher
                .handle(&WsMessage::Binary(vec![0xffu8, 0xfe].into()))
                .await,
        );
        assert_eq!(reply["retcode"], 1400);
        assert!(reply.get("echo").is_none());
    }

    #[tokio::test]
    async fn control_frames_get_no_reply() {
        let dispatcher = ActionDispatcher::new(Arc::new(RecordingHost::new("1")), false);
        assert!(dispatcher.handle(&WsMessage::Ping(Default::default())).await.is_none());
        assert!(dispatcher.handle(&WsMessage::Close(None)).await.is_none());
    }
}
