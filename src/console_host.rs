use sanae_bridge::element::Element;
use sanae_bridge::prelude::*;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

/// 控制台宿主
///
/// 每行输入视为一条私聊消息；`/onebot <json>` 把一条 OneBot 事件翻译回会话；
/// `/exit` 退出。
pub struct ConsoleHost {
    self_id: String,
    user_id: String,
    msg_seq: AtomicU64,
}

impl Default for ConsoleHost {
    fn default() -> Self {
        Self {
            self_id: "10000".to_string(),
            user_id: "20000".to_string(),
            msg_seq: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl HostBot for ConsoleHost {
    fn self_id(&self) -> String {
        self.self_id.clone()
    }

    fn platform(&self) -> &str {
        "console"
    }

    async fn send_raw(&self, frame: &str) -> BridgeResult<()> {
        info!(target: "Console", "宿主收到动作: {}", frame);
        Ok(())
    }

    async fn get_message(&self, _channel_id: &str, message_id: &str) -> BridgeResult<Quote> {
        Err(BridgeError::Lookup(format!(
            "控制台不保存历史消息 ({})",
            message_id
        )))
    }
}

impl ConsoleHost {
    fn session_from_line(&self, text: &str) -> Session {
        let seq = self.msg_seq.fetch_add(1, Ordering::Relaxed) + 1;

        let mut author = Author::new(self.user_id.clone());
        author.nickname = Some("Dev".to_string());

        let mut session = Session::new(session_types::MESSAGE, self.self_id.clone());
        session.platform = Some("console".to_string());
        session.subtype = Some("private".to_string());
        session.subsubtype = Some("private".to_string());
        session.user_id = Some(self.user_id.clone());
        session.channel_id = Some(format!("private:{}", self.user_id));
        session.message_id = Some(seq.to_string());
        session.timestamp = chrono::Utc::now().timestamp_millis();
        session.content = text.to_string();
        session.elements = vec![Element::text(text)];
        session.author = Some(author);
        session
    }

    async fn replay_onebot(&self, bridge: &Bridge, raw: &str) {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(target: "Console", "无效的 JSON: {}", e);
                return;
            }
        };

        match bridge.session_from_onebot(self, &value).await {
            Some(session) => info!(
                target: "Console",
                "{} / {:?} -> {}",
                session.event_type,
                session.subtype,
                session.content
            ),
            None => info!(target: "Console", "该事件没有对应的会话类型"),
        }
    }

    /// 读取标准输入直到 EOF、`/exit` 或 Ctrl-C
    pub async fn run(&self, bridge: &Bridge) {
        let mut reader = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line_result = reader.next_line() => {
                    match line_result {
                        Ok(Some(text)) => {
                            let content = text.trim();
                            if content.is_empty() { continue; }
                            if content == "/exit" { break; }

                            if let Some(raw) = content.strip_prefix("/onebot ") {
                                self.replay_onebot(bridge, raw).await;
                                continue;
                            }

                            let session = self.session_from_line(content);
                            if !bridge.on_session(&session) {
                                warn!(target: "Console", "消息未转发");
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            error!(target: "Console", "读取输入错误: {}", e);
                            break;
                        }
                    }
                }
            }
        }
    }
}
