use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info};

/// 一条存活连接的发送端
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: u64,
    pub url: String,
    tx: mpsc::UnboundedSender<WsMessage>,
}

impl ConnectionHandle {
    pub fn new(id: u64, url: impl Into<String>, tx: mpsc::UnboundedSender<WsMessage>) -> Self {
        Self {
            id,
            url: url.into(),
            tx,
        }
    }

    /// 写入发送队列，连接的写任务已退出时返回 false
    pub fn send(&self, msg: WsMessage) -> bool {
        self.tx.send(msg).is_ok()
    }
}

/// 存活连接表
///
/// 只由连接管理器在连接建立与断开时修改。
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<BTreeMap<u64, ConnectionHandle>>,
}

impl ConnectionRegistry {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, ConnectionHandle>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, handle: ConnectionHandle) {
        info!(target: "ReverseWS", "连接已登记: {} (#{})", handle.url, handle.id);
        self.lock().insert(handle.id, handle);
    }

    pub fn remove(&self, id: u64) -> Option<ConnectionHandle> {
        let removed = self.lock().remove(&id);
        if let Some(handle) = &removed {
            info!(target: "ReverseWS", "连接已移除: {} (#{})", handle.url, handle.id);
        }
        removed
    }

    /// 向所有存活连接发送同一段文本，返回成功入队的连接数
    pub fn broadcast(&self, payload: &str, log_traffic: bool) -> usize {
        let connections = self.lock();
        let mut delivered = 0;
        for handle in connections.values() {
            if log_traffic {
                info!(target: "ReverseWS", "反向WS({})上报事件: {}", handle.url, payload);
            } else {
                debug!(target: "ReverseWS", "反向WS({})上报事件: {}", handle.url, payload);
            }
            if handle.send(WsMessage::Text(payload.into())) {
                delivered += 1;
            }
        }
        delivered
    }

    /// 取出全部连接
    pub fn drain(&self) -> Vec<ConnectionHandle> {
        std::mem::take(&mut *self.lock()).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
