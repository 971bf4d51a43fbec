//! 反向 WebSocket 连接管理
//!
//! 每个端点一条客户端连接：建立后登记并发送生命周期事件，断开后移除并在
//! 固定延迟后重连。心跳独立于任何单条连接，周期性广播到所有存活连接。

mod registry;

pub use registry::{ConnectionHandle, ConnectionRegistry};

use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::dispatcher::ActionDispatcher;
use crate::host::HostBot;
use crate::payload::{MetaEvent, coerce_id};
use crate::scheduler::Scheduler;
use crate::{BridgeError, BridgeResult};

/// 心跳周期
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// 断线重连延迟，不退避
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// wss 端点依赖进程级的 rustls 加密实现，已安装时忽略
fn install_tls_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// 连接管理器
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    self_id: String,
    endpoints: Vec<String>,
    log_traffic: bool,
    heartbeat_interval: Duration,
    reconnect_delay: Duration,
    registry: ConnectionRegistry,
    scheduler: Scheduler,
    dispatcher: ActionDispatcher,
    closing: AtomicBool,
    next_conn_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new(bot: Arc<dyn HostBot>, config: &BridgeConfig) -> BridgeResult<Self> {
        Self::with_timing(bot, config, HEARTBEAT_INTERVAL, RECONNECT_DELAY)
    }

    /// 自定义心跳与重连间隔
    pub fn with_timing(
        bot: Arc<dyn HostBot>,
        config: &BridgeConfig,
        heartbeat_interval: Duration,
        reconnect_delay: Duration,
    ) -> BridgeResult<Self> {
        let endpoints = config.endpoints()?;
        install_tls_provider();
        let inner = ManagerInner {
            self_id: bot.self_id(),
            endpoints,
            log_traffic: config.log,
            heartbeat_interval,
            reconnect_delay,
            registry: ConnectionRegistry::default(),
            scheduler: Scheduler::new(),
            dispatcher: ActionDispatcher::new(bot, config.log),
            closing: AtomicBool::new(false),
            next_conn_id: AtomicU64::new(1),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// 启动心跳并连接所有端点
    pub fn start(&self) {
        let inner = self.inner.clone();
        self.inner
            .scheduler
            .add_interval(self.inner.heartbeat_interval, move || {
                let inner = inner.clone();
                async move { inner.send_heartbeat() }
            });

        for url in &self.inner.endpoints {
            self.inner.connect(url.clone());
        }
    }

    /// 序列化一次并广播到所有存活连接，返回入队的连接数
    pub fn dispatch<T: Serialize>(&self, event: &T) -> usize {
        self.inner.broadcast(event)
    }

    /// 关闭所有连接并取消所有定时器，之后不再重连
    pub fn shutdown(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        for handle in self.inner.registry.drain() {
            handle.send(WsMessage::Close(None));
            info!(target: "ReverseWS", "已关闭反向 WS 连接: {}", handle.url);
        }
        self.inner.scheduler.shutdown();
    }

    pub fn endpoints(&self) -> &[String] {
        &self.inner.endpoints
    }

    pub fn live_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// 登记中的后台任务数（心跳、连接、待重连）
    pub fn pending_tasks(&self) -> usize {
        self.inner.scheduler.pending()
    }

    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    pub fn same_instance(&self, other: &ConnectionManager) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl ManagerInner {
    fn broadcast<T: Serialize>(&self, event: &T) -> usize {
        match serde_json::to_string(event) {
            Ok(payload) => self.registry.broadcast(&payload, self.log_traffic),
            Err(e) => {
                error!(target: "ReverseWS", "事件序列化失败: {}", e);
                0
            }
        }
    }

    fn send_heartbeat(&self) {
        let interval = u64::try_from(self.heartbeat_interval.as_millis()).unwrap_or(u64::MAX);
        let beat = MetaEvent::heartbeat(coerce_id(&self.self_id), interval);
        self.broadcast(&beat);
    }

    fn connect(self: &Arc<Self>, url: String) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        let inner = self.clone();
        if self.scheduler.spawn(inner.run_client(url)).is_none() {
            debug!(target: "ReverseWS", "转接层正在关闭，放弃连接");
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, url: String) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        info!(
            target: "ReverseWS",
            "{}ms 后重连 {}",
            self.reconnect_delay.as_millis(),
            url
        );
        let inner = self.clone();
        self.scheduler
            .add_delay(self.reconnect_delay, move || async move { inner.connect(url) });
    }

    fn build_request(&self, url: &str) -> BridgeResult<Request> {
        let mut request = url.into_client_request()?;
        let self_id = HeaderValue::from_str(&self.self_id).map_err(|e| {
            BridgeError::Config(format!("无效的 X-Self-ID {:?}: {}", self.self_id, e))
        })?;

        let headers = request.headers_mut();
        headers.insert("x-self-id", self_id);
        headers.insert("x-client-role", HeaderValue::from_static("Universal"));
        headers.insert(http::header::USER_AGENT, HeaderValue::from_static("OneBot"));
        Ok(request)
    }

    async fn run_client(self: Arc<Self>, url: String) {
        let request = match self.build_request(&url) {
            Ok(request) => request,
            Err(e) => {
                error!(target: "ReverseWS", "创建反向 WS 连接 {} 失败，本次不再重试: {}", url, e);
                return;
            }
        };

        match connect_async(request).await {
            Ok((mut ws, _)) => {
                if self.closing.load(Ordering::SeqCst) {
                    let _ = ws.close(None).await;
                    return;
                }
                info!(target: "ReverseWS", "反向 WS 连接成功: {}", url);
                self.serve(ws, &url).await;
                warn!(target: "ReverseWS", "反向 WS 连接断开: {}", url);
            }
            Err(e) => {
                warn!(target: "ReverseWS", "反向 WS 连接 {} 失败: {}", url, e);
            }
        }

        self.schedule_reconnect(url);
    }

    /// 生命周期事件先入队再登记，广播与心跳只会排在它们之后
    fn register(&self, url: &str, tx: mpsc::UnboundedSender<WsMessage>) -> ConnectionHandle {
        let id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let handle = ConnectionHandle::new(id, url, tx);

        let self_id = coerce_id(&self.self_id);
        for sub_type in ["connect", "enable"] {
            match serde_json::to_string(&MetaEvent::lifecycle(self_id, sub_type)) {
                Ok(json) => {
                    handle.send(WsMessage::Text(json.into()));
                }
                Err(e) => error!(target: "ReverseWS", "生命周期事件序列化失败: {}", e),
            }
        }
        self.registry.insert(handle.clone());
        handle
    }

    async fn serve(&self, ws: ClientStream, url: &str) {
        let (mut write, mut read) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        // 发送任务，所有发送端释放后退出
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let is_close = matches!(msg, WsMessage::Close(_));
                if write.send(msg).await.is_err() || is_close {
                    break;
                }
            }
        });

        let handle = self.register(url, tx);
        let id = handle.id;

        // 与关闭流程竞争时，登记晚于清理的连接在这里自行关闭
        if self.closing.load(Ordering::SeqCst) {
            self.registry.remove(id);
            handle.send(WsMessage::Close(None));
            return;
        }

        while let Some(frame) = read.next().await {
            match frame {
                Ok(WsMessage::Close(reason)) => {
                    debug!(target: "ReverseWS", "服务端关闭连接 {}: {:?}", url, reason);
                    break;
                }
                Ok(msg) => {
                    if let Some(reply) = self.dispatcher.handle(&msg).await {
                        handle.send(WsMessage::Text(reply.into()));
                    }
                }
                Err(e) => {
                    warn!(target: "ReverseWS", "反向 WS {} 读取失败: {}", url, e);
                    break;
                }
            }
        }

        self.registry.remove(id);
    }
}
