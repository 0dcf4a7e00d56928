//! 사용자 데이터 스트림 세션 관리자.
//!
//! - 생성 시 listen key를 발급받아 `<user_url>/<listenKey>`로 연결합니다.
//! - 주기적으로 listen key를 갱신합니다. 갱신 실패는 재시도하지 않고
//!   `ExchangeError::Credential` 에러 이벤트로 알립니다.
//! - 소켓이 닫히면 새 listen key를 발급받아 다시 연결합니다.
//! - 수신 이벤트는 `e` 필드에 따라 이벤트 종류별 리스너로 전달됩니다.

use super::config::StreamConfig;
use super::connection::with_deadline;
use super::emitter::{Emitter, ListenerHandle};
use super::socket::{ReadyState, Socket, SocketEvent, SocketHandler};
use super::transport::{InboundFrame, Transport, TungsteniteTransport};
use super::user_events::{UserEvent, UserEventType};
use crate::traits::{ExchangeResult, ListenKeySource};
use crate::ExchangeError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct UserInner {
    config: StreamConfig,
    source: Arc<dyn ListenKeySource>,
    transport: Arc<dyn Transport>,
    socket: Mutex<Option<Arc<Socket>>>,
    listen_key: Mutex<Option<String>>,
    connect_lock: tokio::sync::Mutex<()>,
    /// `close()` 호출 후에는 자동 재연결하지 않음
    closed: AtomicBool,
    listeners: HashMap<UserEventType, Emitter<UserEvent>>,
    errors: Emitter<ExchangeError>,
    renewal: Mutex<Option<JoinHandle<()>>>,
}

/// 사용자 데이터 스트림 클라이언트.
///
/// ```rust,ignore
/// let rest = Arc::new(BinanceRestClient::new(config)?);
/// let stream = UserStream::connect(StreamConfig::default(), rest).await?;
/// stream.on(UserEventType::OrderTradeUpdate, |event| println!("{:?}", event));
/// ```
pub struct UserStream {
    inner: Arc<UserInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl UserStream {
    /// listen key를 발급받고 연결이 열릴 때까지 기다린 뒤 반환합니다.
    pub async fn connect(
        config: StreamConfig,
        source: Arc<dyn ListenKeySource>,
    ) -> ExchangeResult<Self> {
        Self::connect_with_transport(config, source, Arc::new(TungsteniteTransport)).await
    }

    /// 전송 계층을 지정하여 연결.
    pub async fn connect_with_transport(
        config: StreamConfig,
        source: Arc<dyn ListenKeySource>,
        transport: Arc<dyn Transport>,
    ) -> ExchangeResult<Self> {
        let listeners = UserEventType::ALL
            .iter()
            .map(|t| (*t, Emitter::new()))
            .collect();

        let inner = Arc::new(UserInner {
            config,
            source,
            transport,
            socket: Mutex::new(None),
            listen_key: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            listeners,
            errors: Emitter::new(),
            renewal: Mutex::new(None),
        });

        inner.reconnect().await?;
        inner.start_renewal();

        Ok(Self { inner })
    }

    /// 이벤트 종류별 리스너 등록.
    pub fn on<F>(&self, event_type: UserEventType, listener: F) -> ListenerHandle
    where
        F: Fn(&UserEvent) + Send + Sync + 'static,
    {
        self.inner.emitter(event_type).on(listener)
    }

    /// 리스너 해제.
    pub fn off(&self, event_type: UserEventType, handle: ListenerHandle) -> bool {
        self.inner.emitter(event_type).off(handle)
    }

    /// 에러 리스너 등록 (인증/디코딩/소켓 에러).
    pub fn on_error<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&ExchangeError) + Send + Sync + 'static,
    {
        self.inner.errors.on(listener)
    }

    pub fn off_error(&self, handle: ListenerHandle) -> bool {
        self.inner.errors.off(handle)
    }

    /// 현재 소켓 상태.
    pub fn ready_state(&self) -> ReadyState {
        lock(&self.inner.socket)
            .as_ref()
            .map(|s| s.ready_state())
            .unwrap_or(ReadyState::Closed)
    }

    /// 현재 사용 중인 listen key.
    pub fn listen_key(&self) -> Option<String> {
        lock(&self.inner.listen_key).clone()
    }

    /// 연결이 열려 있지 않으면 새 listen key로 다시 연결합니다.
    ///
    /// 자동 재연결이 실패했거나 `close()` 이후 다시 시작할 때 사용합니다.
    pub async fn ensure_connected(&self) -> ExchangeResult<()> {
        self.inner.closed.store(false, Ordering::SeqCst);
        self.inner.reconnect().await?;
        if self.inner.is_closed() {
            return Err(closed_error());
        }
        self.inner.start_renewal();
        Ok(())
    }

    /// 갱신 타이머를 멈추고 소켓을 닫습니다. 자동 재연결하지 않습니다.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.stop_renewal();
        if let Some(socket) = lock(&self.inner.socket).take() {
            socket.detach();
            socket.close();
        }
        info!("사용자 데이터 스트림 종료");
    }
}

impl UserInner {
    fn emitter(&self, event_type: UserEventType) -> &Emitter<UserEvent> {
        // ALL의 모든 종류가 생성 시 등록됨
        &self.listeners[&event_type]
    }

    fn current_state(&self) -> ReadyState {
        lock(&self.socket)
            .as_ref()
            .map(|s| s.ready_state())
            .unwrap_or(ReadyState::Closed)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 새 listen key를 발급받아 연결. 이미 열려 있으면 아무것도 하지 않습니다.
    ///
    /// 진행 중에 `close()`가 호출되면 새 소켓을 만들지 않고 에러를 반환합니다.
    async fn reconnect(self: &Arc<Self>) -> ExchangeResult<()> {
        let _guard = self.connect_lock.lock().await;

        if self.is_closed() {
            return Err(closed_error());
        }
        if self.current_state() == ReadyState::Open {
            return Ok(());
        }

        let listen_key = self.source.listen_key().await.map_err(|e| {
            error!(error = %e, "listen key 발급 실패");
            ExchangeError::Credential(format!("listen key request failed: {}", e))
        })?;
        let url = format!("{}/{}", self.config.user_url.trim_end_matches('/'), listen_key);
        let socket = self.install_socket(url)?;
        *lock(&self.listen_key) = Some(listen_key);
        info!("사용자 데이터 스트림 연결");

        with_deadline(self.config.connect_timeout, "connect", socket.wait_open()).await
    }

    /// 소켓 슬롯을 잡은 채로 `closed`를 확인합니다.
    fn install_socket(self: &Arc<Self>, url: String) -> ExchangeResult<Arc<Socket>> {
        let mut slot = lock(&self.socket);
        if self.is_closed() {
            return Err(closed_error());
        }

        let weak = Arc::downgrade(self);
        let handler: SocketHandler = Arc::new(move |event| {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.on_socket_event(event);
            }
        });

        let fresh = Arc::new(Socket::spawn(self.transport.clone(), url, handler));
        if let Some(old) = slot.replace(fresh.clone()) {
            old.detach();
            old.close();
        }
        Ok(fresh)
    }

    fn on_socket_event(self: &Arc<Self>, event: SocketEvent) {
        match event {
            SocketEvent::Frame(InboundFrame::Text(text)) => self.route(&text),
            SocketEvent::Frame(InboundFrame::Binary(data)) => {
                self.errors.emit(&ExchangeError::Decode(format!(
                    "unexpected binary frame ({} bytes)",
                    data.len()
                )));
            }
            SocketEvent::Error(e) => {
                warn!(error = %e, "사용자 데이터 스트림 소켓 에러");
                self.errors.emit(&e);
            }
            SocketEvent::Closed { was_open } => {
                if was_open && !self.is_closed() {
                    self.spawn_reconnect();
                }
            }
        }
    }

    fn route(&self, text: &str) {
        match serde_json::from_str::<UserEvent>(text) {
            Ok(event) => {
                let event_type = event.event_type();
                if event_type == UserEventType::ListenKeyExpired {
                    warn!("listen key 만료 통지 수신");
                }
                debug!(event = %event_type, "사용자 이벤트");
                self.emitter(event_type).emit(&event);
            }
            Err(e) => {
                let err = ExchangeError::Decode(format!("user event: {}", e));
                warn!(error = %err, "사용자 이벤트 디코딩 실패");
                self.errors.emit(&err);
            }
        }
    }

    /// 연결이 끊기면 새 listen key로 한 번 재연결을 시도합니다.
    fn spawn_reconnect(self: &Arc<Self>) {
        info!("사용자 데이터 스트림 끊김, 재연결 시도");
        let inner = self.clone();
        let closing = lock(&self.socket).clone();
        tokio::spawn(async move {
            if let Some(socket) = closing {
                socket.wait_closed().await;
            }
            match inner.reconnect().await {
                Ok(()) => {}
                Err(_) if inner.is_closed() => debug!("스트림이 닫혀 재연결 중단"),
                Err(e) => {
                    error!(error = %e, "사용자 데이터 스트림 재연결 실패");
                    inner.errors.emit(&e);
                }
            }
        });
    }

    fn start_renewal(self: &Arc<Self>) {
        let mut renewal = lock(&self.renewal);
        if renewal.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(self);
        let period = self.config.renew_interval;

        *renewal = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // 첫 tick은 즉시 완료됨
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.renew().await;
            }
        }));
    }

    async fn renew(&self) {
        match self.source.listen_key().await {
            Ok(key) => {
                let mut current = lock(&self.listen_key);
                if current.as_deref() != Some(key.as_str()) {
                    warn!("갱신 시 새 listen key가 발급됨, 다음 재연결부터 사용");
                }
                *current = Some(key);
                debug!("listen key 갱신 완료");
            }
            Err(e) => {
                let err = ExchangeError::Credential(format!("listen key renewal failed: {}", e));
                error!(error = %err, "listen key 갱신 실패");
                self.errors.emit(&err);
            }
        }
    }

    fn stop_renewal(&self) {
        if let Some(task) = lock(&self.renewal).take() {
            task.abort();
        }
    }
}

fn closed_error() -> ExchangeError {
    ExchangeError::Disconnected("user data stream was closed".to_string())
}

impl Drop for UserInner {
    fn drop(&mut self) {
        self.stop_renewal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::testing::{wait_until, MockServer};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// 호출마다 `key-<n>`을 발급하고, `fail_after` 이후로는 실패합니다.
    /// 두 번째 호출부터는 `delay`만큼 늦게 응답합니다.
    struct FakeSource {
        calls: AtomicUsize,
        fail_after: Option<usize>,
        delay: Duration,
    }

    impl FakeSource {
        fn new(fail_after: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_after,
                delay: Duration::ZERO,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_after: None,
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ListenKeySource for FakeSource {
        async fn listen_key(&self) -> ExchangeResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n > 1 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.fail_after {
                Some(limit) if n > limit => Err(ExchangeError::Unauthorized("Invalid API-key".to_string())),
                _ => Ok(format!("key-{}", n)),
            }
        }
    }

    fn test_config() -> StreamConfig {
        StreamConfig::new("ws://mock/ws").with_connect_timeout(Some(Duration::from_secs(2)))
    }

    async fn connect(
        config: StreamConfig,
        source: Arc<FakeSource>,
        server: &mut MockServer,
        transport: Arc<dyn Transport>,
    ) -> (UserStream, crate::websocket::testing::MockPeer) {
        let task = tokio::spawn(UserStream::connect_with_transport(config, source, transport));
        let peer = server.accept().await;
        let stream = task.await.unwrap().unwrap();
        (stream, peer)
    }

    fn order_update() -> serde_json::Value {
        json!({
            "e": "TRADE_LITE", "E": 1721895408092_i64, "T": 1721895408214_i64,
            "s": "BTCUSDT", "q": "0.001", "p": "0", "m": false, "c": "z8hcUoOsqEdKMeKPSABslD",
            "S": "BUY", "L": "64089.20", "l": "0.040", "t": 109100866, "i": 8886774
        })
    }

    #[tokio::test]
    async fn test_connects_with_listen_key_path() {
        let (transport, mut server) = MockServer::new();
        let source = FakeSource::new(None);

        let (stream, peer) = connect(test_config(), source.clone(), &mut server, transport).await;

        assert_eq!(peer.url, "ws://mock/ws/key-1");
        assert_eq!(stream.listen_key().as_deref(), Some("key-1"));
        assert_eq!(stream.ready_state(), ReadyState::Open);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_events_routed_by_type() {
        let (transport, mut server) = MockServer::new();
        let (stream, peer) = connect(test_config(), FakeSource::new(None), &mut server, transport).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        stream.on(UserEventType::TradeLite, move |event| {
            let _ = tx.send(event.clone());
        });
        let (other_tx, mut other_rx) = mpsc::unbounded_channel::<()>();
        stream.on(UserEventType::AccountUpdate, move |_| {
            let _ = other_tx.send(());
        });
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        stream.on_error(move |e| {
            let _ = err_tx.send(e.clone());
        });

        peer.push(order_update());
        match rx.recv().await.unwrap() {
            UserEvent::TradeLite(trade) => assert_eq!(trade.order_id, 8886774),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(other_rx.try_recv().is_err());

        peer.push(json!({"e": "NOT_A_REAL_EVENT", "E": 1}));
        assert!(matches!(err_rx.recv().await.unwrap(), ExchangeError::Decode(_)));
    }

    #[tokio::test]
    async fn test_reconnects_with_fresh_listen_key() {
        let (transport, mut server) = MockServer::new();
        let source = FakeSource::new(None);
        let (stream, mut peer) = connect(test_config(), source.clone(), &mut server, transport).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        stream.on(UserEventType::TradeLite, move |_| {
            let _ = tx.send(());
        });

        peer.disconnect();
        let peer = server.accept().await;
        assert_eq!(peer.url, "ws://mock/ws/key-2");

        wait_until(|| stream.ready_state() == ReadyState::Open).await;
        assert_eq!(stream.listen_key().as_deref(), Some("key-2"));

        // 기존 리스너는 재연결 후에도 유지됨
        peer.push(order_update());
        rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn test_renewal_failure_is_reported() {
        let (transport, mut server) = MockServer::new();
        let source = FakeSource::new(Some(1));
        let config = test_config().with_renew_interval(Duration::from_millis(20));
        let (stream, _peer) = connect(config, source.clone(), &mut server, transport).await;

        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        stream.on_error(move |e| {
            let _ = err_tx.send(e.clone());
        });

        let err = tokio::time::timeout(Duration::from_secs(2), err_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, ExchangeError::Credential(_)));
        assert!(err.is_auth_error());
        // 갱신 실패가 연결을 끊지는 않음
        assert_eq!(stream.ready_state(), ReadyState::Open);
    }

    #[tokio::test]
    async fn test_initial_listen_key_failure() {
        let (transport, _server) = MockServer::new();
        let source = FakeSource::new(Some(0));

        let result = UserStream::connect_with_transport(test_config(), source, transport).await;
        assert!(matches!(result, Err(ExchangeError::Credential(_))));
    }

    #[tokio::test]
    async fn test_close_stops_reconnect() {
        let (transport, mut server) = MockServer::new();
        let source = FakeSource::new(None);
        let (stream, _peer) = connect(test_config(), source.clone(), &mut server, transport).await;

        stream.close();
        assert_eq!(stream.ready_state(), ReadyState::Closed);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.calls(), 1);

        // 명시적으로 다시 연결
        let reopen = tokio::spawn(async move {
            let result = stream.ensure_connected().await;
            result.map(|_| stream)
        });
        let peer = server.accept().await;
        assert_eq!(peer.url, "ws://mock/ws/key-2");
        let stream = reopen.await.unwrap().unwrap();
        assert_eq!(stream.ready_state(), ReadyState::Open);
    }

    #[tokio::test]
    async fn test_close_during_reconnect_leaves_stream_closed() {
        let (transport, mut server) = MockServer::new();
        let source = FakeSource::slow(Duration::from_millis(100));
        let (stream, mut peer) = connect(test_config(), source.clone(), &mut server, transport).await;

        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        stream.on_error(move |e| {
            let _ = err_tx.send(e.clone());
        });

        peer.disconnect();
        wait_until(|| source.calls() == 2).await;
        stream.close();

        tokio::time::sleep(Duration::from_millis(300)).await;
        server.assert_no_connection().await;
        assert_eq!(stream.ready_state(), ReadyState::Closed);
        assert_eq!(stream.listen_key().as_deref(), Some("key-1"));
        assert!(err_rx.try_recv().is_err());
    }
}
