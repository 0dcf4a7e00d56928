//! 단일 엔드포인트에 대한 WebSocket 연결 관리자.
//!
//! - 소켓 상태를 직접 조회하며 별도의 연결 상태 변수를 두지 않습니다.
//! - 재연결은 요청 시점에만 일어납니다 (`ensure_open`). 백그라운드 재시도 루프는 없습니다.
//! - 재연결 후 `PendingUnsubscribe`가 아닌 모든 키를 채널 그룹별로 다시 구독합니다.
//! - 구독/구독 해제 응답은 요청 id로 정확히 매칭됩니다.

use super::config::StreamConfig;
use super::emitter::{Emitter, ListenerHandle};
use super::protocol::{decode_inbound, AckFrame, Inbound, StreamMethod, StreamRequest};
use super::socket::{ReadyState, Socket, SocketEvent, SocketHandler};
use super::tracker::{Settled, SubscriptionState, SubscriptionTracker};
use super::transport::{InboundFrame, Transport, TungsteniteTransport};
use crate::traits::ExchangeResult;
use crate::ExchangeError;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// 대기 한도가 있으면 적용하고, 초과 시 `ExchangeError::Timeout`.
pub(crate) async fn with_deadline<T, F>(limit: Option<Duration>, what: &str, fut: F) -> ExchangeResult<T>
where
    F: Future<Output = ExchangeResult<T>>,
{
    match limit {
        None => fut.await,
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            ExchangeError::Timeout(format!("{} did not complete within {:?}", what, limit))
        })?,
    }
}

/// 응답을 기다리는 요청.
struct PendingRequest {
    method: StreamMethod,
    keys: Vec<String>,
    waiter: Option<oneshot::Sender<ExchangeResult<()>>>,
    settled: watch::Sender<bool>,
    restore: bool,
}

impl PendingRequest {
    fn finish(self, outcome: ExchangeResult<()>) {
        if let Some(waiter) = self.waiter {
            let _ = waiter.send(outcome);
        }
        self.settled.send_replace(true);
    }
}

#[derive(Default)]
struct ConnState {
    tracker: SubscriptionTracker,
    pending: HashMap<u64, PendingRequest>,
    /// 응답 전에 소켓이 닫힌 구독 요청. 다음 복원이 끝나면 결과가 정해집니다.
    orphans: HashMap<u64, PendingRequest>,
}

struct Inner {
    url: String,
    config: StreamConfig,
    transport: Arc<dyn Transport>,
    socket: Mutex<Option<Arc<Socket>>>,
    state: Mutex<ConnState>,
    next_id: AtomicU64,
    reconnect: tokio::sync::Mutex<()>,
    messages: Emitter<Value>,
    errors: Emitter<ExchangeError>,
}

/// 하나의 WebSocket 엔드포인트에 대한 연결.
///
/// 복제 비용이 낮으며 모든 복제본이 같은 소켓과 구독 테이블을 공유합니다.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// 연결 생성. 소켓은 즉시 연결을 시작합니다 (`Connecting`).
    ///
    /// tokio 런타임 안에서 호출해야 합니다.
    pub fn new(url: impl Into<String>, config: StreamConfig, transport: Arc<dyn Transport>) -> Self {
        let inner = Arc::new(Inner {
            url: url.into(),
            config,
            transport,
            socket: Mutex::new(None),
            state: Mutex::new(ConnState::default()),
            next_id: AtomicU64::new(1),
            reconnect: tokio::sync::Mutex::new(()),
            messages: Emitter::new(),
            errors: Emitter::new(),
        });
        inner.install_socket();
        Self { inner }
    }

    /// tokio-tungstenite 전송 계층으로 연결 생성.
    pub fn connect(url: impl Into<String>, config: StreamConfig) -> Self {
        Self::new(url, config, Arc::new(TungsteniteTransport))
    }

    /// 엔드포인트 URL.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// 현재 소켓 상태.
    pub fn ready_state(&self) -> ReadyState {
        self.inner
            .current_socket()
            .map(|s| s.ready_state())
            .unwrap_or(ReadyState::Closed)
    }

    /// 채널 키의 구독 상태.
    pub fn subscription_state(&self, key: &str) -> SubscriptionState {
        self.inner.lock_state().tracker.state(key)
    }

    /// 구독 확정된 키 목록.
    pub fn subscribed_keys(&self) -> Vec<String> {
        self.inner
            .lock_state()
            .tracker
            .keys_in(SubscriptionState::Subscribed)
    }

    /// 시장 데이터 페이로드 리스너 등록.
    pub fn on_message<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.messages.on(listener)
    }

    /// 에러 리스너 등록.
    pub fn on_error<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&ExchangeError) + Send + Sync + 'static,
    {
        self.inner.errors.on(listener)
    }

    /// 리스너 해제.
    pub fn off(&self, handle: ListenerHandle) -> bool {
        self.inner.messages.off(handle) || self.inner.errors.off(handle)
    }

    /// 소켓이 열려 있도록 보장합니다.
    ///
    /// - `Open`: 즉시 반환
    /// - `Connecting`: 열릴 때까지 대기, 열리기 전에 닫히면 에러
    /// - `Closing`: 닫힘을 기다린 뒤 재연결
    /// - `Closed`: 새 소켓으로 재연결하고 기존 구독을 복원한 뒤 반환
    pub async fn ensure_open(&self) -> ExchangeResult<()> {
        let _guard = self.inner.reconnect.lock().await;

        loop {
            let Some(socket) = self.inner.current_socket() else {
                self.inner.reconnect_locked().await?;
                continue;
            };

            match socket.ready_state() {
                ReadyState::Open => return Ok(()),
                ReadyState::Connecting => {
                    with_deadline(self.inner.config.connect_timeout, "connect", socket.wait_open())
                        .await?;
                }
                ReadyState::Closing => socket.wait_closed().await,
                ReadyState::Closed => self.inner.reconnect_locked().await?,
            }
        }
    }

    /// 채널 키 구독.
    ///
    /// 이미 구독된 키는 건너뛰고, 다른 요청이 진행 중인 키는 그 요청이 정리된 뒤
    /// 다시 시도합니다. 새 키는 하나의 요청 프레임으로 묶어 전송합니다.
    pub async fn subscribe(&self, keys: Vec<String>) -> ExchangeResult<()> {
        let mut keys = dedup(keys);

        while !keys.is_empty() {
            self.ensure_open().await?;

            let id = self.inner.allocate_id();
            let (settled_tx, settled_rx) = watch::channel(false);
            let (done_tx, done_rx) = oneshot::channel();

            let plan = {
                let mut state = self.inner.lock_state();
                let plan = state.tracker.plan_subscribe(&keys, id, &settled_rx);
                if !plan.fresh.is_empty() {
                    state.pending.insert(
                        id,
                        PendingRequest {
                            method: StreamMethod::Subscribe,
                            keys: plan.fresh.clone(),
                            waiter: Some(done_tx),
                            settled: settled_tx,
                            restore: false,
                        },
                    );
                }
                plan
            };

            if !plan.fresh.is_empty() {
                debug!(request_id = id, keys = ?plan.fresh, "구독 요청");
                let request = StreamRequest::subscribe(plan.fresh, id);
                if let Err(e) = self.inner.send_request(&request) {
                    self.inner.abandon(id, e.clone());
                    return Err(e);
                }
                self.inner.await_ack(id, done_rx).await?;
            }

            keys = wait_deferred(plan.deferred).await;
        }

        Ok(())
    }

    /// 채널 키 구독 해제. 추적되지 않는 키는 무시합니다.
    pub async fn unsubscribe(&self, keys: Vec<String>) -> ExchangeResult<()> {
        let mut keys = dedup(keys);

        while !keys.is_empty() {
            self.ensure_open().await?;

            let id = self.inner.allocate_id();
            let (settled_tx, settled_rx) = watch::channel(false);
            let (done_tx, done_rx) = oneshot::channel();

            let plan = {
                let mut state = self.inner.lock_state();
                let plan = state.tracker.plan_unsubscribe(&keys, id, &settled_rx);
                if !plan.fresh.is_empty() {
                    state.pending.insert(
                        id,
                        PendingRequest {
                            method: StreamMethod::Unsubscribe,
                            keys: plan.fresh.clone(),
                            waiter: Some(done_tx),
                            settled: settled_tx,
                            restore: false,
                        },
                    );
                }
                plan
            };

            if !plan.fresh.is_empty() {
                debug!(request_id = id, keys = ?plan.fresh, "구독 해제 요청");
                let request = StreamRequest::unsubscribe(plan.fresh, id);
                if let Err(e) = self.inner.send_request(&request) {
                    self.inner.abandon(id, e.clone());
                    return Err(e);
                }
                self.inner.await_ack(id, done_rx).await?;
            }

            keys = wait_deferred(plan.deferred).await;
        }

        Ok(())
    }

    /// 소켓 닫기. 구독 테이블은 유지되며 다음 `ensure_open`에서 복원됩니다.
    pub fn close(&self) {
        if let Some(socket) = self.inner.current_socket() {
            socket.close();
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_socket(&self) -> Option<Arc<Socket>> {
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// 새 소켓을 만들어 교체합니다. 이전 소켓은 분리 후 닫습니다.
    fn install_socket(self: &Arc<Self>) -> Arc<Socket> {
        let weak = Arc::downgrade(self);
        let handler: SocketHandler = Arc::new(move |event| {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.on_socket_event(event);
            }
        });

        let fresh = Arc::new(Socket::spawn(
            self.transport.clone(),
            self.url.clone(),
            handler,
        ));

        let previous = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(fresh.clone());

        if let Some(old) = previous {
            old.detach();
            old.close();
        }

        fresh
    }

    /// 재연결 잠금을 보유한 상태에서 호출.
    async fn reconnect_locked(self: &Arc<Self>) -> ExchangeResult<()> {
        info!(url = %self.url, "WebSocket 재연결");
        let socket = self.install_socket();
        with_deadline(self.config.connect_timeout, "connect", socket.wait_open()).await?;
        self.restore().await;
        Ok(())
    }

    /// 재연결 직후 구독 복원.
    ///
    /// 채널 그룹별로 요청을 따로 보내므로 한 그룹의 실패가 다른 그룹에 영향을 주지 않습니다.
    async fn restore(&self) {
        let (orphans, groups) = {
            let mut state = self.lock_state();
            let orphans: Vec<PendingRequest> = state.orphans.drain().map(|(_, r)| r).collect();
            (orphans, channel_groups(state.tracker.restorable_keys()))
        };

        if !groups.is_empty() {
            info!(groups = groups.len(), "구독 복원");
        }

        let mut waits = Vec::with_capacity(groups.len());
        for keys in groups {
            let id = self.allocate_id();
            let (settled_tx, settled_rx) = watch::channel(false);
            let (done_tx, done_rx) = oneshot::channel();

            {
                let mut state = self.lock_state();
                state.tracker.mark_restoring(&keys, id, &settled_rx);
                state.pending.insert(
                    id,
                    PendingRequest {
                        method: StreamMethod::Subscribe,
                        keys: keys.clone(),
                        waiter: Some(done_tx),
                        settled: settled_tx,
                        restore: true,
                    },
                );
            }

            match self.send_request(&StreamRequest::subscribe(keys, id)) {
                Ok(()) => waits.push((id, done_rx)),
                Err(e) => {
                    warn!(request_id = id, error = %e, "구독 복원 요청 전송 실패");
                    self.abandon(id, e);
                }
            }
        }

        for (id, done_rx) in waits {
            if let Err(e) = self.await_ack(id, done_rx).await {
                warn!(request_id = id, error = %e, "구독 복원 실패");
            }
        }

        let outcomes: Vec<(PendingRequest, bool)> = {
            let state = self.lock_state();
            orphans
                .into_iter()
                .map(|req| {
                    let restored = req
                        .keys
                        .iter()
                        .all(|k| state.tracker.state(k) == SubscriptionState::Subscribed);
                    (req, restored)
                })
                .collect()
        };

        for (req, restored) in outcomes {
            let outcome = if restored {
                Ok(())
            } else {
                Err(ExchangeError::Disconnected(
                    "subscription was not restored after reconnect".to_string(),
                ))
            };
            req.finish(outcome);
        }
    }

    fn send_request(&self, request: &StreamRequest) -> ExchangeResult<()> {
        let text = request.to_json()?;
        let socket = self
            .current_socket()
            .ok_or_else(|| ExchangeError::Disconnected("no socket".to_string()))?;
        socket.send(text)
    }

    /// 응답 대기. 시간 초과 시 요청을 포기하고 키를 되돌립니다.
    ///
    /// 소켓이 끊겨 복원 요청이 이미 넘겨받은 요청은 되돌릴 수 없으므로
    /// 복원 결과가 나올 때까지 계속 기다립니다.
    async fn await_ack(
        &self,
        id: u64,
        mut done_rx: oneshot::Receiver<ExchangeResult<()>>,
    ) -> ExchangeResult<()> {
        let Some(limit) = self.config.ack_timeout else {
            return settle(done_rx.await);
        };

        match tokio::time::timeout(limit, &mut done_rx).await {
            Ok(received) => settle(received),
            Err(_) => {
                let error = ExchangeError::Timeout(format!(
                    "acknowledgement did not complete within {:?}",
                    limit
                ));
                if self.abandon(id, error.clone()) {
                    warn!(request_id = id, "구독 응답 시간 초과");
                    return Err(error);
                }
                debug!(request_id = id, "복원 중인 요청, 복원 결과를 기다림");
                settle(done_rx.await)
            }
        }
    }

    /// 요청을 포기하고 상태를 되돌립니다. 대기 중인 요청이 없었으면 `false`.
    fn abandon(&self, id: u64, error: ExchangeError) -> bool {
        let request = {
            let mut state = self.lock_state();
            let ConnState {
                tracker,
                pending,
                orphans,
            } = &mut *state;

            let request = pending.remove(&id).or_else(|| orphans.remove(&id));
            if let Some(req) = &request {
                match req.method {
                    StreamMethod::Subscribe => tracker.fail_subscribe(id, &req.keys),
                    StreamMethod::Unsubscribe => tracker.fail_unsubscribe(id, &req.keys),
                }
            }
            request
        };

        match request {
            Some(req) => {
                req.finish(Err(error));
                true
            }
            None => false,
        }
    }

    fn on_socket_event(&self, event: SocketEvent) {
        match event {
            SocketEvent::Frame(InboundFrame::Text(text)) => match decode_inbound(&text) {
                Ok(Inbound::Control(ack)) => self.handle_ack(ack),
                Ok(Inbound::Market(payload)) => self.messages.emit(&payload),
                Err(e) => {
                    warn!(error = %e, "수신 프레임 디코딩 실패");
                    self.errors.emit(&e);
                }
            },
            SocketEvent::Frame(InboundFrame::Binary(data)) => {
                self.errors.emit(&ExchangeError::Decode(format!(
                    "unexpected binary frame ({} bytes)",
                    data.len()
                )));
            }
            SocketEvent::Error(e) => {
                warn!(url = %self.url, error = %e, "소켓 에러");
                self.errors.emit(&e);
            }
            SocketEvent::Closed { .. } => self.on_closed(),
        }
    }

    fn handle_ack(&self, ack: AckFrame) {
        let id = ack.id;
        let outcome = ack.into_result();

        let request = {
            let mut state = self.lock_state();
            let Some(req) = state.pending.remove(&id) else {
                debug!(request_id = id, "대기 중이지 않은 요청 id에 대한 응답");
                return;
            };

            match (req.method, outcome.is_ok()) {
                (StreamMethod::Subscribe, true) => state.tracker.confirm_subscribe(id, &req.keys),
                (StreamMethod::Subscribe, false) => state.tracker.fail_subscribe(id, &req.keys),
                (StreamMethod::Unsubscribe, true) => {
                    state.tracker.confirm_unsubscribe(id, &req.keys)
                }
                (StreamMethod::Unsubscribe, false) => {
                    state.tracker.fail_unsubscribe(id, &req.keys)
                }
            }
            req
        };

        match &outcome {
            Ok(()) => debug!(request_id = id, keys = ?request.keys, "요청 확인"),
            Err(e) => {
                warn!(request_id = id, error = %e, "요청 거부");
                self.errors.emit(e);
            }
        }
        request.finish(outcome);
    }

    /// 소켓 종료 처리.
    ///
    /// 응답을 못 받은 구독 요청은 키를 `PendingSubscribe`로 남긴 채 보류되고,
    /// 구독 해제 요청은 서버 쪽 구독이 이미 사라졌으므로 성공으로 처리합니다.
    fn on_closed(&self) {
        let finished = {
            let mut state = self.lock_state();
            let ConnState {
                tracker,
                pending,
                orphans,
            } = &mut *state;

            let mut finished = Vec::new();
            for (id, mut req) in pending.drain() {
                match req.method {
                    StreamMethod::Subscribe => {
                        if req.restore {
                            if let Some(waiter) = req.waiter.take() {
                                finished.push((waiter, id));
                            }
                        }
                        orphans.insert(id, req);
                    }
                    StreamMethod::Unsubscribe => {
                        tracker.confirm_unsubscribe(id, &req.keys);
                        req.finish(Ok(()));
                    }
                }
            }
            finished
        };

        for (waiter, id) in finished {
            let _ = waiter.send(Err(ExchangeError::Disconnected(format!(
                "socket closed before request {} was acknowledged",
                id
            ))));
        }
    }
}

fn settle(received: Result<ExchangeResult<()>, oneshot::error::RecvError>) -> ExchangeResult<()> {
    received.unwrap_or_else(|_| Err(ExchangeError::Disconnected("request abandoned".to_string())))
}

fn dedup(keys: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    keys.into_iter().filter(|k| seen.insert(k.clone())).collect()
}

/// `<symbol>@<channel>` 키를 채널별로 묶습니다.
fn channel_groups(keys: Vec<String>) -> Vec<Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for key in keys {
        let channel = key
            .split_once('@')
            .map(|(_, channel)| channel.to_string())
            .unwrap_or_default();
        groups.entry(channel).or_default().push(key);
    }
    groups.into_values().collect()
}

async fn wait_deferred(deferred: Vec<(String, Settled)>) -> Vec<String> {
    let mut keys = Vec::with_capacity(deferred.len());
    for (key, mut settled) in deferred {
        let _ = settled.wait_for(|done| *done).await;
        keys.push(key);
    }
    keys
}
