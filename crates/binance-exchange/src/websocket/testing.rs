//! 테스트용 인메모리 전송 계층.

use super::protocol::StreamRequest;
use super::transport::{FrameSink, FrameStream, InboundFrame, Transport};
use crate::traits::ExchangeResult;
use crate::ExchangeError;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STEP: Duration = Duration::from_secs(2);

/// 연결 요청을 [`MockPeer`]로 넘겨주는 전송 계층.
pub(crate) struct MockTransport {
    peers: mpsc::UnboundedSender<MockPeer>,
    refuse: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> ExchangeResult<(FrameSink, FrameStream)> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ExchangeError::WebSocket("connection refused".to_string()));
        }

        let (request_tx, request_rx) = mpsc::unbounded::<String>();
        let (frame_tx, frame_rx) = mpsc::unbounded::<ExchangeResult<InboundFrame>>();

        self.peers
            .unbounded_send(MockPeer {
                url: url.to_string(),
                requests: request_rx,
                frames: frame_tx,
            })
            .map_err(|_| ExchangeError::WebSocket("mock server gone".to_string()))?;

        let sink = request_tx.sink_map_err(|e| ExchangeError::WebSocket(e.to_string()));
        Ok((Box::pin(sink), Box::pin(frame_rx)))
    }
}

/// 수락된 연결을 꺼내는 서버 쪽 핸들.
pub(crate) struct MockServer {
    peers: mpsc::UnboundedReceiver<MockPeer>,
    refuse: Arc<AtomicBool>,
}

impl MockServer {
    pub(crate) fn new() -> (Arc<MockTransport>, MockServer) {
        let (tx, rx) = mpsc::unbounded();
        let refuse = Arc::new(AtomicBool::new(false));
        (
            Arc::new(MockTransport {
                peers: tx,
                refuse: refuse.clone(),
            }),
            MockServer { peers: rx, refuse },
        )
    }

    pub(crate) fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub(crate) async fn accept(&mut self) -> MockPeer {
        tokio::time::timeout(STEP, self.peers.next())
            .await
            .expect("no connection within timeout")
            .expect("transport dropped")
    }

    /// 잠시 동안 새 연결이 없는지 확인.
    pub(crate) async fn assert_no_connection(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(50), self.peers.next()).await;
        if let Ok(Some(peer)) = next {
            panic!("unexpected connection to {}", peer.url);
        }
    }
}

/// 서버 쪽에서 본 단일 연결.
pub(crate) struct MockPeer {
    pub(crate) url: String,
    requests: mpsc::UnboundedReceiver<String>,
    frames: mpsc::UnboundedSender<ExchangeResult<InboundFrame>>,
}

impl MockPeer {
    /// 클라이언트가 보낸 다음 제어 요청.
    pub(crate) async fn next_request(&mut self) -> StreamRequest {
        let text = tokio::time::timeout(STEP, self.requests.next())
            .await
            .expect("no request within timeout")
            .expect("client closed connection");
        serde_json::from_str(&text).expect("request is not a StreamRequest")
    }

    /// 잠시 동안 요청이 없는지 확인.
    pub(crate) async fn assert_no_request(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(50), self.requests.next()).await;
        if let Ok(Some(text)) = next {
            panic!("unexpected request: {}", text);
        }
    }

    pub(crate) fn push(&self, value: Value) {
        self.push_text(&value.to_string());
    }

    pub(crate) fn push_text(&self, text: &str) {
        let _ = self
            .frames
            .unbounded_send(Ok(InboundFrame::Text(text.to_string())));
    }

    pub(crate) fn ack(&self, id: u64) {
        self.push(json!({"result": null, "id": id}));
    }

    pub(crate) fn reject(&self, id: u64, code: i64, msg: &str) {
        self.push(json!({"error": {"code": code, "msg": msg}, "id": id}));
    }

    /// 서버 쪽에서 연결 종료.
    pub(crate) fn disconnect(&mut self) {
        self.frames.close_channel();
    }
}

/// 조건이 참이 될 때까지 폴링.
pub(crate) async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(STEP, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met within timeout");
}
