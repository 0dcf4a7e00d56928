//! WebSocket 전송 계층 추상화.
//!
//! 연결 관리 코드는 [`Transport`]만 알고, 실제 소켓 구현은 주입됩니다.
//! 운영 환경에서는 [`TungsteniteTransport`]를 사용합니다.

use crate::traits::ExchangeResult;
use crate::ExchangeError;
use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

/// 수신 프레임.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// 텍스트 프레임
    Text(String),
    /// 바이너리 프레임
    Binary(Vec<u8>),
}

/// 송신 방향 (텍스트 프레임).
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ExchangeError> + Send>>;

/// 수신 방향. 스트림이 끝나면 연결이 닫힌 것입니다.
pub type FrameStream = Pin<Box<dyn Stream<Item = ExchangeResult<InboundFrame>> + Send>>;

/// WebSocket 연결을 여는 팩토리.
#[async_trait]
pub trait Transport: Send + Sync {
    /// URL에 연결하고 송수신 반쪽을 반환합니다.
    async fn connect(&self, url: &str) -> ExchangeResult<(FrameSink, FrameStream)>;
}

/// tokio-tungstenite 기반 전송 계층.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteTransport;

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn connect(&self, url: &str) -> ExchangeResult<(FrameSink, FrameStream)> {
        debug!(url, "WebSocket 연결 시도");

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| ExchangeError::WebSocket(e.to_string()))?;

        let (write, read) = ws_stream.split();

        let sink = write
            .with(|text: String| future::ready(Ok::<_, tokio_tungstenite::tungstenite::Error>(Message::Text(text))))
            .sink_map_err(|e| ExchangeError::WebSocket(e.to_string()));

        // ping/pong은 tungstenite가 처리하므로 데이터 프레임만 전달합니다
        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(InboundFrame::Text(text))),
                Ok(Message::Binary(data)) => Some(Ok(InboundFrame::Binary(data))),
                Ok(_) => None,
                Err(e) => Some(Err(ExchangeError::WebSocket(e.to_string()))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
