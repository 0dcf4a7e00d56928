//! 단일 WebSocket 소켓과 이를 구동하는 백그라운드 태스크.
//!
//! 소켓의 수명 상태는 [`ReadyState`] 하나로만 표현되며, 상위 연결 관리자는
//! 별도의 상태 변수를 두지 않고 이 값을 조회합니다.

use super::transport::{InboundFrame, Transport};
use crate::traits::ExchangeResult;
use crate::ExchangeError;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// 소켓 수명 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// 연결 중 (초기 상태)
    Connecting,
    /// 송수신 가능
    Open,
    /// 닫는 중
    Closing,
    /// 닫힘
    Closed,
}

/// 소켓이 소유자에게 전달하는 이벤트.
#[derive(Debug)]
pub(crate) enum SocketEvent {
    Frame(InboundFrame),
    Error(ExchangeError),
    /// 연결 종료. 상태가 `Closed`로 바뀌기 직전에 전달됩니다.
    Closed { was_open: bool },
}

pub(crate) type SocketHandler = Arc<dyn Fn(SocketEvent) + Send + Sync>;

enum Command {
    Send(String),
    Close,
}

/// 백그라운드 태스크가 구동하는 WebSocket 소켓.
///
/// 핸들을 drop하면 이벤트 전달이 멈추고, 태스크는 닫기 절차를 마친 뒤 종료됩니다.
pub(crate) struct Socket {
    state: Arc<watch::Sender<ReadyState>>,
    commands: mpsc::UnboundedSender<Command>,
    attached: Arc<AtomicBool>,
}

impl Socket {
    /// 소켓을 생성하고 즉시 연결을 시작합니다.
    pub(crate) fn spawn(transport: Arc<dyn Transport>, url: String, handler: SocketHandler) -> Self {
        let (state, _) = watch::channel(ReadyState::Connecting);
        let state = Arc::new(state);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let attached = Arc::new(AtomicBool::new(true));

        tokio::spawn(drive(
            transport,
            url,
            state.clone(),
            command_rx,
            attached.clone(),
            handler,
        ));

        Self {
            state,
            commands,
            attached,
        }
    }

    /// 현재 상태.
    pub(crate) fn ready_state(&self) -> ReadyState {
        *self.state.borrow()
    }

    /// `Connecting`을 벗어날 때까지 대기. 열리지 못하고 닫히면 에러.
    pub(crate) async fn wait_open(&self) -> ExchangeResult<()> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|s| *s != ReadyState::Connecting)
            .await
            .map_err(|_| ExchangeError::Disconnected("socket dropped".to_string()))?;

        match state {
            ReadyState::Open => Ok(()),
            _ => Err(ExchangeError::Disconnected(
                "connection closed before opening".to_string(),
            )),
        }
    }

    /// `Closed`가 될 때까지 대기.
    pub(crate) async fn wait_closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == ReadyState::Closed).await;
    }

    /// 텍스트 프레임 전송 예약.
    pub(crate) fn send(&self, text: String) -> ExchangeResult<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(ExchangeError::Disconnected(format!(
                "socket is {:?}",
                self.ready_state()
            )));
        }
        self.commands
            .send(Command::Send(text))
            .map_err(|_| ExchangeError::Disconnected("socket task stopped".to_string()))
    }

    /// 소켓 닫기 요청.
    pub(crate) fn close(&self) {
        self.state.send_if_modified(|s| {
            if *s == ReadyState::Open {
                *s = ReadyState::Closing;
                true
            } else {
                false
            }
        });
        let _ = self.commands.send(Command::Close);
    }

    /// 이후 이벤트가 소유자에게 전달되지 않도록 분리.
    pub(crate) fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.detach();
    }
}

async fn drive(
    transport: Arc<dyn Transport>,
    url: String,
    state: Arc<watch::Sender<ReadyState>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    attached: Arc<AtomicBool>,
    handler: SocketHandler,
) {
    let deliver = |event: SocketEvent| {
        if attached.load(Ordering::Acquire) {
            handler(event);
        }
    };

    // 연결 중에는 `send`가 거부되므로 받을 수 있는 명령은 닫기 요청뿐
    let connected = tokio::select! {
        result = transport.connect(&url) => Some(result),
        _ = commands.recv() => None,
    };

    let (mut sink, mut stream) = match connected {
        Some(Ok(halves)) => halves,
        None => {
            debug!(url = %url, "연결 중 닫기 요청");
            deliver(SocketEvent::Closed { was_open: false });
            state.send_replace(ReadyState::Closed);
            return;
        }
        Some(Err(e)) => {
            warn!(url = %url, error = %e, "WebSocket 연결 실패");
            deliver(SocketEvent::Error(e));
            deliver(SocketEvent::Closed { was_open: false });
            state.send_replace(ReadyState::Closed);
            return;
        }
    };

    state.send_replace(ReadyState::Open);
    info!(url = %url, "WebSocket 연결됨");

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(text)) => {
                    debug!(frame = %text, "프레임 전송");
                    if let Err(e) = sink.send(text).await {
                        deliver(SocketEvent::Error(e));
                        break;
                    }
                }
                Some(Command::Close) | None => {
                    state.send_replace(ReadyState::Closing);
                    let _ = sink.close().await;
                    break;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(frame)) => deliver(SocketEvent::Frame(frame)),
                Some(Err(e)) => {
                    deliver(SocketEvent::Error(e));
                    break;
                }
                None => break,
            },
        }
    }

    info!(url = %url, "WebSocket 연결 종료");
    deliver(SocketEvent::Closed { was_open: true });
    state.send_replace(ReadyState::Closed);
}
