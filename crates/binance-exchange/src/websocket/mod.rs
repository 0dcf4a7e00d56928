//! Binance WebSocket 구독/연결 관리.
//!
//! 구성:
//! - [`Connection`]: 소켓 수명 관리, 요청 id 기반 응답 매칭, 재연결 시 구독 복원
//! - [`SubscriptionTracker`]: 채널 키별 구독 상태 머신
//! - [`MarketStreamClient`]: 채널별 구독 API와 이벤트 라우팅
//! - [`UserStream`]: listen key 기반 사용자 데이터 스트림

pub mod channels;
pub mod config;
pub mod connection;
pub mod emitter;
pub mod events;
pub mod protocol;
pub mod router;
pub mod socket;
pub mod tracker;
pub mod transport;
pub mod user_events;
pub mod user_stream;

#[cfg(test)]
pub(crate) mod testing;

pub use channels::{
    AggTrade, BookTicker, Channel, DepthLevel, DepthOptions, Kline, MarkPrice, MarkPriceSpeed,
    PartialBookDepth, Ticker, Trade,
};
pub use config::StreamConfig;
pub use connection::Connection;
pub use emitter::{Emitter, ListenerHandle};
pub use events::*;
pub use protocol::{AckError, AckFrame, StreamMethod, StreamRequest};
pub use router::{ChannelRouter, ChannelStream, MarketStreamClient};
pub use socket::ReadyState;
pub use tracker::{SubscriptionState, SubscriptionTracker};
pub use transport::{FrameSink, FrameStream, InboundFrame, Transport, TungsteniteTransport};
pub use user_events::*;
pub use user_stream::UserStream;
