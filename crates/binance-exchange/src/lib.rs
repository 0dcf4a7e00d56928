//! Binance WebSocket 커넥터.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - 단일 소켓 위에 여러 스트림을 다중화하는 연결 관리자
//! - 구독/구독 해제 요청의 응답 매칭과 재연결 시 구독 복원
//! - 채널별 타입 이벤트 라우팅 (시장 데이터)
//! - listen key 기반 사용자 데이터 스트림
//! - listen key 발급에 쓰이는 최소 REST 클라이언트

pub mod connector;
pub mod error;
pub mod traits;
pub mod websocket;

pub use connector::{BinanceConfig, BinanceRestClient};
pub use error::*;
pub use traits::*;
pub use websocket::{
    Connection, MarketStreamClient, ReadyState, StreamConfig, SubscriptionState, UserEvent,
    UserEventType, UserStream,
};
