//! # Binance Core
//!
//! 커넥터 전반에서 사용되는 기반 타입과 인프라를 제공합니다:
//! - 설정 관리 (파일 + 환경 변수)
//! - 로깅 인프라
//! - 심볼 및 kline 간격 타입

pub mod config;
pub mod logging;
pub mod types;

pub use config::*;
pub use logging::*;
pub use types::*;
