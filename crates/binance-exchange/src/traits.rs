//! 거래소 trait 정의.

use async_trait::async_trait;

use crate::ExchangeError;

/// 거래소 작업을 위한 Result 타입.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// 사용자 데이터 스트림용 세션 토큰(listen key) 공급자.
///
/// 시작 시와 갱신 주기마다 반복 호출됩니다. 호출 간에 공유되는
/// 가변 상태가 필요 없어야 합니다.
#[async_trait]
pub trait ListenKeySource: Send + Sync {
    /// 유효한 listen key를 발급(또는 연장)받아 반환합니다.
    async fn listen_key(&self) -> ExchangeResult<String>;
}
