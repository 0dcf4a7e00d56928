//! 거래소 에러 타입.

use thiserror::Error;

/// 거래소 관련 에러.
///
/// 하나의 실패를 여러 대기자(구독 호출자, `error` 이벤트 리스너)에게
/// 전달해야 하므로 `Clone`을 구현합니다.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExchangeError {
    /// 네트워크/연결 에러
    #[error("Network error: {0}")]
    NetworkError(String),

    /// 거래소 연결 끊김
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// 인증/권한 에러
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// 세션 토큰(listen key) 발급/갱신 실패
    #[error("Credential error: {0}")]
    Credential(String),

    /// 요청 한도 초과
    #[error("Rate limit exceeded")]
    RateLimited,

    /// 요청 가중치 초과로 IP 차단 (HTTP 418)
    #[error("IP {ip} banned until {until_ms}")]
    IpBanned { ip: String, until_ms: i64 },

    /// 잘못된 파라미터 (HTTP 400)
    #[error("Malformed parameter '{param}': {message}")]
    MalformedParam { param: String, message: String },

    /// API 에러 코드
    #[error("API error {code}: {message}")]
    ApiError { code: i32, message: String },

    /// 파싱/역직렬화 에러
    #[error("Parse error: {0}")]
    ParseError(String),

    /// 수신 프레임 디코딩 실패
    #[error("Decode error: {0}")]
    Decode(String),

    /// 구독/구독 해제 요청이 서버에서 거부됨
    #[error("Subscription request {request_id} failed ({code}): {message}")]
    Subscription {
        request_id: u64,
        status: Option<u16>,
        code: i64,
        message: String,
    },

    /// 타임스탬프 동기화 에러
    #[error("Timestamp error: {0}")]
    TimestampError(String),

    /// WebSocket 에러
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 잘못된 요청 (전송 전에 거부)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// 알 수 없는 에러
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ExchangeError {
    /// 재시도 가능한 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::NetworkError(_)
                | ExchangeError::Disconnected(_)
                | ExchangeError::RateLimited
                | ExchangeError::Timeout(_)
                | ExchangeError::WebSocket(_)
                | ExchangeError::TimestampError(_)
        )
    }

    /// 서버가 거부한 구독 요청의 id.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            ExchangeError::Subscription { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }

    /// 인증 에러인지 확인.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            ExchangeError::Unauthorized(_) | ExchangeError::Credential(_)
        )
    }

    /// 재시도하면 안 되는 치명적 에러인지 확인.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExchangeError::Unauthorized(_)
                | ExchangeError::IpBanned { .. }
                | ExchangeError::MalformedParam { .. }
                | ExchangeError::InvalidRequest(_)
        )
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout(err.to_string())
        } else if err.is_decode() {
            ExchangeError::ParseError(err.to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            ExchangeError::NetworkError(err.to_string())
        } else {
            ExchangeError::Unknown(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::ParseError(err.to_string())
    }
}
