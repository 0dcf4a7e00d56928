//! Binance WebSocket 제어 프레임 코덱.
//!
//! 요청: `{"method":"SUBSCRIBE","params":["btcusdt@aggTrade"],"id":1}`
//! 응답: `{"result":null,"id":1}` 또는 `{"error":{"code":2,"msg":"..."},"id":1}`

use crate::traits::ExchangeResult;
use crate::ExchangeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 제어 요청 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamMethod {
    Subscribe,
    Unsubscribe,
}

/// 구독/구독 해제 요청 프레임.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub method: StreamMethod,
    pub params: Vec<String>,
    pub id: u64,
}

impl StreamRequest {
    /// 구독 요청 생성.
    pub fn subscribe(params: Vec<String>, id: u64) -> Self {
        Self {
            method: StreamMethod::Subscribe,
            params,
            id,
        }
    }

    /// 구독 해제 요청 생성.
    pub fn unsubscribe(params: Vec<String>, id: u64) -> Self {
        Self {
            method: StreamMethod::Unsubscribe,
            params,
            id,
        }
    }

    /// JSON 텍스트로 직렬화.
    pub fn to_json(&self) -> ExchangeResult<String> {
        serde_json::to_string(self).map_err(|e| ExchangeError::ParseError(e.to_string()))
    }
}

/// 응답 프레임의 에러 페이로드.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AckError {
    pub code: i64,
    pub msg: String,
}

/// 제어 응답 프레임.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AckFrame {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub error: Option<AckError>,
}

impl AckFrame {
    /// 실패 응답이면 요청 id를 담은 에러로 변환.
    pub fn into_result(self) -> Result<(), ExchangeError> {
        match self.error {
            None => Ok(()),
            Some(error) => Err(ExchangeError::Subscription {
                request_id: self.id,
                status: self.status,
                code: error.code,
                message: error.msg,
            }),
        }
    }
}

/// 분류된 수신 프레임.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// 요청 id에 대한 응답
    Control(AckFrame),
    /// 시장/사용자 데이터 페이로드 (combined 스트림 envelope는 벗겨진 상태)
    Market(Value),
}

/// 텍스트 프레임을 분류합니다.
///
/// 최상위가 객체가 아니거나 `id` 필드를 가진 응답의 형식이 잘못된 경우
/// `ExchangeError::Decode`를 반환합니다.
pub fn decode_inbound(text: &str) -> ExchangeResult<Inbound> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ExchangeError::Decode(e.to_string()))?;

    let Value::Object(mut object) = value else {
        return Err(ExchangeError::Decode(format!("expected JSON object: {}", text)));
    };

    if object.contains_key("id") {
        let ack = serde_json::from_value(Value::Object(object))
            .map_err(|e| ExchangeError::Decode(format!("malformed ack: {}", e)))?;
        return Ok(Inbound::Control(ack));
    }

    // combined 스트림: {"stream":"btcusdt@aggTrade","data":{...}}
    if object.get("stream").is_some_and(Value::is_string) {
        if let Some(data) = object.remove("data") {
            return Ok(Inbound::Market(data));
        }
    }

    Ok(Inbound::Market(Value::Object(object)))
}
