//! 시장 데이터 채널 정의.
//!
//! 각 채널은 (심볼, 옵션) → 스트림 키 변환과 수신 프레임 판별 규칙을 가집니다.
//! 스트림 키 형식: `<소문자 심볼>@<채널>[@<옵션>]`

use super::events::{
    AggTradeEvent, BookTickerEvent, DepthEvent, KlineEvent, MarkPriceEvent, TickerEvent,
    TradeEvent,
};
use binance_core::KlineInterval;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;

/// 시장 데이터 채널.
pub trait Channel: Send + Sync + 'static {
    /// 구독 옵션 (심볼 공통)
    type Options: Send + Sync;
    /// 디코딩된 이벤트
    type Event: DeserializeOwned + Send + Sync + 'static;

    /// 채널 이름. 채널별 섹션 이름으로도 사용됩니다.
    const NAME: &'static str;

    /// 정규화된 심볼과 옵션으로 스트림 키 생성.
    fn stream_key(symbol: &str, options: &Self::Options) -> String;

    /// 프레임이 이 채널의 것인지 판별.
    fn matches(frame: &Map<String, Value>) -> bool;
}

fn event_type(frame: &Map<String, Value>) -> Option<&str> {
    frame.get("e").and_then(Value::as_str)
}

// ============================================================================
// 옵션
// ============================================================================

/// 부분 호가 깊이.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthLevel {
    Five,
    Ten,
    Twenty,
}

impl DepthLevel {
    pub fn as_u8(&self) -> u8 {
        match self {
            DepthLevel::Five => 5,
            DepthLevel::Ten => 10,
            DepthLevel::Twenty => 20,
        }
    }
}

impl fmt::Display for DepthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// 부분 호가 구독 옵션.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthOptions {
    pub levels: DepthLevel,
    /// 갱신 주기 (밀리초). 없으면 거래소 기본값
    pub update_speed_ms: Option<u32>,
}

impl DepthOptions {
    pub fn new(levels: DepthLevel) -> Self {
        Self {
            levels,
            update_speed_ms: None,
        }
    }

    pub fn with_update_speed(mut self, ms: u32) -> Self {
        self.update_speed_ms = Some(ms);
        self
    }
}

impl Default for DepthOptions {
    fn default() -> Self {
        Self::new(DepthLevel::Five)
    }
}

/// 마크 가격 갱신 주기.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MarkPriceSpeed {
    /// 3초
    #[default]
    Standard,
    /// 1초
    Fast,
}

// ============================================================================
// 채널
// ============================================================================

/// 최우선 호가.
#[derive(Debug)]
pub struct BookTicker;

impl Channel for BookTicker {
    type Options = ();
    type Event = BookTickerEvent;
    const NAME: &'static str = "bookTicker";

    fn stream_key(symbol: &str, _: &()) -> String {
        format!("{}@bookTicker", symbol)
    }

    fn matches(frame: &Map<String, Value>) -> bool {
        match event_type(frame) {
            Some(e) => e == "bookTicker",
            // 현물 bookTicker 프레임에는 `e`가 없음
            None => {
                frame.get("b").is_some_and(Value::is_string)
                    && frame.contains_key("B")
                    && frame.contains_key("u")
            }
        }
    }
}

/// 부분 호가창.
#[derive(Debug)]
pub struct PartialBookDepth;

impl Channel for PartialBookDepth {
    type Options = DepthOptions;
    type Event = DepthEvent;
    const NAME: &'static str = "partialBookDepth";

    fn stream_key(symbol: &str, options: &DepthOptions) -> String {
        match options.update_speed_ms {
            Some(ms) => format!("{}@depth{}@{}ms", symbol, options.levels, ms),
            None => format!("{}@depth{}", symbol, options.levels),
        }
    }

    fn matches(frame: &Map<String, Value>) -> bool {
        match event_type(frame) {
            Some(e) => e == "depthUpdate",
            None => {
                frame.contains_key("lastUpdateId")
                    || (frame.get("b").is_some_and(Value::is_array)
                        && frame.get("a").is_some_and(Value::is_array))
            }
        }
    }
}

/// 집계 체결.
#[derive(Debug)]
pub struct AggTrade;

impl Channel for AggTrade {
    type Options = ();
    type Event = AggTradeEvent;
    const NAME: &'static str = "aggTrade";

    fn stream_key(symbol: &str, _: &()) -> String {
        format!("{}@aggTrade", symbol)
    }

    fn matches(frame: &Map<String, Value>) -> bool {
        event_type(frame) == Some("aggTrade")
    }
}

/// 개별 체결.
#[derive(Debug)]
pub struct Trade;

impl Channel for Trade {
    type Options = ();
    type Event = TradeEvent;
    const NAME: &'static str = "trade";

    fn stream_key(symbol: &str, _: &()) -> String {
        format!("{}@trade", symbol)
    }

    fn matches(frame: &Map<String, Value>) -> bool {
        event_type(frame) == Some("trade")
    }
}

/// 캔들스틱.
#[derive(Debug)]
pub struct Kline;

impl Channel for Kline {
    type Options = KlineInterval;
    type Event = KlineEvent;
    const NAME: &'static str = "kline";

    fn stream_key(symbol: &str, interval: &KlineInterval) -> String {
        format!("{}@kline_{}", symbol, interval)
    }

    fn matches(frame: &Map<String, Value>) -> bool {
        event_type(frame) == Some("kline")
    }
}

/// 24시간 롤링 티커.
#[derive(Debug)]
pub struct Ticker;

impl Channel for Ticker {
    type Options = ();
    type Event = TickerEvent;
    const NAME: &'static str = "ticker";

    fn stream_key(symbol: &str, _: &()) -> String {
        format!("{}@ticker", symbol)
    }

    fn matches(frame: &Map<String, Value>) -> bool {
        event_type(frame) == Some("24hrTicker")
    }
}

/// 마크 가격 (선물).
#[derive(Debug)]
pub struct MarkPrice;

impl Channel for MarkPrice {
    type Options = MarkPriceSpeed;
    type Event = MarkPriceEvent;
    const NAME: &'static str = "markPrice";

    fn stream_key(symbol: &str, speed: &MarkPriceSpeed) -> String {
        match speed {
            MarkPriceSpeed::Standard => format!("{}@markPrice", symbol),
            MarkPriceSpeed::Fast => format!("{}@markPrice@1s", symbol),
        }
    }

    fn matches(frame: &Map<String, Value>) -> bool {
        event_type(frame) == Some("markPriceUpdate")
    }
}
