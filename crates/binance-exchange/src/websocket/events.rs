//! 시장 데이터 이벤트 타입.
//!
//! 필드 이름은 Binance의 한 글자 키를 그대로 매핑하며, 가격과 수량은
//! 문자열로 전달되므로 `Decimal`로 역직렬화합니다.

use binance_core::KlineInterval;
use rust_decimal::Decimal;
use serde::Deserialize;

/// 최우선 호가 이벤트.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BookTickerEvent {
    #[serde(rename = "u")]
    pub update_id: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b")]
    pub bid_price: Decimal,
    #[serde(rename = "B")]
    pub bid_qty: Decimal,
    #[serde(rename = "a")]
    pub ask_price: Decimal,
    #[serde(rename = "A")]
    pub ask_qty: Decimal,
    /// 이벤트 시각 (선물만 제공)
    #[serde(rename = "E", default)]
    pub event_time: Option<i64>,
}

/// 호가 한 단계.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "(Decimal, Decimal)")]
pub struct PriceLevel {
    pub price: Decimal,
    pub qty: Decimal,
}

impl From<(Decimal, Decimal)> for PriceLevel {
    fn from((price, qty): (Decimal, Decimal)) -> Self {
        Self { price, qty }
    }
}

/// 부분 호가창 이벤트.
///
/// 현물은 `{lastUpdateId, bids, asks}`, 선물은 `{e, s, u, b, a, ...}` 형식입니다.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DepthEvent {
    #[serde(rename = "lastUpdateId", alias = "u", default)]
    pub last_update_id: u64,
    #[serde(rename = "s", default)]
    pub symbol: Option<String>,
    #[serde(rename = "E", default)]
    pub event_time: Option<i64>,
    #[serde(rename = "bids", alias = "b")]
    pub bids: Vec<PriceLevel>,
    #[serde(rename = "asks", alias = "a")]
    pub asks: Vec<PriceLevel>,
}

/// 집계 체결 이벤트.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AggTradeEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "a")]
    pub agg_trade_id: u64,
    #[serde(rename = "p")]
    pub price: Decimal,
    #[serde(rename = "q")]
    pub quantity: Decimal,
    #[serde(rename = "f")]
    pub first_trade_id: u64,
    #[serde(rename = "l")]
    pub last_trade_id: u64,
    #[serde(rename = "T")]
    pub trade_time: i64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

/// 개별 체결 이벤트.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradeEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "t")]
    pub trade_id: u64,
    #[serde(rename = "p")]
    pub price: Decimal,
    #[serde(rename = "q")]
    pub quantity: Decimal,
    #[serde(rename = "T")]
    pub trade_time: i64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

/// 캔들 데이터.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KlineData {
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "T")]
    pub close_time: i64,
    #[serde(rename = "i")]
    pub interval: KlineInterval,
    #[serde(rename = "o")]
    pub open: Decimal,
    #[serde(rename = "h")]
    pub high: Decimal,
    #[serde(rename = "l")]
    pub low: Decimal,
    #[serde(rename = "c")]
    pub close: Decimal,
    #[serde(rename = "v")]
    pub volume: Decimal,
    #[serde(rename = "q")]
    pub quote_volume: Decimal,
    #[serde(rename = "n")]
    pub trades: u64,
    /// 캔들 마감 여부
    #[serde(rename = "x")]
    pub is_closed: bool,
}

/// 캔들 이벤트.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KlineEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: KlineData,
}

/// 24시간 티커 이벤트.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TickerEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price_change: Decimal,
    #[serde(rename = "P")]
    pub price_change_percent: Decimal,
    #[serde(rename = "w")]
    pub weighted_avg_price: Decimal,
    #[serde(rename = "c")]
    pub last_price: Decimal,
    #[serde(rename = "Q")]
    pub last_qty: Decimal,
    #[serde(rename = "o")]
    pub open_price: Decimal,
    #[serde(rename = "h")]
    pub high_price: Decimal,
    #[serde(rename = "l")]
    pub low_price: Decimal,
    #[serde(rename = "v")]
    pub volume: Decimal,
    #[serde(rename = "q")]
    pub quote_volume: Decimal,
    #[serde(rename = "O")]
    pub open_time: i64,
    #[serde(rename = "C")]
    pub close_time: i64,
    #[serde(rename = "n")]
    pub trade_count: u64,
}

/// 마크 가격 이벤트 (선물).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarkPriceEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub mark_price: Decimal,
    #[serde(rename = "i", default)]
    pub index_price: Option<Decimal>,
    #[serde(rename = "P", default)]
    pub estimated_settle_price: Option<Decimal>,
    #[serde(rename = "r")]
    pub funding_rate: Decimal,
    #[serde(rename = "T")]
    pub next_funding_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_spot_and_futures_depth() {
        let spot: DepthEvent = serde_json::from_value(json!({
            "lastUpdateId": 160,
            "bids": [["0.0024", "10"]],
            "asks": [["0.0026", "100"]]
        }))
        .unwrap();
        assert_eq!(spot.last_update_id, 160);
        assert_eq!(spot.symbol, None);
        assert_eq!(spot.bids[0], PriceLevel { price: dec!(0.0024), qty: dec!(10) });

        let futures: DepthEvent = serde_json::from_value(json!({
            "e": "depthUpdate", "E": 1571889248277_i64, "T": 1571889248276_i64,
            "s": "BTCUSDT", "U": 390497796, "u": 390497878, "pu": 390497794,
            "b": [["7403.89", "0.002"]],
            "a": [["7405.96", "3.340"], ["7406.63", "4.525"]]
        }))
        .unwrap();
        assert_eq!(futures.last_update_id, 390497878);
        assert_eq!(futures.symbol.as_deref(), Some("BTCUSDT"));
        assert_eq!(futures.asks.len(), 2);
    }

    #[test]
    fn test_agg_trade() {
        let event: AggTradeEvent = serde_json::from_value(json!({
            "e": "aggTrade", "E": 123456789, "s": "BTCUSDT", "a": 5933014,
            "p": "0.001", "q": "100", "f": 100, "l": 105, "T": 123456785, "m": true
        }))
        .unwrap();
        assert_eq!(event.price, dec!(0.001));
        assert!(event.is_buyer_maker);
    }

    #[test]
    fn test_kline() {
        let event: KlineEvent = serde_json::from_value(json!({
            "e": "kline", "E": 1638747660000_i64, "s": "BTCUSDT",
            "k": {
                "t": 1638747660000_i64, "T": 1638747719999_i64, "s": "BTCUSDT", "i": "1m",
                "f": 100, "L": 200, "o": "0.0010", "c": "0.0020", "h": "0.0025", "l": "0.0015",
                "v": "1000", "n": 100, "x": false, "q": "1.0000", "V": "500", "Q": "0.500", "B": "123456"
            }
        }))
        .unwrap();
        assert_eq!(event.kline.interval, KlineInterval::M1);
        assert_eq!(event.kline.high, dec!(0.0025));
        assert!(!event.kline.is_closed);
    }
}
