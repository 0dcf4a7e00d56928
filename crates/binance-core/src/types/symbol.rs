//! 스트림용 심볼 변환.
//!
//! Binance는 REST에서는 대문자 연결 형식(`BTCUSDT`)을,
//! WebSocket 스트림 이름에서는 소문자 형식(`btcusdt`)을 사용합니다.

/// 구분자로 쓰일 수 있는 문자.
const SEPARATORS: [char; 3] = ['/', '-', '_'];

/// 스트림 이름에 쓰이는 소문자 심볼로 변환합니다.
///
/// "BTCUSDT", "BTC/USDT", " btc-usdt " 모두 "btcusdt"가 됩니다.
pub fn stream_symbol(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !SEPARATORS.contains(c))
        .flat_map(char::to_lowercase)
        .collect()
}
