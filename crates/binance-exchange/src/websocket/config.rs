//! WebSocket 스트림 런타임 설정.

use binance_core::{ConnectorConfig, Sectioning};
use std::time::Duration;

/// 연결/구독 관리자가 사용하는 설정.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// 시장 데이터 엔드포인트 (`.../ws`)
    pub market_url: String,
    /// 사용자 데이터 스트림 기본 URL (`<user_url>/<listenKey>`로 연결)
    pub user_url: String,
    /// 구독 응답 대기 한도 (`None`이면 무제한)
    pub ack_timeout: Option<Duration>,
    /// 소켓 연결 대기 한도 (`None`이면 무제한)
    pub connect_timeout: Option<Duration>,
    /// listen key 갱신 주기
    pub renew_interval: Duration,
    /// 채널을 소켓에 배치하는 방식
    pub sectioning: Sectioning,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::from_connector(&ConnectorConfig::default())
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl StreamConfig {
    /// 시장 데이터 URL만 지정한 설정 생성. 나머지는 기본값입니다.
    pub fn new(market_url: impl Into<String>) -> Self {
        let market_url = market_url.into();
        Self {
            user_url: market_url.clone(),
            market_url,
            ..Self::default()
        }
    }

    /// 커넥터 설정에서 생성.
    pub fn from_connector(config: &ConnectorConfig) -> Self {
        Self {
            market_url: config.exchange.market_ws_url(),
            user_url: config.exchange.user_ws_url(),
            ack_timeout: millis(config.stream.ack_timeout_ms),
            connect_timeout: millis(config.stream.connect_timeout_ms),
            renew_interval: Duration::from_secs(config.stream.listen_key_renew_secs.max(1)),
            sectioning: config.stream.sectioning,
        }
    }

    pub fn with_user_url(mut self, url: impl Into<String>) -> Self {
        self.user_url = url.into();
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    pub fn with_sectioning(mut self, sectioning: Sectioning) -> Self {
        self.sectioning = sectioning;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_connector() {
        let mut connector = ConnectorConfig::default();
        connector.stream.ack_timeout_ms = 0;
        connector.stream.sectioning = Sectioning::PerChannel;

        let config = StreamConfig::from_connector(&connector);
        assert_eq!(config.market_url, "wss://stream.binance.com:9443/ws");
        assert_eq!(config.ack_timeout, None);
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.renew_interval, Duration::from_secs(1800));
        assert_eq!(config.sectioning, Sectioning::PerChannel);
    }

    #[test]
    fn test_new_uses_url_for_both_streams() {
        let config = StreamConfig::new("ws://127.0.0.1:9000/ws");
        assert_eq!(config.user_url, "ws://127.0.0.1:9000/ws");
        assert_eq!(config.ack_timeout, Some(Duration::from_secs(10)));
    }
}
