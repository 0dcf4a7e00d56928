//! 설정 관리.
//!
//! TOML 파일과 `BINANCE__` 접두사 환경 변수에서 커넥터 설정을 로드합니다.
//! 모든 필드는 기본값을 가지므로 파일 없이도 동작합니다.

use crate::logging::LogFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 기본 설정 파일 경로.
pub const DEFAULT_CONFIG_PATH: &str = "config/binance.toml";

/// 커넥터 전체 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// 로깅 설정
    pub logging: LoggingConfig,
    /// 거래소 엔드포인트 설정
    pub exchange: ExchangeConfig,
    /// WebSocket 스트림 설정
    pub stream: StreamSettings,
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 로그 레벨 필터 (예: "info", "binance_exchange::websocket=debug")
    pub level: String,
    /// 로그 형식
    pub format: LogFormat,
    /// 전송 계층 크레이트(tungstenite, hyper 등)의 로그 포함 여부
    pub transport_logs: bool,
    /// 파일명과 줄 번호 포함 여부
    pub with_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            transport_logs: false,
            with_file: false,
        }
    }
}

/// 시장 종류.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    /// 현물
    #[default]
    Spot,
    /// USDⓈ-M 선물
    UsdFutures,
}

/// 채널을 소켓에 배치하는 방식.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sectioning {
    /// 모든 채널이 하나의 소켓을 공유
    #[default]
    Shared,
    /// 채널마다 독립된 소켓(섹션)
    PerChannel,
}

/// 거래소 엔드포인트 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// 시장 종류
    pub market: MarketKind,
    /// 테스트넷 사용
    pub testnet: bool,
    /// REST API 기본 URL 오버라이드
    pub rest_base_url: Option<String>,
    /// 시장 데이터 WebSocket URL 오버라이드
    pub market_ws_url: Option<String>,
    /// 사용자 데이터 WebSocket URL 오버라이드 (`<url>/<listenKey>` 형태로 접속)
    pub user_ws_url: Option<String>,
    /// 수신 윈도우 (밀리초)
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
    /// REST 요청 타임아웃 (초)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_recv_window() -> u64 {
    5000
}
fn default_timeout() -> u64 {
    30
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            market: MarketKind::Spot,
            testnet: false,
            rest_base_url: None,
            market_ws_url: None,
            user_ws_url: None,
            recv_window_ms: default_recv_window(),
            timeout_secs: default_timeout(),
        }
    }
}

impl ExchangeConfig {
    /// REST API 기본 URL 반환.
    pub fn rest_base_url(&self) -> String {
        if let Some(url) = &self.rest_base_url {
            return url.clone();
        }
        match (self.market, self.testnet) {
            (MarketKind::Spot, false) => "https://api.binance.com",
            (MarketKind::Spot, true) => "https://testnet.binance.vision",
            (MarketKind::UsdFutures, false) => "https://fapi.binance.com",
            (MarketKind::UsdFutures, true) => "https://testnet.binancefuture.com",
        }
        .to_string()
    }

    /// 시장 데이터 WebSocket URL 반환.
    pub fn market_ws_url(&self) -> String {
        if let Some(url) = &self.market_ws_url {
            return url.clone();
        }
        match (self.market, self.testnet) {
            (MarketKind::Spot, false) => "wss://stream.binance.com:9443/ws",
            (MarketKind::Spot, true) => "wss://testnet.binance.vision/ws",
            (MarketKind::UsdFutures, false) => "wss://fstream.binance.com/ws",
            (MarketKind::UsdFutures, true) => "wss://stream.binancefuture.com/ws",
        }
        .to_string()
    }

    /// 사용자 데이터 WebSocket 기본 URL 반환.
    ///
    /// 오버라이드가 없으면 시장 데이터 URL과 같습니다.
    pub fn user_ws_url(&self) -> String {
        self.user_ws_url
            .clone()
            .unwrap_or_else(|| self.market_ws_url())
    }

    /// listen key 발급 경로.
    pub fn listen_key_path(&self) -> &'static str {
        match self.market {
            MarketKind::Spot => "/api/v3/userDataStream",
            MarketKind::UsdFutures => "/fapi/v1/listenKey",
        }
    }
}

/// WebSocket 스트림 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamSettings {
    /// 구독 응답 대기 시간 (밀리초, 0이면 무제한)
    pub ack_timeout_ms: u64,
    /// 소켓 연결 대기 시간 (밀리초, 0이면 무제한)
    pub connect_timeout_ms: u64,
    /// listen key 갱신 주기 (초)
    pub listen_key_renew_secs: u64,
    /// 소켓 배치 방식
    pub sectioning: Sectioning,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            listen_key_renew_secs: 30 * 60,
            sectioning: Sectioning::Shared,
        }
    }
}

impl ConnectorConfig {
    /// 파일(선택)과 환경 변수에서 설정을 로드합니다.
    ///
    /// 파일이 없으면 기본값 위에 환경 변수만 적용합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            // 파일에서 로드 (없어도 됨)
            .add_source(config::File::from(path.as_ref()).required(false))
            // 환경 변수로 오버라이드
            .add_source(
                config::Environment::with_prefix("BINANCE")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// 기본 경로에서 설정을 로드합니다.
    pub fn load_default() -> Result<Self, config::ConfigError> {
        Self::load(DEFAULT_CONFIG_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_endpoints() {
        let spot = ExchangeConfig::default();
        assert_eq!(spot.rest_base_url(), "https://api.binance.com");
        assert_eq!(spot.market_ws_url(), "wss://stream.binance.com:9443/ws");
        assert_eq!(spot.user_ws_url(), spot.market_ws_url());
        assert_eq!(spot.listen_key_path(), "/api/v3/userDataStream");

        let futures = ExchangeConfig {
            market: MarketKind::UsdFutures,
            ..Default::default()
        };
        assert_eq!(futures.rest_base_url(), "https://fapi.binance.com");
        assert_eq!(futures.market_ws_url(), "wss://fstream.binance.com/ws");
        assert_eq!(futures.listen_key_path(), "/fapi/v1/listenKey");
    }

    #[test]
    fn test_endpoint_overrides() {
        let config = ExchangeConfig {
            market: MarketKind::UsdFutures,
            testnet: true,
            user_ws_url: Some("ws://127.0.0.1:9000/private".to_string()),
            ..Default::default()
        };
        assert_eq!(config.rest_base_url(), "https://testnet.binancefuture.com");
        assert_eq!(config.user_ws_url(), "ws://127.0.0.1:9000/private");
    }

    #[test]
    fn test_stream_defaults() {
        let settings = StreamSettings::default();
        assert_eq!(settings.ack_timeout_ms, 10_000);
        assert_eq!(settings.listen_key_renew_secs, 1800);
        assert_eq!(settings.sectioning, Sectioning::Shared);
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("binance-core-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("binance.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[logging]
format = "json"

[exchange]
market = "usd_futures"
testnet = true

[stream]
ack_timeout_ms = 2500
sectioning = "per_channel"
"#
        )
        .unwrap();

        let config = ConnectorConfig::load(&path).unwrap();
        assert_eq!(config.exchange.market, MarketKind::UsdFutures);
        assert!(config.exchange.testnet);
        assert_eq!(config.exchange.recv_window_ms, 5000);
        assert_eq!(config.stream.ack_timeout_ms, 2500);
        assert_eq!(config.stream.connect_timeout_ms, 10_000);
        assert_eq!(config.stream.sectioning, Sectioning::PerChannel);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Json);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = ConnectorConfig::load("does/not/exist.toml").unwrap();
        assert_eq!(config.exchange.market, MarketKind::Spot);
        assert_eq!(config.stream.listen_key_renew_secs, 1800);
    }
}
