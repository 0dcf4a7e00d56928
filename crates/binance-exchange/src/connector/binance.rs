//! Binance REST 커넥터.
//!
//! WebSocket 계층이 사용하는 최소한의 REST 클라이언트입니다:
//! - HMAC-SHA256 요청 서명
//! - 응답 검증 및 에러 코드 매핑
//! - listen key 발급/연장/폐기 (사용자 데이터 스트림용)
//!
//! 현물과 USDⓈ-M 선물 모두 지원하며 엔드포인트는 [`ExchangeConfig`]에서 결정됩니다.

use crate::traits::{ExchangeResult, ListenKeySource};
use crate::ExchangeError;
use async_trait::async_trait;
use binance_core::{ExchangeConfig, MarketKind};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::fmt;
use tracing::{debug, error, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// API 키 헤더 이름.
const API_KEY_HEADER: &str = "X-MBX-APIKEY";

// ============================================================================
// 설정
// ============================================================================

/// Binance REST 클라이언트 설정.
///
/// # 보안
/// - `api_secret`은 [`SecretString`]으로 보관되며 `Debug` 출력에서 마스킹됩니다.
#[derive(Clone)]
pub struct BinanceConfig {
    /// API 키 (공개 엔드포인트만 쓸 때는 없음)
    pub api_key: Option<String>,
    /// API 시크릿
    pub api_secret: Option<SecretString>,
    /// 엔드포인트 설정
    pub exchange: ExchangeConfig,
}

impl fmt::Debug for BinanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked_key = match &self.api_key {
            Some(key) if key.chars().count() > 8 => {
                let head: String = key.chars().take(4).collect();
                let tail: String = key.chars().skip(key.chars().count() - 4).collect();
                format!("{}...{}", head, tail)
            }
            Some(_) => "***REDACTED***".to_string(),
            None => "<none>".to_string(),
        };

        f.debug_struct("BinanceConfig")
            .field("api_key", &masked_key)
            .field("api_secret", &"***REDACTED***")
            .field("exchange", &self.exchange)
            .finish()
    }
}

impl BinanceConfig {
    /// 인증 정보가 있는 설정 생성.
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            api_secret: Some(SecretString::from(api_secret.into())),
            exchange: ExchangeConfig::default(),
        }
    }

    /// 공개 엔드포인트 전용 설정 생성.
    pub fn public() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            exchange: ExchangeConfig::default(),
        }
    }

    /// 엔드포인트 설정 지정.
    pub fn with_exchange(mut self, exchange: ExchangeConfig) -> Self {
        self.exchange = exchange;
        self
    }

    /// 환경 변수에서 인증 정보를 읽어 생성.
    ///
    /// 테스트넷이면 `BINANCE_TESTNET_API_KEY`/`BINANCE_TESTNET_API_SECRET`을,
    /// 아니면 `BINANCE_API_KEY`/`BINANCE_API_SECRET`을 사용합니다.
    pub fn from_env(exchange: ExchangeConfig) -> Option<Self> {
        let (key_var, secret_var) = if exchange.testnet {
            ("BINANCE_TESTNET_API_KEY", "BINANCE_TESTNET_API_SECRET")
        } else {
            ("BINANCE_API_KEY", "BINANCE_API_SECRET")
        };

        let api_key = std::env::var(key_var).ok()?;
        let api_secret = std::env::var(secret_var).ok()?;
        Some(Self::new(api_key, api_secret).with_exchange(exchange))
    }

    fn ping_path(&self) -> &'static str {
        match self.exchange.market {
            MarketKind::Spot => "/api/v3/ping",
            MarketKind::UsdFutures => "/fapi/v1/ping",
        }
    }

    fn time_path(&self) -> &'static str {
        match self.exchange.market {
            MarketKind::Spot => "/api/v3/time",
            MarketKind::UsdFutures => "/fapi/v1/time",
        }
    }
}

// ============================================================================
// API 응답 타입
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceServerTime {
    server_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListenKeyResponse {
    listen_key: String,
}

#[derive(Debug, Deserialize)]
struct BinanceError {
    code: i32,
    msg: String,
}

// ============================================================================
// Binance REST 클라이언트
// ============================================================================

/// Binance REST 클라이언트.
pub struct BinanceRestClient {
    config: BinanceConfig,
    client: Client,
}

impl BinanceRestClient {
    /// 새 클라이언트 생성.
    ///
    /// # Errors
    /// HTTP 클라이언트 생성에 실패하면 `ExchangeError::NetworkError`를 반환합니다.
    pub fn new(config: BinanceConfig) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.exchange.timeout_secs))
            .build()
            .map_err(|e| {
                ExchangeError::NetworkError(format!("HTTP 클라이언트 생성 실패: {}", e))
            })?;

        Ok(Self { config, client })
    }

    /// 현재 설정 반환.
    pub fn config(&self) -> &BinanceConfig {
        &self.config
    }

    /// HMAC-SHA256으로 쿼리 문자열 서명.
    pub fn sign(&self, query: &str) -> ExchangeResult<String> {
        let secret = self.api_secret()?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ExchangeError::InvalidRequest(format!("잘못된 시크릿: {}", e)))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn api_key(&self) -> ExchangeResult<&str> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| ExchangeError::Unauthorized("Empty credentials".to_string()))
    }

    fn api_secret(&self) -> ExchangeResult<&str> {
        self.config
            .api_secret
            .as_ref()
            .map(|s| s.expose_secret())
            .ok_or_else(|| ExchangeError::Unauthorized("Empty credentials".to_string()))
    }

    /// 파라미터에서 쿼리 문자열 생성.
    fn build_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn url(&self, endpoint: &str, query: &str) -> String {
        let base = self.config.exchange.rest_base_url();
        if query.is_empty() {
            format!("{}{}", base, endpoint)
        } else {
            format!("{}{}?{}", base, endpoint, query)
        }
    }

    /// 공개 API 요청 (인증 불필요).
    pub async fn public_get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let url = self.url(endpoint, &Self::build_query(params));
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await?;

        self.handle_response(endpoint, response).await
    }

    /// API 키만 필요한 요청 (서명 없음). listen key 엔드포인트가 여기에 해당합니다.
    pub async fn api_key_request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let api_key = self.api_key()?;
        let url = self.url(endpoint, &Self::build_query(params));
        debug!("{} (api key) {}", method, endpoint);

        let response = self
            .client
            .request(method, &url)
            .header(API_KEY_HEADER, api_key)
            .send()
            .await?;

        self.handle_response(endpoint, response).await
    }

    /// 서명된 API 요청 (인증 필요).
    pub async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let api_key = self.api_key()?;

        let mut all_params = params.to_vec();
        all_params.push(("timestamp", Utc::now().timestamp_millis().to_string()));
        all_params.push(("recvWindow", self.config.exchange.recv_window_ms.to_string()));

        let query = Self::build_query(&all_params);
        let signature = self.sign(&query)?;
        let signed_query = format!("{}&signature={}", query, signature);

        debug!("{} (signed) {}", method, endpoint);

        let request = if method == Method::POST {
            self.client
                .post(self.url(endpoint, ""))
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(signed_query)
        } else {
            self.client.request(method, self.url(endpoint, &signed_query))
        };

        let response = request
            .header(API_KEY_HEADER, api_key)
            .send()
            .await?;

        self.handle_response(endpoint, response).await
    }

    /// API 응답 검증.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        response: reqwest::Response,
    ) -> ExchangeResult<T> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                error!(endpoint, "Failed to parse response: {} - Body: {}", e, body);
                ExchangeError::ParseError(e.to_string())
            });
        }

        match serde_json::from_str::<BinanceError>(&body) {
            Ok(error) => {
                warn!(endpoint, status = status.as_u16(), code = error.code, "API error: {}", error.msg);
                Err(map_error(status, error.code, &error.msg))
            }
            Err(_) => Err(ExchangeError::ApiError {
                code: status.as_u16() as i32,
                message: body,
            }),
        }
    }

    // === 공개 엔드포인트 ===

    /// 연결 확인.
    pub async fn ping(&self) -> ExchangeResult<()> {
        let _: serde_json::Value = self.public_get(self.config.ping_path(), &[]).await?;
        Ok(())
    }

    /// 서버 시각(밀리초) 조회.
    pub async fn server_time(&self) -> ExchangeResult<i64> {
        let time: BinanceServerTime = self.public_get(self.config.time_path(), &[]).await?;
        Ok(time.server_time)
    }

    // === listen key ===

    /// listen key 발급. 유효한 키가 이미 있으면 같은 키의 유효기간이 연장됩니다.
    pub async fn create_listen_key(&self) -> ExchangeResult<String> {
        let path = self.config.exchange.listen_key_path();
        let response: ListenKeyResponse = self.api_key_request(Method::POST, path, &[]).await?;
        info!("listen key 발급 완료");
        Ok(response.listen_key)
    }

    /// listen key 유효기간 연장.
    pub async fn keepalive_listen_key(&self, listen_key: &str) -> ExchangeResult<()> {
        let path = self.config.exchange.listen_key_path();
        let _: serde_json::Value = self
            .api_key_request(Method::PUT, path, &[("listenKey", listen_key.to_string())])
            .await?;
        debug!("listen key 연장 완료");
        Ok(())
    }

    /// listen key 폐기.
    pub async fn close_listen_key(&self, listen_key: &str) -> ExchangeResult<()> {
        let path = self.config.exchange.listen_key_path();
        let _: serde_json::Value = self
            .api_key_request(Method::DELETE, path, &[("listenKey", listen_key.to_string())])
            .await?;
        info!("listen key 폐기 완료");
        Ok(())
    }
}

#[async_trait]
impl ListenKeySource for BinanceRestClient {
    async fn listen_key(&self) -> ExchangeResult<String> {
        self.create_listen_key().await
    }
}

/// HTTP 상태와 Binance 에러 코드를 ExchangeError로 매핑.
fn map_error(status: StatusCode, code: i32, msg: &str) -> ExchangeError {
    if status == StatusCode::IM_A_TEAPOT {
        if let Some((ip, until_ms)) = parse_ban_message(msg) {
            return ExchangeError::IpBanned { ip, until_ms };
        }
    }
    if status == StatusCode::BAD_REQUEST {
        if let Some(param) = parse_quoted_param(msg) {
            return ExchangeError::MalformedParam {
                param,
                message: msg.to_string(),
            };
        }
    }

    match code {
        -1003 => ExchangeError::RateLimited,
        -1021 => ExchangeError::TimestampError(msg.to_string()),
        -1002 | -2014 | -2015 => ExchangeError::Unauthorized(msg.to_string()),
        _ => ExchangeError::ApiError {
            code,
            message: msg.to_string(),
        },
    }
}

/// "IP(1.2.3.4) banned until 1700000000000" 형식에서 IP와 해제 시각 추출.
fn parse_ban_message(msg: &str) -> Option<(String, i64)> {
    let ip_start = msg.find("IP(")? + 3;
    let ip_len = msg[ip_start..].find(')')?;
    let ip = msg[ip_start..ip_start + ip_len].to_string();

    let until_start = msg.find("until ")? + "until ".len();
    let digits: String = msg[until_start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let until_ms = digits.parse().ok()?;

    Some((ip, until_ms))
}

/// 메시지에서 처음 작은따옴표로 감싼 파라미터 이름 추출.
fn parse_quoted_param(msg: &str) -> Option<String> {
    let start = msg.find('\'')? + 1;
    let len = msg[start..].find('\'')?;
    (len > 0).then(|| msg[start..start + len].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn futures_config(url: &str) -> ExchangeConfig {
        ExchangeConfig {
            market: MarketKind::UsdFutures,
            rest_base_url: Some(url.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_sign() {
        let config = BinanceConfig::new(
            "vmPUZE6mv9SD5VNHk4HlWFsOr6aKE2zvsw0MuIgwCIPy6utIco14y7Ju91duEh8A",
            "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j",
        );
        let client = BinanceRestClient::new(config).expect("테스트용 클라이언트 생성 실패");

        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            client.sign(query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_debug_masks_secret() {
        let config = BinanceConfig::new("abcdefghijklmnop", "super-secret");
        let output = format!("{:?}", config);
        assert!(output.contains("abcd...mnop"));
        assert!(!output.contains("super-secret"));

        let unicode = BinanceConfig::new("키키키키가나다라마바사", "s");
        assert!(format!("{:?}", unicode).contains("키키키키...라마바사"));
    }

    #[test]
    fn test_parse_ban_message() {
        let msg = "Way too many requests; IP(10.0.0.7) banned until 1700000000000. Please use the websocket for live updates to avoid bans.";
        assert_eq!(
            parse_ban_message(msg),
            Some(("10.0.0.7".to_string(), 1_700_000_000_000))
        );
        assert_eq!(parse_ban_message("banned"), None);
    }

    #[test]
    fn test_map_error_codes() {
        let err = map_error(
            StatusCode::BAD_REQUEST,
            -1102,
            "Mandatory parameter 'symbol' was not sent, was empty/null, or malformed.",
        );
        assert!(matches!(err, ExchangeError::MalformedParam { ref param, .. } if param == "symbol"));

        assert_eq!(
            map_error(StatusCode::TOO_MANY_REQUESTS, -1003, "Too many requests"),
            ExchangeError::RateLimited
        );
        assert!(matches!(
            map_error(StatusCode::UNAUTHORIZED, -2015, "Invalid API-key"),
            ExchangeError::Unauthorized(_)
        ));
        assert!(matches!(
            map_error(StatusCode::BAD_REQUEST, -1121, "Invalid symbol."),
            ExchangeError::ApiError { code: -1121, .. }
        ));
    }

    #[tokio::test]
    async fn test_create_listen_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/fapi/v1/listenKey")
            .match_header(API_KEY_HEADER, "test-key")
            .with_status(200)
            .with_body(r#"{"listenKey":"pqia91ma19a5s61cv6a81va65sdf19v8a65a1a5s61cv6a81va65sdf19v8a65a1"}"#)
            .create_async()
            .await;

        let config = BinanceConfig::new("test-key", "test-secret").with_exchange(futures_config(&server.url()));
        let client = BinanceRestClient::new(config).unwrap();

        let key = client.listen_key().await.unwrap();
        assert!(key.starts_with("pqia91ma"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_keepalive_and_close_listen_key() {
        let mut server = mockito::Server::new_async().await;
        let keepalive = server
            .mock("PUT", "/fapi/v1/listenKey")
            .match_header(API_KEY_HEADER, "test-key")
            .match_query(Matcher::UrlEncoded("listenKey".into(), "key-1".into()))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let close = server
            .mock("DELETE", "/fapi/v1/listenKey")
            .match_header(API_KEY_HEADER, "test-key")
            .match_query(Matcher::UrlEncoded("listenKey".into(), "key-1".into()))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let config = BinanceConfig::new("test-key", "test-secret").with_exchange(futures_config(&server.url()));
        let client = BinanceRestClient::new(config).unwrap();

        client.keepalive_listen_key("key-1").await.unwrap();
        client.close_listen_key("key-1").await.unwrap();
        keepalive.assert_async().await;
        close.assert_async().await;
    }

    #[tokio::test]
    async fn test_close_unknown_listen_key() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/api/v3/userDataStream")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":-1125,"msg":"This listenKey does not exist."}"#)
            .create_async()
            .await;

        let exchange = ExchangeConfig {
            rest_base_url: Some(server.url()),
            ..Default::default()
        };
        let client = BinanceRestClient::new(BinanceConfig::new("k", "s").with_exchange(exchange)).unwrap();

        assert_eq!(
            client.close_listen_key("gone").await.unwrap_err(),
            ExchangeError::ApiError {
                code: -1125,
                message: "This listenKey does not exist.".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_slow_response_maps_to_timeout() {
        use std::io::Write;

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v1/time")
            .with_status(200)
            .with_chunked_body(|w| {
                std::thread::sleep(std::time::Duration::from_millis(1500));
                w.write_all(br#"{"serverTime":1}"#)
            })
            .create_async()
            .await;

        let exchange = ExchangeConfig {
            timeout_secs: 1,
            ..futures_config(&server.url())
        };
        let client = BinanceRestClient::new(BinanceConfig::public().with_exchange(exchange)).unwrap();

        assert!(matches!(client.server_time().await, Err(ExchangeError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_listen_key_without_credentials() {
        let client = BinanceRestClient::new(BinanceConfig::public()).unwrap();
        let err = client.create_listen_key().await.unwrap_err();
        assert!(matches!(err, ExchangeError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_ip_ban_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/fapi/v1/listenKey")
            .with_status(418)
            .with_body(r#"{"code":-1003,"msg":"Way too many requests; IP(192.168.0.1) banned until 1700000123456. Please use the websocket for live updates to avoid bans."}"#)
            .create_async()
            .await;

        let config = BinanceConfig::new("k", "s").with_exchange(futures_config(&server.url()));
        let client = BinanceRestClient::new(config).unwrap();

        let err = client.create_listen_key().await.unwrap_err();
        assert_eq!(
            err,
            ExchangeError::IpBanned {
                ip: "192.168.0.1".to_string(),
                until_ms: 1_700_000_123_456
            }
        );
    }

    #[tokio::test]
    async fn test_server_time_and_unparseable_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v1/time")
            .with_status(200)
            .with_body(r#"{"serverTime":1499827319559}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/fapi/v1/ping")
            .with_status(503)
            .with_body("Service Unavailable")
            .create_async()
            .await;

        let client = BinanceRestClient::new(
            BinanceConfig::public().with_exchange(futures_config(&server.url())),
        )
        .unwrap();

        assert_eq!(client.server_time().await.unwrap(), 1_499_827_319_559);
        assert_eq!(
            client.ping().await.unwrap_err(),
            ExchangeError::ApiError {
                code: 503,
                message: "Service Unavailable".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_signed_request_carries_signature() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/account")
            .match_header(API_KEY_HEADER, "key")
            .match_query(Matcher::AllOf(vec![
                Matcher::Regex("timestamp=\\d+".into()),
                Matcher::Regex("recvWindow=5000".into()),
                Matcher::Regex("signature=[0-9a-f]{64}".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"canTrade":true}"#)
            .create_async()
            .await;

        let exchange = ExchangeConfig {
            rest_base_url: Some(server.url()),
            ..Default::default()
        };
        let client = BinanceRestClient::new(BinanceConfig::new("key", "secret").with_exchange(exchange)).unwrap();

        let body: serde_json::Value = client
            .signed_request(Method::GET, "/api/v3/account", &[])
            .await
            .unwrap();
        assert_eq!(body["canTrade"], true);
        mock.assert_async().await;
    }
}
