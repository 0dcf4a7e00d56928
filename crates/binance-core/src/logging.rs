//! tracing 기반 로깅 초기화.
//!
//! 스트림 이벤트는 초당 수백 건씩 들어오므로 기본적으로 전송 계층 크레이트의
//! 로그는 `warn` 이상만 남깁니다. `RUST_LOG`가 설정되어 있으면 그대로 따릅니다.

use crate::config::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing_subscriber::{
    fmt as tfmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// 기본적으로 `warn`으로 낮추는 전송 계층 크레이트.
const TRANSPORT_TARGETS: &[&str] = &[
    "tungstenite",
    "tokio_tungstenite",
    "hyper",
    "hyper_util",
    "reqwest",
    "rustls",
];

/// 로그 출력 형식.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 사람이 읽기 쉬운 여러 줄 형식
    #[default]
    Pretty,
    /// 로그 수집용 JSON
    Json,
    /// 이벤트당 한 줄
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
            LogFormat::Compact => "compact",
        })
    }
}

/// 설정의 레벨에 전송 계층 억제 지시자를 덧붙인 필터 문자열.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut directives = config.level.clone();
    if !config.transport_logs {
        for target in TRANSPORT_TARGETS {
            directives.push_str(&format!(",{}=warn", target));
        }
    }
    directives
}

/// 로깅 시스템을 초기화합니다. 프로세스당 한 번만 성공합니다.
///
/// ```no_run
/// use binance_core::{init_logging, LogFormat, LoggingConfig};
///
/// let config = LoggingConfig {
///     level: "binance_exchange=debug".into(),
///     format: LogFormat::Compact,
///     ..Default::default()
/// };
/// init_logging(&config).unwrap();
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directives(config)))?;

    let base = tfmt::layer()
        .with_file(config.with_file)
        .with_line_number(config.with_file)
        .with_target(true);

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => base.pretty().boxed(),
        LogFormat::Json => base.json().boxed(),
        LogFormat::Compact => base.compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()?;

    tracing::debug!(format = %config.format, level = %config.level, "Logging initialized");
    Ok(())
}
