//! 캔들(kline) 스트림 간격 정의.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Binance kline 간격.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KlineInterval {
    /// 1초봉 (현물 전용)
    #[serde(rename = "1s")]
    S1,
    /// 1분봉
    #[serde(rename = "1m")]
    M1,
    /// 3분봉
    #[serde(rename = "3m")]
    M3,
    /// 5분봉
    #[serde(rename = "5m")]
    M5,
    /// 15분봉
    #[serde(rename = "15m")]
    M15,
    /// 30분봉
    #[serde(rename = "30m")]
    M30,
    /// 1시간봉
    #[serde(rename = "1h")]
    H1,
    /// 2시간봉
    #[serde(rename = "2h")]
    H2,
    /// 4시간봉
    #[serde(rename = "4h")]
    H4,
    /// 6시간봉
    #[serde(rename = "6h")]
    H6,
    /// 8시간봉
    #[serde(rename = "8h")]
    H8,
    /// 12시간봉
    #[serde(rename = "12h")]
    H12,
    /// 일봉
    #[serde(rename = "1d")]
    D1,
    /// 3일봉
    #[serde(rename = "3d")]
    D3,
    /// 주봉
    #[serde(rename = "1w")]
    W1,
    /// 월봉
    #[serde(rename = "1M")]
    MN1,
}

impl KlineInterval {
    /// 간격의 기간을 반환합니다.
    pub fn duration(&self) -> Duration {
        match self {
            KlineInterval::S1 => Duration::from_secs(1),
            KlineInterval::M1 => Duration::from_secs(60),
            KlineInterval::M3 => Duration::from_secs(3 * 60),
            KlineInterval::M5 => Duration::from_secs(5 * 60),
            KlineInterval::M15 => Duration::from_secs(15 * 60),
            KlineInterval::M30 => Duration::from_secs(30 * 60),
            KlineInterval::H1 => Duration::from_secs(60 * 60),
            KlineInterval::H2 => Duration::from_secs(2 * 60 * 60),
            KlineInterval::H4 => Duration::from_secs(4 * 60 * 60),
            KlineInterval::H6 => Duration::from_secs(6 * 60 * 60),
            KlineInterval::H8 => Duration::from_secs(8 * 60 * 60),
            KlineInterval::H12 => Duration::from_secs(12 * 60 * 60),
            KlineInterval::D1 => Duration::from_secs(24 * 60 * 60),
            KlineInterval::D3 => Duration::from_secs(3 * 24 * 60 * 60),
            KlineInterval::W1 => Duration::from_secs(7 * 24 * 60 * 60),
            KlineInterval::MN1 => Duration::from_secs(30 * 24 * 60 * 60), // 근사값
        }
    }

    /// 스트림 이름에 쓰이는 간격 문자열.
    pub fn as_str(&self) -> &'static str {
        match self {
            KlineInterval::S1 => "1s",
            KlineInterval::M1 => "1m",
            KlineInterval::M3 => "3m",
            KlineInterval::M5 => "5m",
            KlineInterval::M15 => "15m",
            KlineInterval::M30 => "30m",
            KlineInterval::H1 => "1h",
            KlineInterval::H2 => "2h",
            KlineInterval::H4 => "4h",
            KlineInterval::H6 => "6h",
            KlineInterval::H8 => "8h",
            KlineInterval::H12 => "12h",
            KlineInterval::D1 => "1d",
            KlineInterval::D3 => "3d",
            KlineInterval::W1 => "1w",
            KlineInterval::MN1 => "1M",
        }
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KlineInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let interval = match s {
            "1s" => KlineInterval::S1,
            "1m" => KlineInterval::M1,
            "3m" => KlineInterval::M3,
            "5m" => KlineInterval::M5,
            "15m" => KlineInterval::M15,
            "30m" => KlineInterval::M30,
            "1h" => KlineInterval::H1,
            "2h" => KlineInterval::H2,
            "4h" => KlineInterval::H4,
            "6h" => KlineInterval::H6,
            "8h" => KlineInterval::H8,
            "12h" => KlineInterval::H12,
            "1d" => KlineInterval::D1,
            "3d" => KlineInterval::D3,
            "1w" => KlineInterval::W1,
            "1M" => KlineInterval::MN1,
            _ => return Err(format!("Invalid kline interval: {}", s)),
        };
        Ok(interval)
    }
}
