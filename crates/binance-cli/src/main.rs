//! Binance 스트림 CLI.
//!
//! 시장 데이터 채널이나 사용자 데이터 스트림을 구독하고 수신한 이벤트를 출력합니다.

use std::fmt::Debug;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use binance_core::{init_logging, ConnectorConfig, KlineInterval};
use binance_exchange::websocket::{
    Channel, ChannelStream, DepthLevel, DepthOptions, MarkPriceSpeed, MarketStreamClient,
    UserEventType, UserStream,
};
use binance_exchange::{BinanceConfig, BinanceRestClient, ExchangeError, StreamConfig};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "binance-stream")]
#[command(about = "Binance WebSocket 스트림 모니터", long_about = None)]
#[command(version)]
struct Cli {
    /// 설정 파일
    #[arg(short, long, default_value = binance_core::DEFAULT_CONFIG_PATH, global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 시장 데이터 채널 구독
    Market {
        /// 채널
        #[arg(value_enum)]
        channel: ChannelArg,

        /// 심볼 (쉼표로 구분, 예: BTCUSDT,ETHUSDT)
        #[arg(short, long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,

        /// 호가 깊이 (5, 10, 20)
        #[arg(long, default_value = "5")]
        levels: u8,

        /// 호가 갱신 주기 (밀리초, 예: 100)
        #[arg(long)]
        update_speed: Option<u32>,

        /// kline 간격 (1m, 5m, 1h, 1d 등)
        #[arg(short, long, default_value = "1m")]
        interval: String,

        /// 마크 가격 1초 주기
        #[arg(long, default_value = "false")]
        fast: bool,
    },

    /// 사용자 데이터 스트림 구독 (BINANCE_API_KEY / BINANCE_API_SECRET 필요)
    User,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ChannelArg {
    BookTicker,
    Depth,
    AggTrade,
    Trade,
    Kline,
    Ticker,
    MarkPrice,
}

fn depth_level(levels: u8) -> anyhow::Result<DepthLevel> {
    match levels {
        5 => Ok(DepthLevel::Five),
        10 => Ok(DepthLevel::Ten),
        20 => Ok(DepthLevel::Twenty),
        other => Err(anyhow!("Invalid depth: {}. Supported: 5, 10, 20", other)),
    }
}

fn log_stream_error(e: &ExchangeError) {
    if e.is_auth_error() || e.is_fatal() {
        error!(error = %e, "Stream error");
    } else if e.is_retryable() {
        warn!(error = %e, "Stream interrupted");
    } else {
        warn!(error = %e, request_id = ?e.request_id(), "Stream error");
    }
}

/// 채널 구독 후 Ctrl+C까지 이벤트를 출력합니다.
async fn watch<C>(
    stream: ChannelStream<C>,
    symbols: &[String],
    options: C::Options,
) -> anyhow::Result<()>
where
    C: Channel,
    C::Event: Debug,
{
    let handle = stream.on(|event| println!("{:?}", event));

    stream
        .subscribe(symbols, &options)
        .await
        .with_context(|| format!("subscribe to {} failed", C::NAME))?;
    info!(channel = C::NAME, symbols = ?symbols, "Subscribed");

    tokio::signal::ctrl_c().await?;

    if let Err(e) = stream.unsubscribe(symbols, &options).await {
        error!(channel = C::NAME, error = %e, "Unsubscribe failed");
    }
    stream.off(handle);
    Ok(())
}

async fn run_market(
    stream_config: StreamConfig,
    channel: ChannelArg,
    symbols: Vec<String>,
    depth: DepthOptions,
    interval: KlineInterval,
    speed: MarkPriceSpeed,
) -> anyhow::Result<()> {
    let client = MarketStreamClient::new(stream_config);
    let errors = client.on_error(log_stream_error);

    let result = match channel {
        ChannelArg::BookTicker => watch(client.book_ticker(), &symbols, ()).await,
        ChannelArg::Depth => watch(client.partial_book_depth(), &symbols, depth).await,
        ChannelArg::AggTrade => watch(client.agg_trade(), &symbols, ()).await,
        ChannelArg::Trade => watch(client.trade(), &symbols, ()).await,
        ChannelArg::Kline => watch(client.kline(), &symbols, interval).await,
        ChannelArg::Ticker => watch(client.ticker(), &symbols, ()).await,
        ChannelArg::MarkPrice => watch(client.mark_price(), &symbols, speed).await,
    };

    client.off_error(errors);
    client.close();
    result
}

async fn run_user(config: &ConnectorConfig, stream_config: StreamConfig) -> anyhow::Result<()> {
    let credentials = BinanceConfig::from_env(config.exchange.clone())
        .ok_or_else(|| anyhow!("BINANCE_API_KEY and BINANCE_API_SECRET must be set"))?;
    let rest = Arc::new(BinanceRestClient::new(credentials)?);

    let stream = UserStream::connect(stream_config, rest.clone())
        .await
        .context("user data stream connection failed")?;
    info!(listen_key = ?stream.listen_key(), "User data stream connected");

    for event_type in UserEventType::ALL {
        stream.on(event_type, |event| println!("{:?}", event));
    }
    stream.on_error(log_stream_error);

    tokio::signal::ctrl_c().await?;
    stream.close();

    if let Some(listen_key) = stream.listen_key() {
        match rest.close_listen_key(&listen_key).await {
            Ok(()) => info!("listen key released"),
            Err(e) => warn!(error = %e, "Failed to release listen key"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = ConnectorConfig::load(&cli.config)
        .with_context(|| format!("failed to load config: {}", cli.config))?;
    init_logging(&config.logging).map_err(|e| anyhow!("{}", e))?;

    let stream_config = StreamConfig::from_connector(&config);
    info!(
        market_url = %stream_config.market_url,
        sectioning = ?stream_config.sectioning,
        "Starting stream monitor"
    );

    match cli.command {
        Commands::Market {
            channel,
            symbols,
            levels,
            update_speed,
            interval,
            fast,
        } => {
            let mut depth = DepthOptions::new(depth_level(levels)?);
            if let Some(ms) = update_speed {
                depth = depth.with_update_speed(ms);
            }
            let interval: KlineInterval = interval.parse().map_err(|e: String| anyhow!(e))?;
            let speed = if fast {
                MarkPriceSpeed::Fast
            } else {
                MarkPriceSpeed::Standard
            };

            run_market(stream_config, channel, symbols, depth, interval, speed).await?;
        }

        Commands::User => run_user(&config, stream_config).await?,
    }

    info!("Stream monitor stopped");
    Ok(())
}
