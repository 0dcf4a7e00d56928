//! 채널 라우터와 시장 데이터 스트림 클라이언트.
//!
//! 라우터는 채널별 구독 API를 제공하고, 수신 프레임을 판별 규칙에 따라
//! 해당 채널의 리스너들에게 전달합니다. 채널은 하나의 연결을 공유하거나
//! 채널마다 독립된 연결(섹션)을 가질 수 있으며, 섹션은 처음 사용할 때 생성됩니다.

use super::channels::{AggTrade, BookTicker, Channel, Kline, MarkPrice, PartialBookDepth, Ticker, Trade};
use super::config::StreamConfig;
use super::connection::Connection;
use super::emitter::{Emitter, ListenerHandle};
use super::transport::{Transport, TungsteniteTransport};
use crate::traits::ExchangeResult;
use crate::ExchangeError;
use binance_core::{stream_symbol, Sectioning};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// 공유 섹션 이름.
const SHARED_SECTION: &str = "default";

/// 채널별 리스너 묶음.
struct ChannelScope<C: Channel> {
    listeners: Emitter<C::Event>,
    _channel: PhantomData<C>,
}

impl<C: Channel> Default for ChannelScope<C> {
    fn default() -> Self {
        Self {
            listeners: Emitter::new(),
            _channel: PhantomData,
        }
    }
}

/// 타입이 지워진 채널 디스패처.
trait ChannelDispatch: Send + Sync {
    /// 프레임이 이 채널의 것이면 디코딩 후 전달하고 `Some`을 반환.
    fn try_dispatch(&self, frame: &Map<String, Value>, payload: &Value)
        -> Option<ExchangeResult<()>>;
}

impl<C: Channel> ChannelDispatch for ChannelScope<C> {
    fn try_dispatch(
        &self,
        frame: &Map<String, Value>,
        payload: &Value,
    ) -> Option<ExchangeResult<()>> {
        if !C::matches(frame) {
            return None;
        }

        let decoded = C::Event::deserialize(payload)
            .map(|event| self.listeners.emit(&event))
            .map_err(|e| ExchangeError::Decode(format!("{} frame: {}", C::NAME, e)));
        Some(decoded)
    }
}

/// 채널 → 연결 라우터.
pub struct ChannelRouter {
    config: StreamConfig,
    transport: Arc<dyn Transport>,
    sections: Mutex<HashMap<String, Connection>>,
    book_ticker: Arc<ChannelScope<BookTicker>>,
    partial_book_depth: Arc<ChannelScope<PartialBookDepth>>,
    agg_trade: Arc<ChannelScope<AggTrade>>,
    trade: Arc<ChannelScope<Trade>>,
    kline: Arc<ChannelScope<Kline>>,
    ticker: Arc<ChannelScope<Ticker>>,
    mark_price: Arc<ChannelScope<MarkPrice>>,
    dispatchers: Vec<Arc<dyn ChannelDispatch>>,
    errors: Emitter<ExchangeError>,
}

impl ChannelRouter {
    /// 라우터 생성. 연결은 첫 구독 시점에 만들어집니다.
    pub fn new(config: StreamConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let book_ticker = Arc::new(ChannelScope::<BookTicker>::default());
        let partial_book_depth = Arc::new(ChannelScope::<PartialBookDepth>::default());
        let agg_trade = Arc::new(ChannelScope::<AggTrade>::default());
        let trade = Arc::new(ChannelScope::<Trade>::default());
        let kline = Arc::new(ChannelScope::<Kline>::default());
        let ticker = Arc::new(ChannelScope::<Ticker>::default());
        let mark_price = Arc::new(ChannelScope::<MarkPrice>::default());

        // 판별 순서: `e` 태그가 있는 채널 다음에 구조로 판별하는 채널
        let dispatchers: Vec<Arc<dyn ChannelDispatch>> = vec![
            agg_trade.clone(),
            trade.clone(),
            kline.clone(),
            ticker.clone(),
            mark_price.clone(),
            book_ticker.clone(),
            partial_book_depth.clone(),
        ];

        Arc::new(Self {
            config,
            transport,
            sections: Mutex::new(HashMap::new()),
            book_ticker,
            partial_book_depth,
            agg_trade,
            trade,
            kline,
            ticker,
            mark_price,
            dispatchers,
            errors: Emitter::new(),
        })
    }

    fn section_name(&self, channel: &'static str) -> &'static str {
        match self.config.sectioning {
            Sectioning::Shared => SHARED_SECTION,
            Sectioning::PerChannel => channel,
        }
    }

    /// 채널을 담당하는 연결. 없으면 생성 후 캐시합니다.
    pub fn section(self: &Arc<Self>, channel: &'static str) -> Connection {
        let name = self.section_name(channel);
        let mut sections = self.sections.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(connection) = sections.get(name) {
            return connection.clone();
        }

        info!(section = name, url = %self.config.market_url, "스트림 섹션 생성");
        let connection = Connection::new(
            self.config.market_url.clone(),
            self.config.clone(),
            self.transport.clone(),
        );

        let router = Arc::downgrade(self);
        connection.on_message(move |payload| {
            if let Some(router) = router.upgrade() {
                router.dispatch(payload);
            }
        });
        let router = Arc::downgrade(self);
        connection.on_error(move |error| {
            if let Some(router) = router.upgrade() {
                router.errors.emit(error);
            }
        });

        sections.insert(name.to_string(), connection.clone());
        connection
    }

    /// 생성된 섹션 수.
    pub fn section_count(&self) -> usize {
        self.sections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 시장 프레임을 소유 채널로 전달.
    fn dispatch(&self, payload: &Value) {
        let Value::Object(frame) = payload else {
            self.errors.emit(&ExchangeError::Decode(
                "market frame is not an object".to_string(),
            ));
            return;
        };

        for dispatcher in &self.dispatchers {
            match dispatcher.try_dispatch(frame, payload) {
                None => continue,
                Some(Ok(())) => return,
                Some(Err(e)) => {
                    warn!(error = %e, "채널 이벤트 디코딩 실패");
                    self.errors.emit(&e);
                    return;
                }
            }
        }

        debug!(frame = %payload, "소유 채널 없는 프레임");
        self.errors.emit(&ExchangeError::Decode(format!(
            "no channel for frame: {}",
            payload
        )));
    }

    /// 모든 섹션의 소켓을 닫습니다.
    pub fn close(&self) {
        let sections = self.sections.lock().unwrap_or_else(PoisonError::into_inner);
        for connection in sections.values() {
            connection.close();
        }
    }
}

/// 단일 채널에 대한 구독/리스너 API.
pub struct ChannelStream<C: Channel> {
    router: Arc<ChannelRouter>,
    scope: Arc<ChannelScope<C>>,
}

impl<C: Channel> ChannelStream<C> {
    fn new(router: &Arc<ChannelRouter>, scope: &Arc<ChannelScope<C>>) -> Self {
        Self {
            router: router.clone(),
            scope: scope.clone(),
        }
    }

    /// 심볼 목록과 옵션에서 스트림 키 생성.
    pub fn stream_keys<S: AsRef<str>>(symbols: &[S], options: &C::Options) -> Vec<String> {
        symbols
            .iter()
            .map(|s| C::stream_key(&stream_symbol(s.as_ref()), options))
            .collect()
    }

    /// 구독. 서버가 확인하면 완료됩니다.
    pub async fn subscribe<S: AsRef<str>>(
        &self,
        symbols: &[S],
        options: &C::Options,
    ) -> ExchangeResult<()> {
        let keys = Self::stream_keys(symbols, options);
        self.router.section(C::NAME).subscribe(keys).await
    }

    /// 구독 해제.
    pub async fn unsubscribe<S: AsRef<str>>(
        &self,
        symbols: &[S],
        options: &C::Options,
    ) -> ExchangeResult<()> {
        let keys = Self::stream_keys(symbols, options);
        self.router.section(C::NAME).unsubscribe(keys).await
    }

    /// 이벤트 리스너 등록. 심볼과 관계없이 이 채널의 모든 이벤트를 받습니다.
    pub fn on<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&C::Event) + Send + Sync + 'static,
    {
        self.scope.listeners.on(listener)
    }

    /// 리스너 해제.
    pub fn off(&self, handle: ListenerHandle) -> bool {
        self.scope.listeners.off(handle)
    }
}

/// 시장 데이터 스트림 클라이언트.
///
/// ```rust,ignore
/// let client = MarketStreamClient::new(StreamConfig::default());
/// let depth = client.partial_book_depth();
/// depth.on(|event| println!("{:?}", event.bids.first()));
/// depth.subscribe(&["BTC/USDT"], &DepthOptions::new(DepthLevel::Five)).await?;
/// ```
#[derive(Clone)]
pub struct MarketStreamClient {
    router: Arc<ChannelRouter>,
}

impl MarketStreamClient {
    /// tokio-tungstenite 전송 계층으로 생성.
    pub fn new(config: StreamConfig) -> Self {
        Self::with_transport(config, Arc::new(TungsteniteTransport))
    }

    /// 전송 계층을 지정하여 생성.
    pub fn with_transport(config: StreamConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            router: ChannelRouter::new(config, transport),
        }
    }

    pub fn router(&self) -> &Arc<ChannelRouter> {
        &self.router
    }

    pub fn book_ticker(&self) -> ChannelStream<BookTicker> {
        ChannelStream::new(&self.router, &self.router.book_ticker)
    }

    pub fn partial_book_depth(&self) -> ChannelStream<PartialBookDepth> {
        ChannelStream::new(&self.router, &self.router.partial_book_depth)
    }

    pub fn agg_trade(&self) -> ChannelStream<AggTrade> {
        ChannelStream::new(&self.router, &self.router.agg_trade)
    }

    pub fn trade(&self) -> ChannelStream<Trade> {
        ChannelStream::new(&self.router, &self.router.trade)
    }

    pub fn kline(&self) -> ChannelStream<Kline> {
        ChannelStream::new(&self.router, &self.router.kline)
    }

    pub fn ticker(&self) -> ChannelStream<Ticker> {
        ChannelStream::new(&self.router, &self.router.ticker)
    }

    pub fn mark_price(&self) -> ChannelStream<MarkPrice> {
        ChannelStream::new(&self.router, &self.router.mark_price)
    }

    /// 에러 리스너 등록 (디코딩/구독/소켓 에러).
    pub fn on_error<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&ExchangeError) + Send + Sync + 'static,
    {
        self.router.errors.on(listener)
    }

    pub fn off_error(&self, handle: ListenerHandle) -> bool {
        self.router.errors.off(handle)
    }

    /// 모든 소켓 닫기.
    pub fn close(&self) {
        self.router.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::channels::{DepthLevel, DepthOptions};
    use crate::websocket::events::DepthEvent;
    use crate::websocket::testing::MockServer;
    use crate::websocket::tracker::SubscriptionState;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn test_config() -> StreamConfig {
        StreamConfig::new("ws://mock/ws").with_ack_timeout(Some(Duration::from_secs(2)))
    }

    #[tokio::test]
    async fn test_depth_subscribe_and_dispatch() {
        let (transport, mut server) = MockServer::new();
        let client = MarketStreamClient::with_transport(test_config(), transport);
        let depth = client.partial_book_depth();

        let (tx, mut rx) = mpsc::unbounded_channel::<DepthEvent>();
        depth.on(move |event| {
            let _ = tx.send(event.clone());
        });

        let task = tokio::spawn({
            let depth = client.partial_book_depth();
            async move {
                depth
                    .subscribe(&["BTC/USDT"], &DepthOptions::new(DepthLevel::Five))
                    .await
            }
        });

        let mut peer = server.accept().await;
        let request = peer.next_request().await;
        assert_eq!(request.params, vec!["btcusdt@depth5".to_string()]);
        peer.ack(request.id);
        task.await.unwrap().unwrap();

        peer.push(json!({
            "s": "BTCUSDT",
            "b": [["100.5", "1.0"]],
            "a": [["101.0", "2.0"]]
        }));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.symbol.as_deref(), Some("BTCUSDT"));
        assert_eq!(event.bids[0].price, dec!(100.5));
        assert_eq!(event.asks[0].qty, dec!(2.0));

        let section = client.router().section("partialBookDepth");
        assert_eq!(section.subscription_state("btcusdt@depth5"), SubscriptionState::Subscribed);
    }

    #[tokio::test]
    async fn test_shared_section_is_reused() {
        let (transport, mut server) = MockServer::new();
        let client = MarketStreamClient::with_transport(test_config(), transport);

        let book = client.book_ticker();
        let task = tokio::spawn(async move { book.subscribe(&["ethusdt"], &()).await });
        let mut peer = server.accept().await;
        let req = peer.next_request().await;
        peer.ack(req.id);
        task.await.unwrap().unwrap();

        let trades = client.agg_trade();
        let task = tokio::spawn(async move { trades.subscribe(&["ethusdt"], &()).await });
        let req = peer.next_request().await;
        assert_eq!(req.params, vec!["ethusdt@aggTrade".to_string()]);
        peer.ack(req.id);
        task.await.unwrap().unwrap();

        assert_eq!(client.router().section_count(), 1);
    }

    #[tokio::test]
    async fn test_per_channel_sections() {
        let (transport, mut server) = MockServer::new();
        let config = test_config().with_sectioning(Sectioning::PerChannel);
        let client = MarketStreamClient::with_transport(config, transport);

        let book = client.book_ticker();
        let task = tokio::spawn(async move { book.subscribe(&["ethusdt"], &()).await });
        let mut first = server.accept().await;
        let req = first.next_request().await;
        first.ack(req.id);
        task.await.unwrap().unwrap();

        let trades = client.trade();
        let task = tokio::spawn(async move { trades.subscribe(&["ethusdt"], &()).await });
        let mut second = server.accept().await;
        let req = second.next_request().await;
        assert_eq!(req.params, vec!["ethusdt@trade".to_string()]);
        second.ack(req.id);
        task.await.unwrap().unwrap();

        assert_eq!(client.router().section_count(), 2);
    }

    #[tokio::test]
    async fn test_bad_channel_payload_is_reported_and_listeners_continue() {
        let (transport, mut server) = MockServer::new();
        let client = MarketStreamClient::with_transport(test_config(), transport);

        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        client.on_error(move |e| {
            let _ = err_tx.send(e.clone());
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = client.agg_trade().on(move |event| {
            let _ = tx.send(event.agg_trade_id);
        });

        let section = client.router().section(AggTrade::NAME);
        let peer = server.accept().await;
        section.ensure_open().await.unwrap();

        peer.push(json!({"e": "aggTrade", "s": "BTCUSDT", "p": "not-a-number"}));
        assert!(matches!(err_rx.recv().await.unwrap(), ExchangeError::Decode(_)));

        peer.push(json!({
            "e": "aggTrade", "E": 1, "s": "BTCUSDT", "a": 42, "p": "1.5", "q": "2",
            "f": 1, "l": 2, "T": 1, "m": false
        }));
        assert_eq!(rx.recv().await.unwrap(), 42);

        assert!(client.agg_trade().off(handle));
        peer.push(json!({"e": "unknownEvent"}));
        assert!(matches!(err_rx.recv().await.unwrap(), ExchangeError::Decode(_)));
    }
}
