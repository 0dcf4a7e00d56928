//! 사용자 데이터 스트림 이벤트.
//!
//! 모든 이벤트는 `e` 필드로 구분됩니다. 선물 이벤트와 현물 이벤트를 함께 다룹니다.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::fmt;

/// 사용자 이벤트 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserEventType {
    ListenKeyExpired,
    AccountUpdate,
    MarginCall,
    OrderTradeUpdate,
    TradeLite,
    AccountConfigUpdate,
    StrategyUpdate,
    GridUpdate,
    ConditionalOrderTriggerReject,
    OutboundAccountPosition,
    BalanceUpdate,
    ExecutionReport,
}

impl UserEventType {
    /// 모든 이벤트 종류.
    pub const ALL: [UserEventType; 12] = [
        UserEventType::ListenKeyExpired,
        UserEventType::AccountUpdate,
        UserEventType::MarginCall,
        UserEventType::OrderTradeUpdate,
        UserEventType::TradeLite,
        UserEventType::AccountConfigUpdate,
        UserEventType::StrategyUpdate,
        UserEventType::GridUpdate,
        UserEventType::ConditionalOrderTriggerReject,
        UserEventType::OutboundAccountPosition,
        UserEventType::BalanceUpdate,
        UserEventType::ExecutionReport,
    ];

    /// 와이어 상의 `e` 값.
    pub fn as_str(&self) -> &'static str {
        match self {
            UserEventType::ListenKeyExpired => "listenKeyExpired",
            UserEventType::AccountUpdate => "ACCOUNT_UPDATE",
            UserEventType::MarginCall => "MARGIN_CALL",
            UserEventType::OrderTradeUpdate => "ORDER_TRADE_UPDATE",
            UserEventType::TradeLite => "TRADE_LITE",
            UserEventType::AccountConfigUpdate => "ACCOUNT_CONFIG_UPDATE",
            UserEventType::StrategyUpdate => "STRATEGY_UPDATE",
            UserEventType::GridUpdate => "GRID_UPDATE",
            UserEventType::ConditionalOrderTriggerReject => "CONDITIONAL_ORDER_TRIGGER_REJECT",
            UserEventType::OutboundAccountPosition => "outboundAccountPosition",
            UserEventType::BalanceUpdate => "balanceUpdate",
            UserEventType::ExecutionReport => "executionReport",
        }
    }
}

impl fmt::Display for UserEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 사용자 데이터 스트림 이벤트.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "e")]
pub enum UserEvent {
    #[serde(rename = "listenKeyExpired")]
    ListenKeyExpired(ListenKeyExpiredEvent),
    #[serde(rename = "ACCOUNT_UPDATE")]
    AccountUpdate(AccountUpdateEvent),
    #[serde(rename = "MARGIN_CALL")]
    MarginCall(MarginCallEvent),
    #[serde(rename = "ORDER_TRADE_UPDATE")]
    OrderTradeUpdate(OrderTradeUpdateEvent),
    #[serde(rename = "TRADE_LITE")]
    TradeLite(TradeLiteEvent),
    #[serde(rename = "ACCOUNT_CONFIG_UPDATE")]
    AccountConfigUpdate(AccountConfigUpdateEvent),
    #[serde(rename = "STRATEGY_UPDATE")]
    StrategyUpdate(StrategyUpdateEvent),
    #[serde(rename = "GRID_UPDATE")]
    GridUpdate(GridUpdateEvent),
    #[serde(rename = "CONDITIONAL_ORDER_TRIGGER_REJECT")]
    ConditionalOrderTriggerReject(ConditionalOrderTriggerRejectEvent),
    #[serde(rename = "outboundAccountPosition")]
    OutboundAccountPosition(OutboundAccountPositionEvent),
    #[serde(rename = "balanceUpdate")]
    BalanceUpdate(BalanceUpdateEvent),
    #[serde(rename = "executionReport")]
    ExecutionReport(ExecutionReportEvent),
}

impl UserEvent {
    /// 이벤트 종류.
    pub fn event_type(&self) -> UserEventType {
        match self {
            UserEvent::ListenKeyExpired(_) => UserEventType::ListenKeyExpired,
            UserEvent::AccountUpdate(_) => UserEventType::AccountUpdate,
            UserEvent::MarginCall(_) => UserEventType::MarginCall,
            UserEvent::OrderTradeUpdate(_) => UserEventType::OrderTradeUpdate,
            UserEvent::TradeLite(_) => UserEventType::TradeLite,
            UserEvent::AccountConfigUpdate(_) => UserEventType::AccountConfigUpdate,
            UserEvent::StrategyUpdate(_) => UserEventType::StrategyUpdate,
            UserEvent::GridUpdate(_) => UserEventType::GridUpdate,
            UserEvent::ConditionalOrderTriggerReject(_) => {
                UserEventType::ConditionalOrderTriggerReject
            }
            UserEvent::OutboundAccountPosition(_) => UserEventType::OutboundAccountPosition,
            UserEvent::BalanceUpdate(_) => UserEventType::BalanceUpdate,
            UserEvent::ExecutionReport(_) => UserEventType::ExecutionReport,
        }
    }
}

// ============================================================================
// 선물 이벤트
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListenKeyExpiredEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "listenKey", default)]
    pub listen_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccountUpdateEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "T")]
    pub transaction_time: i64,
    #[serde(rename = "a")]
    pub update: AccountUpdateData,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccountUpdateData {
    /// 변경 사유 (ORDER, FUNDING_FEE, DEPOSIT, ...)
    #[serde(rename = "m")]
    pub reason: String,
    #[serde(rename = "B", default)]
    pub balances: Vec<BalanceChange>,
    #[serde(rename = "P", default)]
    pub positions: Vec<PositionChange>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BalanceChange {
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "wb")]
    pub wallet_balance: Decimal,
    #[serde(rename = "cw")]
    pub cross_wallet_balance: Decimal,
    #[serde(rename = "bc")]
    pub balance_change: Decimal,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PositionChange {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "pa")]
    pub position_amount: Decimal,
    #[serde(rename = "ep")]
    pub entry_price: Decimal,
    #[serde(rename = "bep", default)]
    pub breakeven_price: Option<Decimal>,
    #[serde(rename = "cr")]
    pub accumulated_realized: Decimal,
    #[serde(rename = "up")]
    pub unrealized_pnl: Decimal,
    #[serde(rename = "mt")]
    pub margin_type: String,
    #[serde(rename = "iw")]
    pub isolated_wallet: Decimal,
    #[serde(rename = "ps")]
    pub position_side: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarginCallEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "cw", default)]
    pub cross_wallet_balance: Option<Decimal>,
    #[serde(rename = "p")]
    pub positions: Vec<MarginCallPosition>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarginCallPosition {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "ps")]
    pub position_side: String,
    #[serde(rename = "pa")]
    pub position_amount: Decimal,
    #[serde(rename = "mt")]
    pub margin_type: String,
    #[serde(rename = "iw")]
    pub isolated_wallet: Decimal,
    #[serde(rename = "mp")]
    pub mark_price: Decimal,
    #[serde(rename = "up")]
    pub unrealized_pnl: Decimal,
    #[serde(rename = "mm")]
    pub maintenance_margin: Decimal,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderTradeUpdateEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "T")]
    pub transaction_time: i64,
    #[serde(rename = "o")]
    pub order: OrderUpdate,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderUpdate {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub client_order_id: String,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "o")]
    pub order_type: String,
    #[serde(rename = "f")]
    pub time_in_force: String,
    #[serde(rename = "q")]
    pub quantity: Decimal,
    #[serde(rename = "p")]
    pub price: Decimal,
    #[serde(rename = "ap")]
    pub average_price: Decimal,
    #[serde(rename = "sp")]
    pub stop_price: Decimal,
    #[serde(rename = "x")]
    pub execution_type: String,
    #[serde(rename = "X")]
    pub status: String,
    #[serde(rename = "i")]
    pub order_id: u64,
    #[serde(rename = "l")]
    pub last_filled_qty: Decimal,
    #[serde(rename = "z")]
    pub cumulative_filled_qty: Decimal,
    #[serde(rename = "L")]
    pub last_filled_price: Decimal,
    #[serde(rename = "N", default)]
    pub commission_asset: Option<String>,
    #[serde(rename = "n", default)]
    pub commission: Option<Decimal>,
    #[serde(rename = "T")]
    pub trade_time: i64,
    #[serde(rename = "t")]
    pub trade_id: i64,
    #[serde(rename = "m")]
    pub is_maker: bool,
    #[serde(rename = "R")]
    pub reduce_only: bool,
    #[serde(rename = "ps")]
    pub position_side: String,
    #[serde(rename = "rp")]
    pub realized_profit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradeLiteEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "T")]
    pub transaction_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "q")]
    pub quantity: Decimal,
    #[serde(rename = "p")]
    pub price: Decimal,
    #[serde(rename = "m")]
    pub is_maker: bool,
    #[serde(rename = "c")]
    pub client_order_id: String,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "L")]
    pub last_filled_price: Decimal,
    #[serde(rename = "l")]
    pub last_filled_qty: Decimal,
    #[serde(rename = "t")]
    pub trade_id: i64,
    #[serde(rename = "i")]
    pub order_id: u64,
}

/// 레버리지 또는 멀티에셋 모드 변경. 둘 중 하나만 채워집니다.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccountConfigUpdateEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "T")]
    pub transaction_time: i64,
    #[serde(rename = "ac", default)]
    pub leverage: Option<LeverageUpdate>,
    #[serde(rename = "ai", default)]
    pub asset_mode: Option<AssetModeUpdate>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LeverageUpdate {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "l")]
    pub leverage: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssetModeUpdate {
    /// 멀티에셋 모드 여부
    #[serde(rename = "j")]
    pub multi_assets: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StrategyUpdateEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "T")]
    pub transaction_time: i64,
    #[serde(rename = "su")]
    pub update: StrategyUpdate,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StrategyUpdate {
    #[serde(rename = "si")]
    pub strategy_id: i64,
    #[serde(rename = "st")]
    pub strategy_type: String,
    #[serde(rename = "ss")]
    pub status: String,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "ut")]
    pub update_time: i64,
    /// 운영 코드 (8001~8015)
    #[serde(rename = "c")]
    pub op_code: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GridUpdateEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "T")]
    pub transaction_time: i64,
    #[serde(rename = "gu")]
    pub update: GridUpdate,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GridUpdate {
    #[serde(rename = "si")]
    pub strategy_id: i64,
    #[serde(rename = "st")]
    pub strategy_type: String,
    #[serde(rename = "ss")]
    pub status: String,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "r")]
    pub realized_pnl: Decimal,
    #[serde(rename = "up")]
    pub unmatched_avg_price: Decimal,
    #[serde(rename = "uq")]
    pub unmatched_qty: Decimal,
    #[serde(rename = "uf")]
    pub unmatched_fee: Decimal,
    #[serde(rename = "mp")]
    pub matched_pnl: Decimal,
    #[serde(rename = "ut")]
    pub update_time: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConditionalOrderTriggerRejectEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "T")]
    pub transaction_time: i64,
    #[serde(rename = "or")]
    pub reject: TriggerReject,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TriggerReject {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "i")]
    pub order_id: u64,
    #[serde(rename = "r")]
    pub reason: String,
}

// ============================================================================
// 현물 이벤트
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutboundAccountPositionEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "u")]
    pub last_update_time: i64,
    #[serde(rename = "B")]
    pub balances: Vec<SpotBalance>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpotBalance {
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "f")]
    pub free: Decimal,
    #[serde(rename = "l")]
    pub locked: Decimal,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BalanceUpdateEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "d")]
    pub delta: Decimal,
    #[serde(rename = "T")]
    pub clear_time: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutionReportEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub client_order_id: String,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "o")]
    pub order_type: String,
    #[serde(rename = "f")]
    pub time_in_force: String,
    #[serde(rename = "q")]
    pub quantity: Decimal,
    #[serde(rename = "p")]
    pub price: Decimal,
    #[serde(rename = "x")]
    pub execution_type: String,
    #[serde(rename = "X")]
    pub status: String,
    #[serde(rename = "r")]
    pub reject_reason: String,
    #[serde(rename = "i")]
    pub order_id: u64,
    #[serde(rename = "l")]
    pub last_filled_qty: Decimal,
    #[serde(rename = "z")]
    pub cumulative_filled_qty: Decimal,
    #[serde(rename = "L")]
    pub last_filled_price: Decimal,
    #[serde(rename = "n")]
    pub commission: Decimal,
    #[serde(rename = "N", default)]
    pub commission_asset: Option<String>,
    #[serde(rename = "T")]
    pub transaction_time: i64,
    #[serde(rename = "t")]
    pub trade_id: i64,
    #[serde(rename = "m")]
    pub is_maker: bool,
}
