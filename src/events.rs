//! Output records published by the matching core.
//!
//! Trades and events are emitted as plain value records on the shard
//! output rings; consumers never receive handles into engine memory.

use crate::order::Side;

/// A completed match between an aggressing and a resting order.
///
/// `trade_id` is strictly monotonically increasing within a shard.
/// The price is always the resting order's price: price improvement
/// accrues to the aggressor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Trade {
    pub trade_id: u64,
    pub symbol_id: u32,
    pub price_cents: i64,
    pub qty: u32,
    pub buy_order_id: u64,
    pub sell_order_id: u64,
}

/// Lifecycle event kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EventKind {
    #[default]
    AckNew = 0,
    AckCancel = 1,
    AckReplace = 2,
    Reject = 3,
    Exec = 4,
}

/// Liquidity tag on an execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Liquidity {
    #[default]
    None = 0,
    Maker = 1,
    Taker = 2,
}

/// Order-lifecycle event.
///
/// `order_id` is the operation's primary id. `related_id` is the
/// cancel/replace target, or the passive counterparty on an Exec.
/// For Exec, `qty` is the last fill and `remaining` the aggressor's
/// quantity left after it.
#[derive(Clone, Copy, Debug, Default)]
pub struct Event {
    pub kind: EventKind,
    pub order_id: u64,
    pub related_id: u64,
    pub symbol_id: u32,
    pub side: Side,
    pub price_cents: i64,
    pub qty: u32,
    pub remaining: u32,
    pub liquidity: Liquidity,
}

impl Event {
    #[inline]
    pub(crate) fn ack(kind: EventKind, order_id: u64, related_id: u64, symbol_id: u32, side: Side) -> Self {
        Self {
            kind,
            order_id,
            related_id,
            symbol_id,
            side,
            ..Self::default()
        }
    }

    #[inline]
    pub(crate) fn reject(order_id: u64, symbol_id: u32, side: Side, price_cents: i64, qty: u32) -> Self {
        Self {
            kind: EventKind::Reject,
            order_id,
            symbol_id,
            side,
            price_cents,
            qty,
            ..Self::default()
        }
    }

    #[inline]
    pub(crate) fn exec(
        order_id: u64,
        passive_id: u64,
        symbol_id: u32,
        side: Side,
        price_cents: i64,
        fill_qty: u32,
        remaining: u32,
        liquidity: Liquidity,
    ) -> Self {
        Self {
            kind: EventKind::Exec,
            order_id,
            related_id: passive_id,
            symbol_id,
            side,
            price_cents,
            qty: fill_qty,
            remaining,
            liquidity,
        }
    }
}
