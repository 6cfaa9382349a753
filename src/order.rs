//! Order submission records.
//!
//! An [`Order`] is the single unit that travels through every ring:
//! an operation tag plus its payload. Resting state inside a book is
//! kept separately (see `order_book`); ring slots are independent
//! owned copies.

/// Order side (buy = bid, sell = ask)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Side {
    #[default]
    Buy = 0,
    Sell = 1,
}

impl Side {
    /// Returns the opposite side
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order type determines whether the price bounds the match
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum OrderType {
    /// Limit order - rests in the book if not fully matched (default)
    #[default]
    Limit = 0,
    /// Market order - sweeps the opposite side, never rests
    Market = 1,
}

/// Time-in-force
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Tif {
    /// Rest any residual until cancelled (default)
    #[default]
    Day = 0,
    /// Immediate-or-cancel: match what crosses now, discard the rest
    Ioc = 1,
    /// Fill-or-kill: all-or-nothing, rejected if not fully fillable
    Fok = 2,
}

/// Operation tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Op {
    /// Place a new order
    #[default]
    New = 0,
    /// Cancel the resting order `target_id`
    Cancel = 1,
    /// Cancel `target_id` and re-add it with new price/qty
    Replace = 2,
    /// Decrement the resting order `target_id` by `qty` without a
    /// trade print (historical-execution replay)
    Reduce = 3,
}

/// A submission from outside the engine.
///
/// `target_id`, `new_price_cents` and `new_qty` are only meaningful
/// for Cancel/Replace/Reduce; zero means "not set" for the replace
/// fields. Prices are signed integer cents; quantities are positive
/// for live operations (a zero-qty New is rejected at shard time).
#[derive(Clone, Copy, Debug, Default)]
pub struct Order {
    /// Caller-assigned id, unique across a run
    pub id: u64,
    /// Pre-resolved numeric symbol
    pub symbol_id: u32,
    pub op: Op,
    pub side: Side,
    pub order_type: OrderType,
    pub tif: Tif,
    pub post_only: bool,
    pub price_cents: i64,
    pub qty: u32,
    /// Resting order targeted by Cancel/Replace/Reduce
    pub target_id: u64,
    /// Replace: new price (0 = keep old)
    pub new_price_cents: i64,
    /// Replace: new quantity (0 = keep old)
    pub new_qty: u32,
}

impl Order {
    /// New resting-eligible limit order (most common case)
    #[inline]
    pub fn limit(id: u64, symbol_id: u32, side: Side, price_cents: i64, qty: u32) -> Self {
        Self {
            id,
            symbol_id,
            op: Op::New,
            side,
            order_type: OrderType::Limit,
            tif: Tif::Day,
            price_cents,
            qty,
            ..Self::default()
        }
    }

    /// Limit order with an explicit time-in-force
    #[inline]
    pub fn limit_tif(id: u64, symbol_id: u32, side: Side, price_cents: i64, qty: u32, tif: Tif) -> Self {
        Self {
            tif,
            ..Self::limit(id, symbol_id, side, price_cents, qty)
        }
    }

    /// Post-only limit order: rejected instead of taking liquidity
    #[inline]
    pub fn post_only(id: u64, symbol_id: u32, side: Side, price_cents: i64, qty: u32) -> Self {
        Self {
            post_only: true,
            ..Self::limit(id, symbol_id, side, price_cents, qty)
        }
    }

    /// Market order; the price field is ignored by matching
    #[inline]
    pub fn market(id: u64, symbol_id: u32, side: Side, qty: u32) -> Self {
        Self {
            id,
            symbol_id,
            op: Op::New,
            side,
            order_type: OrderType::Market,
            tif: Tif::Ioc,
            qty,
            ..Self::default()
        }
    }

    /// Cancel of a resting order
    #[inline]
    pub fn cancel(id: u64, symbol_id: u32, target_id: u64) -> Self {
        Self {
            id,
            symbol_id,
            op: Op::Cancel,
            target_id,
            ..Self::default()
        }
    }

    /// Replace of a resting order; zero `new_price_cents`/`new_qty`
    /// keep the old value
    #[inline]
    pub fn replace(id: u64, symbol_id: u32, target_id: u64, new_price_cents: i64, new_qty: u32) -> Self {
        Self {
            id,
            symbol_id,
            op: Op::Replace,
            target_id,
            new_price_cents,
            new_qty,
            ..Self::default()
        }
    }

    /// Quantity decrement of a resting order (execution replay)
    #[inline]
    pub fn reduce(id: u64, symbol_id: u32, target_id: u64, qty: u32) -> Self {
        Self {
            id,
            symbol_id,
            op: Op::Reduce,
            target_id,
            qty,
            ..Self::default()
        }
    }
}
