//! Shard-local order dispatch and matching.
//!
//! One [`Matcher`] lives inside each shard worker thread and owns the
//! books for every symbol routed to that shard. Matching follows
//! price-time priority: cross against the opposite side best-first,
//! FIFO within a level, then rest any Day residual. Trades always
//! print at the resting order's price.
//!
//! Outputs go to the trade and event rings with non-blocking
//! try-enqueue; a full output ring costs a counted drop, never a
//! stall of the matching loop. Nothing here returns errors: semantic
//! violations become `Reject` events and the books stay untouched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::events::{Event, EventKind, Liquidity, Trade};
use crate::order::{Op, Order, OrderType, Side, Tif};
use crate::order_book::OrderBook;
use crate::ring::RingWriter;

/// Per-symbol trading session state. Anything other than `Open`
/// admits cancels only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TradingStatus {
    #[default]
    Open = 0,
    Halted = 1,
    Closed = 2,
}

/// Sweep bounds for market orders.
#[derive(Clone, Copy, Debug)]
pub struct MarketCaps {
    /// Distinct price levels a single market order may sweep
    pub max_levels: usize,
    /// Per-order quantity ceiling
    pub max_qty: u32,
    /// Cumulative `fill_qty * fill_price` ceiling
    pub max_notional: i64,
}

impl Default for MarketCaps {
    fn default() -> Self {
        Self {
            max_levels: 128,
            max_qty: u32::MAX,
            max_notional: i64::MAX,
        }
    }
}

/// Relaxed monotonic counters shared between a shard worker and its
/// observers. Read for liveness, never for coordination.
#[derive(Debug, Default)]
pub struct ShardCounters {
    /// Orders dequeued and dispatched
    pub processed: AtomicU64,
    /// Trades generated by matching
    pub trades: AtomicU64,
    /// Trades lost to a full trade ring
    pub trades_dropped: AtomicU64,
    /// Events lost to a full event ring
    pub events_dropped: AtomicU64,
}

impl ShardCounters {
    pub fn reset(&self) {
        self.processed.store(0, Ordering::Relaxed);
        self.trades.store(0, Ordering::Relaxed);
        self.trades_dropped.store(0, Ordering::Relaxed);
        self.events_dropped.store(0, Ordering::Relaxed);
    }
}

/// The matching core for one shard: books, session status, trade
/// sequencing and output emission. Single-threaded by construction -
/// the owning worker is the only thread that ever touches it.
pub struct Matcher {
    books: FxHashMap<u32, OrderBook>,
    statuses: FxHashMap<u32, TradingStatus>,
    caps: MarketCaps,
    /// Resting-order capacity handed to each lazily created book
    book_capacity: u32,
    trades_out: RingWriter<Trade>,
    events_out: RingWriter<Event>,
    next_trade_id: u64,
    counters: Arc<ShardCounters>,
}

impl Matcher {
    pub fn new(
        book_capacity: u32,
        caps: MarketCaps,
        trades_out: RingWriter<Trade>,
        events_out: RingWriter<Event>,
        counters: Arc<ShardCounters>,
    ) -> Self {
        Self {
            books: FxHashMap::default(),
            statuses: FxHashMap::default(),
            caps,
            book_capacity,
            trades_out,
            events_out,
            next_trade_id: 0,
            counters,
        }
    }

    /// Dispatch one dequeued order.
    pub fn handle(&mut self, order: &Order) {
        // Books are born lazily on the first reference to a symbol
        let book_capacity = self.book_capacity;
        self.books
            .entry(order.symbol_id)
            .or_insert_with(|| OrderBook::new(book_capacity));

        let status = self
            .statuses
            .get(&order.symbol_id)
            .copied()
            .unwrap_or_default();

        if status != TradingStatus::Open && order.op != Op::Cancel {
            emit_event(
                &mut self.events_out,
                &self.counters,
                Event::reject(order.id, order.symbol_id, order.side, order.price_cents, order.qty),
            );
        } else {
            match order.op {
                Op::New => match order.order_type {
                    OrderType::Limit => self.handle_new_limit(order),
                    OrderType::Market => self.handle_new_market(order),
                },
                Op::Cancel => self.handle_cancel(order),
                Op::Replace => self.handle_replace(order),
                Op::Reduce => self.handle_reduce(order),
            }
        }

        self.counters.processed.fetch_add(1, Ordering::Relaxed);
    }

    fn handle_new_limit(&mut self, order: &Order) {
        let Self {
            books,
            caps: _,
            book_capacity,
            trades_out,
            events_out,
            next_trade_id,
            counters,
            ..
        } = self;
        let book = books
            .entry(order.symbol_id)
            .or_insert_with(|| OrderBook::new(*book_capacity));

        if order.qty == 0 || book.contains(order.id) {
            emit_event(
                events_out,
                counters,
                Event::reject(order.id, order.symbol_id, order.side, order.price_cents, order.qty),
            );
            return;
        }

        // FOK: all-or-nothing, decided before touching the book
        if order.tif == Tif::Fok {
            let available = match order.side {
                Side::Buy => book.available_ask_up_to(order.price_cents),
                Side::Sell => book.available_bid_down_to(order.price_cents),
            };
            if available < u64::from(order.qty) {
                emit_event(
                    events_out,
                    counters,
                    Event::reject(order.id, order.symbol_id, order.side, order.price_cents, order.qty),
                );
                return;
            }
        }

        // Post-only: must not take liquidity
        if order.post_only {
            let would_cross = match order.side {
                Side::Buy => book.best_ask().is_some_and(|ask| ask <= order.price_cents),
                Side::Sell => book.best_bid().is_some_and(|bid| bid >= order.price_cents),
            };
            if would_cross {
                emit_event(
                    events_out,
                    counters,
                    Event::reject(order.id, order.symbol_id, order.side, order.price_cents, order.qty),
                );
                return;
            }
        }

        let mut remaining = order.qty;
        while remaining > 0 {
            let Some(top) = (match order.side {
                Side::Buy => book.peek_best_ask(),
                Side::Sell => book.peek_best_bid(),
            }) else {
                break;
            };
            let crosses = match order.side {
                Side::Buy => top.price_cents <= order.price_cents,
                Side::Sell => top.price_cents >= order.price_cents,
            };
            if !crosses {
                break;
            }

            let fill = remaining.min(top.qty);
            remaining -= fill;
            *next_trade_id += 1;
            print_fill(
                trades_out,
                events_out,
                counters,
                *next_trade_id,
                order,
                top.order_id,
                top.price_cents,
                fill,
                remaining,
            );
            match order.side {
                Side::Buy => book.consume_best_ask(fill),
                Side::Sell => book.consume_best_bid(fill),
            }
        }

        // Day residuals rest; IOC residuals are discarded. FOK cannot
        // reach here with a residual because of the pre-check.
        if remaining > 0 && order.tif == Tif::Day {
            let rested = match order.side {
                Side::Buy => book.add_bid(order.id, order.price_cents, remaining),
                Side::Sell => book.add_ask(order.id, order.price_cents, remaining),
            };
            if rested {
                let mut ack = Event::ack(EventKind::AckNew, order.id, 0, order.symbol_id, order.side);
                ack.price_cents = order.price_cents;
                ack.qty = remaining;
                emit_event(events_out, counters, ack);
            } else {
                // Book storage exhausted
                emit_event(
                    events_out,
                    counters,
                    Event::reject(order.id, order.symbol_id, order.side, order.price_cents, remaining),
                );
            }
        }
    }

    fn handle_new_market(&mut self, order: &Order) {
        let Self {
            books,
            caps,
            book_capacity,
            trades_out,
            events_out,
            next_trade_id,
            counters,
            ..
        } = self;
        let book = books
            .entry(order.symbol_id)
            .or_insert_with(|| OrderBook::new(*book_capacity));

        if order.qty == 0 {
            emit_event(
                events_out,
                counters,
                Event::reject(order.id, order.symbol_id, order.side, 0, order.qty),
            );
            return;
        }

        // Market FOK: availability with no price bound
        if order.tif == Tif::Fok {
            let available = match order.side {
                Side::Buy => book.available_ask_up_to(i64::MAX),
                Side::Sell => book.available_bid_down_to(i64::MIN),
            };
            if available < u64::from(order.qty) {
                emit_event(
                    events_out,
                    counters,
                    Event::reject(order.id, order.symbol_id, order.side, 0, order.qty),
                );
                return;
            }
        }

        let mut remaining = order.qty.min(caps.max_qty);
        let mut levels_swept = 0usize;
        let mut level_price: Option<i64> = None;
        let mut notional = 0i64;

        while remaining > 0 {
            let Some(top) = (match order.side {
                Side::Buy => book.peek_best_ask(),
                Side::Sell => book.peek_best_bid(),
            }) else {
                break;
            };

            if level_price != Some(top.price_cents) {
                if levels_swept == caps.max_levels {
                    break;
                }
                levels_swept += 1;
                level_price = Some(top.price_cents);
            }

            let fill = remaining.min(top.qty);
            let fill_notional = i64::from(fill).saturating_mul(top.price_cents);
            match notional.checked_add(fill_notional) {
                Some(total) if total <= caps.max_notional => notional = total,
                _ => break,
            }

            remaining -= fill;
            *next_trade_id += 1;
            print_fill(
                trades_out,
                events_out,
                counters,
                *next_trade_id,
                order,
                top.order_id,
                top.price_cents,
                fill,
                remaining,
            );
            match order.side {
                Side::Buy => book.consume_best_ask(fill),
                Side::Sell => book.consume_best_bid(fill),
            }
        }
        // Market residuals never rest
    }

    fn handle_cancel(&mut self, order: &Order) {
        let Self {
            books,
            book_capacity,
            events_out,
            counters,
            ..
        } = self;
        let book = books
            .entry(order.symbol_id)
            .or_insert_with(|| OrderBook::new(*book_capacity));

        match book.cancel_by_id(order.target_id) {
            Some(removed) => {
                let mut ack = Event::ack(
                    EventKind::AckCancel,
                    order.id,
                    order.target_id,
                    order.symbol_id,
                    removed.side,
                );
                ack.price_cents = removed.price_cents;
                ack.qty = removed.qty;
                emit_event(events_out, counters, ack);
            }
            None => emit_event(
                events_out,
                counters,
                Event::reject(order.id, order.symbol_id, order.side, 0, 0),
            ),
        }
    }

    fn handle_replace(&mut self, order: &Order) {
        let Self {
            books,
            book_capacity,
            events_out,
            counters,
            ..
        } = self;
        let book = books
            .entry(order.symbol_id)
            .or_insert_with(|| OrderBook::new(*book_capacity));

        let Some(old) = book.resting(order.target_id) else {
            emit_event(
                events_out,
                counters,
                Event::reject(order.id, order.symbol_id, order.side, order.new_price_cents, order.new_qty),
            );
            return;
        };

        // Zero fields inherit from the resting order
        let new_qty = if order.new_qty > 0 { order.new_qty } else { old.qty };
        let new_price = if order.new_price_cents != 0 {
            order.new_price_cents
        } else {
            old.price_cents
        };

        if book.replace_by_id(order.target_id, old.side, new_price, new_qty) {
            let mut ack = Event::ack(
                EventKind::AckReplace,
                order.id,
                order.target_id,
                order.symbol_id,
                old.side,
            );
            ack.price_cents = new_price;
            ack.qty = new_qty;
            emit_event(events_out, counters, ack);
        } else {
            emit_event(
                events_out,
                counters,
                Event::reject(order.id, order.symbol_id, old.side, new_price, new_qty),
            );
        }
    }

    /// Historical-execution replay: shrink a resting order without a
    /// trade print (the print already happened on the source market).
    fn handle_reduce(&mut self, order: &Order) {
        let Self {
            books,
            book_capacity,
            events_out,
            counters,
            ..
        } = self;
        let book = books
            .entry(order.symbol_id)
            .or_insert_with(|| OrderBook::new(*book_capacity));

        let Some(resting) = book.resting(order.target_id) else {
            emit_event(
                events_out,
                counters,
                Event::reject(order.id, order.symbol_id, order.side, 0, order.qty),
            );
            return;
        };

        let fill = order.qty.min(resting.qty);
        book.reduce_by_id(order.target_id, fill);
        emit_event(
            events_out,
            counters,
            Event::exec(
                order.target_id,
                0,
                order.symbol_id,
                resting.side,
                resting.price_cents,
                fill,
                resting.qty - fill,
                Liquidity::Maker,
            ),
        );
    }

    // ------------------------------------------------------------------
    // Observers (tests, shard introspection)
    // ------------------------------------------------------------------

    /// Book for a symbol, if one was ever created on this shard.
    pub fn book(&self, symbol_id: u32) -> Option<&OrderBook> {
        self.books.get(&symbol_id)
    }

    pub fn set_status(&mut self, symbol_id: u32, status: TradingStatus) {
        self.statuses.insert(symbol_id, status);
    }

    pub fn status(&self, symbol_id: u32) -> TradingStatus {
        self.statuses.get(&symbol_id).copied().unwrap_or_default()
    }

    pub fn counters(&self) -> &Arc<ShardCounters> {
        &self.counters
    }

    /// Pre-fault the arena pages of every existing book.
    pub fn warm_up(&mut self) {
        for book in self.books.values_mut() {
            book.warm_up();
        }
    }

    /// Hash of the observable book state, for determinism checks.
    pub fn state_hash(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        let mut symbols: Vec<u32> = self.books.keys().copied().collect();
        symbols.sort_unstable();
        for symbol_id in symbols {
            let book = &self.books[&symbol_id];
            symbol_id.hash(&mut hasher);
            book.best_bid().hash(&mut hasher);
            book.best_ask().hash(&mut hasher);
            book.order_count().hash(&mut hasher);
        }
        self.next_trade_id.hash(&mut hasher);
        hasher.finish()
    }
}

/// One fill: a trade print on the trade ring plus a Taker exec event
/// for the aggressor. The trade price is the resting order's.
#[allow(clippy::too_many_arguments)]
fn print_fill(
    trades_out: &mut RingWriter<Trade>,
    events_out: &mut RingWriter<Event>,
    counters: &ShardCounters,
    trade_id: u64,
    aggressor: &Order,
    passive_id: u64,
    price_cents: i64,
    fill: u32,
    remaining: u32,
) {
    let (buy_order_id, sell_order_id) = match aggressor.side {
        Side::Buy => (aggressor.id, passive_id),
        Side::Sell => (passive_id, aggressor.id),
    };
    counters.trades.fetch_add(1, Ordering::Relaxed);
    if trades_out
        .try_enqueue(Trade {
            trade_id,
            symbol_id: aggressor.symbol_id,
            price_cents,
            qty: fill,
            buy_order_id,
            sell_order_id,
        })
        .is_err()
    {
        counters.trades_dropped.fetch_add(1, Ordering::Relaxed);
    }

    emit_event(
        events_out,
        counters,
        Event::exec(
            aggressor.id,
            passive_id,
            aggressor.symbol_id,
            aggressor.side,
            price_cents,
            fill,
            remaining,
            Liquidity::Taker,
        ),
    );
}

fn emit_event(events_out: &mut RingWriter<Event>, counters: &ShardCounters, event: Event) {
    if events_out.try_enqueue(event).is_err() {
        counters.events_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::{RingBuffer, RingReader};

    struct Harness {
        matcher: Matcher,
        trades: RingReader<Trade>,
        events: RingReader<Event>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_caps(MarketCaps::default())
        }

        fn with_caps(caps: MarketCaps) -> Self {
            let (tw, tr) = RingBuffer::split(1 << 12).unwrap();
            let (ew, er) = RingBuffer::split(1 << 12).unwrap();
            Self {
                matcher: Matcher::new(1 << 14, caps, tw, ew, Arc::new(ShardCounters::default())),
                trades: tr,
                events: er,
            }
        }

        fn run(&mut self, order: Order) -> (Vec<Trade>, Vec<Event>) {
            self.matcher.handle(&order);
            let mut trades = Vec::new();
            while let Some(t) = self.trades.try_dequeue() {
                trades.push(t);
            }
            let mut events = Vec::new();
            while let Some(e) = self.events.try_dequeue() {
                events.push(e);
            }
            (trades, events)
        }
    }

    #[test]
    fn test_limit_rests_with_ack() {
        let mut h = Harness::new();
        let (trades, events) = h.run(Order::limit(1, 0, Side::Buy, 10_000, 100));
        assert!(trades.is_empty());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::AckNew);
        assert_eq!(h.matcher.book(0).unwrap().best_bid(), Some(10_000));
    }

    #[test]
    fn test_cross_prints_at_resting_price() {
        let mut h = Harness::new();
        h.run(Order::limit(1, 0, Side::Sell, 10_100, 100));
        // Aggressive buy above the ask still prints at 10_100
        let (trades, events) = h.run(Order::limit(2, 0, Side::Buy, 10_200, 60));

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price_cents, 10_100);
        assert_eq!(trades[0].qty, 60);
        assert_eq!(trades[0].buy_order_id, 2);
        assert_eq!(trades[0].sell_order_id, 1);

        let exec = events.iter().find(|e| e.kind == EventKind::Exec).unwrap();
        assert_eq!(exec.liquidity, Liquidity::Taker);
        assert_eq!(exec.related_id, 1);
        assert_eq!(exec.remaining, 0);
    }

    #[test]
    fn test_partial_fill_rests_residual() {
        let mut h = Harness::new();
        h.run(Order::limit(1, 0, Side::Sell, 10_000, 40));
        let (trades, events) = h.run(Order::limit(2, 0, Side::Buy, 10_000, 100));

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].qty, 40);
        let ack = events.iter().find(|e| e.kind == EventKind::AckNew).unwrap();
        assert_eq!(ack.qty, 60);
        assert_eq!(h.matcher.book(0).unwrap().best_bid(), Some(10_000));
    }

    #[test]
    fn test_zero_qty_rejected() {
        let mut h = Harness::new();
        let (trades, events) = h.run(Order::limit(1, 0, Side::Buy, 10_000, 0));
        assert!(trades.is_empty());
        assert_eq!(events[0].kind, EventKind::Reject);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut h = Harness::new();
        h.run(Order::limit(1, 0, Side::Buy, 10_000, 10));
        let (_, events) = h.run(Order::limit(1, 0, Side::Buy, 9_000, 10));
        assert_eq!(events[0].kind, EventKind::Reject);
        assert_eq!(h.matcher.book(0).unwrap().order_count(), 1);
    }

    #[test]
    fn test_ioc_discards_residual() {
        let mut h = Harness::new();
        h.run(Order::limit(1, 0, Side::Sell, 10_100, 40));
        let (trades, events) =
            h.run(Order::limit_tif(2, 0, Side::Buy, 10_200, 100, Tif::Ioc));

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].qty, 40);
        assert!(events.iter().all(|e| e.kind != EventKind::AckNew));
        let book = h.matcher.book(0).unwrap();
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn test_fok_insufficient_rejects_without_touching_book() {
        let mut h = Harness::new();
        h.run(Order::limit(1, 0, Side::Sell, 10_100, 40));
        let (trades, events) =
            h.run(Order::limit_tif(2, 0, Side::Buy, 10_200, 100, Tif::Fok));

        assert!(trades.is_empty());
        assert_eq!(events[0].kind, EventKind::Reject);
        assert_eq!(h.matcher.book(0).unwrap().depth_at(Side::Sell, 10_100), (40, 1));
    }

    #[test]
    fn test_fok_sufficient_fills_fully() {
        let mut h = Harness::new();
        h.run(Order::limit(1, 0, Side::Sell, 10_000, 60));
        h.run(Order::limit(2, 0, Side::Sell, 10_100, 60));
        let (trades, _) = h.run(Order::limit_tif(3, 0, Side::Buy, 10_100, 100, Tif::Fok));

        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].qty + trades[1].qty, 100);
        assert_eq!(h.matcher.book(0).unwrap().depth_at(Side::Sell, 10_100), (20, 1));
    }

    #[test]
    fn test_post_only_rejected_when_crossing() {
        let mut h = Harness::new();
        h.run(Order::limit(1, 0, Side::Sell, 10_000, 10));
        let (trades, events) = h.run(Order::post_only(2, 0, Side::Buy, 10_000, 10));

        assert!(trades.is_empty());
        assert_eq!(events[0].kind, EventKind::Reject);
        assert_eq!(h.matcher.book(0).unwrap().depth_at(Side::Sell, 10_000), (10, 1));
    }

    #[test]
    fn test_post_only_rests_when_passive() {
        let mut h = Harness::new();
        h.run(Order::limit(1, 0, Side::Sell, 10_010, 10));
        let (_, events) = h.run(Order::post_only(2, 0, Side::Buy, 10_000, 10));
        assert_eq!(events[0].kind, EventKind::AckNew);
    }

    #[test]
    fn test_market_sweeps_level_cap() {
        let caps = MarketCaps {
            max_levels: 128,
            ..MarketCaps::default()
        };
        let mut h = Harness::with_caps(caps);
        // 200 ask levels of 100 each
        for i in 0..200 {
            h.run(Order::limit(i + 1, 0, Side::Sell, 10_000 + (i as i64) * 10, 100));
        }
        let (trades, _) = h.run(Order::market(999, 0, Side::Buy, 100_000));

        assert_eq!(trades.len(), 128);
        let distinct: std::collections::BTreeSet<i64> =
            trades.iter().map(|t| t.price_cents).collect();
        assert_eq!(distinct.len(), 128);
        let filled: u64 = trades.iter().map(|t| u64::from(t.qty)).sum();
        assert!(filled <= 12_800);
        // Residual discarded: nothing rests on the bid side
        assert_eq!(h.matcher.book(0).unwrap().best_bid(), None);
    }

    #[test]
    fn test_market_qty_cap_clamps() {
        let caps = MarketCaps {
            max_qty: 50,
            ..MarketCaps::default()
        };
        let mut h = Harness::with_caps(caps);
        h.run(Order::limit(1, 0, Side::Sell, 10_000, 200));
        let (trades, _) = h.run(Order::market(2, 0, Side::Buy, 150));

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].qty, 50);
    }

    #[test]
    fn test_market_notional_cap_stops_sweep() {
        let caps = MarketCaps {
            max_notional: 10_000 * 100 + 10_010 * 50,
            ..MarketCaps::default()
        };
        let mut h = Harness::with_caps(caps);
        h.run(Order::limit(1, 0, Side::Sell, 10_000, 100));
        h.run(Order::limit(2, 0, Side::Sell, 10_010, 100));
        let (trades, _) = h.run(Order::market(3, 0, Side::Buy, 300));

        // Second level would push notional past the cap mid-order
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price_cents, 10_000);
        assert_eq!(trades[0].qty, 100);
    }

    #[test]
    fn test_market_fok_checks_whole_side() {
        let mut h = Harness::new();
        h.run(Order::limit(1, 0, Side::Sell, 10_000, 40));
        let mut fok = Order::market(2, 0, Side::Buy, 100);
        fok.tif = Tif::Fok;
        let (trades, events) = h.run(fok);

        assert!(trades.is_empty());
        assert_eq!(events[0].kind, EventKind::Reject);
    }

    #[test]
    fn test_cancel_ack_and_reject() {
        let mut h = Harness::new();
        h.run(Order::limit(1, 0, Side::Buy, 10_000, 25));

        let (_, events) = h.run(Order::cancel(2, 0, 1));
        assert_eq!(events[0].kind, EventKind::AckCancel);
        assert_eq!(events[0].related_id, 1);
        assert_eq!(events[0].qty, 25);

        let (_, events) = h.run(Order::cancel(3, 0, 1));
        assert_eq!(events[0].kind, EventKind::Reject);
    }

    #[test]
    fn test_replace_defaults_from_resting() {
        let mut h = Harness::new();
        h.run(Order::limit(1, 0, Side::Sell, 10_000, 50));

        // Only the quantity changes; price inherited
        let (_, events) = h.run(Order::replace(2, 0, 1, 0, 80));
        assert_eq!(events[0].kind, EventKind::AckReplace);
        assert_eq!(events[0].price_cents, 10_000);
        assert_eq!(events[0].qty, 80);

        let book = h.matcher.book(0).unwrap();
        assert_eq!(book.resting(1).unwrap().qty, 80);

        // Only the price changes; quantity inherited
        let (_, events) = h.run(Order::replace(3, 0, 1, 10_020, 0));
        assert_eq!(events[0].kind, EventKind::AckReplace);
        let book = h.matcher.book(0).unwrap();
        assert_eq!(book.resting(1).unwrap().price_cents, 10_020);
        assert_eq!(book.resting(1).unwrap().qty, 80);
    }

    #[test]
    fn test_replace_unknown_rejected() {
        let mut h = Harness::new();
        let (_, events) = h.run(Order::replace(1, 0, 77, 10_000, 10));
        assert_eq!(events[0].kind, EventKind::Reject);
    }

    #[test]
    fn test_reduce_decrements_without_trade_print() {
        let mut h = Harness::new();
        h.run(Order::limit(1, 0, Side::Sell, 10_000, 100));

        let (trades, events) = h.run(Order::reduce(2, 0, 1, 30));
        assert!(trades.is_empty());
        assert_eq!(events[0].kind, EventKind::Exec);
        assert_eq!(events[0].order_id, 1);
        assert_eq!(events[0].liquidity, Liquidity::Maker);
        assert_eq!(events[0].qty, 30);
        assert_eq!(events[0].remaining, 70);
        assert_eq!(h.matcher.book(0).unwrap().resting(1).unwrap().qty, 70);

        // Over-reduce removes the order entirely
        let (trades, events) = h.run(Order::reduce(3, 0, 1, 500));
        assert!(trades.is_empty());
        assert_eq!(events[0].remaining, 0);
        assert!(!h.matcher.book(0).unwrap().contains(1));
    }

    #[test]
    fn test_halted_symbol_allows_cancel_only() {
        let mut h = Harness::new();
        h.run(Order::limit(1, 0, Side::Buy, 10_000, 10));
        h.matcher.set_status(0, TradingStatus::Halted);

        let (_, events) = h.run(Order::limit(2, 0, Side::Buy, 10_000, 10));
        assert_eq!(events[0].kind, EventKind::Reject);

        let (_, events) = h.run(Order::cancel(3, 0, 1));
        assert_eq!(events[0].kind, EventKind::AckCancel);
        assert!(h.matcher.book(0).unwrap().is_empty());
    }

    #[test]
    fn test_trade_ids_strictly_increase() {
        let mut h = Harness::new();
        let mut last = 0u64;
        for i in 0..20u64 {
            h.run(Order::limit(i * 2 + 1, 0, Side::Sell, 10_000, 10));
            let (trades, _) = h.run(Order::limit(i * 2 + 2, 0, Side::Buy, 10_000, 10));
            assert_eq!(trades.len(), 1);
            assert!(trades[0].trade_id > last);
            last = trades[0].trade_id;
        }
    }

    #[test]
    fn test_books_are_per_symbol() {
        let mut h = Harness::new();
        h.run(Order::limit(1, 7, Side::Buy, 10_000, 10));
        h.run(Order::limit(2, 9, Side::Sell, 10_000, 10));

        // Different symbols never cross
        assert_eq!(h.matcher.book(7).unwrap().best_bid(), Some(10_000));
        assert_eq!(h.matcher.book(9).unwrap().best_ask(), Some(10_000));
        assert_eq!(h.matcher.book(7).unwrap().best_ask(), None);
    }

    #[test]
    fn test_full_trade_ring_counts_drop_and_continues() {
        let (tw, _tr) = RingBuffer::split(2).unwrap();
        let (ew, mut er) = RingBuffer::split(1 << 8).unwrap();
        let counters = Arc::new(ShardCounters::default());
        let mut matcher = Matcher::new(1 << 10, MarketCaps::default(), tw, ew, counters.clone());

        for i in 0..4u64 {
            matcher.handle(&Order::limit(i * 2 + 1, 0, Side::Sell, 10_000, 10));
            matcher.handle(&Order::limit(i * 2 + 2, 0, Side::Buy, 10_000, 10));
        }

        // 4 trades generated, ring held 2 (consumer kept but not drained)
        assert_eq!(counters.trades.load(Ordering::Relaxed), 4);
        assert_eq!(counters.trades_dropped.load(Ordering::Relaxed), 2);
        // Matching state is unaffected by the loss
        assert!(matcher.book(0).unwrap().is_empty());
        assert!(er.try_dequeue().is_some());
    }
}
