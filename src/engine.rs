//! Engine: the array of shards and everything that crosses them.
//!
//! Routing is the pure function `symbol_id % num_shards`, so an
//! order's shard is stable for a whole run and the single-producer
//! invariant on each shard ring survives any fan-out that respects
//! it. Engine counters are relaxed atomics observed for liveness.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::error::EngineError;
use crate::events::{Event, Trade};
use crate::matching::{MarketCaps, TradingStatus};
use crate::order::Order;
use crate::ring::{RingReader, RingWriter};
use crate::shard::Shard;

/// Engine construction parameters. `validate` enforces what the
/// constructors reject.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    pub num_shards: usize,
    /// Capacity of the order, trade and event ring of every shard
    pub ring_capacity: usize,
    /// Resting orders per symbol book
    pub book_capacity: u32,
    pub caps: MarketCaps,
    /// Pin each shard worker to a core
    pub pin_workers: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_shards: 4,
            ring_capacity: 1 << 15,
            book_capacity: 1 << 14,
            caps: MarketCaps::default(),
            pin_workers: false,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.num_shards == 0 {
            return Err(EngineError::ZeroShards);
        }
        if self.ring_capacity == 0 || !self.ring_capacity.is_power_of_two() {
            return Err(EngineError::RingCapacity(self.ring_capacity));
        }
        Ok(())
    }
}

pub struct MatchingEngine {
    shards: Vec<Shard>,
    running: AtomicBool,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

impl MatchingEngine {
    /// Engine with `num_shards` shards and the given ring capacity;
    /// everything else defaulted.
    pub fn new(num_shards: usize, ring_capacity: usize) -> Result<Self, EngineError> {
        Self::with_config(EngineConfig {
            num_shards,
            ring_capacity,
            ..EngineConfig::default()
        })
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let shards = (0..config.num_shards)
            .map(|i| {
                Shard::new(
                    i,
                    config.ring_capacity,
                    config.book_capacity,
                    config.caps,
                    config.pin_workers.then_some(i),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            shards,
            running: AtomicBool::new(false),
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Canonical shard of an order: `symbol_id % num_shards`.
    #[inline]
    pub fn shard_of(&self, symbol_id: u32) -> usize {
        (symbol_id as usize) % self.shards.len()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Launch all shard workers and reset counters. Idempotent.
    pub fn start(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.enqueued.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        for shard in &self.shards {
            shard.counters().reset();
            shard.start();
        }
        info!(shards = self.shards.len(), "matching engine started");
    }

    /// Stop accepting submissions, then join every worker; each drains
    /// its order ring first, so books end consistent. Idempotent.
    pub fn shutdown(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        for shard in &self.shards {
            shard.stop();
        }
        info!(
            processed = self.processed_count(),
            trades = self.trades_count(),
            dropped = self.dropped_count(),
            "matching engine stopped"
        );
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Enqueue into one shard's order ring.
    ///
    /// Atomic in effect: on success the order is in the ring and the
    /// enqueued counter moved; on failure (stopped engine, full ring,
    /// claimed writer) only the dropped counter moves. The caller must
    /// be the sole producer for the shard.
    pub fn enqueue_to_shard(&self, shard_idx: usize, order: Order) -> bool {
        if !self.running.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if self.shards[shard_idx].try_enqueue(order) {
            self.enqueued.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Thin routing fallback for tests and scaffolding: canonical
    /// shard, same contract as `enqueue_to_shard`.
    pub fn submit(&self, order: Order) -> bool {
        self.enqueue_to_shard(self.shard_of(order.symbol_id), order)
    }

    /// Claim the raw SPSC writer of a shard (once). Bypasses the
    /// engine counters; the engine-side enqueue path for that shard is
    /// disabled from then on.
    pub fn writer_for_shard(&self, shard_idx: usize) -> Option<RingWriter<Order>> {
        self.shards[shard_idx].take_order_writer()
    }

    // ------------------------------------------------------------------
    // Consumption
    // ------------------------------------------------------------------

    /// Claim the trade consumer of a shard (once).
    pub fn trade_reader_for_shard(&self, shard_idx: usize) -> Option<RingReader<Trade>> {
        self.shards[shard_idx].take_trade_reader()
    }

    /// Claim the event consumer of a shard (once).
    pub fn event_reader_for_shard(&self, shard_idx: usize) -> Option<RingReader<Event>> {
        self.shards[shard_idx].take_event_reader()
    }

    // ------------------------------------------------------------------
    // Session configuration
    // ------------------------------------------------------------------

    /// Set a symbol's trading status on its owning shard. Only
    /// effective while that shard's worker is parked (before `start`
    /// or after `shutdown`).
    pub fn set_trading_status(&self, symbol_id: u32, status: TradingStatus) -> bool {
        self.shards[self.shard_of(symbol_id)].set_trading_status(symbol_id, status)
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard handle, mainly for post-run inspection in tests.
    pub fn shard(&self, shard_idx: usize) -> &Shard {
        &self.shards[shard_idx]
    }

    pub fn enqueued_count(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn processed_count(&self) -> u64 {
        self.shards
            .iter()
            .map(|s| s.counters().processed.load(Ordering::Relaxed))
            .sum()
    }

    pub fn trades_count(&self) -> u64 {
        self.shards
            .iter()
            .map(|s| s.counters().trades.load(Ordering::Relaxed))
            .sum()
    }
}

impl Drop for MatchingEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::Side;

    fn spin_until(deadline_ms: u64, mut cond: impl FnMut() -> bool) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed().as_millis() < u128::from(deadline_ms) {
            if cond() {
                return true;
            }
            std::hint::spin_loop();
        }
        cond()
    }

    #[test]
    fn test_rejects_invalid_construction() {
        assert!(matches!(
            MatchingEngine::new(0, 1024),
            Err(EngineError::ZeroShards)
        ));
        assert!(matches!(
            MatchingEngine::new(4, 1000),
            Err(EngineError::RingCapacity(1000))
        ));
    }

    #[test]
    fn test_routing_is_symbol_mod_shards() {
        let engine = MatchingEngine::new(4, 1024).unwrap();
        assert_eq!(engine.shard_of(0), 0);
        assert_eq!(engine.shard_of(5), 1);
        assert_eq!(engine.shard_of(11), 3);
    }

    #[test]
    fn test_submit_before_start_drops() {
        let engine = MatchingEngine::new(2, 1024).unwrap();
        assert!(!engine.submit(Order::limit(1, 0, Side::Buy, 10_000, 10)));
        assert_eq!(engine.dropped_count(), 1);
        assert_eq!(engine.enqueued_count(), 0);
    }

    #[test]
    fn test_submit_processes_and_counts() {
        let engine = MatchingEngine::new(2, 1024).unwrap();
        engine.start();

        assert!(engine.submit(Order::limit(1, 1, Side::Sell, 10_000, 50)));
        assert!(engine.submit(Order::limit(2, 1, Side::Buy, 10_000, 50)));
        assert!(spin_until(2_000, || engine.processed_count() == 2));

        engine.shutdown();
        assert_eq!(engine.enqueued_count(), 2);
        assert_eq!(engine.dropped_count(), 0);
        assert_eq!(engine.trades_count(), 1);
    }

    #[test]
    fn test_shutdown_idempotent_and_submissions_drop_after() {
        let engine = MatchingEngine::new(2, 1024).unwrap();
        engine.start();
        engine.shutdown();
        engine.shutdown();
        assert!(!engine.is_running());

        assert!(!engine.submit(Order::limit(1, 0, Side::Buy, 10_000, 10)));
        assert_eq!(engine.dropped_count(), 1);
    }

    #[test]
    fn test_counters_reset_on_restart() {
        let engine = MatchingEngine::new(1, 1024).unwrap();
        engine.start();
        engine.submit(Order::limit(1, 0, Side::Buy, 10_000, 10));
        engine.shutdown();
        assert_eq!(engine.enqueued_count(), 1);

        engine.start();
        assert_eq!(engine.enqueued_count(), 0);
        assert_eq!(engine.processed_count(), 0);
        engine.shutdown();
    }

    #[test]
    fn test_trades_flow_to_claimed_reader() {
        let engine = MatchingEngine::new(1, 1024).unwrap();
        let mut trades = engine.trade_reader_for_shard(0).unwrap();
        assert!(engine.trade_reader_for_shard(0).is_none());

        engine.start();
        engine.submit(Order::limit(1, 0, Side::Sell, 10_100, 100));
        engine.submit(Order::limit(2, 0, Side::Buy, 10_100, 60));
        assert!(spin_until(2_000, || engine.processed_count() == 2));
        engine.shutdown();

        let trade = trades.try_dequeue().unwrap();
        assert_eq!(trade.price_cents, 10_100);
        assert_eq!(trade.qty, 60);
        assert_eq!(trade.buy_order_id, 2);
        assert_eq!(trade.sell_order_id, 1);
        assert!(trades.try_dequeue().is_none());
    }

    #[test]
    fn test_halted_status_set_via_engine() {
        let engine = MatchingEngine::new(2, 1024).unwrap();
        assert!(engine.set_trading_status(3, TradingStatus::Halted));
        engine.start();
        engine.submit(Order::limit(1, 3, Side::Buy, 10_000, 10));
        assert!(spin_until(2_000, || engine.processed_count() == 1));
        engine.shutdown();

        let empty = engine
            .shard(engine.shard_of(3))
            .with_matcher(|m| m.book(3).unwrap().is_empty())
            .unwrap();
        assert!(empty);
    }
}
