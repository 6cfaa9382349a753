//! Shard: one worker thread, its rings, and its matching core.
//!
//! A shard owns an inbound order ring, outbound trade and event rings,
//! and the [`Matcher`] holding every book for the symbols routed to
//! it. Exactly one worker thread dispatches from the order ring in a
//! busy-spin loop; on stop it drains the ring before exiting, so
//! every order that entered the ring is processed.
//!
//! Books, locators and statuses never leave the worker thread while
//! it runs. Between runs (before `start`, after `stop`) the matcher is
//! parked inside the shard and can be inspected or configured.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::events::{Event, Trade};
use crate::matching::{MarketCaps, Matcher, ShardCounters, TradingStatus};
use crate::order::Order;
use crate::ring::{RingBuffer, RingReader, RingWriter};

/// What the worker thread takes with it, and returns when it exits.
struct WorkerSeed {
    orders_in: RingReader<Order>,
    matcher: Matcher,
}

pub struct Shard {
    index: usize,
    running: Arc<AtomicBool>,
    counters: Arc<ShardCounters>,
    /// Engine-side order producer. `None` once the raw writer has
    /// been claimed through `take_order_writer`.
    order_writer: Mutex<Option<RingWriter<Order>>>,
    /// Claim-once output consumers
    trade_reader: Mutex<Option<RingReader<Trade>>>,
    event_reader: Mutex<Option<RingReader<Event>>>,
    /// Either the parked seed (stopped) or the worker handle (running)
    seed: Mutex<Option<WorkerSeed>>,
    worker: Mutex<Option<JoinHandle<WorkerSeed>>>,
    pin_core: Option<usize>,
}

impl Shard {
    pub fn new(
        index: usize,
        ring_capacity: usize,
        book_capacity: u32,
        caps: MarketCaps,
        pin_core: Option<usize>,
    ) -> Result<Self, EngineError> {
        let (order_writer, orders_in) = RingBuffer::split(ring_capacity)?;
        let (trades_out, trade_reader) = RingBuffer::split(ring_capacity)?;
        let (events_out, event_reader) = RingBuffer::split(ring_capacity)?;

        let counters = Arc::new(ShardCounters::default());
        let matcher = Matcher::new(book_capacity, caps, trades_out, events_out, counters.clone());

        Ok(Self {
            index,
            running: Arc::new(AtomicBool::new(false)),
            counters,
            order_writer: Mutex::new(Some(order_writer)),
            trade_reader: Mutex::new(Some(trade_reader)),
            event_reader: Mutex::new(Some(event_reader)),
            seed: Mutex::new(Some(WorkerSeed { orders_in, matcher })),
            worker: Mutex::new(None),
            pin_core,
        })
    }

    /// Launch the worker. No-op if already running.
    pub fn start(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let Some(seed) = self.seed.lock().take() else {
            // Seed lost would mean a previous worker never returned it
            self.running.store(false, Ordering::Release);
            return;
        };

        let running = self.running.clone();
        let index = self.index;
        let pin_core = self.pin_core;
        let handle = std::thread::Builder::new()
            .name(format!("shard-{index}"))
            .spawn(move || run_loop(seed, running, index, pin_core))
            .expect("failed to spawn shard worker");
        *self.worker.lock() = Some(handle);
    }

    /// Flip the running flag and join the worker; it drains the order
    /// ring before exiting. No-op if already stopped.
    pub fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            match handle.join() {
                Ok(seed) => *self.seed.lock() = Some(seed),
                Err(_) => warn!(shard = self.index, "worker panicked; shard state lost"),
            }
        }

        let trades_dropped = self.counters.trades_dropped.load(Ordering::Relaxed);
        let events_dropped = self.counters.events_dropped.load(Ordering::Relaxed);
        if trades_dropped > 0 || events_dropped > 0 {
            warn!(
                shard = self.index,
                trades_dropped, events_dropped,
                "output rings overflowed; consumers fell behind"
            );
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn counters(&self) -> &Arc<ShardCounters> {
        &self.counters
    }

    /// Enqueue an order through the engine-held writer. Fails when the
    /// ring is full or the raw writer was claimed.
    pub(crate) fn try_enqueue(&self, order: Order) -> bool {
        match self.order_writer.lock().as_mut() {
            Some(writer) => writer.try_enqueue(order).is_ok(),
            None => false,
        }
    }

    /// Claim the raw SPSC writer for the highest-throughput path. The
    /// engine-side enqueue fails afterwards: one producer, one path.
    pub fn take_order_writer(&self) -> Option<RingWriter<Order>> {
        self.order_writer.lock().take()
    }

    /// Claim the shard's trade consumer (once).
    pub fn take_trade_reader(&self) -> Option<RingReader<Trade>> {
        self.trade_reader.lock().take()
    }

    /// Claim the shard's event consumer (once).
    pub fn take_event_reader(&self) -> Option<RingReader<Event>> {
        self.event_reader.lock().take()
    }

    /// Set a symbol's session status. Only possible while the worker
    /// is parked; the status map lives with the matcher at runtime.
    pub fn set_trading_status(&self, symbol_id: u32, status: TradingStatus) -> bool {
        match self.seed.lock().as_mut() {
            Some(seed) => {
                seed.matcher.set_status(symbol_id, status);
                true
            }
            None => false,
        }
    }

    /// Inspect the parked matcher (stopped shards only).
    pub fn with_matcher<R>(&self, f: impl FnOnce(&Matcher) -> R) -> Option<R> {
        self.seed.lock().as_ref().map(|seed| f(&seed.matcher))
    }
}

fn run_loop(
    mut seed: WorkerSeed,
    running: Arc<AtomicBool>,
    index: usize,
    pin_core: Option<usize>,
) -> WorkerSeed {
    if let Some(core) = pin_core {
        pin_to_core(index, core);
    }
    seed.matcher.warm_up();
    debug!(shard = index, "worker started");

    while running.load(Ordering::Acquire) {
        match seed.orders_in.try_dequeue() {
            Some(order) => seed.matcher.handle(&order),
            None => std::hint::spin_loop(),
        }
    }

    // Drain: everything already enqueued gets processed
    while let Some(order) = seed.orders_in.try_dequeue() {
        seed.matcher.handle(&order);
    }

    debug!(
        shard = index,
        processed = seed.matcher.counters().processed.load(Ordering::Relaxed),
        "worker exiting"
    );
    seed
}

/// Best-effort pin of the current worker to a core.
fn pin_to_core(shard_index: usize, core_index: usize) {
    if let Some(core_ids) = core_affinity::get_core_ids() {
        if let Some(core) = core_ids.get(core_index % core_ids.len()) {
            if !core_affinity::set_for_current(*core) {
                debug!(shard = shard_index, core = core.id, "core pinning failed");
            }
        }
    }
}
