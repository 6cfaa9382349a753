//! Feed replay and strategy backtesting.
//!
//! The backtester is the decoder thread of a run: it pulls feed
//! events, paces them against the wall clock, translates them into
//! engine operations submitted through the ingress, and delivers
//! normalized market events plus drained fills to a user strategy.
//!
//! Strategy orders go through an [`OrderGateway`] whose ids start at
//! a high base so they can never collide with feed-replayed ids.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::engine::MatchingEngine;
use crate::error::EngineError;
use crate::events::Trade;
use crate::feed::{FeedAction, FeedEvent, FeedSource};
use crate::ingress::IngressCoordinator;
use crate::order::{Order, Side, Tif};
use crate::ring::RingReader;

/// First id handed out by the gateway; feed order ids live far below.
const GATEWAY_ID_BASE: u64 = 1_000_000_000_000;
/// Id range for orders synthesized from feed Execute events.
const SYNTHETIC_ID_BASE: u64 = 2_000_000_000_000;

/// How feed `Execute` events are applied to the engine (the feed
/// itself does not say whether the matching print should be
/// re-created or the resting order merely shrunk).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutePolicy {
    /// Synthesize an IOC market order on the aggressing side; the
    /// engine reprints the trade. Default.
    #[default]
    SyntheticAggressor,
    /// Decrement the resting order by id without a trade print.
    ReduceResting,
}

/// Replay parameters. `start_ns`/`end_ns` of zero mean unbounded.
#[derive(Clone, Debug)]
pub struct ReplayConfig {
    /// Wall-clock speed multiplier; 1.0 replays in real time
    pub speed: f64,
    pub start_ns: u64,
    pub end_ns: u64,
    /// Restrict the run to one symbol string
    pub symbol_filter: Option<String>,
    pub execute_policy: ExecutePolicy,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            start_ns: 0,
            end_ns: 0,
            symbol_filter: None,
            execute_policy: ExecutePolicy::default(),
        }
    }
}

/// Per-run symbol-string to numeric-id registry, assigned
/// monotonically in first-seen order.
#[derive(Debug, Default)]
pub struct SymbolRegistry {
    ids: FxHashMap<String, u32>,
}

impl SymbolRegistry {
    pub fn resolve(&mut self, symbol: &str) -> u32 {
        if let Some(&id) = self.ids.get(symbol) {
            return id;
        }
        let id = self.ids.len() as u32;
        self.ids.insert(symbol.to_owned(), id);
        id
    }

    pub fn lookup(&self, symbol: &str) -> Option<u32> {
        self.ids.get(symbol).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Normalized market event delivered to a strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarketEventKind {
    Add,
    Cancel,
    Replace,
    Execute,
}

#[derive(Clone, Copy, Debug)]
pub struct StrategyMarketEvent {
    pub kind: MarketEventKind,
    pub symbol_id: u32,
    pub ts_event_ns: u64,
    pub order_id: u64,
    pub side: Side,
    pub price_cents: i64,
    pub qty: u32,
}

/// Run metadata handed to `Strategy::initialize`.
#[derive(Clone, Copy, Debug)]
pub struct StrategyContext {
    pub speed: f64,
}

/// Order entry surface for strategies.
pub trait OrderGateway {
    fn submit_new_limit(
        &mut self,
        symbol_id: u32,
        side: Side,
        price_cents: i64,
        qty: u32,
        tif: Tif,
        post_only: bool,
    ) -> u64;
    fn submit_new_market(&mut self, symbol_id: u32, side: Side, qty: u32) -> u64;
    fn submit_cancel(&mut self, symbol_id: u32, target_id: u64) -> u64;
    fn submit_replace(
        &mut self,
        symbol_id: u32,
        target_id: u64,
        new_price_cents: i64,
        new_qty: u32,
    ) -> u64;
}

/// The strategy contract: four callbacks around the replayed run.
/// The gateway is handed into `on_market_event` so strategies can
/// react in-line.
pub trait Strategy {
    fn initialize(&mut self, ctx: &StrategyContext);
    fn on_market_event(&mut self, event: &StrategyMarketEvent, gateway: &mut dyn OrderGateway);
    fn on_fill(&mut self, trade: &Trade);
    fn on_end(&mut self);
}

/// Gateway that submits through the ingress from the decoder thread,
/// preserving the single-producer invariant.
pub struct IngressGateway<'a> {
    ingress: &'a IngressCoordinator,
    next_id: u64,
}

impl<'a> IngressGateway<'a> {
    pub fn new(ingress: &'a IngressCoordinator) -> Self {
        Self {
            ingress,
            next_id: GATEWAY_ID_BASE,
        }
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl OrderGateway for IngressGateway<'_> {
    fn submit_new_limit(
        &mut self,
        symbol_id: u32,
        side: Side,
        price_cents: i64,
        qty: u32,
        tif: Tif,
        post_only: bool,
    ) -> u64 {
        let id = self.take_id();
        let mut order = Order::limit_tif(id, symbol_id, side, price_cents, qty, tif);
        order.post_only = post_only;
        self.ingress.submit_from_decoder(order);
        id
    }

    fn submit_new_market(&mut self, symbol_id: u32, side: Side, qty: u32) -> u64 {
        let id = self.take_id();
        self.ingress.submit_from_decoder(Order::market(id, symbol_id, side, qty));
        id
    }

    fn submit_cancel(&mut self, symbol_id: u32, target_id: u64) -> u64 {
        let id = self.take_id();
        self.ingress.submit_from_decoder(Order::cancel(id, symbol_id, target_id));
        id
    }

    fn submit_replace(
        &mut self,
        symbol_id: u32,
        target_id: u64,
        new_price_cents: i64,
        new_qty: u32,
    ) -> u64 {
        let id = self.take_id();
        self.ingress
            .submit_from_decoder(Order::replace(id, symbol_id, target_id, new_price_cents, new_qty));
        id
    }
}

/// Counts reported by a finished replay.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReplayStats {
    /// Feed events read from the source
    pub events_read: u64,
    /// Events that passed the window/symbol filters
    pub events_replayed: u64,
    /// Engine operations submitted (feed-side, not strategy-side)
    pub operations_submitted: u64,
    /// Fills delivered to the strategy
    pub fills_delivered: u64,
}

/// Drives one feed through the engine and a strategy.
pub struct Backtester<'a> {
    engine: Arc<MatchingEngine>,
    ingress: &'a IngressCoordinator,
    source: &'a mut dyn FeedSource,
    strategy: &'a mut dyn Strategy,
    registry: SymbolRegistry,
}

impl<'a> Backtester<'a> {
    pub fn new(
        engine: Arc<MatchingEngine>,
        ingress: &'a IngressCoordinator,
        source: &'a mut dyn FeedSource,
        strategy: &'a mut dyn Strategy,
    ) -> Self {
        Self {
            engine,
            ingress,
            source,
            strategy,
            registry: SymbolRegistry::default(),
        }
    }

    /// Symbol ids assigned during the run.
    pub fn registry(&self) -> &SymbolRegistry {
        &self.registry
    }

    pub fn run(&mut self, config: &ReplayConfig) -> Result<ReplayStats, EngineError> {
        if config.speed <= 0.0 {
            return Err(EngineError::InvalidSpeed(config.speed));
        }

        // One consumer per shard trade ring; a reader already claimed
        // elsewhere simply is not drained here.
        let mut fill_readers: Vec<RingReader<Trade>> = (0..self.engine.shard_count())
            .filter_map(|s| self.engine.trade_reader_for_shard(s))
            .collect();

        let mut gateway = IngressGateway::new(self.ingress);
        self.strategy.initialize(&StrategyContext { speed: config.speed });

        let mut stats = ReplayStats::default();
        let mut synthetic_next_id = SYNTHETIC_ID_BASE;
        let mut pacer: Option<(u64, Instant)> = None;

        while let Some(event) = self.source.next_event() {
            stats.events_read += 1;

            if let Some(filter) = &config.symbol_filter {
                if &event.symbol != filter {
                    continue;
                }
            }
            if config.start_ns > 0 && event.ts_event_ns < config.start_ns {
                continue;
            }
            if config.end_ns > 0 && event.ts_event_ns > config.end_ns {
                break;
            }

            // Reproduce the historical cadence, scaled by speed
            match pacer {
                None => pacer = Some((event.ts_event_ns, Instant::now())),
                Some((first_ts, wall_start)) => {
                    let delta_ns = event.ts_event_ns.saturating_sub(first_ts);
                    let target = Duration::from_nanos((delta_ns as f64 / config.speed) as u64);
                    let elapsed = wall_start.elapsed();
                    if elapsed < target {
                        std::thread::sleep(target - elapsed);
                    }
                }
            }

            stats.events_replayed += 1;
            let symbol_id = self.registry.resolve(&event.symbol);
            if self.apply_to_engine(&event, symbol_id, config.execute_policy, &mut synthetic_next_id) {
                stats.operations_submitted += 1;
            }

            let Some(kind) = market_event_kind(event.action) else {
                continue;
            };
            let sme = StrategyMarketEvent {
                kind,
                symbol_id,
                ts_event_ns: event.ts_event_ns,
                order_id: event.order_id,
                side: side_of(event.side),
                price_cents: event.price_cents,
                qty: event.qty,
            };
            self.strategy.on_market_event(&sme, &mut gateway);

            for reader in &mut fill_readers {
                while let Some(trade) = reader.try_dequeue() {
                    stats.fills_delivered += 1;
                    self.strategy.on_fill(&trade);
                }
            }
        }

        // Let in-flight operations finish, then hand over the last fills
        while self.engine.is_running()
            && self.engine.processed_count() < self.engine.enqueued_count()
        {
            std::hint::spin_loop();
        }
        for reader in &mut fill_readers {
            while let Some(trade) = reader.try_dequeue() {
                stats.fills_delivered += 1;
                self.strategy.on_fill(&trade);
            }
        }

        self.strategy.on_end();
        info!(
            events = stats.events_read,
            replayed = stats.events_replayed,
            fills = stats.fills_delivered,
            symbols = self.registry.len(),
            "replay finished"
        );
        Ok(stats)
    }

    /// Translate one feed event into an engine operation. Returns
    /// false when the event has no engine-side effect.
    fn apply_to_engine(
        &mut self,
        event: &FeedEvent,
        symbol_id: u32,
        policy: ExecutePolicy,
        synthetic_next_id: &mut u64,
    ) -> bool {
        match event.action {
            FeedAction::Add => {
                let order = Order::limit(
                    event.order_id,
                    symbol_id,
                    side_of(event.side),
                    event.price_cents,
                    event.qty,
                );
                self.ingress.submit_from_decoder(order)
            }
            FeedAction::Cancel | FeedAction::Delete => self
                .ingress
                .submit_from_decoder(Order::cancel(event.order_id, symbol_id, event.order_id)),
            FeedAction::Replace => {
                // Zero new-fields fall back to the event's price/qty
                let new_price = if event.new_price_cents != 0 {
                    event.new_price_cents
                } else {
                    event.price_cents
                };
                let new_qty = if event.new_qty != 0 { event.new_qty } else { event.qty };
                self.ingress.submit_from_decoder(Order::replace(
                    event.order_id,
                    symbol_id,
                    event.order_id,
                    new_price,
                    new_qty,
                ))
            }
            FeedAction::Execute => {
                let id = *synthetic_next_id;
                *synthetic_next_id += 1;
                match policy {
                    ExecutePolicy::SyntheticAggressor => {
                        let aggressor = if event.exec_is_aggressor {
                            side_of(event.side)
                        } else {
                            side_of(event.side).opposite()
                        };
                        debug!(order_id = event.order_id, "execute replayed as market order");
                        self.ingress
                            .submit_from_decoder(Order::market(id, symbol_id, aggressor, event.qty))
                    }
                    ExecutePolicy::ReduceResting => self.ingress.submit_from_decoder(
                        Order::reduce(id, symbol_id, event.order_id, event.qty),
                    ),
                }
            }
            FeedAction::Unknown => false,
        }
    }
}

fn side_of(c: char) -> Side {
    if c == 'S' {
        Side::Sell
    } else {
        Side::Buy
    }
}

fn market_event_kind(action: FeedAction) -> Option<MarketEventKind> {
    match action {
        FeedAction::Add => Some(MarketEventKind::Add),
        FeedAction::Cancel | FeedAction::Delete => Some(MarketEventKind::Cancel),
        FeedAction::Replace => Some(MarketEventKind::Replace),
        FeedAction::Execute => Some(MarketEventKind::Execute),
        FeedAction::Unknown => None,
    }
}
