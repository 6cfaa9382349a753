//! # Shardbook
//!
//! A sharded, in-memory limit-order matching engine for low-latency
//! trading simulation.
//!
//! ## Design Principles
//!
//! - **Single-Writer**: every book is owned by exactly one shard
//!   worker thread (no locks on the matching path)
//! - **Price-Time Priority**: better prices first, FIFO within a level
//! - **Arena Allocation**: no heap allocation per order in the hot path
//! - **Lossless Order Path**: SPSC rings everywhere, busy-spin on full
//!
//! ## Architecture
//!
//! ```text
//! [Decoder / Replay Thread]
//!        |  submit_from_decoder
//!        v
//! [Producer 0..K]  -- SPSC mailboxes, shard j owned by producer j%K
//!        |  enqueue_to_shard
//!        v
//! [Shard 0..S]     -- order ring -> worker -> books
//!        |
//!        +--> trade ring  --> consumers / strategy fills
//!        +--> event ring  --> consumers
//! ```

pub mod arena;
pub mod backtest;
pub mod engine;
pub mod error;
pub mod events;
pub mod feed;
pub mod ingress;
pub mod matching;
pub mod order;
pub mod order_book;
pub mod price_level;
pub mod ring;
pub mod shard;

// Re-exports for convenience
pub use backtest::{
    Backtester, ExecutePolicy, IngressGateway, MarketEventKind, OrderGateway, ReplayConfig,
    ReplayStats, Strategy, StrategyContext, StrategyMarketEvent, SymbolRegistry,
};
pub use engine::{EngineConfig, MatchingEngine};
pub use error::EngineError;
pub use events::{Event, EventKind, Liquidity, Trade};
pub use feed::{FeedAction, FeedEvent, FeedSource, JsonlFeedSource};
pub use ingress::IngressCoordinator;
pub use matching::{MarketCaps, Matcher, ShardCounters, TradingStatus};
pub use order::{Op, Order, OrderType, Side, Tif};
pub use order_book::{OrderBook, RestingOrder};
pub use ring::{RingBuffer, RingReader, RingWriter};
pub use shard::Shard;
