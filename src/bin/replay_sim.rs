//! Historical feed replay with a demo momentum strategy.
//!
//! Reads a line-delimited JSON feed, paces it at the requested speed,
//! rebuilds the background book through the engine and hands market
//! events and fills to a small momentum strategy.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rustc_hash::FxHashMap;
use tracing_subscriber::EnvFilter;

use shardbook::{
    Backtester, EngineError, ExecutePolicy, FeedSource, IngressCoordinator, JsonlFeedSource,
    MarketEventKind, MatchingEngine, OrderGateway, ReplayConfig, Side, Strategy, StrategyContext,
    StrategyMarketEvent, Trade,
};

#[derive(Parser)]
#[command(name = "replay_sim")]
#[command(about = "Replay a historical feed through the matching engine")]
struct Args {
    /// Path to a .jsonl feed file
    path: PathBuf,
    /// Wall-clock speed multiplier
    #[arg(default_value_t = 1.0)]
    speed: f64,
    /// Replay only this symbol
    symbol_filter: Option<String>,
    /// Skip events before this timestamp (ns)
    #[arg(default_value_t = 0)]
    start_ns: u64,
    /// Stop at the first event after this timestamp (ns)
    #[arg(default_value_t = 0)]
    end_ns: u64,
    /// Replay a single minute at this offset from the feed start
    #[arg(long)]
    minute: Option<u64>,
    /// Apply feed executions by shrinking the resting order instead
    /// of synthesizing an aggressor
    #[arg(long)]
    reduce_resting: bool,
}

/// Buys after three rising execution prints, sells after three
/// falling ones.
#[derive(Default)]
struct MomentumStrategy {
    last_prices: FxHashMap<u32, Vec<i64>>,
    orders_sent: u64,
    fills: u64,
    filled_qty: u64,
}

impl Strategy for MomentumStrategy {
    fn initialize(&mut self, ctx: &StrategyContext) {
        println!("momentum strategy up, speed x{}", ctx.speed);
    }

    fn on_market_event(&mut self, ev: &StrategyMarketEvent, gateway: &mut dyn OrderGateway) {
        if ev.kind != MarketEventKind::Execute {
            return;
        }
        let prices = self.last_prices.entry(ev.symbol_id).or_default();
        prices.push(ev.price_cents);
        if prices.len() < 3 {
            return;
        }
        let p0 = prices[prices.len() - 3];
        let p1 = prices[prices.len() - 2];
        let p2 = prices[prices.len() - 1];
        if p0 < p1 && p1 < p2 {
            gateway.submit_new_market(ev.symbol_id, Side::Buy, 100);
            self.orders_sent += 1;
        } else if p0 > p1 && p1 > p2 {
            gateway.submit_new_market(ev.symbol_id, Side::Sell, 100);
            self.orders_sent += 1;
        }
        if prices.len() > 8 {
            let keep = prices.split_off(prices.len() - 4);
            *prices = keep;
        }
    }

    fn on_fill(&mut self, trade: &Trade) {
        self.fills += 1;
        self.filled_qty += u64::from(trade.qty);
    }

    fn on_end(&mut self) {
        println!(
            "momentum strategy done: {} orders, {} fills, {} qty",
            self.orders_sent, self.fills, self.filled_qty
        );
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ EngineError::FeedOpen { .. }) => {
            eprintln!("Error: {err}");
            ExitCode::from(3)
        }
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), EngineError> {
    let (start_ns, end_ns) = match args.minute {
        Some(offset_min) => minute_window(&args.path, offset_min)?,
        None => (args.start_ns, args.end_ns),
    };

    let engine = Arc::new(MatchingEngine::new(4, 1 << 15)?);
    engine.start();
    let ingress = IngressCoordinator::new(engine.clone(), 2, 1 << 14)?;
    ingress.start();

    let mut source = JsonlFeedSource::open(&args.path)?;
    let mut strategy = MomentumStrategy::default();
    let mut backtester = Backtester::new(engine.clone(), &ingress, &mut source, &mut strategy);

    let config = ReplayConfig {
        speed: args.speed,
        start_ns,
        end_ns,
        symbol_filter: args.symbol_filter.clone(),
        execute_policy: if args.reduce_resting {
            ExecutePolicy::ReduceResting
        } else {
            ExecutePolicy::SyntheticAggressor
        },
    };
    let stats = backtester.run(&config)?;

    ingress.stop();
    engine.shutdown();

    println!("Replay completed for: {}", args.path.display());
    println!("Events:    {}", stats.events_read);
    println!("Replayed:  {}", stats.events_replayed);
    println!("Fills:     {}", stats.fills_delivered);
    println!("Processed: {}", engine.processed_count());
    println!("Trades:    {}", engine.trades_count());
    Ok(())
}

/// Derive a one-minute window from the first feed timestamp plus an
/// offset in minutes.
fn minute_window(path: &PathBuf, offset_min: u64) -> Result<(u64, u64), EngineError> {
    let mut probe = JsonlFeedSource::open(path)?;
    let mut base = 0u64;
    while let Some(ev) = probe.next_event() {
        if ev.ts_event_ns > 0 {
            base = ev.ts_event_ns;
            break;
        }
    }
    if base == 0 {
        return Err(EngineError::FeedParse {
            line: 0,
            reason: "no base timestamp found for --minute".to_owned(),
        });
    }
    let start_ns = base + offset_min * 60 * 1_000_000_000;
    Ok((start_ns, start_ns + 60 * 1_000_000_000))
}
