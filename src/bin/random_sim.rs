//! Randomized load simulator.
//!
//! Generates a seeded stream of limit orders across a symbol universe,
//! paces it at a target rate through the ingress, drains trades and
//! events on per-shard consumer threads, and reports end-to-end
//! counters and throughput.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::EnvFilter;

use shardbook::{EngineConfig, IngressCoordinator, MatchingEngine, Order, Side};

#[derive(Parser)]
#[command(name = "random_sim")]
#[command(about = "Randomized order-flow simulator for the matching engine")]
struct Args {
    num_shards: usize,
    ring_size: usize,
    num_producers: usize,
    mailbox_size: usize,
    num_symbols: u32,
    rate_per_sec: u64,
    duration_sec: u64,
    #[arg(default_value_t = 123_456_789)]
    seed: u64,
    /// Pin shard workers to cores
    #[arg(long)]
    pin: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), shardbook::EngineError> {
    let engine = Arc::new(MatchingEngine::with_config(EngineConfig {
        num_shards: args.num_shards,
        ring_capacity: args.ring_size,
        pin_workers: args.pin,
        ..EngineConfig::default()
    })?);
    engine.start();

    let ingress = IngressCoordinator::new(engine.clone(), args.num_producers, args.mailbox_size)?;
    ingress.start();

    // One trade consumer and one event consumer per shard
    let consuming = Arc::new(AtomicBool::new(true));
    let trades_seen = Arc::new(AtomicU64::new(0));
    let mut consumers = Vec::new();
    for s in 0..args.num_shards {
        let mut trades = engine
            .trade_reader_for_shard(s)
            .expect("trade reader already claimed");
        let flag = consuming.clone();
        let seen = trades_seen.clone();
        consumers.push(std::thread::spawn(move || {
            while flag.load(Ordering::Acquire) {
                if trades.try_dequeue().is_some() {
                    seen.fetch_add(1, Ordering::Relaxed);
                } else {
                    std::hint::spin_loop();
                }
            }
            while trades.try_dequeue().is_some() {
                seen.fetch_add(1, Ordering::Relaxed);
            }
        }));

        let mut events = engine
            .event_reader_for_shard(s)
            .expect("event reader already claimed");
        let flag = consuming.clone();
        consumers.push(std::thread::spawn(move || {
            while flag.load(Ordering::Acquire) {
                if events.try_dequeue().is_none() {
                    std::hint::spin_loop();
                }
            }
            while events.try_dequeue().is_some() {}
        }));
    }

    // Seeded generation: per-symbol price bases with jitter
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let base_cents: Vec<i64> = (0..args.num_symbols)
        .map(|i| 5_000 + i64::from(i % 100) * 10)
        .collect();

    let start_ts = Instant::now();
    let end_ts = start_ts + Duration::from_secs(args.duration_sec);
    let nanos_per_order = if args.rate_per_sec > 0 {
        1_000_000_000 / args.rate_per_sec
    } else {
        0
    };
    let mut order_seq = 1u64;

    while Instant::now() < end_ts {
        let loop_start = Instant::now();

        let symbol_id = rng.gen_range(0..args.num_symbols);
        let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
        let qty = rng.gen_range(1..=100);
        let jitter: i64 = rng.gen_range(-50..=50);
        let price = base_cents[symbol_id as usize] + jitter;

        ingress.submit_from_decoder(Order::limit(order_seq, symbol_id, side, price, qty));
        order_seq += 1;

        if nanos_per_order > 0 {
            let elapsed = loop_start.elapsed();
            let budget = Duration::from_nanos(nanos_per_order);
            if elapsed < budget {
                std::thread::sleep(budget - elapsed);
            }
        }
    }
    let gen_end_ts = Instant::now();
    let generated = order_seq - 1;

    // Wait until everything generated has been matched
    while engine.processed_count() < generated {
        std::hint::spin_loop();
    }
    let drained_ts = Instant::now();

    ingress.stop();
    consuming.store(false, Ordering::Release);
    for handle in consumers {
        let _ = handle.join();
    }
    engine.shutdown();

    let gen_ms = gen_end_ts.duration_since(start_ts).as_millis();
    let drain_ms = drained_ts.duration_since(gen_end_ts).as_millis();
    let total_ms = drained_ts.duration_since(start_ts).as_millis();

    println!("Produced:  {generated}");
    println!("Enqueued:  {}", engine.enqueued_count());
    println!("Dropped:   {}", engine.dropped_count());
    println!("Processed: {}", engine.processed_count());
    println!("Trades:    {}", engine.trades_count());
    println!("Consumed:  {}", trades_seen.load(Ordering::Relaxed));
    println!("Gen ms:    {gen_ms}");
    println!("Drain ms:  {drain_ms}");
    println!("Total ms:  {total_ms}");
    if total_ms > 0 {
        let throughput = generated as f64 / (total_ms as f64 / 1_000.0);
        println!("Throughput: {throughput:.0} orders/s");
    }
    Ok(())
}
