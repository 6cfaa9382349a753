//! Historical feed interface and the line-delimited JSON source.
//!
//! A feed is a lazy, finite sequence of events sorted non-decreasingly
//! by exchange timestamp. The decoder that produced the file is
//! outside this crate; rows arrive with decimal prices and are scaled
//! to integer cents here so nothing downstream touches floats.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use crate::error::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FeedAction {
    Add,
    Cancel,
    Replace,
    Execute,
    Delete,
    #[default]
    Unknown,
}

/// One normalized feed event.
#[derive(Clone, Debug, Default)]
pub struct FeedEvent {
    pub symbol: String,
    pub ts_event_ns: u64,
    pub action: FeedAction,
    pub order_id: u64,
    /// 'B', 'S', or ' ' when not applicable
    pub side: char,
    pub price_cents: i64,
    pub qty: u32,
    /// Replace: target price (0 = fall back to `price_cents`)
    pub new_price_cents: i64,
    /// Replace: target quantity (0 = fall back to `qty`)
    pub new_qty: u32,
    /// Execute: true when this print is the aggressing side
    pub exec_is_aggressor: bool,
}

/// Pull interface over a feed. `None` means end of stream.
pub trait FeedSource {
    fn next_event(&mut self) -> Option<FeedEvent>;
}

/// Raw row as found in a `.jsonl` feed file.
#[derive(Debug, Deserialize)]
struct FeedRow {
    symbol: String,
    ts_event_ns: u64,
    action: String,
    order_id: u64,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    qty: Option<u32>,
    #[serde(default)]
    new_price: Option<Decimal>,
    #[serde(default)]
    new_qty: Option<u32>,
    #[serde(default)]
    aggressor: Option<bool>,
}

impl FeedRow {
    /// Convert a raw row to a normalized event.
    /// `price_mult` scales decimal prices to integers (100 = cents).
    fn to_event(&self, price_mult: i64) -> FeedEvent {
        let scale = |d: Option<Decimal>| {
            d.map(|v| (v * Decimal::from(price_mult)).to_i64().unwrap_or(0))
                .unwrap_or(0)
        };
        let side = match self.side.as_deref() {
            Some("B") | Some("b") | Some("buy") | Some("bid") => 'B',
            Some("S") | Some("s") | Some("sell") | Some("ask") => 'S',
            _ => ' ',
        };
        let action = match self.action.as_str() {
            "add" => FeedAction::Add,
            "cancel" => FeedAction::Cancel,
            "replace" => FeedAction::Replace,
            "execute" => FeedAction::Execute,
            "delete" => FeedAction::Delete,
            _ => FeedAction::Unknown,
        };

        FeedEvent {
            symbol: self.symbol.clone(),
            ts_event_ns: self.ts_event_ns,
            action,
            order_id: self.order_id,
            side,
            price_cents: scale(self.price),
            qty: self.qty.unwrap_or(0),
            new_price_cents: scale(self.new_price),
            new_qty: self.new_qty.unwrap_or(0),
            exec_is_aggressor: self.aggressor.unwrap_or(false),
        }
    }
}

/// Line-delimited JSON feed file. Malformed lines are skipped with a
/// warning rather than aborting a long replay.
#[derive(Debug)]
pub struct JsonlFeedSource {
    lines: std::io::Lines<BufReader<File>>,
    price_mult: i64,
    line_no: usize,
    skipped: usize,
}

impl JsonlFeedSource {
    /// Open with the default cent scaling (x100).
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        Self::open_scaled(path, 100)
    }

    pub fn open_scaled(path: impl AsRef<Path>, price_mult: i64) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| EngineError::FeedOpen {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            price_mult,
            line_no: 0,
            skipped: 0,
        })
    }

    /// Lines dropped because they failed to parse.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl FeedSource for JsonlFeedSource {
    fn next_event(&mut self) -> Option<FeedEvent> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => {
                    warn!(error = %err, "feed read error; stopping");
                    return None;
                }
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FeedRow>(&line) {
                Ok(row) => return Some(row.to_event(self.price_mult)),
                Err(err) => {
                    self.skipped += 1;
                    warn!(line = self.line_no, error = %err, "skipping malformed feed row");
                }
            }
        }
    }
}
