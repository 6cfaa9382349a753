//! Ingress: one decoder thread bridged to K producer threads.
//!
//! The decoder never touches a shard ring. It drops each order into
//! the mailbox of the producer that owns the order's shard
//! (`producer = shard % K`), and that producer is the only thread
//! forwarding into the shards it owns (`{ j | j mod K = i }`), so
//! every shard ring keeps exactly one producer.
//!
//! The order path is lossless at this layer: both the decoder-side
//! mailbox enqueue and the producer-side shard enqueue busy-spin with
//! a pause hint until space frees up, as long as the relevant side is
//! still running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::engine::MatchingEngine;
use crate::error::EngineError;
use crate::order::Order;
use crate::ring::{RingBuffer, RingReader, RingWriter};

struct ProducerSlot {
    /// Decoder-side mailbox writer. The decoder is a single thread by
    /// contract; the lock is uncontended and only guards misuse.
    mailbox: Mutex<RingWriter<Order>>,
    /// Mailbox consumer, parked here between runs
    seed: Mutex<Option<RingReader<Order>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    /// Shards this producer exclusively forwards to (informational)
    owned_shards: Vec<usize>,
}

pub struct IngressCoordinator {
    engine: Arc<MatchingEngine>,
    producers: Vec<ProducerSlot>,
    running: Arc<AtomicBool>,
}

impl IngressCoordinator {
    /// `num_producers` of 0 is promoted to 1; the mailbox capacity
    /// must be a non-zero power of two.
    pub fn new(
        engine: Arc<MatchingEngine>,
        num_producers: usize,
        mailbox_capacity: usize,
    ) -> Result<Self, EngineError> {
        if mailbox_capacity == 0 || !mailbox_capacity.is_power_of_two() {
            return Err(EngineError::MailboxCapacity(mailbox_capacity));
        }
        let num_producers = num_producers.max(1);

        let mut producers = Vec::with_capacity(num_producers);
        for i in 0..num_producers {
            let (writer, reader) = RingBuffer::split(mailbox_capacity)?;
            let owned_shards = (i..engine.shard_count()).step_by(num_producers).collect();
            producers.push(ProducerSlot {
                mailbox: Mutex::new(writer),
                seed: Mutex::new(Some(reader)),
                thread: Mutex::new(None),
                owned_shards,
            });
        }

        Ok(Self {
            engine,
            producers,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn num_producers(&self) -> usize {
        self.producers.len()
    }

    /// Shards owned by one producer under the modulo assignment.
    pub fn owned_shards(&self, producer_idx: usize) -> &[usize] {
        &self.producers[producer_idx].owned_shards
    }

    /// Launch the producer threads. Idempotent.
    pub fn start(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        for (i, slot) in self.producers.iter().enumerate() {
            let Some(reader) = slot.seed.lock().take() else {
                continue;
            };
            let engine = self.engine.clone();
            let running = self.running.clone();
            let handle = std::thread::Builder::new()
                .name(format!("ingress-{i}"))
                .spawn(move || producer_loop(i, reader, engine, running))
                .expect("failed to spawn ingress producer");
            *slot.thread.lock() = Some(handle);
        }
        info!(producers = self.producers.len(), "ingress started");
    }

    /// Stop the producers; each finishes its mailbox before exiting.
    /// Idempotent.
    pub fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        for slot in &self.producers {
            if let Some(handle) = slot.thread.lock().take() {
                let _ = handle.join();
            }
        }
        info!("ingress stopped");
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Blocking submit from the decoder thread: spins with a pause
    /// hint until the owning producer's mailbox accepts the order.
    /// Returns false only when the ingress is not running.
    pub fn submit_from_decoder(&self, order: Order) -> bool {
        let shard = self.engine.shard_of(order.symbol_id);
        let producer = shard % self.producers.len();
        let mut mailbox = self.producers[producer].mailbox.lock();

        let mut pending = order;
        loop {
            if !self.running.load(Ordering::Acquire) {
                return false;
            }
            match mailbox.try_enqueue(pending) {
                Ok(()) => return true,
                Err(back) => {
                    pending = back;
                    std::hint::spin_loop();
                }
            }
        }
    }
}

impl Drop for IngressCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn producer_loop(
    index: usize,
    mut mailbox: RingReader<Order>,
    engine: Arc<MatchingEngine>,
    running: Arc<AtomicBool>,
) {
    debug!(producer = index, "producer started");
    while running.load(Ordering::Acquire) {
        match mailbox.try_dequeue() {
            Some(order) => forward(&engine, order),
            None => std::hint::spin_loop(),
        }
    }
    // Finish the mailbox before exiting
    while let Some(order) = mailbox.try_dequeue() {
        forward(&engine, order);
    }
    debug!(producer = index, "producer exiting");
}

/// Spin an order into its shard ring. Gives up only when the engine
/// has stopped (the failed enqueue is then counted as a drop there).
fn forward(engine: &MatchingEngine, order: Order) {
    let shard = engine.shard_of(order.symbol_id);
    loop {
        if engine.enqueue_to_shard(shard, order) {
            return;
        }
        if !engine.is_running() {
            return;
        }
        std::hint::spin_loop();
    }
}
