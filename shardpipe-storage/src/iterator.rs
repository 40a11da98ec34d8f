//! Shard iterators
//!
//! A [`ShardIterator`] is a single-consumer cursor over shards. To let many
//! workers draw from one iterator, [`shard_channel`] drains it from a
//! background task into a bounded queue; draws are serialized, so no two
//! workers ever receive the same shard.
//!
//! Both iterators keep the last shard accessible through `current()` after
//! `next()` has returned `false`.

use crate::client::Shard;
use crate::cluster::Cluster;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use shardpipe_core::group::{send_or_cancel, shared_channel, SharedReceiver};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Step-at-a-time cursor over shards
pub trait ShardIterator: Send {
    /// Advance to the next shard; `false` once exhausted
    fn next(&mut self) -> bool;

    /// The shard the iterator is positioned on; `None` before the first
    /// successful `next`
    fn current(&self) -> Option<&Shard>;
}

/// Iterates shards by identifier, in the given order
///
/// Identifiers the cluster cannot resolve are logged and skipped.
pub struct LazyShardIterator {
    cluster: Arc<dyn Cluster>,
    ids: Vec<String>,
    position: usize,
    current: Option<Shard>,
}

impl LazyShardIterator {
    pub fn new(cluster: Arc<dyn Cluster>, ids: Vec<String>) -> Self {
        Self {
            cluster,
            ids,
            position: 0,
            current: None,
        }
    }
}

impl ShardIterator for LazyShardIterator {
    fn next(&mut self) -> bool {
        while self.position < self.ids.len() {
            let id = &self.ids[self.position];
            self.position += 1;
            match self.cluster.get_shard(id) {
                Ok(shard) => {
                    self.current = Some(shard);
                    return true;
                }
                Err(err) => error!(shard = %id, error = %err, "skipping unavailable shard"),
            }
        }
        false
    }

    fn current(&self) -> Option<&Shard> {
        self.current.as_ref()
    }
}

/// Draws every shard of a slice exactly once, in random order
///
/// Fisher-Yates: pick a random index in the untouched prefix and swap it
/// with the last untouched element.
pub struct RandomShardIterator {
    shards: Vec<Shard>,
    remaining: usize,
    current: Option<Shard>,
}

impl RandomShardIterator {
    pub fn new(shards: Vec<Shard>) -> Self {
        let remaining = shards.len();
        Self {
            shards,
            remaining,
            current: None,
        }
    }

    /// Shards not yet drawn
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl ShardIterator for RandomShardIterator {
    fn next(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        let index = random_index(self.remaining);
        self.remaining -= 1;
        self.shards.swap(index, self.remaining);
        self.current = Some(self.shards[self.remaining].clone());
        true
    }

    fn current(&self) -> Option<&Shard> {
        self.current.as_ref()
    }
}

/// Drain `iterator` into a bounded queue from a background task.
///
/// The queue closes once the iterator is exhausted, when `token` is
/// cancelled, or when every receiver has been dropped.
pub fn shard_channel<I>(mut iterator: I, capacity: usize, token: CancellationToken) -> SharedReceiver<Shard>
where
    I: ShardIterator + 'static,
{
    let (tx, rx) = shared_channel(capacity);
    tokio::spawn(async move {
        while iterator.next() {
            let Some(shard) = iterator.current().cloned() else {
                return;
            };
            if !send_or_cancel(&tx, shard, &token).await {
                return;
            }
        }
    });
    rx
}

/// Uniform random index in `[0, n)`.
///
/// Sourced from the operating system RNG, falling back to the thread-local
/// PRNG if the OS RNG fails. Returns 0 when `n` is 0.
pub fn random_index(n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let mut buf = [0u8; 8];
    match OsRng.try_fill_bytes(&mut buf) {
        Ok(()) => {
            // rejection sampling keeps the draw uniform
            let n = n as u64;
            let zone = u64::MAX - (u64::MAX % n);
            let mut value = u64::from_le_bytes(buf);
            while value >= zone {
                if OsRng.try_fill_bytes(&mut buf).is_err() {
                    return rand::thread_rng().gen_range(0..n) as usize;
                }
                value = u64::from_le_bytes(buf);
            }
            (value % n) as usize
        }
        Err(err) => {
            warn!(error = %err, "crypto RNG failed, falling back to PRNG");
            rand::thread_rng().gen_range(0..n)
        }
    }
}
