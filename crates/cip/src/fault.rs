//! Deterministic fault-injection engine.
//!
//! Every outgoing server response is assigned a [`ResponseAction`] computed
//! from a monotonic counter and a seeded PRNG, both behind one lock so the
//! sequence of actions is reproducible across runs given the same seed and
//! parameters (testable property: fault determinism).

use std::sync::Mutex;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::sleep;

use crate::rng::DeterministicRng;

#[derive(Debug, Clone)]
pub struct FaultConfig {
    pub base_latency_ms: u64,
    pub jitter_ms: u64,
    pub spike_every_n: u64,
    pub spike_delay_ms: u64,
    pub stall_every_n: u64,
    pub drop_every_n: u64,
    pub drop_pct: f64,
    pub close_every_n: u64,
    pub chunk_writes: bool,
    pub chunk_min: usize,
    pub chunk_max: usize,
    pub inter_chunk_delay_ms: u64,
    pub coalesce: bool,
    pub seed: u64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            base_latency_ms: 0,
            jitter_ms: 0,
            spike_every_n: 0,
            spike_delay_ms: 0,
            stall_every_n: 0,
            drop_every_n: 0,
            drop_pct: 0.0,
            close_every_n: 0,
            chunk_writes: false,
            chunk_min: 1,
            chunk_max: 1,
            inter_chunk_delay_ms: 0,
            coalesce: false,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseAction {
    pub delay: Duration,
    pub drop: bool,
    pub close: bool,
    pub chunk: bool,
    pub coalesce: bool,
}

/// The fault engine's mutable state: counter + PRNG under one lock, matching
/// the "single lock protects both" requirement so action sequences stay
/// deterministic under concurrent callers.
pub struct FaultEngine {
    config: FaultConfig,
    state: Mutex<FaultState>,
}

struct FaultState {
    counter: u64,
    rng: DeterministicRng,
    coalesce_buf: Vec<u8>,
}

impl FaultEngine {
    pub fn new(config: FaultConfig) -> Self {
        let rng = DeterministicRng::new(config.seed);
        Self {
            config,
            state: Mutex::new(FaultState {
                counter: 0,
                rng,
                coalesce_buf: Vec::new(),
            }),
        }
    }

    fn every_n(n: u64, count: u64) -> bool {
        n != 0 && count % n == 0
    }

    /// Compute the action for the next response, advancing the counter.
    pub fn next_action(&self) -> ResponseAction {
        let cfg = &self.config;
        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        let n = state.counter;

        let mut delay_ms = cfg.base_latency_ms;
        if cfg.jitter_ms > 0 {
            delay_ms += state.rng.uniform_range(0, cfg.jitter_ms as u32) as u64;
        }
        if Self::every_n(cfg.spike_every_n, n) {
            delay_ms += cfg.spike_delay_ms;
        }
        if Self::every_n(cfg.stall_every_n, n) {
            delay_ms += cfg.spike_delay_ms.max(1000);
        }

        let drop = Self::every_n(cfg.drop_every_n, n) || state.rng.next_f64() < cfg.drop_pct;
        let close = Self::every_n(cfg.close_every_n, n);

        ResponseAction {
            delay: Duration::from_millis(delay_ms),
            drop,
            close,
            chunk: cfg.chunk_writes,
            coalesce: cfg.coalesce,
        }
    }

    /// Apply an action to a response buffer being written to `stream`.
    /// Returns `true` if the connection should be closed after this call.
    pub async fn apply(&self, stream: &mut TcpStream, action: &ResponseAction, response: &[u8]) -> bool {
        if !action.delay.is_zero() {
            sleep(action.delay).await;
        }

        let to_write: Option<Vec<u8>> = if action.coalesce {
            let mut state = self.state.lock().unwrap();
            let had_prior = !state.coalesce_buf.is_empty();
            state.coalesce_buf.extend_from_slice(response);
            if had_prior {
                Some(std::mem::take(&mut state.coalesce_buf))
            } else {
                None
            }
        } else {
            Some(response.to_vec())
        };

        let Some(buf) = to_write else {
            return false; // queued for the next call to flush
        };

        if action.drop {
            return action.close;
        }

        if action.chunk && !buf.is_empty() {
            let (lo, hi) = (self.config.chunk_min.max(1), self.config.chunk_max.max(self.config.chunk_min.max(1)));
            let mut pos = 0;
            while pos < buf.len() {
                let remaining = buf.len() - pos;
                let size = {
                    let mut state = self.state.lock().unwrap();
                    state.rng.uniform_range(lo as u32, hi as u32) as usize
                }
                .clamp(1, remaining);
                if stream.write_all(&buf[pos..pos + size]).await.is_err() {
                    return true;
                }
                pos += size;
                if pos < buf.len() && self.config.inter_chunk_delay_ms > 0 {
                    sleep(Duration::from_millis(self.config.inter_chunk_delay_ms)).await;
                }
            }
        } else if stream.write_all(&buf).await.is_err() {
            return true;
        }

        action.close
    }
}
