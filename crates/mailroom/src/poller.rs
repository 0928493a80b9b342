/*
 *  Copyright 2026 Mailroom Contributors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Poll cycle driver: recover, claim, fan out.
//!
//! Each cycle repairs stale in-flight tasks, claims a bounded batch of due
//! ones, and fans the claimed ids out to dispatch workers in fixed-size
//! chunks. Cycles are safe to run from multiple processes at once; the claim
//! itself guarantees no task is dispatched twice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::config::DispatchConfig;
use crate::dal::DAL;
use crate::dispatcher::{ChunkOutcome, Dispatcher};
use crate::error::QueueError;
use crate::rate_limiter::RateLimiter;

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// False when the cycle was skipped (disabled, or off-cadence minute)
    pub ran: bool,
    /// Stale `processing` tasks returned to `queued`
    pub recovered: usize,
    /// Tasks claimed this cycle
    pub claimed: usize,
    /// Dispatch chunks spawned
    pub chunks: usize,
    /// Aggregate dispatch tally across all chunks
    pub dispatch: ChunkOutcome,
}

/// Fixed-interval driver for the recover/claim/dispatch loop.
pub struct Poller {
    dal: DAL,
    dispatcher: Arc<Dispatcher>,
    config: DispatchConfig,
    shutdown: Notify,
    stopped: AtomicBool,
}

impl Poller {
    /// Creates a poller over the shared queue and dispatcher.
    pub fn new(dal: DAL, dispatcher: Arc<Dispatcher>, config: DispatchConfig) -> Self {
        Self {
            dal,
            dispatcher,
            config,
            shutdown: Notify::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Runs cycles every `interval` until [`shutdown`](Self::shutdown) is
    /// called. Cycle errors are logged, never fatal to the loop.
    pub async fn run(&self, interval: Duration) {
        info!(interval_secs = interval.as_secs(), "poller started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.run_cycle().await {
                        error!("poll cycle failed: {}", e);
                    }
                }
                _ = self.shutdown.notified() => {
                    break;
                }
            }
        }
        self.stopped.store(true, Ordering::SeqCst);
        info!("poller stopped");
    }

    /// Signals the run loop to exit after the current cycle.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// True once the run loop has exited.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Executes one recover/claim/dispatch cycle.
    ///
    /// The cadence gate compares the wall-clock minute against
    /// `poll_every_minutes`, so every process polling on the same settings
    /// converges on the same active minutes regardless of start time.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, QueueError> {
        let mut outcome = CycleOutcome::default();

        if !self.config.enabled() {
            debug!("dispatch disabled, skipping cycle");
            return Ok(outcome);
        }

        let cadence = self.config.poll_every_minutes() as i64;
        if RateLimiter::current_bucket() % cadence != 0 {
            debug!(cadence, "off-cadence minute, skipping cycle");
            return Ok(outcome);
        }
        outcome.ran = true;

        let campaign_key = self.config.campaign_key();

        if self.config.stale_after_minutes() > 0 {
            outcome.recovered = self
                .dal
                .queue()
                .requeue_stale(self.config.stale_after_minutes() as i64, campaign_key)
                .await?;
            if outcome.recovered > 0 {
                info!(recovered = outcome.recovered, "recovered stale tasks");
            }
        }

        let claimed = self
            .dal
            .queue()
            .claim_due(self.config.claim_batch_size(), campaign_key)
            .await?;
        outcome.claimed = claimed.len();

        let mut handles = Vec::new();
        for chunk in claimed.chunks(self.config.chunk_size()) {
            let dispatcher = Arc::clone(&self.dispatcher);
            let chunk = chunk.to_vec();
            handles.push(tokio::spawn(async move {
                dispatcher.process_chunk(&chunk).await
            }));
        }
        outcome.chunks = handles.len();

        for handle in handles {
            match handle.await {
                Ok(Ok(chunk_outcome)) => outcome.dispatch.absorb(chunk_outcome),
                Ok(Err(e)) => error!("dispatch chunk failed: {}", e),
                Err(e) => error!("dispatch worker panicked: {}", e),
            }
        }

        info!(
            recovered = outcome.recovered,
            claimed = outcome.claimed,
            chunks = outcome.chunks,
            sent = outcome.dispatch.sent,
            failed = outcome.dispatch.failed,
            skipped = outcome.dispatch.skipped,
            throttled = outcome.dispatch.throttled,
            "poll cycle complete"
        );

        Ok(outcome)
    }
}
