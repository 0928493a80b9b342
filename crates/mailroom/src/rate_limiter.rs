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

//! In-process per-minute send counter.
//!
//! Buckets are keyed by wall-clock minute (unix seconds / 60), so every
//! holder of a clone observes the same window without coordination beyond a
//! mutex. The dispatcher checks the count before sending and increments after
//! a successful delivery; between those two points concurrent workers may
//! each pass the check, so the cap can be overshot by up to the number of
//! in-flight sends. That approximation is accepted: the cap protects the mail
//! relay from sustained abuse, not from a one-window blip.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Seconds per counting window.
const WINDOW_SECONDS: i64 = 60;

/// Windows a bucket survives past its own; anything older is dropped when
/// the map is next touched.
const BUCKET_TTL_WINDOWS: i64 = 2;

/// Shared per-minute send counter.
///
/// Cloning is cheap and all clones count against the same buckets.
#[derive(Clone, Debug, Default)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<i64, u64>>>,
}

impl RateLimiter {
    /// Creates an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bucket key for the current wall-clock minute.
    pub fn current_bucket() -> i64 {
        chrono::Utc::now().timestamp() / WINDOW_SECONDS
    }

    /// Records one send in the given bucket.
    pub fn increment(&self, bucket: i64) {
        let mut buckets = self.lock();
        *buckets.entry(bucket).or_insert(0) += 1;
        Self::prune(&mut buckets, bucket);
    }

    /// Reads the send count for the given bucket.
    pub fn read(&self, bucket: i64) -> u64 {
        let buckets = self.lock();
        buckets.get(&bucket).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, u64>> {
        // A poisoned mutex only means a panic elsewhere mid-update of a
        // counter; the map itself is still coherent.
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn prune(buckets: &mut HashMap<i64, u64>, current: i64) {
        buckets.retain(|&bucket, _| current - bucket < BUCKET_TTL_WINDOWS);
    }
}
