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

//! Dispatch configuration.
//!
//! Built once at startup and shared (it is cheap to clone) between the poller
//! and the dispatcher. Getters clamp degenerate values instead of erroring,
//! so a zero in an operator-supplied setting degrades to the safest behavior
//! rather than a panic or a busy loop.

use serde::{Deserialize, Serialize};

/// Settings governing polling cadence, claim sizing, and the send budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct DispatchConfig {
    enabled: bool,
    poll_every_minutes: u32,
    stale_after_minutes: u32,
    claim_batch_size: usize,
    chunk_size: usize,
    per_minute_limit: u64,
    campaign_key: Option<String>,
    respect_unsubscribes: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_every_minutes: 1,
            stale_after_minutes: 30,
            claim_batch_size: 500,
            chunk_size: 50,
            per_minute_limit: 300,
            campaign_key: None,
            respect_unsubscribes: true,
        }
    }
}

impl DispatchConfig {
    /// Returns a builder initialized with the defaults.
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder::default()
    }

    /// Builds a configuration from environment variables, loading a `.env`
    /// file first when present.
    ///
    /// Recognized variables, all optional: `MAILROOM_ENABLED`,
    /// `MAILROOM_POLL_EVERY_MINUTES`, `MAILROOM_STALE_AFTER_MINUTES`,
    /// `MAILROOM_CLAIM_BATCH_SIZE`, `MAILROOM_CHUNK_SIZE`,
    /// `MAILROOM_PER_MINUTE_LIMIT`, `MAILROOM_CAMPAIGN_KEY`, and
    /// `MAILROOM_RESPECT_UNSUBSCRIBES`. Unset or unparseable values keep
    /// their defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Some(enabled) = env_parse("MAILROOM_ENABLED") {
            config.enabled = enabled;
        }
        if let Some(minutes) = env_parse("MAILROOM_POLL_EVERY_MINUTES") {
            config.poll_every_minutes = minutes;
        }
        if let Some(minutes) = env_parse("MAILROOM_STALE_AFTER_MINUTES") {
            config.stale_after_minutes = minutes;
        }
        if let Some(size) = env_parse("MAILROOM_CLAIM_BATCH_SIZE") {
            config.claim_batch_size = size;
        }
        if let Some(size) = env_parse("MAILROOM_CHUNK_SIZE") {
            config.chunk_size = size;
        }
        if let Some(limit) = env_parse("MAILROOM_PER_MINUTE_LIMIT") {
            config.per_minute_limit = limit;
        }
        if let Ok(key) = std::env::var("MAILROOM_CAMPAIGN_KEY") {
            if !key.is_empty() {
                config.campaign_key = Some(key);
            }
        }
        if let Some(respect) = env_parse("MAILROOM_RESPECT_UNSUBSCRIBES") {
            config.respect_unsubscribes = respect;
        }
        config
    }

    /// Whether dispatch runs at all.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Poll cadence in minutes; cycles run only on minutes divisible by this.
    pub fn poll_every_minutes(&self) -> u32 {
        self.poll_every_minutes.max(1)
    }

    /// Minutes a `processing` lock may age before stale recovery reclaims it.
    /// Zero disables recovery.
    pub fn stale_after_minutes(&self) -> u32 {
        self.stale_after_minutes
    }

    /// Maximum tasks claimed per poll cycle.
    pub fn claim_batch_size(&self) -> usize {
        self.claim_batch_size.max(1)
    }

    /// Tasks handed to each dispatch worker.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }

    /// Global sends allowed per minute window.
    pub fn per_minute_limit(&self) -> u64 {
        self.per_minute_limit.max(1)
    }

    /// Restricts polling and claiming to a single campaign when set.
    pub fn campaign_key(&self) -> Option<&str> {
        self.campaign_key.as_deref()
    }

    /// Whether opted-out recipients are skipped at dispatch time.
    pub fn respect_unsubscribes(&self) -> bool {
        self.respect_unsubscribes
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

/// Builder for [`DispatchConfig`].
#[derive(Debug, Clone, Default)]
pub struct DispatchConfigBuilder {
    config: DispatchConfig,
}

impl DispatchConfigBuilder {
    /// Enables or disables dispatch entirely.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Sets the poll cadence in minutes.
    pub fn poll_every_minutes(mut self, minutes: u32) -> Self {
        self.config.poll_every_minutes = minutes;
        self
    }

    /// Sets the stale-lock age threshold in minutes (zero disables recovery).
    pub fn stale_after_minutes(mut self, minutes: u32) -> Self {
        self.config.stale_after_minutes = minutes;
        self
    }

    /// Sets the per-cycle claim cap.
    pub fn claim_batch_size(mut self, size: usize) -> Self {
        self.config.claim_batch_size = size;
        self
    }

    /// Sets the per-worker chunk size.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Sets the global per-minute send budget.
    pub fn per_minute_limit(mut self, limit: u64) -> Self {
        self.config.per_minute_limit = limit;
        self
    }

    /// Restricts dispatch to a single campaign.
    pub fn campaign_key(mut self, key: impl Into<String>) -> Self {
        self.config.campaign_key = Some(key.into());
        self
    }

    /// Controls whether opted-out recipients are skipped.
    pub fn respect_unsubscribes(mut self, respect: bool) -> Self {
        self.config.respect_unsubscribes = respect;
        self
    }

    /// Finalizes the configuration.
    pub fn build(self) -> DispatchConfig {
        self.config
    }
}
