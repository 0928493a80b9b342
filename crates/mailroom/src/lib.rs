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

//! # Mailroom
//!
//! A Rust library for durable, rate-limited email campaign dispatch.
//!
//! Mailroom turns admin-defined campaigns (a recipient audience plus up to
//! three candidate topic sets) into a durable queue of per-recipient send
//! tasks, then drains that queue on a schedule: a poller recovers stale
//! in-flight tasks and claims due ones with exactly-once-in-flight semantics,
//! and a dispatcher processes claimed batches under a global per-minute send
//! budget, delegating message composition and delivery to caller-supplied
//! collaborators.
//!
//! # Architecture
//!
//! - [`dal::QueueDAL`] - durable send-task table with atomic claim, stale
//!   recovery, and terminal-state transitions (PostgreSQL `FOR UPDATE SKIP
//!   LOCKED`, SQLite immediate transactions)
//! - [`dal::CampaignDAL`] - campaign definition registry
//! - [`rate_limiter::RateLimiter`] - minute-bucketed shared send counter
//! - [`poller::Poller`] - fixed-interval recover/claim/fan-out driver
//! - [`dispatcher::Dispatcher`] - per-chunk batch sender
//! - [`mail`] - boundary traits for recipient lookup, message composition,
//!   and delivery
//!
//! # Example
//!
//! ```rust,ignore
//! use mailroom::{DispatchConfig, Dispatcher, Poller, RateLimiter, Database, DAL};
//!
//! let database = Database::new("mailroom.db", "", 1);
//! database.run_migrations().await?;
//!
//! let dal = DAL::new(database);
//! let config = DispatchConfig::builder().per_minute_limit(300).build();
//! let dispatcher = Arc::new(Dispatcher::new(
//!     dal.clone(), RateLimiter::new(), directory, composer, sender, config.clone(),
//! ));
//! let poller = Poller::new(dal, dispatcher, config);
//! poller.run_cycle().await?;
//! ```

pub mod config;
pub mod dal;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod mail;
pub mod models;
pub mod poller;
pub mod population;
pub mod rate_limiter;

pub use config::{DispatchConfig, DispatchConfigBuilder};
pub use dal::DAL;
pub use database::{BackendType, Database};
pub use dispatcher::{ChunkOutcome, Dispatcher};
pub use error::{MailError, QueueError};
pub use mail::{
    ComposeKind, ComposeRequest, MailSender, MessageComposer, OutboundMessage, Recipient,
    RecipientDirectory,
};
pub use models::campaign::{Campaign, NewCampaign};
pub use models::queue_task::{QueueTask, TaskStatus};
pub use poller::{CycleOutcome, Poller};
pub use population::populate_campaign;
pub use rate_limiter::RateLimiter;

/// Initializes tracing-based logging for the library.
///
/// Uses `RUST_LOG` when set, falling back to the provided filter directive or
/// `"info"`. Safe to call more than once; later calls are ignored.
pub fn init_logging(default_filter: Option<&str>) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.unwrap_or("info")));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
