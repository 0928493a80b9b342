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

//! Error types for queue operations and mail collaborators.
//!
//! Per-recipient faults (recipient missing, delivery failure, no topic sets)
//! never surface as `Err` from the dispatch loop - they are recorded on the
//! task row itself. The types here cover infrastructure faults: pool
//! exhaustion, database errors, and collaborator transport failures.

use thiserror::Error;

/// Errors raised by queue and campaign store operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Connection pool or interact-closure failure.
    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    /// Underlying database error.
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Malformed persisted JSON (topic sets or chosen topics).
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the external mail collaborators.
#[derive(Debug, Error)]
pub enum MailError {
    /// Recipient directory lookup failed.
    #[error("Recipient directory error: {0}")]
    Directory(String),

    /// Message composition failed.
    #[error("Compose error: {0}")]
    Compose(String),

    /// Transport-level delivery failure.
    #[error("Delivery error: {0}")]
    Delivery(String),
}
