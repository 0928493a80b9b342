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

//! Queue Task Model
//!
//! One row per `(campaign_key, user_id)` pair: a recipient's pending,
//! in-flight, or terminal send unit for a campaign. The ascending `id`
//! provides oldest-first claim fairness; `chosen_topic_ids`, once written, is
//! never recomputed so retries compose the same message.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status state machine for a queue task.
///
/// `queued -> processing` on claim; `processing -> sent | failed |
/// skipped_unsubscribed` on dispatch; `processing -> queued` on throttle
/// giveback or stale recovery. `sent` is never regressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Eligible for claiming once `not_before` has passed
    Queued,
    /// Claimed by a dispatch worker, `locked_at` set
    Processing,
    /// Delivered successfully
    Sent,
    /// Terminal failure, diagnostic in `last_error`
    Failed,
    /// Recipient had opted out at dispatch time
    SkippedUnsubscribed,
}

impl TaskStatus {
    /// Returns the status as its persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Sent => "sent",
            TaskStatus::Failed => "failed",
            TaskStatus::SkippedUnsubscribed => "skipped_unsubscribed",
        }
    }

    /// Parses a persisted status string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(TaskStatus::Queued),
            "processing" => Some(TaskStatus::Processing),
            "sent" => Some(TaskStatus::Sent),
            "failed" => Some(TaskStatus::Failed),
            "skipped_unsubscribed" => Some(TaskStatus::SkippedUnsubscribed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Represents a queued send task record in the database.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::database::schema::send_queue)]
pub struct QueueTask {
    /// Unique identifier; claim ordering is by ascending id
    pub id: i64,
    /// Key of the campaign this task belongs to
    pub campaign_key: String,
    /// Recipient identifier
    pub user_id: i64,
    /// JSON array of chosen topic ids; `[]` until selection is made
    pub chosen_topic_ids: String,
    /// Current status (see [`TaskStatus`])
    pub status: String,
    /// Earliest claim time; null means immediately due
    pub not_before: Option<NaiveDateTime>,
    /// Set on claim, cleared on any terminal or re-queue transition
    pub locked_at: Option<NaiveDateTime>,
    /// Incremented on every claim
    pub attempts: i32,
    /// Diagnostic trail; appended on re-queue, overwritten on hard failure
    pub last_error: Option<String>,
    /// Set only on successful send
    pub sent_at: Option<NaiveDateTime>,
    /// Timestamp when the task was created
    pub created_at: NaiveDateTime,
    /// Timestamp when the task was last updated
    pub updated_at: NaiveDateTime,
}

impl QueueTask {
    /// Returns the parsed status, if it is a known value.
    pub fn task_status(&self) -> Option<TaskStatus> {
        TaskStatus::parse(&self.status)
    }

    /// True when the task is currently claimed by a worker.
    pub fn is_processing(&self) -> bool {
        self.status == TaskStatus::Processing.as_str()
    }

    /// Decodes the chosen topic ids from their JSON representation.
    pub fn chosen_topic_ids(&self) -> Result<Vec<i64>, serde_json::Error> {
        serde_json::from_str(&self.chosen_topic_ids)
    }

    /// True once a topic selection has been persisted for this task.
    pub fn has_chosen_topics(&self) -> bool {
        !matches!(self.chosen_topic_ids.trim(), "" | "[]")
    }
}

/// Represents a new queue task to be inserted into the database.
#[derive(Debug, Insertable)]
#[diesel(table_name = crate::database::schema::send_queue)]
pub struct NewQueueTask {
    /// Key of the campaign this task belongs to
    pub campaign_key: String,
    /// Recipient identifier
    pub user_id: i64,
    /// Initial topic selection (always `[]`)
    pub chosen_topic_ids: String,
    /// Initial status (always `queued`)
    pub status: String,
    /// Earliest claim time
    pub not_before: Option<NaiveDateTime>,
    /// Initial attempt count (always 0)
    pub attempts: i32,
    /// Creation timestamp
    pub created_at: NaiveDateTime,
    /// Last-update timestamp
    pub updated_at: NaiveDateTime,
}

impl NewQueueTask {
    /// Builds a fresh `queued` task for a recipient.
    pub fn new(campaign_key: &str, user_id: i64, not_before: Option<NaiveDateTime>) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            campaign_key: campaign_key.to_string(),
            user_id,
            chosen_topic_ids: "[]".to_string(),
            status: TaskStatus::Queued.as_str().to_string(),
            not_before,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
