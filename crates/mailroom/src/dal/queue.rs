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

//! Queue store: the single source of truth for send-task state.
//!
//! All operations are single round-trip and atomic relative to the status
//! column. Claiming never waits on a row lock (PostgreSQL skips locked rows;
//! SQLite serializes claimers through an immediate write transaction), so
//! throughput degrades gracefully under contention instead of stalling.

mod claiming;
mod state;

use crate::dal::DAL;
use crate::database::schema::send_queue;
use crate::error::QueueError;
use crate::models::queue_task::{NewQueueTask, QueueTask, TaskStatus};
use diesel::prelude::*;

/// Data access for the `send_queue` table.
pub struct QueueDAL<'a> {
    pub(crate) dal: &'a DAL,
}

impl<'a> QueueDAL<'a> {
    /// Creates a new queue DAL borrowing the shared connection pool.
    pub(crate) fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Inserts a `queued` task for `(campaign_key, user_id)`, or refreshes an
    /// existing one.
    ///
    /// The population idempotence contract: an existing `sent` row is left
    /// completely untouched; any other existing row is reset to `queued` with
    /// the new `not_before`, its lock cleared and its `chosen_topic_ids`
    /// preserved. Re-running population for a campaign therefore never
    /// re-mails an already-served recipient and never discards a topic choice.
    pub async fn upsert_task(
        &self,
        campaign_key: &str,
        user_id: i64,
        not_before: Option<chrono::NaiveDateTime>,
    ) -> Result<(), QueueError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.upsert_task_postgres(campaign_key, user_id, not_before)
                .await,
            self.upsert_task_sqlite(campaign_key, user_id, not_before)
                .await
        )
    }

    #[cfg(feature = "postgres")]
    async fn upsert_task_postgres(
        &self,
        campaign_key: &str,
        user_id: i64,
        not_before: Option<chrono::NaiveDateTime>,
    ) -> Result<(), QueueError> {
        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let campaign_key = campaign_key.to_string();
        conn.interact(move |conn| {
            // Single-statement upsert: the WHERE clause on DO UPDATE keeps
            // sent rows untouched, and the update list never mentions
            // chosen_topic_ids, so an existing choice survives.
            diesel::sql_query(
                r#"
                INSERT INTO send_queue
                    (campaign_key, user_id, chosen_topic_ids, status, not_before,
                     attempts, created_at, updated_at)
                VALUES ($1, $2, '[]', 'queued', $3, 0, NOW(), NOW())
                ON CONFLICT (campaign_key, user_id) DO UPDATE
                SET status = 'queued',
                    not_before = EXCLUDED.not_before,
                    locked_at = NULL,
                    updated_at = NOW()
                WHERE send_queue.status <> 'sent'
                "#,
            )
            .bind::<diesel::sql_types::Text, _>(campaign_key)
            .bind::<diesel::sql_types::BigInt, _>(user_id)
            .bind::<diesel::sql_types::Nullable<diesel::sql_types::Timestamp>, _>(not_before)
            .execute(conn)
            .map(|_| ())
        })
        .await
        .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(())
    }

    #[cfg(feature = "sqlite")]
    async fn upsert_task_sqlite(
        &self,
        campaign_key: &str,
        user_id: i64,
        not_before: Option<chrono::NaiveDateTime>,
    ) -> Result<(), QueueError> {
        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let campaign_key = campaign_key.to_string();
        conn.interact(move |conn| {
            // The immediate transaction takes the write lock up front, so the
            // select-then-branch below cannot race another upserter.
            conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                let now = chrono::Utc::now().naive_utc();

                let existing: Option<QueueTask> = send_queue::table
                    .filter(send_queue::campaign_key.eq(&campaign_key))
                    .filter(send_queue::user_id.eq(user_id))
                    .first(conn)
                    .optional()?;

                match existing {
                    Some(task) if task.status == TaskStatus::Sent.as_str() => {
                        // Already served; never regressed.
                    }
                    Some(task) => {
                        diesel::update(send_queue::table.find(task.id))
                            .set((
                                send_queue::status.eq(TaskStatus::Queued.as_str()),
                                send_queue::not_before.eq(not_before),
                                send_queue::locked_at.eq(None::<chrono::NaiveDateTime>),
                                send_queue::updated_at.eq(now),
                            ))
                            .execute(conn)?;
                    }
                    None => {
                        diesel::insert_into(send_queue::table)
                            .values(NewQueueTask::new(&campaign_key, user_id, not_before))
                            .execute(conn)?;
                    }
                }

                Ok(())
            })
        })
        .await
        .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(())
    }

    /// Fetches a task by id.
    pub async fn get_by_id(&self, task_id: i64) -> Result<Option<QueueTask>, QueueError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.get_by_id_postgres(task_id).await,
            self.get_by_id_sqlite(task_id).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn get_by_id_postgres(&self, task_id: i64) -> Result<Option<QueueTask>, QueueError> {
        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let task = conn
            .interact(move |conn| send_queue::table.find(task_id).first(conn).optional())
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(task)
    }

    #[cfg(feature = "sqlite")]
    async fn get_by_id_sqlite(&self, task_id: i64) -> Result<Option<QueueTask>, QueueError> {
        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let task = conn
            .interact(move |conn| send_queue::table.find(task_id).first(conn).optional())
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(task)
    }

    /// Tallies queue rows per status, optionally for a single campaign.
    ///
    /// This is the operator-facing health view: every per-task outcome lands
    /// in `status`/`last_error`, so a status breakdown is the whole story.
    pub async fn status_counts(
        &self,
        campaign_key: Option<&str>,
    ) -> Result<Vec<(String, i64)>, QueueError> {
        let campaign_key = campaign_key.map(|k| k.to_string());
        crate::dispatch_backend!(
            self.dal.backend(),
            self.status_counts_postgres(campaign_key.clone()).await,
            self.status_counts_sqlite(campaign_key).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn status_counts_postgres(
        &self,
        campaign_key: Option<String>,
    ) -> Result<Vec<(String, i64)>, QueueError> {
        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let counts = conn
            .interact(move |conn| match campaign_key {
                Some(key) => send_queue::table
                    .filter(send_queue::campaign_key.eq(key))
                    .group_by(send_queue::status)
                    .select((send_queue::status, diesel::dsl::count_star()))
                    .load::<(String, i64)>(conn),
                None => send_queue::table
                    .group_by(send_queue::status)
                    .select((send_queue::status, diesel::dsl::count_star()))
                    .load::<(String, i64)>(conn),
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(counts)
    }

    #[cfg(feature = "sqlite")]
    async fn status_counts_sqlite(
        &self,
        campaign_key: Option<String>,
    ) -> Result<Vec<(String, i64)>, QueueError> {
        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let counts = conn
            .interact(move |conn| match campaign_key {
                Some(key) => send_queue::table
                    .filter(send_queue::campaign_key.eq(key))
                    .group_by(send_queue::status)
                    .select((send_queue::status, diesel::dsl::count_star()))
                    .load::<(String, i64)>(conn),
                None => send_queue::table
                    .group_by(send_queue::status)
                    .select((send_queue::status, diesel::dsl::count_star()))
                    .load::<(String, i64)>(conn),
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(counts)
    }
}
