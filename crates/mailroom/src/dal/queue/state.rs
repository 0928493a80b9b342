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

//! Terminal and near-terminal state transitions.
//!
//! Every transition here is guarded on the row still being `processing`. A
//! worker that lost a race (the row was already handled, or stale recovery
//! reclaimed it) simply affects zero rows; callers treat that as a silent
//! skip, not an error.

use super::QueueDAL;
use crate::database::schema::send_queue;
use crate::error::QueueError;
use crate::models::queue_task::TaskStatus;
use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::sql_types::{Nullable, Text};

impl<'a> QueueDAL<'a> {
    /// Marks a `processing` task as sent, recording `sent_at`.
    pub async fn mark_sent(&self, task_id: i64) -> Result<(), QueueError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.mark_sent_postgres(task_id).await,
            self.mark_sent_sqlite(task_id).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn mark_sent_postgres(&self, task_id: i64) -> Result<(), QueueError> {
        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        conn.interact(move |conn| {
            let now = chrono::Utc::now().naive_utc();
            diesel::update(
                send_queue::table
                    .filter(send_queue::id.eq(task_id))
                    .filter(send_queue::status.eq(TaskStatus::Processing.as_str())),
            )
            .set((
                send_queue::status.eq(TaskStatus::Sent.as_str()),
                send_queue::sent_at.eq(Some(now)),
                send_queue::locked_at.eq(None::<chrono::NaiveDateTime>),
                send_queue::updated_at.eq(now),
            ))
            .execute(conn)
            .map(|_| ())
        })
        .await
        .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(())
    }

    #[cfg(feature = "sqlite")]
    async fn mark_sent_sqlite(&self, task_id: i64) -> Result<(), QueueError> {
        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        conn.interact(move |conn| {
            let now = chrono::Utc::now().naive_utc();
            diesel::update(
                send_queue::table
                    .filter(send_queue::id.eq(task_id))
                    .filter(send_queue::status.eq(TaskStatus::Processing.as_str())),
            )
            .set((
                send_queue::status.eq(TaskStatus::Sent.as_str()),
                send_queue::sent_at.eq(Some(now)),
                send_queue::locked_at.eq(None::<chrono::NaiveDateTime>),
                send_queue::updated_at.eq(now),
            ))
            .execute(conn)
            .map(|_| ())
        })
        .await
        .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(())
    }

    /// Marks a `processing` task as failed, overwriting `last_error` with the
    /// diagnostic.
    pub async fn mark_failed(&self, task_id: i64, reason: &str) -> Result<(), QueueError> {
        let reason = reason.to_string();
        crate::dispatch_backend!(
            self.dal.backend(),
            self.mark_failed_postgres(task_id, reason.clone()).await,
            self.mark_failed_sqlite(task_id, reason).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn mark_failed_postgres(&self, task_id: i64, reason: String) -> Result<(), QueueError> {
        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        conn.interact(move |conn| {
            let now = chrono::Utc::now().naive_utc();
            diesel::update(
                send_queue::table
                    .filter(send_queue::id.eq(task_id))
                    .filter(send_queue::status.eq(TaskStatus::Processing.as_str())),
            )
            .set((
                send_queue::status.eq(TaskStatus::Failed.as_str()),
                send_queue::last_error.eq(Some(reason)),
                send_queue::locked_at.eq(None::<chrono::NaiveDateTime>),
                send_queue::updated_at.eq(now),
            ))
            .execute(conn)
            .map(|_| ())
        })
        .await
        .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(())
    }

    #[cfg(feature = "sqlite")]
    async fn mark_failed_sqlite(&self, task_id: i64, reason: String) -> Result<(), QueueError> {
        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        conn.interact(move |conn| {
            let now = chrono::Utc::now().naive_utc();
            diesel::update(
                send_queue::table
                    .filter(send_queue::id.eq(task_id))
                    .filter(send_queue::status.eq(TaskStatus::Processing.as_str())),
            )
            .set((
                send_queue::status.eq(TaskStatus::Failed.as_str()),
                send_queue::last_error.eq(Some(reason)),
                send_queue::locked_at.eq(None::<chrono::NaiveDateTime>),
                send_queue::updated_at.eq(now),
            ))
            .execute(conn)
            .map(|_| ())
        })
        .await
        .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(())
    }

    /// Marks a `processing` task as skipped because the recipient opted out.
    pub async fn mark_skipped_unsubscribed(&self, task_id: i64) -> Result<(), QueueError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.mark_skipped_postgres(task_id).await,
            self.mark_skipped_sqlite(task_id).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn mark_skipped_postgres(&self, task_id: i64) -> Result<(), QueueError> {
        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        conn.interact(move |conn| {
            let now = chrono::Utc::now().naive_utc();
            diesel::update(
                send_queue::table
                    .filter(send_queue::id.eq(task_id))
                    .filter(send_queue::status.eq(TaskStatus::Processing.as_str())),
            )
            .set((
                send_queue::status.eq(TaskStatus::SkippedUnsubscribed.as_str()),
                send_queue::locked_at.eq(None::<chrono::NaiveDateTime>),
                send_queue::updated_at.eq(now),
            ))
            .execute(conn)
            .map(|_| ())
        })
        .await
        .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(())
    }

    #[cfg(feature = "sqlite")]
    async fn mark_skipped_sqlite(&self, task_id: i64) -> Result<(), QueueError> {
        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        conn.interact(move |conn| {
            let now = chrono::Utc::now().naive_utc();
            diesel::update(
                send_queue::table
                    .filter(send_queue::id.eq(task_id))
                    .filter(send_queue::status.eq(TaskStatus::Processing.as_str())),
            )
            .set((
                send_queue::status.eq(TaskStatus::SkippedUnsubscribed.as_str()),
                send_queue::locked_at.eq(None::<chrono::NaiveDateTime>),
                send_queue::updated_at.eq(now),
            ))
            .execute(conn)
            .map(|_| ())
        })
        .await
        .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(())
    }

    /// Returns still-`processing` tasks to `queued` with a note appended to
    /// `last_error` (the throttle giveback path). Returns how many rows were
    /// actually returned.
    pub async fn requeue_with_note(&self, task_ids: &[i64], note: &str) -> Result<usize, QueueError> {
        let task_ids = task_ids.to_vec();
        let note = note.to_string();
        crate::dispatch_backend!(
            self.dal.backend(),
            self.requeue_with_note_postgres(task_ids.clone(), note.clone())
                .await,
            self.requeue_with_note_sqlite(task_ids, note).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn requeue_with_note_postgres(
        &self,
        task_ids: Vec<i64>,
        note: String,
    ) -> Result<usize, QueueError> {
        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let affected = conn
            .interact(move |conn| {
                let now = chrono::Utc::now().naive_utc();
                diesel::update(
                    send_queue::table
                        .filter(send_queue::id.eq_any(task_ids))
                        .filter(send_queue::status.eq(TaskStatus::Processing.as_str())),
                )
                .set((
                    send_queue::status.eq(TaskStatus::Queued.as_str()),
                    send_queue::locked_at.eq(None::<chrono::NaiveDateTime>),
                    send_queue::updated_at.eq(now),
                    send_queue::last_error.eq(sql::<Nullable<Text>>(
                        "COALESCE(last_error || ' | ', '') || ",
                    )
                    .bind::<Text, _>(note)),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(affected)
    }

    #[cfg(feature = "sqlite")]
    async fn requeue_with_note_sqlite(
        &self,
        task_ids: Vec<i64>,
        note: String,
    ) -> Result<usize, QueueError> {
        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let affected = conn
            .interact(move |conn| {
                let now = chrono::Utc::now().naive_utc();
                diesel::update(
                    send_queue::table
                        .filter(send_queue::id.eq_any(task_ids))
                        .filter(send_queue::status.eq(TaskStatus::Processing.as_str())),
                )
                .set((
                    send_queue::status.eq(TaskStatus::Queued.as_str()),
                    send_queue::locked_at.eq(None::<chrono::NaiveDateTime>),
                    send_queue::updated_at.eq(now),
                    send_queue::last_error.eq(sql::<Nullable<Text>>(
                        "COALESCE(last_error || ' | ', '') || ",
                    )
                    .bind::<Text, _>(note)),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(affected)
    }

    /// Persists the topic selection for a task, exactly once.
    ///
    /// The write lands only while the row is still `processing` and no
    /// selection exists yet, so a late or duplicate writer never clobbers a
    /// concurrently-succeeded choice. Returns whether this call's write won.
    pub async fn set_chosen_topics(
        &self,
        task_id: i64,
        topic_ids: &[i64],
    ) -> Result<bool, QueueError> {
        let payload = serde_json::to_string(topic_ids)?;
        crate::dispatch_backend!(
            self.dal.backend(),
            self.set_chosen_topics_postgres(task_id, payload.clone())
                .await,
            self.set_chosen_topics_sqlite(task_id, payload).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn set_chosen_topics_postgres(
        &self,
        task_id: i64,
        payload: String,
    ) -> Result<bool, QueueError> {
        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let affected = conn
            .interact(move |conn| {
                let now = chrono::Utc::now().naive_utc();
                diesel::update(
                    send_queue::table
                        .filter(send_queue::id.eq(task_id))
                        .filter(send_queue::status.eq(TaskStatus::Processing.as_str()))
                        .filter(send_queue::chosen_topic_ids.eq("[]")),
                )
                .set((
                    send_queue::chosen_topic_ids.eq(payload),
                    send_queue::updated_at.eq(now),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(affected > 0)
    }

    #[cfg(feature = "sqlite")]
    async fn set_chosen_topics_sqlite(
        &self,
        task_id: i64,
        payload: String,
    ) -> Result<bool, QueueError> {
        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let affected = conn
            .interact(move |conn| {
                let now = chrono::Utc::now().naive_utc();
                diesel::update(
                    send_queue::table
                        .filter(send_queue::id.eq(task_id))
                        .filter(send_queue::status.eq(TaskStatus::Processing.as_str()))
                        .filter(send_queue::chosen_topic_ids.eq("[]")),
                )
                .set((
                    send_queue::chosen_topic_ids.eq(payload),
                    send_queue::updated_at.eq(now),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(affected > 0)
    }
}
