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

//! Claim and stale-recovery operations.
//!
//! Claiming is the exactly-once-in-flight guarantee: concurrent claimers
//! never select overlapping rows. PostgreSQL achieves this with `FOR UPDATE
//! SKIP LOCKED`; SQLite acquires the write lock at transaction start, which
//! serializes claim attempts instead of interleaving them.

use super::QueueDAL;
use crate::database::schema::send_queue;
use crate::error::QueueError;
use crate::models::queue_task::TaskStatus;
use diesel::prelude::*;

impl<'a> QueueDAL<'a> {
    /// Atomically claims up to `limit` due tasks, oldest id first.
    ///
    /// Each claimed row transitions `queued -> processing` with `locked_at`
    /// set to now and `attempts` incremented. Rows locked by a concurrent
    /// claimer are skipped, never waited on. Returns the claimed ids in
    /// ascending order.
    pub async fn claim_due(
        &self,
        limit: usize,
        campaign_key: Option<&str>,
    ) -> Result<Vec<i64>, QueueError> {
        let campaign_key = campaign_key.map(|k| k.to_string());
        crate::dispatch_backend!(
            self.dal.backend(),
            self.claim_due_postgres(limit, campaign_key.clone()).await,
            self.claim_due_sqlite(limit, campaign_key).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn claim_due_postgres(
        &self,
        limit: usize,
        campaign_key: Option<String>,
    ) -> Result<Vec<i64>, QueueError> {
        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let limit = limit as i64;

        #[derive(Debug, QueryableByName)]
        #[diesel(check_for_backend(diesel::pg::Pg))]
        struct ClaimedId {
            #[diesel(sql_type = diesel::sql_types::BigInt)]
            id: i64,
        }

        let mut ids: Vec<i64> = conn
            .interact(move |conn| {
                // Select-for-update with SKIP LOCKED: rows claimed by another
                // worker in the same instant are passed over, so the claim
                // never blocks and never overlaps.
                let claimed: Vec<ClaimedId> = match campaign_key {
                    Some(key) => diesel::sql_query(format!(
                        r#"
                        UPDATE send_queue
                        SET status = 'processing', locked_at = NOW(),
                            attempts = attempts + 1, updated_at = NOW()
                        WHERE id IN (
                            SELECT id FROM send_queue
                            WHERE status = 'queued'
                              AND (not_before IS NULL OR not_before <= NOW())
                              AND campaign_key = $1
                            ORDER BY id ASC
                            LIMIT {}
                            FOR UPDATE SKIP LOCKED
                        )
                        RETURNING id
                        "#,
                        limit
                    ))
                    .bind::<diesel::sql_types::Text, _>(key)
                    .load(conn)?,
                    None => diesel::sql_query(format!(
                        r#"
                        UPDATE send_queue
                        SET status = 'processing', locked_at = NOW(),
                            attempts = attempts + 1, updated_at = NOW()
                        WHERE id IN (
                            SELECT id FROM send_queue
                            WHERE status = 'queued'
                              AND (not_before IS NULL OR not_before <= NOW())
                            ORDER BY id ASC
                            LIMIT {}
                            FOR UPDATE SKIP LOCKED
                        )
                        RETURNING id
                        "#,
                        limit
                    ))
                    .load(conn)?,
                };

                Ok::<_, diesel::result::Error>(claimed.into_iter().map(|row| row.id).collect())
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        // RETURNING order is unspecified; chunks must preserve id order.
        ids.sort_unstable();
        Ok(ids)
    }

    #[cfg(feature = "sqlite")]
    async fn claim_due_sqlite(
        &self,
        limit: usize,
        campaign_key: Option<String>,
    ) -> Result<Vec<i64>, QueueError> {
        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let limit = limit as i64;

        let ids = conn
            .interact(move |conn| {
                // The immediate transaction acquires the write lock before the
                // SELECT, closing the TOCTOU window between select and update.
                conn.immediate_transaction::<Vec<i64>, diesel::result::Error, _>(|conn| {
                    let now = chrono::Utc::now().naive_utc();

                    let mut query = send_queue::table
                        .filter(send_queue::status.eq(TaskStatus::Queued.as_str()))
                        .filter(
                            send_queue::not_before
                                .is_null()
                                .or(send_queue::not_before.le(now)),
                        )
                        .order(send_queue::id.asc())
                        .limit(limit)
                        .select(send_queue::id)
                        .into_boxed();
                    if let Some(key) = campaign_key {
                        query = query.filter(send_queue::campaign_key.eq(key));
                    }

                    let ids: Vec<i64> = query.load(conn)?;
                    if ids.is_empty() {
                        return Ok(ids);
                    }

                    diesel::update(send_queue::table.filter(send_queue::id.eq_any(&ids)))
                        .set((
                            send_queue::status.eq(TaskStatus::Processing.as_str()),
                            send_queue::locked_at.eq(Some(now)),
                            send_queue::attempts.eq(send_queue::attempts + 1),
                            send_queue::updated_at.eq(now),
                        ))
                        .execute(conn)?;

                    Ok(ids)
                })
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(ids)
    }

    /// Requeues `processing` rows whose lock is older than the cutoff.
    ///
    /// This is the repair pass for crashed or hung workers: affected rows go
    /// back to `queued` with the lock cleared and a recovery note appended to
    /// `last_error` (never overwriting the existing trail, so repeated
    /// staleness stays visible). Returns the number of rows recovered.
    pub async fn requeue_stale(
        &self,
        older_than_minutes: i64,
        campaign_key: Option<&str>,
    ) -> Result<usize, QueueError> {
        let campaign_key = campaign_key.map(|k| k.to_string());
        crate::dispatch_backend!(
            self.dal.backend(),
            self.requeue_stale_postgres(older_than_minutes, campaign_key.clone())
                .await,
            self.requeue_stale_sqlite(older_than_minutes, campaign_key)
                .await
        )
    }

    #[cfg(feature = "postgres")]
    async fn requeue_stale_postgres(
        &self,
        older_than_minutes: i64,
        campaign_key: Option<String>,
    ) -> Result<usize, QueueError> {
        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let cutoff = chrono::Utc::now().naive_utc() - chrono::Duration::minutes(older_than_minutes);
        let note = stale_note(older_than_minutes);

        let affected = conn
            .interact(move |conn| match campaign_key {
                Some(key) => diesel::sql_query(
                    r#"
                    UPDATE send_queue
                    SET status = 'queued', locked_at = NULL, updated_at = NOW(),
                        last_error = COALESCE(last_error || ' | ', '') || $1
                    WHERE status = 'processing'
                      AND locked_at IS NOT NULL AND locked_at < $2
                      AND campaign_key = $3
                    "#,
                )
                .bind::<diesel::sql_types::Text, _>(note)
                .bind::<diesel::sql_types::Timestamp, _>(cutoff)
                .bind::<diesel::sql_types::Text, _>(key)
                .execute(conn),
                None => diesel::sql_query(
                    r#"
                    UPDATE send_queue
                    SET status = 'queued', locked_at = NULL, updated_at = NOW(),
                        last_error = COALESCE(last_error || ' | ', '') || $1
                    WHERE status = 'processing'
                      AND locked_at IS NOT NULL AND locked_at < $2
                    "#,
                )
                .bind::<diesel::sql_types::Text, _>(note)
                .bind::<diesel::sql_types::Timestamp, _>(cutoff)
                .execute(conn),
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(affected)
    }

    #[cfg(feature = "sqlite")]
    async fn requeue_stale_sqlite(
        &self,
        older_than_minutes: i64,
        campaign_key: Option<String>,
    ) -> Result<usize, QueueError> {
        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let now = chrono::Utc::now().naive_utc();
        let cutoff = now - chrono::Duration::minutes(older_than_minutes);
        let note = stale_note(older_than_minutes);

        let affected = conn
            .interact(move |conn| match campaign_key {
                Some(key) => diesel::sql_query(
                    r#"
                    UPDATE send_queue
                    SET status = 'queued', locked_at = NULL, updated_at = ?,
                        last_error = COALESCE(last_error || ' | ', '') || ?
                    WHERE status = 'processing'
                      AND locked_at IS NOT NULL AND locked_at < ?
                      AND campaign_key = ?
                    "#,
                )
                .bind::<diesel::sql_types::Timestamp, _>(now)
                .bind::<diesel::sql_types::Text, _>(note)
                .bind::<diesel::sql_types::Timestamp, _>(cutoff)
                .bind::<diesel::sql_types::Text, _>(key)
                .execute(conn),
                None => diesel::sql_query(
                    r#"
                    UPDATE send_queue
                    SET status = 'queued', locked_at = NULL, updated_at = ?,
                        last_error = COALESCE(last_error || ' | ', '') || ?
                    WHERE status = 'processing'
                      AND locked_at IS NOT NULL AND locked_at < ?
                    "#,
                )
                .bind::<diesel::sql_types::Timestamp, _>(now)
                .bind::<diesel::sql_types::Text, _>(note)
                .bind::<diesel::sql_types::Timestamp, _>(cutoff)
                .execute(conn),
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(affected)
    }
}

/// Builds the diagnostic appended to `last_error` on stale recovery.
fn stale_note(older_than_minutes: i64) -> String {
    format!(
        "requeued: stale processing lock exceeded {} minutes",
        older_than_minutes
    )
}
