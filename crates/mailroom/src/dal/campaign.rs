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

//! Campaign registry operations.
//!
//! Campaigns are administered rarely and read often; dispatch only ever does
//! `get_by_key` lookups, so no caching layer sits in front of this table.

use crate::dal::DAL;
use crate::database::schema::campaigns;
use crate::error::QueueError;
use crate::models::campaign::{Campaign, NewCampaign};
use diesel::prelude::*;

/// Data access for the `campaigns` table.
pub struct CampaignDAL<'a> {
    dal: &'a DAL,
}

impl<'a> CampaignDAL<'a> {
    /// Creates a new campaign DAL borrowing the shared connection pool.
    pub(crate) fn new(dal: &'a DAL) -> Self {
        Self { dal }
    }

    /// Inserts a campaign definition and returns the stored row.
    pub async fn create(&self, new_campaign: NewCampaign) -> Result<Campaign, QueueError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.create_postgres(new_campaign).await,
            self.create_sqlite(new_campaign).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn create_postgres(&self, new_campaign: NewCampaign) -> Result<Campaign, QueueError> {
        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let campaign = conn
            .interact(move |conn| {
                diesel::insert_into(campaigns::table)
                    .values(&new_campaign)
                    .get_result::<Campaign>(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(campaign)
    }

    #[cfg(feature = "sqlite")]
    async fn create_sqlite(&self, new_campaign: NewCampaign) -> Result<Campaign, QueueError> {
        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let campaign = conn
            .interact(move |conn| {
                let key = new_campaign.key.clone();
                diesel::insert_into(campaigns::table)
                    .values(&new_campaign)
                    .execute(conn)?;
                campaigns::table
                    .filter(campaigns::key.eq(key))
                    .first::<Campaign>(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(campaign)
    }

    /// Looks up a campaign by its unique key.
    pub async fn get_by_key(&self, key: &str) -> Result<Option<Campaign>, QueueError> {
        let key = key.to_string();
        crate::dispatch_backend!(
            self.dal.backend(),
            self.get_by_key_postgres(key.clone()).await,
            self.get_by_key_sqlite(key).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn get_by_key_postgres(&self, key: String) -> Result<Option<Campaign>, QueueError> {
        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let campaign = conn
            .interact(move |conn| {
                campaigns::table
                    .filter(campaigns::key.eq(key))
                    .first::<Campaign>(conn)
                    .optional()
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(campaign)
    }

    #[cfg(feature = "sqlite")]
    async fn get_by_key_sqlite(&self, key: String) -> Result<Option<Campaign>, QueueError> {
        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let campaign = conn
            .interact(move |conn| {
                campaigns::table
                    .filter(campaigns::key.eq(key))
                    .first::<Campaign>(conn)
                    .optional()
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(campaign)
    }

    /// Lists enabled campaigns, oldest first.
    pub async fn list_enabled(&self) -> Result<Vec<Campaign>, QueueError> {
        crate::dispatch_backend!(
            self.dal.backend(),
            self.list_enabled_postgres().await,
            self.list_enabled_sqlite().await
        )
    }

    #[cfg(feature = "postgres")]
    async fn list_enabled_postgres(&self) -> Result<Vec<Campaign>, QueueError> {
        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let rows = conn
            .interact(|conn| {
                campaigns::table
                    .filter(campaigns::enabled.eq(true))
                    .order(campaigns::id.asc())
                    .load::<Campaign>(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(rows)
    }

    #[cfg(feature = "sqlite")]
    async fn list_enabled_sqlite(&self) -> Result<Vec<Campaign>, QueueError> {
        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let rows = conn
            .interact(|conn| {
                campaigns::table
                    .filter(campaigns::enabled.eq(true))
                    .order(campaigns::id.asc())
                    .load::<Campaign>(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(rows)
    }

    /// Flips a campaign's enabled flag. Returns whether the key existed.
    pub async fn set_enabled(&self, key: &str, enabled: bool) -> Result<bool, QueueError> {
        let key = key.to_string();
        crate::dispatch_backend!(
            self.dal.backend(),
            self.set_enabled_postgres(key.clone(), enabled).await,
            self.set_enabled_sqlite(key, enabled).await
        )
    }

    #[cfg(feature = "postgres")]
    async fn set_enabled_postgres(&self, key: String, enabled: bool) -> Result<bool, QueueError> {
        let conn = self
            .dal
            .database
            .get_postgres_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let affected = conn
            .interact(move |conn| {
                diesel::update(campaigns::table.filter(campaigns::key.eq(key)))
                    .set((
                        campaigns::enabled.eq(enabled),
                        campaigns::updated_at.eq(chrono::Utc::now().naive_utc()),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(affected > 0)
    }

    #[cfg(feature = "sqlite")]
    async fn set_enabled_sqlite(&self, key: String, enabled: bool) -> Result<bool, QueueError> {
        let conn = self
            .dal
            .database
            .get_sqlite_connection()
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?;

        let affected = conn
            .interact(move |conn| {
                diesel::update(campaigns::table.filter(campaigns::key.eq(key)))
                    .set((
                        campaigns::enabled.eq(enabled),
                        campaigns::updated_at.eq(chrono::Utc::now().naive_utc()),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(affected > 0)
    }
}
