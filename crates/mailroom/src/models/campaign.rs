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

//! Campaign Definition Model
//!
//! A campaign is an admin-defined audience (an opaque, externally validated
//! query returning user ids) plus up to three candidate topic sets. The core
//! never executes or mutates the audience query; it only reads campaign rows
//! to resolve topic sets and scheduling metadata at dispatch time.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// Represents a campaign definition record in the database.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::database::schema::campaigns)]
pub struct Campaign {
    /// Unique identifier for the campaign row
    pub id: i64,
    /// Unique string key referenced by queue tasks
    pub key: String,
    /// Opaque audience query text (validated and executed elsewhere)
    pub audience_query: String,
    /// JSON array of 1-3 ordered topic-id sets, e.g. `[[1,2,3],[4,5]]`
    pub topic_sets: String,
    /// Optional scheduled send time; tasks are immediately due when absent
    pub send_at: Option<NaiveDateTime>,
    /// Advisory gate checked at population time
    pub enabled: bool,
    /// Timestamp when the campaign was created
    pub created_at: NaiveDateTime,
    /// Timestamp when the campaign was last updated
    pub updated_at: NaiveDateTime,
}

impl Campaign {
    /// Decodes the configured topic sets from their JSON representation.
    pub fn topic_sets(&self) -> Result<Vec<Vec<i64>>, serde_json::Error> {
        serde_json::from_str(&self.topic_sets)
    }
}

/// Represents a new campaign definition to be inserted into the database.
#[derive(Debug, Insertable)]
#[diesel(table_name = crate::database::schema::campaigns)]
pub struct NewCampaign {
    /// Unique string key referenced by queue tasks
    pub key: String,
    /// Opaque audience query text (validated elsewhere)
    pub audience_query: String,
    /// JSON array of 1-3 ordered topic-id sets
    pub topic_sets: String,
    /// Optional scheduled send time
    pub send_at: Option<NaiveDateTime>,
    /// Whether the campaign is live
    pub enabled: bool,
    /// Creation timestamp
    pub created_at: NaiveDateTime,
    /// Last-update timestamp
    pub updated_at: NaiveDateTime,
}

impl NewCampaign {
    /// Builds a new enabled campaign with the given key, audience query, and
    /// topic sets.
    pub fn new(
        key: &str,
        audience_query: &str,
        topic_sets: &[Vec<i64>],
        send_at: Option<NaiveDateTime>,
    ) -> Result<Self, serde_json::Error> {
        let now = chrono::Utc::now().naive_utc();
        Ok(Self {
            key: key.to_string(),
            audience_query: audience_query.to_string(),
            topic_sets: serde_json::to_string(topic_sets)?,
            send_at,
            enabled: true,
            created_at: now,
            updated_at: now,
        })
    }
}
