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

//! Queue population: turning an audience into send tasks.
//!
//! The audience itself is resolved by the embedding application (the
//! campaign's `audience_query` is opaque here); this module takes the
//! resulting user ids and upserts one task per recipient. Population is
//! idempotent and re-runnable: recipients already served stay `sent`, everyone
//! else is (re)queued against the campaign's `send_at`.

use tracing::{debug, info};

use crate::dal::DAL;
use crate::error::QueueError;
use crate::models::campaign::Campaign;

/// Upserts a `queued` task for every user id in the audience.
///
/// Returns the number of audience members processed. A disabled campaign
/// populates nothing.
pub async fn populate_campaign(
    dal: &DAL,
    campaign: &Campaign,
    user_ids: &[i64],
) -> Result<usize, QueueError> {
    if !campaign.enabled {
        debug!(campaign_key = %campaign.key, "campaign disabled, skipping population");
        return Ok(0);
    }

    let queue = dal.queue();
    for &user_id in user_ids {
        queue
            .upsert_task(&campaign.key, user_id, campaign.send_at)
            .await?;
    }

    info!(
        campaign_key = %campaign.key,
        audience = user_ids.len(),
        "campaign populated"
    );
    Ok(user_ids.len())
}
