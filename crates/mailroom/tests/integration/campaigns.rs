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

//! Campaign registry and queue population.

use crate::fixtures::*;
use mailroom::{populate_campaign, NewCampaign, TaskStatus};

#[tokio::test]
async fn test_campaign_registry_roundtrip() {
    let db = test_database().await;
    let dal = &db.dal;

    let created = seed_campaign(dal, "blast_x", &[vec![1, 2, 3], vec![4, 5]]).await;
    assert!(created.enabled);
    assert_eq!(
        created.topic_sets().unwrap(),
        vec![vec![1, 2, 3], vec![4, 5]]
    );

    let fetched = dal.campaign().get_by_key("blast_x").await.unwrap().unwrap();
    assert_eq!(fetched.id, created.id);
    assert!(dal.campaign().get_by_key("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_set_enabled_and_listing() {
    let db = test_database().await;
    let dal = &db.dal;
    seed_campaign(dal, "blast_x", &[vec![1]]).await;
    seed_campaign(dal, "blast_y", &[vec![2]]).await;

    assert!(dal.campaign().set_enabled("blast_x", false).await.unwrap());
    assert!(!dal.campaign().set_enabled("nope", false).await.unwrap());

    let enabled = dal.campaign().list_enabled().await.unwrap();
    let keys: Vec<&str> = enabled.iter().map(|c| c.key.as_str()).collect();
    assert_eq!(keys, vec!["blast_y"]);
}

#[tokio::test]
async fn test_populate_upserts_audience() {
    let db = test_database().await;
    let dal = &db.dal;
    let campaign = seed_campaign(dal, "blast_x", &[vec![1]]).await;

    let populated = populate_campaign(dal, &campaign, &[1, 2, 3]).await.unwrap();
    assert_eq!(populated, 3);

    // Re-running is idempotent: still one row per recipient.
    populate_campaign(dal, &campaign, &[1, 2, 3]).await.unwrap();
    let counts = dal.queue().status_counts(Some("blast_x")).await.unwrap();
    assert_eq!(counts, vec![("queued".to_string(), 3)]);
}

#[tokio::test]
async fn test_populate_applies_send_at_schedule() {
    let db = test_database().await;
    let dal = &db.dal;

    let send_at = chrono::Utc::now().naive_utc() + chrono::Duration::hours(2);
    let new = NewCampaign::new("scheduled", "SELECT id AS user_id FROM users", &[vec![1]], Some(send_at)).unwrap();
    let campaign = dal.campaign().create(new).await.unwrap();

    populate_campaign(dal, &campaign, &[42]).await.unwrap();

    let id = task_id(dal, "scheduled", 42).await;
    let task = dal.queue().get_by_id(id).await.unwrap().unwrap();
    assert_eq!(task.not_before, Some(send_at));

    // Not yet due, so a claim pass leaves it queued.
    let claimed = dal.queue().claim_due(10, None).await.unwrap();
    assert!(claimed.is_empty());
    assert_eq!(task.task_status(), Some(TaskStatus::Queued));
}

#[tokio::test]
async fn test_populate_skips_disabled_campaign() {
    let db = test_database().await;
    let dal = &db.dal;
    let mut campaign = seed_campaign(dal, "blast_x", &[vec![1]]).await;
    dal.campaign().set_enabled("blast_x", false).await.unwrap();
    campaign.enabled = false;

    let populated = populate_campaign(dal, &campaign, &[1, 2]).await.unwrap();
    assert_eq!(populated, 0);

    let counts = dal.queue().status_counts(Some("blast_x")).await.unwrap();
    assert!(counts.is_empty());
}
