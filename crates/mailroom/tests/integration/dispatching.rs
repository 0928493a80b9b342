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

//! Dispatcher behavior: topic selection, throttling, and per-task outcomes.

use crate::fixtures::*;
use mailroom::{DispatchConfig, RateLimiter, TaskStatus};

#[tokio::test]
async fn test_dispatch_sends_one_configured_topic_set() {
    let db = test_database().await;
    let dal = &db.dal;
    seed_campaign(dal, "blast_x", &[vec![1, 2, 3], vec![4, 5]]).await;
    let id = seed_task(dal, "blast_x", 42).await;
    let claimed = dal.queue().claim_due(10, None).await.unwrap();

    let rig = build_rig(dal, FakeDirectory::with_users(&[42]), DispatchConfig::default());
    let before = rig.limiter.read(RateLimiter::current_bucket());
    let outcome = rig.dispatcher.process_chunk(&claimed).await.unwrap();

    assert_eq!(outcome.sent, 1);
    assert_eq!(outcome.failed, 0);

    let task = dal.queue().get_by_id(id).await.unwrap().unwrap();
    assert_eq!(task.task_status(), Some(TaskStatus::Sent));
    assert!(task.sent_at.is_some());
    assert!(task.locked_at.is_none());

    // The choice is one of the configured sets, whole and unmodified.
    let chosen = task.chosen_topic_ids().unwrap();
    assert!(chosen == vec![1, 2, 3] || chosen == vec![4, 5]);

    let delivered = rig.sender.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].to, "user42@example.com");

    // Exactly one send counted against the minute budget.
    assert_eq!(rig.limiter.read(RateLimiter::current_bucket()), before + 1);
}

#[tokio::test]
async fn test_existing_topic_choice_is_reused() {
    let db = test_database().await;
    let dal = &db.dal;
    seed_campaign(dal, "blast_x", &[vec![1, 2, 3], vec![4, 5]]).await;
    let id = seed_task(dal, "blast_x", 42).await;

    dal.queue().claim_due(10, None).await.unwrap();
    assert!(dal.queue().set_chosen_topics(id, &[4, 5]).await.unwrap());
    dal.queue()
        .requeue_with_note(&[id], "throttled")
        .await
        .unwrap();
    let claimed = dal.queue().claim_due(10, None).await.unwrap();

    let rig = build_rig(dal, FakeDirectory::with_users(&[42]), DispatchConfig::default());
    let outcome = rig.dispatcher.process_chunk(&claimed).await.unwrap();
    assert_eq!(outcome.sent, 1);

    // The retry composed against the persisted choice, not a fresh draw.
    assert_eq!(rig.composer.requests(), vec![(42, vec![4, 5])]);
}

#[tokio::test]
async fn test_throttle_returns_remainder_to_queue() {
    let db = test_database().await;
    let dal = &db.dal;
    seed_campaign(dal, "blast_x", &[vec![1]]).await;
    let first = seed_task(dal, "blast_x", 1).await;
    let second = seed_task(dal, "blast_x", 2).await;
    let third = seed_task(dal, "blast_x", 3).await;
    let claimed = dal.queue().claim_due(10, None).await.unwrap();

    let config = DispatchConfig::builder().per_minute_limit(1).build();
    let rig = build_rig(dal, FakeDirectory::with_users(&[1, 2, 3]), config);
    let outcome = rig.dispatcher.process_chunk(&claimed).await.unwrap();

    assert_eq!(outcome.sent, 1);
    assert_eq!(outcome.throttled, 2);
    assert_eq!(outcome.failed, 0);

    let sent = dal.queue().get_by_id(first).await.unwrap().unwrap();
    assert_eq!(sent.task_status(), Some(TaskStatus::Sent));

    for id in [second, third] {
        let task = dal.queue().get_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.task_status(), Some(TaskStatus::Queued));
        assert_eq!(task.last_error.as_deref(), Some("throttled"));
    }
}

#[tokio::test]
async fn test_recipient_not_found_fails_task() {
    let db = test_database().await;
    let dal = &db.dal;
    seed_campaign(dal, "blast_x", &[vec![1]]).await;
    let id = seed_task(dal, "blast_x", 99).await;
    let claimed = dal.queue().claim_due(10, None).await.unwrap();

    let rig = build_rig(dal, FakeDirectory::default(), DispatchConfig::default());
    let outcome = rig.dispatcher.process_chunk(&claimed).await.unwrap();

    assert_eq!(outcome.failed, 1);
    let task = dal.queue().get_by_id(id).await.unwrap().unwrap();
    assert_eq!(task.task_status(), Some(TaskStatus::Failed));
    assert!(task.last_error.unwrap().contains("99"));
    assert_eq!(rig.composer.composed(), 0);
}

#[tokio::test]
async fn test_unsubscribed_recipient_is_skipped() {
    let db = test_database().await;
    let dal = &db.dal;
    seed_campaign(dal, "blast_x", &[vec![1]]).await;
    let id = seed_task(dal, "blast_x", 42).await;
    let claimed = dal.queue().claim_due(10, None).await.unwrap();

    let directory = FakeDirectory::with_users(&[42]).unsubscribe(42);
    let rig = build_rig(dal, directory, DispatchConfig::default());
    let outcome = rig.dispatcher.process_chunk(&claimed).await.unwrap();

    assert_eq!(outcome.skipped, 1);
    let task = dal.queue().get_by_id(id).await.unwrap().unwrap();
    assert_eq!(task.task_status(), Some(TaskStatus::SkippedUnsubscribed));
    assert_eq!(rig.composer.composed(), 0);
}

#[tokio::test]
async fn test_unsubscribe_check_can_be_disabled() {
    let db = test_database().await;
    let dal = &db.dal;
    seed_campaign(dal, "blast_x", &[vec![1]]).await;
    let id = seed_task(dal, "blast_x", 42).await;
    let claimed = dal.queue().claim_due(10, None).await.unwrap();

    let directory = FakeDirectory::with_users(&[42]).unsubscribe(42);
    let config = DispatchConfig::builder().respect_unsubscribes(false).build();
    let rig = build_rig(dal, directory, config);
    let outcome = rig.dispatcher.process_chunk(&claimed).await.unwrap();

    assert_eq!(outcome.sent, 1);
    let task = dal.queue().get_by_id(id).await.unwrap().unwrap();
    assert_eq!(task.task_status(), Some(TaskStatus::Sent));
}

#[tokio::test]
async fn test_missing_campaign_fails_task() {
    let db = test_database().await;
    let dal = &db.dal;
    // No campaign row for this key; tasks can still be queued against it.
    let id = seed_task(dal, "ghost", 42).await;
    let claimed = dal.queue().claim_due(10, None).await.unwrap();

    let rig = build_rig(dal, FakeDirectory::with_users(&[42]), DispatchConfig::default());
    let outcome = rig.dispatcher.process_chunk(&claimed).await.unwrap();

    assert_eq!(outcome.failed, 1);
    let task = dal.queue().get_by_id(id).await.unwrap().unwrap();
    assert!(task.last_error.unwrap().contains("campaign 'ghost' not found"));
}

#[tokio::test]
async fn test_campaign_without_topic_sets_fails_task() {
    let db = test_database().await;
    let dal = &db.dal;
    seed_campaign(dal, "blast_x", &[]).await;
    let id = seed_task(dal, "blast_x", 42).await;
    let claimed = dal.queue().claim_due(10, None).await.unwrap();

    let rig = build_rig(dal, FakeDirectory::with_users(&[42]), DispatchConfig::default());
    let outcome = rig.dispatcher.process_chunk(&claimed).await.unwrap();

    assert_eq!(outcome.failed, 1);
    let task = dal.queue().get_by_id(id).await.unwrap().unwrap();
    assert!(task
        .last_error
        .unwrap()
        .contains("no topic sets configured"));
    assert_eq!(rig.composer.composed(), 0);
}

#[tokio::test]
async fn test_empty_topic_sets_are_ignored() {
    let db = test_database().await;
    let dal = &db.dal;
    seed_campaign(dal, "blast_x", &[vec![], vec![7]]).await;
    let id = seed_task(dal, "blast_x", 42).await;
    let claimed = dal.queue().claim_due(10, None).await.unwrap();

    let rig = build_rig(dal, FakeDirectory::with_users(&[42]), DispatchConfig::default());
    let outcome = rig.dispatcher.process_chunk(&claimed).await.unwrap();

    assert_eq!(outcome.sent, 1);
    let task = dal.queue().get_by_id(id).await.unwrap().unwrap();
    assert_eq!(task.chosen_topic_ids().unwrap(), vec![7]);
}

#[tokio::test]
async fn test_delivery_failure_records_truncated_error() {
    let db = test_database().await;
    let dal = &db.dal;
    seed_campaign(dal, "blast_x", &[vec![1]]).await;
    let id = seed_task(dal, "blast_x", 42).await;
    let claimed = dal.queue().claim_due(10, None).await.unwrap();

    let rig = build_rig(dal, FakeDirectory::with_users(&[42]), DispatchConfig::default());
    rig.sender
        .fail_address("user42@example.com", &"x".repeat(2000));
    let outcome = rig.dispatcher.process_chunk(&claimed).await.unwrap();

    assert_eq!(outcome.failed, 1);
    let task = dal.queue().get_by_id(id).await.unwrap().unwrap();
    assert_eq!(task.task_status(), Some(TaskStatus::Failed));
    let error = task.last_error.unwrap();
    assert!(error.len() <= 500);
    // Failure never counts against the send budget.
    assert_eq!(rig.limiter.read(RateLimiter::current_bucket()), 0);
}

#[tokio::test]
async fn test_non_processing_tasks_are_skipped() {
    let db = test_database().await;
    let dal = &db.dal;
    seed_campaign(dal, "blast_x", &[vec![1]]).await;
    let unclaimed = seed_task(dal, "blast_x", 42).await;

    let rig = build_rig(dal, FakeDirectory::with_users(&[42]), DispatchConfig::default());
    // Hand the dispatcher an id that was never claimed.
    let outcome = rig.dispatcher.process_chunk(&[unclaimed]).await.unwrap();

    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.sent, 0);
    let task = dal.queue().get_by_id(unclaimed).await.unwrap().unwrap();
    assert_eq!(task.task_status(), Some(TaskStatus::Queued));
    assert_eq!(rig.composer.composed(), 0);
}
