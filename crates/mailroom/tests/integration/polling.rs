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

//! Poll cycle behavior: cadence gating, stale recovery, and chunk fan-out.

use crate::fixtures::*;
use mailroom::{DispatchConfig, Poller, TaskStatus};
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn test_cycle_claims_in_batches_and_dispatches_in_chunks() {
    let db = test_database().await;
    let dal = &db.dal;
    seed_campaign(dal, "blast_x", &[vec![1]]).await;
    for user_id in 1..=3 {
        seed_task(dal, "blast_x", user_id).await;
    }
    let third = task_id(dal, "blast_x", 3).await;

    let config = DispatchConfig::builder()
        .claim_batch_size(2)
        .chunk_size(1)
        .build();
    let rig = build_rig(dal, FakeDirectory::with_users(&[1, 2, 3]), config.clone());
    let poller = Poller::new(dal.clone(), rig.dispatcher.clone(), config);

    let outcome = poller.run_cycle().await.unwrap();

    assert!(outcome.ran);
    assert_eq!(outcome.claimed, 2);
    assert_eq!(outcome.chunks, 2);
    assert_eq!(outcome.dispatch.sent, 2);

    // The batch cap left the third task for a later cycle.
    let task = dal.queue().get_by_id(third).await.unwrap().unwrap();
    assert_eq!(task.task_status(), Some(TaskStatus::Queued));

    assert!(logs_contain("poll cycle complete"));
}

#[tokio::test]
async fn test_cycle_recovers_stale_tasks_end_to_end() {
    let db = test_database().await;
    let dal = &db.dal;
    seed_campaign(dal, "blast_x", &[vec![1]]).await;
    let id = seed_task(dal, "blast_x", 42).await;

    // Simulate a worker that claimed the task and died.
    dal.queue().claim_due(10, None).await.unwrap();
    backdate_lock(dal, id, 45).await;

    let config = DispatchConfig::builder().stale_after_minutes(30).build();
    let rig = build_rig(dal, FakeDirectory::with_users(&[42]), config.clone());
    let poller = Poller::new(dal.clone(), rig.dispatcher.clone(), config);

    let outcome = poller.run_cycle().await.unwrap();

    assert_eq!(outcome.recovered, 1);
    assert_eq!(outcome.claimed, 1);
    assert_eq!(outcome.dispatch.sent, 1);

    let task = dal.queue().get_by_id(id).await.unwrap().unwrap();
    assert_eq!(task.task_status(), Some(TaskStatus::Sent));
    assert!(task
        .last_error
        .unwrap()
        .contains("stale processing lock exceeded 30 minutes"));
    assert_eq!(task.attempts, 2);
}

#[tokio::test]
async fn test_stale_recovery_disabled_at_zero() {
    let db = test_database().await;
    let dal = &db.dal;
    seed_campaign(dal, "blast_x", &[vec![1]]).await;
    let id = seed_task(dal, "blast_x", 42).await;
    dal.queue().claim_due(10, None).await.unwrap();
    backdate_lock(dal, id, 120).await;

    let config = DispatchConfig::builder().stale_after_minutes(0).build();
    let rig = build_rig(dal, FakeDirectory::with_users(&[42]), config.clone());
    let poller = Poller::new(dal.clone(), rig.dispatcher.clone(), config);

    let outcome = poller.run_cycle().await.unwrap();

    assert_eq!(outcome.recovered, 0);
    assert_eq!(outcome.claimed, 0);
    let task = dal.queue().get_by_id(id).await.unwrap().unwrap();
    assert_eq!(task.task_status(), Some(TaskStatus::Processing));
}

#[tokio::test]
async fn test_disabled_config_skips_cycle() {
    let db = test_database().await;
    let dal = &db.dal;
    seed_campaign(dal, "blast_x", &[vec![1]]).await;
    let id = seed_task(dal, "blast_x", 42).await;

    let config = DispatchConfig::builder().enabled(false).build();
    let rig = build_rig(dal, FakeDirectory::with_users(&[42]), config.clone());
    let poller = Poller::new(dal.clone(), rig.dispatcher.clone(), config);

    let outcome = poller.run_cycle().await.unwrap();

    assert!(!outcome.ran);
    assert_eq!(outcome.claimed, 0);
    let task = dal.queue().get_by_id(id).await.unwrap().unwrap();
    assert_eq!(task.task_status(), Some(TaskStatus::Queued));
}

#[tokio::test]
async fn test_off_cadence_minute_skips_cycle() {
    let db = test_database().await;
    let dal = &db.dal;
    seed_campaign(dal, "blast_x", &[vec![1]]).await;
    seed_task(dal, "blast_x", 42).await;

    // A cadence far larger than the current minute index never divides it.
    let config = DispatchConfig::builder()
        .poll_every_minutes(u32::MAX)
        .build();
    let rig = build_rig(dal, FakeDirectory::with_users(&[42]), config.clone());
    let poller = Poller::new(dal.clone(), rig.dispatcher.clone(), config);

    let outcome = poller.run_cycle().await.unwrap();

    assert!(!outcome.ran);
    assert_eq!(outcome.claimed, 0);
}

#[tokio::test]
async fn test_cycle_scoped_to_configured_campaign() {
    let db = test_database().await;
    let dal = &db.dal;
    seed_campaign(dal, "blast_x", &[vec![1]]).await;
    seed_campaign(dal, "blast_y", &[vec![2]]).await;
    let x_task = seed_task(dal, "blast_x", 1).await;
    let y_task = seed_task(dal, "blast_y", 1).await;

    let config = DispatchConfig::builder().campaign_key("blast_y").build();
    let rig = build_rig(dal, FakeDirectory::with_users(&[1]), config.clone());
    let poller = Poller::new(dal.clone(), rig.dispatcher.clone(), config);

    let outcome = poller.run_cycle().await.unwrap();

    assert_eq!(outcome.claimed, 1);
    assert_eq!(outcome.dispatch.sent, 1);

    let x = dal.queue().get_by_id(x_task).await.unwrap().unwrap();
    assert_eq!(x.task_status(), Some(TaskStatus::Queued));
    let y = dal.queue().get_by_id(y_task).await.unwrap().unwrap();
    assert_eq!(y.task_status(), Some(TaskStatus::Sent));
}

#[tokio::test]
async fn test_run_loop_shuts_down() {
    let db = test_database().await;
    let dal = &db.dal;

    let config = DispatchConfig::default();
    let rig = build_rig(dal, FakeDirectory::default(), config.clone());
    let poller = std::sync::Arc::new(Poller::new(dal.clone(), rig.dispatcher.clone(), config));

    let runner = {
        let poller = poller.clone();
        tokio::spawn(async move {
            poller.run(std::time::Duration::from_secs(3600)).await;
        })
    };

    poller.shutdown();
    runner.await.unwrap();
    assert!(poller.is_stopped());
}
