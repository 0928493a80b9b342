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

//! Chunk dispatcher: drains claimed tasks under the send budget.
//!
//! Each claimed chunk is processed strictly in ascending id order. Per-task
//! problems (missing recipient, compose or delivery failure) are recorded on
//! the row and never abort the chunk; only infrastructure errors (pool,
//! database) propagate.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::dal::DAL;
use crate::error::QueueError;
use crate::mail::{ComposeKind, ComposeRequest, MailSender, MessageComposer, RecipientDirectory};
use crate::models::campaign::Campaign;
use crate::models::queue_task::QueueTask;
use crate::rate_limiter::RateLimiter;

/// Cap on the diagnostic stored in `last_error`.
const MAX_ERROR_LEN: usize = 500;

/// Tally of what happened to one chunk's tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// Tasks delivered and marked `sent`
    pub sent: usize,
    /// Tasks marked `failed`
    pub failed: usize,
    /// Tasks skipped (unsubscribed recipient, or lost claim race)
    pub skipped: usize,
    /// Tasks returned to `queued` because the minute budget was exhausted
    pub throttled: usize,
}

impl ChunkOutcome {
    /// Folds another outcome into this one.
    pub fn absorb(&mut self, other: ChunkOutcome) {
        self.sent += other.sent;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.throttled += other.throttled;
    }
}

/// What processing a single claimed task produced.
enum TaskOutcome {
    Sent,
    Failed,
    SkippedUnsubscribed,
    /// Another writer completed the topic selection race; the task was left
    /// for whoever holds it.
    Raced,
}

/// Processes claimed task chunks: resolves recipient and topics, composes,
/// delivers, and records the terminal state.
pub struct Dispatcher {
    dal: DAL,
    limiter: RateLimiter,
    directory: Arc<dyn RecipientDirectory>,
    composer: Arc<dyn MessageComposer>,
    sender: Arc<dyn MailSender>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Creates a dispatcher wiring the queue to the mail collaborators.
    pub fn new(
        dal: DAL,
        limiter: RateLimiter,
        directory: Arc<dyn RecipientDirectory>,
        composer: Arc<dyn MessageComposer>,
        sender: Arc<dyn MailSender>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            dal,
            limiter,
            directory,
            composer,
            sender,
            config,
        }
    }

    /// Returns the shared rate limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Processes one claimed chunk in id order.
    ///
    /// Before each task the current minute's send count is checked against
    /// the budget; once exhausted, this task and every remaining one go back
    /// to `queued` with a throttle note and the chunk ends. A later poll
    /// cycle picks them up in a fresh window.
    pub async fn process_chunk(&self, task_ids: &[i64]) -> Result<ChunkOutcome, QueueError> {
        let mut outcome = ChunkOutcome::default();

        for (index, &task_id) in task_ids.iter().enumerate() {
            let bucket = RateLimiter::current_bucket();
            if self.limiter.read(bucket) >= self.config.per_minute_limit() {
                let remaining = &task_ids[index..];
                let requeued = self
                    .dal
                    .queue()
                    .requeue_with_note(remaining, "throttled")
                    .await?;
                debug!(
                    requeued,
                    remaining = remaining.len(),
                    "send budget exhausted, returning remainder of chunk"
                );
                outcome.throttled += remaining.len();
                break;
            }

            let task = match self.dal.queue().get_by_id(task_id).await? {
                Some(task) => task,
                None => {
                    // Deleted out from under us; nothing to record.
                    outcome.skipped += 1;
                    continue;
                }
            };
            if !task.is_processing() {
                // Stale recovery or another worker already moved it on.
                outcome.skipped += 1;
                continue;
            }

            match self.process_task(task).await? {
                TaskOutcome::Sent => outcome.sent += 1,
                TaskOutcome::Failed => outcome.failed += 1,
                TaskOutcome::SkippedUnsubscribed | TaskOutcome::Raced => outcome.skipped += 1,
            }
        }

        Ok(outcome)
    }

    /// Handles one `processing` task end to end.
    async fn process_task(&self, task: QueueTask) -> Result<TaskOutcome, QueueError> {
        let recipient = match self.directory.find_recipient(task.user_id).await {
            Ok(Some(recipient)) => recipient,
            Ok(None) => {
                let reason = format!("recipient {} not found", task.user_id);
                warn!(task_id = task.id, user_id = task.user_id, "{}", reason);
                self.dal.queue().mark_failed(task.id, &reason).await?;
                return Ok(TaskOutcome::Failed);
            }
            Err(e) => {
                let reason = truncate_error(&format!("recipient lookup failed: {}", e));
                self.dal.queue().mark_failed(task.id, &reason).await?;
                return Ok(TaskOutcome::Failed);
            }
        };

        if self.config.respect_unsubscribes() {
            match self.directory.is_unsubscribed(task.user_id).await {
                Ok(true) => {
                    debug!(task_id = task.id, user_id = task.user_id, "recipient opted out");
                    self.dal.queue().mark_skipped_unsubscribed(task.id).await?;
                    return Ok(TaskOutcome::SkippedUnsubscribed);
                }
                Ok(false) => {}
                Err(e) => {
                    let reason = truncate_error(&format!("unsubscribe check failed: {}", e));
                    self.dal.queue().mark_failed(task.id, &reason).await?;
                    return Ok(TaskOutcome::Failed);
                }
            }
        }

        let campaign = match self.dal.campaign().get_by_key(&task.campaign_key).await? {
            Some(campaign) => campaign,
            None => {
                let reason = format!("campaign '{}' not found", task.campaign_key);
                warn!(task_id = task.id, "{}", reason);
                self.dal.queue().mark_failed(task.id, &reason).await?;
                return Ok(TaskOutcome::Failed);
            }
        };

        let topic_ids = match self.resolve_topics(&task, &campaign).await? {
            TopicResolution::Chosen(topic_ids) => topic_ids,
            TopicResolution::Unusable(reason) => {
                self.dal
                    .queue()
                    .mark_failed(task.id, &truncate_error(&reason))
                    .await?;
                return Ok(TaskOutcome::Failed);
            }
            TopicResolution::Raced => return Ok(TaskOutcome::Raced),
        };

        let request = ComposeRequest {
            recipient: &recipient,
            campaign_key: &task.campaign_key,
            topic_ids: &topic_ids,
            since: Some(task.created_at),
            kind: ComposeKind::Campaign,
        };

        let delivery = async {
            let message = self.composer.compose(request).await?;
            self.sender.deliver(&message).await
        }
        .await;

        match delivery {
            Ok(()) => {
                self.dal.queue().mark_sent(task.id).await?;
                self.limiter.increment(RateLimiter::current_bucket());
                debug!(task_id = task.id, user_id = task.user_id, "task sent");
                Ok(TaskOutcome::Sent)
            }
            Err(e) => {
                let reason = truncate_error(&e.to_string());
                warn!(task_id = task.id, error = %reason, "delivery failed");
                self.dal.queue().mark_failed(task.id, &reason).await?;
                Ok(TaskOutcome::Failed)
            }
        }
    }

    /// Resolves the topic ids for a task, persisting a fresh choice exactly
    /// once.
    ///
    /// A previously persisted choice is always reused, so a retried task
    /// composes the same message. A fresh choice picks one configured set
    /// uniformly at random and must win the single-write guard; losing the
    /// guard means another writer finished the selection, in which case
    /// their choice is adopted if visible, otherwise the task is left alone.
    async fn resolve_topics(
        &self,
        task: &QueueTask,
        campaign: &Campaign,
    ) -> Result<TopicResolution, QueueError> {
        if task.has_chosen_topics() {
            return match task.chosen_topic_ids() {
                Ok(topic_ids) => Ok(TopicResolution::Chosen(topic_ids)),
                Err(e) => Ok(TopicResolution::Unusable(format!(
                    "stored topic choice is not valid JSON: {}",
                    e
                ))),
            };
        }

        let sets: Vec<Vec<i64>> = match campaign.topic_sets() {
            Ok(sets) => sets.into_iter().filter(|set| !set.is_empty()).collect(),
            Err(e) => {
                return Ok(TopicResolution::Unusable(format!(
                    "campaign '{}' topic sets are not valid JSON: {}",
                    task.campaign_key, e
                )))
            }
        };
        if sets.is_empty() {
            return Ok(TopicResolution::Unusable(format!(
                "campaign '{}' has no topic sets configured",
                task.campaign_key
            )));
        }

        let chosen = {
            use rand::Rng;
            let index = rand::thread_rng().gen_range(0..sets.len());
            sets[index].clone()
        };

        if self.dal.queue().set_chosen_topics(task.id, &chosen).await? {
            return Ok(TopicResolution::Chosen(chosen));
        }

        // Lost the single-write race; use whatever landed.
        match self.dal.queue().get_by_id(task.id).await? {
            Some(current) if current.has_chosen_topics() => match current.chosen_topic_ids() {
                Ok(topic_ids) => Ok(TopicResolution::Chosen(topic_ids)),
                Err(e) => Ok(TopicResolution::Unusable(format!(
                    "stored topic choice is not valid JSON: {}",
                    e
                ))),
            },
            _ => Ok(TopicResolution::Raced),
        }
    }
}

enum TopicResolution {
    Chosen(Vec<i64>),
    Unusable(String),
    Raced,
}

/// Truncates a diagnostic to the stored cap on a char boundary.
fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}
