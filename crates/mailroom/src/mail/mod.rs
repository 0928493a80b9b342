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

//! Boundary traits for recipient lookup, message composition, and delivery.
//!
//! The dispatch core never talks to a user table or a mail relay directly;
//! the embedding application supplies these three collaborators. Each trait
//! is object-safe and `Send + Sync` so implementations can be shared across
//! dispatch workers behind an `Arc`.

use crate::error::MailError;
use chrono::NaiveDateTime;

/// A resolved mail recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// Platform user id, matching `send_queue.user_id`
    pub id: i64,
    /// Display name used in salutations
    pub username: String,
    /// Destination address
    pub email: String,
}

/// What kind of message a compose request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeKind {
    /// A regular activity notification
    Notification,
    /// An admin-defined campaign send
    Campaign,
}

/// Everything a composer needs to build one outbound message.
#[derive(Debug, Clone)]
pub struct ComposeRequest<'a> {
    /// Who the message is for
    pub recipient: &'a Recipient,
    /// Key of the campaign being dispatched
    pub campaign_key: &'a str,
    /// The topic ids selected for this recipient
    pub topic_ids: &'a [i64],
    /// Lower bound for content inclusion; typically the task creation time
    pub since: Option<NaiveDateTime>,
    /// Message kind
    pub kind: ComposeKind,
}

/// A composed message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Rendered body
    pub body: String,
}

/// Looks up recipients and their mail preferences.
#[async_trait::async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Resolves a user id to a deliverable recipient, if one exists.
    async fn find_recipient(&self, user_id: i64) -> Result<Option<Recipient>, MailError>;

    /// Whether the user has opted out of this kind of mail.
    async fn is_unsubscribed(&self, user_id: i64) -> Result<bool, MailError>;
}

/// Renders an outbound message from a compose request.
#[async_trait::async_trait]
pub trait MessageComposer: Send + Sync {
    /// Builds the message for one recipient.
    async fn compose(&self, request: ComposeRequest<'_>) -> Result<OutboundMessage, MailError>;
}

/// Hands a composed message to the delivery channel.
#[async_trait::async_trait]
pub trait MailSender: Send + Sync {
    /// Delivers one message. An `Err` marks the task failed; there is no
    /// automatic retry.
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), MailError>;
}
