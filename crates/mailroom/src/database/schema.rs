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

//! Diesel table definitions shared by both backends.
//!
//! Column types are restricted to ones diesel maps identically on PostgreSQL
//! and SQLite (BigInt, Integer, Text, Bool, Timestamp), so a single set of
//! model structs serves both.

diesel::table! {
    campaigns (id) {
        id -> BigInt,
        key -> Text,
        audience_query -> Text,
        topic_sets -> Text,
        send_at -> Nullable<Timestamp>,
        enabled -> Bool,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    send_queue (id) {
        id -> BigInt,
        campaign_key -> Text,
        user_id -> BigInt,
        chosen_topic_ids -> Text,
        status -> Text,
        not_before -> Nullable<Timestamp>,
        locked_at -> Nullable<Timestamp>,
        attempts -> Integer,
        last_error -> Nullable<Text>,
        sent_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::allow_tables_to_appear_in_same_query!(campaigns, send_queue);
