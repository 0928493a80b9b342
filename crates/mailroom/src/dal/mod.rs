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

//! Data Access Layer with runtime backend selection.
//!
//! Each operation dispatches to a PostgreSQL- or SQLite-specific
//! implementation based on the connection type detected at startup. The two
//! implementations honor the same contracts; they differ only in how they
//! achieve claim mutual exclusion (`FOR UPDATE SKIP LOCKED` vs an immediate
//! write-locking transaction).

use crate::database::{BackendType, Database};

pub mod campaign;
pub mod queue;

pub use campaign::CampaignDAL;
pub use queue::QueueDAL;

/// Helper macro for dispatching operations based on backend type.
///
/// # Example
///
/// ```rust,ignore
/// crate::dispatch_backend!(
///     self.dal.backend(),
///     self.claim_due_postgres(limit).await,
///     self.claim_due_sqlite(limit).await
/// )
/// ```
#[macro_export]
macro_rules! dispatch_backend {
    ($backend:expr, $pg:expr, $sqlite:expr) => {
        match $backend {
            #[cfg(feature = "postgres")]
            $crate::database::BackendType::Postgres => $pg,
            #[cfg(feature = "sqlite")]
            $crate::database::BackendType::Sqlite => $sqlite,
            #[allow(unreachable_patterns)]
            other => panic!("database backend {:?} support not compiled in", other),
        }
    };
}

/// The Data Access Layer struct.
///
/// Provides access to all database operations through a single interface that
/// works with both PostgreSQL and SQLite backends.
///
/// # Thread Safety
///
/// The `DAL` struct is `Clone` and can be safely shared between threads. Each
/// clone references the same underlying connection pool.
#[derive(Clone, Debug)]
pub struct DAL {
    /// The database instance with connection pool
    pub database: Database,
}

impl DAL {
    /// Creates a new DAL instance.
    pub fn new(database: Database) -> Self {
        DAL { database }
    }

    /// Returns the backend type for this DAL instance.
    pub fn backend(&self) -> BackendType {
        self.database.backend()
    }

    /// Returns a reference to the underlying database.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Returns a campaign DAL for campaign registry operations.
    pub fn campaign(&self) -> CampaignDAL {
        CampaignDAL::new(self)
    }

    /// Returns a queue DAL for send-task operations.
    pub fn queue(&self) -> QueueDAL {
        QueueDAL::new(self)
    }
}
