//! Persistence for accounts and daily time records.
//!
//! Handlers only see the [`AccountStore`] and [`DtrStore`] traits; the
//! backing store is picked at startup from `DATABASE_URL`.

pub mod memory;
pub mod mysql;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::model::{
    attendance::{DtrEntry, DtrFilter, DtrRecord, PunchError, PunchKind},
    user::{Account, AccountChanges, NewAccount},
};

pub use memory::MemoryStore;
pub use mysql::MySqlStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Username already exists")]
    DuplicateUsername,

    #[error(transparent)]
    Punch(#[from] PunchError),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new account. Fails with [`StoreError::DuplicateUsername`]
    /// when the username is taken (case-insensitively).
    async fn insert_account(&self, account: NewAccount) -> Result<Account, StoreError>;

    async fn find_account(&self, id: u64) -> Result<Option<Account>, StoreError>;

    async fn find_account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Account>, StoreError>;

    /// All accounts ordered by id.
    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError>;

    /// Apply `changes` to the account. `Ok(None)` when the id is unknown.
    async fn update_account(
        &self,
        id: u64,
        changes: AccountChanges,
    ) -> Result<Option<Account>, StoreError>;

    /// Remove the account and return it. Attendance history is kept.
    async fn delete_account(&self, id: u64) -> Result<Option<Account>, StoreError>;
}

#[async_trait]
pub trait DtrStore: Send + Sync {
    /// Find-or-create the record for `user_id` on `at`'s date and stamp
    /// `kind` with `at`'s time, atomically.
    async fn record_punch(
        &self,
        user_id: u64,
        kind: PunchKind,
        at: NaiveDateTime,
    ) -> Result<DtrRecord, StoreError>;

    async fn find_dtr(&self, user_id: u64, date: NaiveDate)
    -> Result<Option<DtrRecord>, StoreError>;

    /// Records matching `filter`, newest date first, joined with usernames.
    async fn list_dtrs(&self, filter: &DtrFilter) -> Result<Vec<DtrEntry>, StoreError>;
}

pub trait Store: AccountStore + DtrStore {}

impl<T: AccountStore + DtrStore> Store for T {}
