use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};

use super::{AccountStore, DtrStore, StoreError};
use crate::model::{
    attendance::{DtrEntry, DtrFilter, DtrRecord, PunchKind, punch_time},
    user::{Account, AccountChanges, NewAccount, normalize_username},
};

#[derive(Default)]
struct State {
    next_account_id: u64,
    next_dtr_id: u64,
    accounts: BTreeMap<u64, Account>,
    dtrs: BTreeMap<u64, DtrRecord>,
    by_day: HashMap<(u64, NaiveDate), u64>,
}

impl State {
    fn username_taken(&self, username: &str, except: Option<u64>) -> bool {
        let wanted = normalize_username(username);
        self.accounts
            .values()
            .any(|a| Some(a.id) != except && normalize_username(&a.username) == wanted)
    }
}

/// In-process store selected with `DATABASE_URL=memory`. Every operation
/// runs under one lock, so punches are atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        let mut state = self.state();

        if state.username_taken(&account.username, None) {
            return Err(StoreError::DuplicateUsername);
        }

        state.next_account_id += 1;
        let now = Utc::now();
        let stored = Account {
            id: state.next_account_id,
            username: account.username,
            password: account.password,
            role: account.role,
            created_at: now,
            updated_at: now,
        };
        state.accounts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_account(&self, id: u64) -> Result<Option<Account>, StoreError> {
        Ok(self.state().accounts.get(&id).cloned())
    }

    async fn find_account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Account>, StoreError> {
        let wanted = normalize_username(username);
        Ok(self
            .state()
            .accounts
            .values()
            .find(|a| normalize_username(&a.username) == wanted)
            .cloned())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self.state().accounts.values().cloned().collect())
    }

    async fn update_account(
        &self,
        id: u64,
        changes: AccountChanges,
    ) -> Result<Option<Account>, StoreError> {
        let mut state = self.state();

        if let Some(username) = &changes.username {
            if state.username_taken(username, Some(id)) {
                return Err(StoreError::DuplicateUsername);
            }
        }

        let Some(account) = state.accounts.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(username) = changes.username {
            account.username = username;
        }
        if let Some(role) = changes.role {
            account.role = role;
        }
        if let Some(password) = changes.password {
            account.password = password;
        }
        account.updated_at = Utc::now();

        Ok(Some(account.clone()))
    }

    async fn delete_account(&self, id: u64) -> Result<Option<Account>, StoreError> {
        Ok(self.state().accounts.remove(&id))
    }
}

#[async_trait]
impl DtrStore for MemoryStore {
    async fn record_punch(
        &self,
        user_id: u64,
        kind: PunchKind,
        at: NaiveDateTime,
    ) -> Result<DtrRecord, StoreError> {
        let mut state = self.state();
        let date = at.date();

        let existing = state
            .by_day
            .get(&(user_id, date))
            .and_then(|id| state.dtrs.get(id))
            .cloned();

        // Stamp a copy so a rejected first punch leaves no empty record.
        let mut record = existing.unwrap_or_else(|| DtrRecord::new(user_id, date, kind));
        record.stamp(kind, punch_time(at))?;

        if record.id == 0 {
            state.next_dtr_id += 1;
            record.id = state.next_dtr_id;
            state.by_day.insert((user_id, date), record.id);
        }
        state.dtrs.insert(record.id, record.clone());

        Ok(record)
    }

    async fn find_dtr(
        &self,
        user_id: u64,
        date: NaiveDate,
    ) -> Result<Option<DtrRecord>, StoreError> {
        let state = self.state();
        Ok(state
            .by_day
            .get(&(user_id, date))
            .and_then(|id| state.dtrs.get(id))
            .cloned())
    }

    async fn list_dtrs(&self, filter: &DtrFilter) -> Result<Vec<DtrEntry>, StoreError> {
        let state = self.state();

        let mut entries: Vec<DtrEntry> = state
            .dtrs
            .values()
            .filter(|r| filter.matches(r))
            .map(|r| DtrEntry {
                record: r.clone(),
                username: state.accounts.get(&r.user_id).map(|a| a.username.clone()),
            })
            .collect();

        entries.sort_by(|a, b| {
            b.record
                .date
                .cmp(&a.record.date)
                .then(b.record.id.cmp(&a.record.id))
        });

        Ok(entries)
    }
}
