use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use anyhow::Result;
use autoscale_cuckoo_filter::CuckooFilter;
use moka::future::Cache;

use crate::model::user::normalize_username;
use crate::store::{AccountStore, StoreError};

/// Expected capacity and false-positive rate.
/// Tune these based on real user counts.
const FILTER_CAPACITY: usize = 10_000;
const FALSE_POSITIVE_RATE: f64 = 0.001;
const CACHE_CAPACITY: u64 = 50_000;
const CACHE_TTL: Duration = Duration::from_secs(86_400);

/// Fast path in front of the account store for "is this username taken?".
///
/// The cuckoo filter answers "definitely free" without a lookup; the moka
/// cache answers "definitely taken" for names seen recently. Anything else
/// falls through to the store. The store's own uniqueness check stays
/// authoritative, so a stale index can only cost a lookup.
pub struct UsernameIndex {
    filter: RwLock<CuckooFilter<String>>,
    taken: Cache<String, bool>,
}

impl Default for UsernameIndex {
    fn default() -> Self {
        Self::new(FILTER_CAPACITY, FALSE_POSITIVE_RATE, CACHE_CAPACITY, CACHE_TTL)
    }
}

impl UsernameIndex {
    pub fn new(capacity: usize, false_positive_rate: f64, cache_capacity: u64, ttl: Duration) -> Self {
        Self {
            filter: RwLock::new(CuckooFilter::new(capacity, false_positive_rate)),
            taken: Cache::builder()
                .max_capacity(cache_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// False positives possible, false negatives only if the name was
    /// never recorded.
    pub fn might_exist(&self, username: &str) -> bool {
        let username = normalize_username(username);
        self.filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&username)
    }

    pub async fn mark_taken(&self, username: &str) {
        let username = normalize_username(username);
        self.filter
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(&username);
        self.taken.insert(username, true).await;
    }

    /// Only call for names that were recorded; removing an unknown name
    /// can evict a colliding fingerprint.
    pub async fn forget(&self, username: &str) {
        let username = normalize_username(username);
        self.filter
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&username);
        self.taken.invalidate(&username).await;
    }

    pub async fn is_taken(&self, username: &str) -> bool {
        self.taken
            .get(&normalize_username(username))
            .await
            .unwrap_or(false)
    }

    /// true  => username AVAILABLE
    /// false => username TAKEN
    pub async fn is_available<S: AccountStore + ?Sized>(
        &self,
        username: &str,
        store: &S,
    ) -> Result<bool, StoreError> {
        // 1️⃣ Cuckoo filter: fast negative
        if !self.might_exist(username) {
            return Ok(true);
        }

        // 2️⃣ Moka cache: fast positive
        if self.is_taken(username).await {
            return Ok(false);
        }

        // 3️⃣ Store fallback
        let exists = store.find_account_by_username(username).await?.is_some();
        if exists {
            self.taken.insert(normalize_username(username), true).await;
        }
        Ok(!exists)
    }

    /// Load every existing username, inserting in batches.
    pub async fn warmup<S: AccountStore + ?Sized>(&self, store: &S, batch_size: usize) -> Result<()> {
        let accounts = store.list_accounts().await?;
        let total = accounts.len();

        for batch in accounts.chunks(batch_size.max(1)) {
            {
                let mut filter = self.filter.write().unwrap_or_else(PoisonError::into_inner);
                for account in batch {
                    filter.add(&normalize_username(&account.username));
                }
            }

            let inserts: Vec<_> = batch
                .iter()
                .map(|a| self.taken.insert(normalize_username(&a.username), true))
                .collect();
            futures::future::join_all(inserts).await;
        }

        log::info!("Username index warmup complete: {} users", total);
        Ok(())
    }
}
