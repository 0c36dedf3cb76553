use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::{FromRow, MySql, MySqlPool, QueryBuilder};
use tracing::debug;

use super::{AccountStore, DtrStore, StoreError};
use crate::model::{
    attendance::{DtrEntry, DtrFilter, DtrRecord, PunchKind, punch_time},
    role::Role,
    user::{Account, AccountChanges, NewAccount},
};

const USER_COLUMNS: &str = "id, username, password, role, created_at, updated_at";
const DTR_COLUMNS: &str =
    "d.id, d.user_id, d.date, d.morning_in, d.morning_out, d.afternoon_in, d.afternoon_out, d.punch_type";

#[derive(FromRow)]
struct UserRow {
    id: u64,
    username: String,
    password: String,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for Account {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = Role::from_str(&row.role)
            .map_err(|_| StoreError::Corrupt(format!("user {} has role {:?}", row.id, row.role)))?;

        Ok(Account {
            id: row.id,
            username: row.username,
            password: row.password,
            role,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct DtrRow {
    id: u64,
    user_id: u64,
    date: NaiveDate,
    morning_in: Option<NaiveTime>,
    morning_out: Option<NaiveTime>,
    afternoon_in: Option<NaiveTime>,
    afternoon_out: Option<NaiveTime>,
    punch_type: String,
}

impl TryFrom<DtrRow> for DtrRecord {
    type Error = StoreError;

    fn try_from(row: DtrRow) -> Result<Self, Self::Error> {
        let kind = PunchKind::from_str(&row.punch_type).map_err(|_| {
            StoreError::Corrupt(format!("dtr {} has type {:?}", row.id, row.punch_type))
        })?;

        Ok(DtrRecord {
            id: row.id,
            user_id: row.user_id,
            date: row.date,
            morning_in: row.morning_in,
            morning_out: row.morning_out,
            afternoon_in: row.afternoon_in,
            afternoon_out: row.afternoon_out,
            kind,
        })
    }
}

#[derive(FromRow)]
struct DtrEntryRow {
    #[sqlx(flatten)]
    dtr: DtrRow,
    username: Option<String>,
}

/// Map a unique-key violation on `users.username` to a domain error.
fn map_unique(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return StoreError::DuplicateUsername;
        }
    }
    StoreError::Database(e)
}

#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Create both tables if they are missing. `dtrs.user_id` is not a
    /// foreign key: deleting an account keeps its history.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
                username VARCHAR(100) NOT NULL,
                password VARCHAR(255) NOT NULL,
                role VARCHAR(16) NOT NULL DEFAULT 'employee',
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                UNIQUE KEY uq_users_username (username)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dtrs (
                id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
                user_id BIGINT UNSIGNED NOT NULL,
                date DATE NOT NULL,
                morning_in TIME NULL,
                morning_out TIME NULL,
                afternoon_in TIME NULL,
                afternoon_out TIME NULL,
                punch_type VARCHAR(16) NOT NULL,
                UNIQUE KEY uq_dtrs_user_date (user_id, date)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AccountStore for MySqlStore {
    async fn insert_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        let result = sqlx::query("INSERT INTO users (username, password, role) VALUES (?, ?, ?)")
            .bind(&account.username)
            .bind(&account.password)
            .bind(account.role.as_ref())
            .execute(&self.pool)
            .await
            .map_err(map_unique)?;

        let id = result.last_insert_id();
        self.find_account(id)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("user {id} vanished after insert")))
    }

    async fn find_account(&self, id: u64) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Account::try_from).transpose()
    }

    async fn find_account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Account>, StoreError> {
        // The default collation compares case-insensitively.
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
        ))
        .bind(username.trim())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Account::try_from).transpose()
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Account::try_from)
            .collect()
    }

    async fn update_account(
        &self,
        id: u64,
        changes: AccountChanges,
    ) -> Result<Option<Account>, StoreError> {
        if self.find_account(id).await?.is_none() {
            return Ok(None);
        }

        if !changes.is_empty() {
            let mut qb = QueryBuilder::<MySql>::new("UPDATE users SET updated_at = CURRENT_TIMESTAMP");

            if let Some(username) = changes.username {
                qb.push(", username = ").push_bind(username);
            }
            if let Some(role) = changes.role {
                qb.push(", role = ").push_bind(role.as_ref().to_string());
            }
            if let Some(password) = changes.password {
                qb.push(", password = ").push_bind(password);
            }
            qb.push(" WHERE id = ").push_bind(id);

            qb.build().execute(&self.pool).await.map_err(map_unique)?;
        }

        self.find_account(id).await
    }

    async fn delete_account(&self, id: u64) -> Result<Option<Account>, StoreError> {
        let Some(account) = self.find_account(id).await? else {
            return Ok(None);
        };

        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok((result.rows_affected() > 0).then_some(account))
    }
}

#[async_trait]
impl DtrStore for MySqlStore {
    async fn record_punch(
        &self,
        user_id: u64,
        kind: PunchKind,
        at: NaiveDateTime,
    ) -> Result<DtrRecord, StoreError> {
        let date = at.date();
        let time = punch_time(at);

        let mut tx = self.pool.begin().await?;

        // The (user_id, date) key turns a racing second insert into a no-op.
        sqlx::query("INSERT IGNORE INTO dtrs (user_id, date, punch_type) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(date)
            .bind(kind.as_ref())
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query_as::<_, DtrRow>(&format!(
            "SELECT {DTR_COLUMNS} FROM dtrs d WHERE d.user_id = ? AND d.date = ? FOR UPDATE"
        ))
        .bind(user_id)
        .bind(date)
        .fetch_one(&mut *tx)
        .await?;

        let mut record = DtrRecord::try_from(row)?;
        // On error the transaction drops and rolls back the insert too.
        record.stamp(kind, time)?;

        sqlx::query(&format!(
            "UPDATE dtrs SET {} = ? WHERE id = ?",
            kind.column()
        ))
        .bind(time)
        .bind(record.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(user_id, dtr_id = record.id, %kind, %time, "Punch stored");
        Ok(record)
    }

    async fn find_dtr(
        &self,
        user_id: u64,
        date: NaiveDate,
    ) -> Result<Option<DtrRecord>, StoreError> {
        let row = sqlx::query_as::<_, DtrRow>(&format!(
            "SELECT {DTR_COLUMNS} FROM dtrs d WHERE d.user_id = ? AND d.date = ?"
        ))
        .bind(user_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DtrRecord::try_from).transpose()
    }

    async fn list_dtrs(&self, filter: &DtrFilter) -> Result<Vec<DtrEntry>, StoreError> {
        let mut qb = QueryBuilder::<MySql>::new(format!(
            "SELECT {DTR_COLUMNS}, u.username FROM dtrs d LEFT JOIN users u ON u.id = d.user_id WHERE 1 = 1"
        ));

        if let Some(user_id) = filter.user_id {
            qb.push(" AND d.user_id = ").push_bind(user_id);
        }
        if let Some(date) = filter.date {
            qb.push(" AND d.date = ").push_bind(date);
        }
        if let Some(from) = filter.from {
            qb.push(" AND d.date >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            qb.push(" AND d.date <= ").push_bind(to);
        }
        qb.push(" ORDER BY d.date DESC, d.id DESC");

        qb.build_query_as::<DtrEntryRow>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| {
                Ok(DtrEntry {
                    record: DtrRecord::try_from(row.dtr)?,
                    username: row.username,
                })
            })
            .collect()
    }
}
