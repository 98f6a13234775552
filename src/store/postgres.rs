//! PostgreSQL store.
//!
//! Tables: `user_credits` keyed by `(user_id, period)` and `analyses`.
//! The debit is a single conditional `UPDATE`, so concurrent reviews for the
//! same user can never take the balance below zero.

use super::{CreditAccount, CreditStore, DebitOutcome, HistoryStore, StoreResult};
use crate::output::HistoryRecord;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS user_credits (
        user_id     TEXT        NOT NULL,
        period      TEXT        NOT NULL,
        balance     INTEGER     NOT NULL CHECK (balance >= 0),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (user_id, period)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS analyses (
        id          UUID        PRIMARY KEY,
        user_id     TEXT        NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL,
        title       TEXT        NOT NULL,
        summary     TEXT,
        score       TEXT,
        ai_score    TEXT,
        full_result JSONB       NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS analyses_user_created_idx ON analyses (user_id, created_at DESC)",
];

/// [`CreditStore`] + [`HistoryStore`] over a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Open a small pool against `database_url`.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        info!("Connected to Postgres");
        Ok(Self::new(pool))
    }

    /// Create the tables if they do not exist.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA.iter().copied() {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Schema ready");
        Ok(())
    }
}

fn to_db(balance: u32) -> i32 {
    balance.min(i32::MAX as u32) as i32
}

fn from_db(balance: i32) -> u32 {
    balance.max(0) as u32
}

#[async_trait]
impl CreditStore for PgStore {
    async fn get_account(&self, user_id: &str, period: &str) -> StoreResult<Option<CreditAccount>> {
        let row = sqlx::query(
            r#"
            SELECT balance FROM user_credits
            WHERE user_id = $1 AND period = $2
            "#,
        )
        .bind(user_id)
        .bind(period)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| CreditAccount {
            user_id: user_id.to_string(),
            period: period.to_string(),
            balance: from_db(r.get("balance")),
        }))
    }

    async fn insert_if_absent(&self, account: CreditAccount) -> StoreResult<CreditAccount> {
        sqlx::query(
            r#"
            INSERT INTO user_credits (user_id, period, balance)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, period) DO NOTHING
            "#,
        )
        .bind(&account.user_id)
        .bind(&account.period)
        .bind(to_db(account.balance))
        .execute(&self.pool)
        .await?;

        // Read back: a concurrent creator may have won the insert.
        let balance: i32 = sqlx::query_scalar(
            "SELECT balance FROM user_credits WHERE user_id = $1 AND period = $2",
        )
        .bind(&account.user_id)
        .bind(&account.period)
        .fetch_one(&self.pool)
        .await?;

        Ok(CreditAccount {
            balance: from_db(balance),
            ..account
        })
    }

    async fn try_debit(&self, user_id: &str, period: &str, cost: u32) -> StoreResult<DebitOutcome> {
        let updated: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE user_credits
            SET balance = balance - $3, updated_at = NOW()
            WHERE user_id = $1 AND period = $2 AND balance >= $3
            RETURNING balance
            "#,
        )
        .bind(user_id)
        .bind(period)
        .bind(to_db(cost))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(balance) = updated {
            return Ok(DebitOutcome::Applied {
                balance: from_db(balance),
            });
        }

        Ok(match self.get_account(user_id, period).await? {
            Some(account) => DebitOutcome::Insufficient {
                balance: account.balance,
            },
            None => DebitOutcome::Missing,
        })
    }
}

#[async_trait]
impl HistoryStore for PgStore {
    async fn insert_record(&self, record: &HistoryRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO analyses (id, user_id, created_at, title, summary, score, ai_score, full_result)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(&record.owner)
        .bind(record.created_at)
        .bind(&record.title)
        .bind(&record.summary)
        .bind(&record.score)
        .bind(&record.ai_score)
        .bind(&record.full_result)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_owner(&self, owner: &str) -> StoreResult<Vec<HistoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, created_at, title, summary, score, ai_score, full_result
            FROM analyses
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| HistoryRecord {
                id: row.get("id"),
                owner: row.get("user_id"),
                created_at: row.get("created_at"),
                title: row.get("title"),
                summary: row.get("summary"),
                score: row.get("score"),
                ai_score: row.get("ai_score"),
                full_result: row.get("full_result"),
            })
            .collect())
    }
}
