//! Relational store: the durable sport → competition → event hierarchy.
//!
//! Writes go through the `TreeStore` capability so the sync and
//! reconciliation algorithms stay testable without a database; the Postgres
//! implementation wraps one transaction per invocation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};

use crate::error::Result;

/// Which upstream hierarchy a sport belongs to: `t1` nests events under
/// competitions, `t2` hangs them directly off the sport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeVariant {
    T1,
    T2,
}

impl TreeVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            TreeVariant::T1 => "t1",
            TreeVariant::T2 => "t2",
        }
    }
}

impl std::fmt::Display for TreeVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SportRow {
    pub id: i64,
    pub event_type_id: i64,
    pub oid: Option<i64>,
    pub tree: String,
    pub name: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CompetitionRow {
    pub id: i64,
    pub competition_id: i64,
    pub name: String,
    pub region: String,
    pub sport_id: i64,
    pub market_count: i32,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct EventRow {
    pub id: i64,
    pub event_id: i64,
    pub name: String,
    pub sport_id: i64,
    pub competition_id: Option<i64>,
    pub open_date: Option<NaiveDateTime>,
    pub market_ids: Vec<String>,
    pub market_count: i32,
}

/// Fields of an event about to be created by the tree sync.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_id: i64,
    pub name: String,
    pub sport_id: i64,
    pub competition_id: Option<i64>,
    pub open_date: Option<NaiveDateTime>,
}

/// One unit of odds-refresh work: the upstream sport id and event id.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct FanoutTarget {
    pub sport_id: i64,
    pub event_id: i64,
}

// ---------------------------------------------------------------------------
// TreeStore capability
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TreeStore: Send {
    async fn find_sport(&mut self, event_type_id: i64, tree: TreeVariant)
        -> Result<Option<SportRow>>;

    async fn create_sport(
        &mut self,
        event_type_id: i64,
        oid: Option<i64>,
        tree: TreeVariant,
        name: &str,
    ) -> Result<SportRow>;

    async fn find_competition(
        &mut self,
        competition_id: i64,
        sport_id: i64,
    ) -> Result<Option<CompetitionRow>>;

    async fn create_competition(
        &mut self,
        competition_id: i64,
        name: &str,
        region: &str,
        sport_id: i64,
    ) -> Result<CompetitionRow>;

    async fn event_exists(&mut self, event_id: i64) -> Result<bool>;

    async fn create_event(&mut self, event: NewEvent) -> Result<()>;

    async fn find_event(&mut self, event_id: i64) -> Result<Option<EventRow>>;

    /// Reconciliation update: market-id set and count on the event row.
    async fn update_event_market_ids(&mut self, event_id: i64, market_ids: &[String])
        -> Result<()>;

    /// Reconciliation update: aggregate count on the parent competition.
    async fn set_competition_market_count(
        &mut self,
        competition_pk: i64,
        market_count: i32,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

/// `TreeStore` over one Postgres transaction. All writes between `begin` and
/// `commit` form a single atomic unit; dropping without commit rolls back.
pub struct PgTreeStore {
    tx: Transaction<'static, Postgres>,
}

impl PgTreeStore {
    pub async fn begin(pool: &PgPool) -> Result<Self> {
        Ok(Self { tx: pool.begin().await? })
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl TreeStore for PgTreeStore {
    async fn find_sport(
        &mut self,
        event_type_id: i64,
        tree: TreeVariant,
    ) -> Result<Option<SportRow>> {
        let row = sqlx::query_as::<_, SportRow>(
            "SELECT id, event_type_id, oid, tree, name FROM sports \
             WHERE event_type_id = $1 AND tree = $2",
        )
        .bind(event_type_id)
        .bind(tree.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn create_sport(
        &mut self,
        event_type_id: i64,
        oid: Option<i64>,
        tree: TreeVariant,
        name: &str,
    ) -> Result<SportRow> {
        let row = sqlx::query_as::<_, SportRow>(
            "INSERT INTO sports (event_type_id, oid, tree, name) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, event_type_id, oid, tree, name",
        )
        .bind(event_type_id)
        .bind(oid)
        .bind(tree.as_str())
        .bind(name)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn find_competition(
        &mut self,
        competition_id: i64,
        sport_id: i64,
    ) -> Result<Option<CompetitionRow>> {
        let row = sqlx::query_as::<_, CompetitionRow>(
            "SELECT id, competition_id, name, region, sport_id, market_count \
             FROM competitions WHERE competition_id = $1 AND sport_id = $2",
        )
        .bind(competition_id)
        .bind(sport_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn create_competition(
        &mut self,
        competition_id: i64,
        name: &str,
        region: &str,
        sport_id: i64,
    ) -> Result<CompetitionRow> {
        let row = sqlx::query_as::<_, CompetitionRow>(
            "INSERT INTO competitions (competition_id, name, region, sport_id) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, competition_id, name, region, sport_id, market_count",
        )
        .bind(competition_id)
        .bind(name)
        .bind(region)
        .bind(sport_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn event_exists(&mut self, event_id: i64) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM events WHERE event_id = $1)")
                .bind(event_id)
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(exists)
    }

    async fn create_event(&mut self, event: NewEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO events (event_id, name, sport_id, competition_id, open_date) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event.event_id)
        .bind(&event.name)
        .bind(event.sport_id)
        .bind(event.competition_id)
        .bind(event.open_date)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_event(&mut self, event_id: i64) -> Result<Option<EventRow>> {
        let row = sqlx::query_as::<_, EventRow>(
            "SELECT id, event_id, name, sport_id, competition_id, open_date, \
                    market_ids, market_count \
             FROM events WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_event_market_ids(
        &mut self,
        event_id: i64,
        market_ids: &[String],
    ) -> Result<()> {
        sqlx::query(
            "UPDATE events SET market_ids = $2, market_count = $3 WHERE event_id = $1",
        )
        .bind(event_id)
        .bind(market_ids)
        .bind(market_ids.len() as i32)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn set_competition_market_count(
        &mut self,
        competition_pk: i64,
        market_count: i32,
    ) -> Result<()> {
        sqlx::query("UPDATE competitions SET market_count = $2 WHERE id = $1")
            .bind(competition_pk)
            .bind(market_count)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pool helpers (read side + connection)
// ---------------------------------------------------------------------------

/// Connect with bounded exponential-backoff retry.
pub async fn connect_with_retry(url: &str, max_retries: u32) -> anyhow::Result<PgPool> {
    let mut attempt = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
        {
            Ok(pool) => {
                info!("Connected to PostgreSQL");
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;
                if attempt >= max_retries {
                    anyhow::bail!(
                        "Failed to connect to database after {} attempts: {}",
                        max_retries,
                        e
                    );
                }
                warn!("Database connection attempt {} failed: {}. Retrying...", attempt, e);
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }
        }
    }
}

pub async fn list_sports(pool: &PgPool) -> Result<Vec<SportRow>> {
    let rows = sqlx::query_as::<_, SportRow>(
        "SELECT id, event_type_id, oid, tree, name FROM sports ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn find_sport_by_event_type(
    pool: &PgPool,
    event_type_id: i64,
) -> Result<Option<SportRow>> {
    let row = sqlx::query_as::<_, SportRow>(
        "SELECT id, event_type_id, oid, tree, name FROM sports \
         WHERE event_type_id = $1 ORDER BY id LIMIT 1",
    )
    .bind(event_type_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn competitions_for_sport(pool: &PgPool, sport_pk: i64) -> Result<Vec<CompetitionRow>> {
    let rows = sqlx::query_as::<_, CompetitionRow>(
        "SELECT id, competition_id, name, region, sport_id, market_count \
         FROM competitions WHERE sport_id = $1 ORDER BY id",
    )
    .bind(sport_pk)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn find_competition_for_sport(
    pool: &PgPool,
    sport_pk: i64,
    competition_id: i64,
) -> Result<Option<CompetitionRow>> {
    let row = sqlx::query_as::<_, CompetitionRow>(
        "SELECT id, competition_id, name, region, sport_id, market_count \
         FROM competitions WHERE sport_id = $1 AND competition_id = $2",
    )
    .bind(sport_pk)
    .bind(competition_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn events_for_competition(pool: &PgPool, competition_pk: i64) -> Result<Vec<EventRow>> {
    let rows = sqlx::query_as::<_, EventRow>(
        "SELECT id, event_id, name, sport_id, competition_id, open_date, \
                market_ids, market_count \
         FROM events WHERE competition_id = $1 ORDER BY id",
    )
    .bind(competition_pk)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Every known event paired with its sport's upstream id, for the odds
/// fan-out.
pub async fn fanout_targets(pool: &PgPool) -> Result<Vec<FanoutTarget>> {
    let rows = sqlx::query_as::<_, FanoutTarget>(
        "SELECT s.event_type_id AS sport_id, e.event_id \
         FROM events e JOIN sports s ON s.id = e.sport_id ORDER BY e.id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests)
// ---------------------------------------------------------------------------
