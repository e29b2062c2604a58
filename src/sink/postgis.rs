//! PostGIS table writer.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::{fmt, time::Duration};
use tracing::{info, instrument, warn};

use super::BatchSink;
use crate::config::DatabaseConfig;
use crate::transform::feature::indicator_name;
use crate::transform::{Feature, VALUE_SLOTS};

const MAX_IDENT_LEN: usize = 63;

/// Bind parameters per inserted row: five attributes, the indicators, the WKT.
const BINDS_PER_ROW: usize = 5 + VALUE_SLOTS + 1;
/// Postgres caps one statement at `u16::MAX` bind parameters.
pub const MAX_ROWS_PER_INSERT: usize = u16::MAX as usize / BINDS_PER_ROW;

/// A validated, optionally schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: Option<String>,
    name: String,
}

fn valid_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.len() <= MAX_IDENT_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl TableName {
    /// Accepts `table` or `schema.table`, each part `[A-Za-z_][A-Za-z0-9_]*`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (schema, name) = match raw.split_once('.') {
            Some((s, n)) => (Some(s), n),
            None => (None, raw),
        };
        if !valid_ident(name) || !schema.map(valid_ident).unwrap_or(true) {
            bail!("invalid table name {:?}", raw);
        }
        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the spatial index, `<table>_geom_gist`.
    pub fn index_name(&self) -> String {
        format!("\"{}_geom_gist\"", self.name)
    }
}

impl fmt::Display for TableName {
    /// Quoted SQL form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(s) => write!(f, "\"{}\".\"{}\"", s, self.name),
            None => write!(f, "\"{}\"", self.name),
        }
    }
}

pub async fn connect(db: &DatabaseConfig) -> Result<PgPool> {
    let url = db.connection_url().context(
        "No DB connection info found. Provide --db-url or set PGHOST/PGUSER/PGPASSWORD or DATABASE_URL",
    )?;
    PgPoolOptions::new()
        .min_connections(db.pool_min)
        .max_connections(db.pool_max.max(1))
        .acquire_timeout(Duration::from_secs(30))
        .connect(&url)
        .await
        .context("Failed to connect to database")
}

pub fn create_table_sql(table: &TableName) -> String {
    let indicators: Vec<String> = (0..VALUE_SLOTS)
        .map(|k| format!("{} INTEGER", indicator_name(k)))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         id SERIAL PRIMARY KEY, \
         d_date DATE, \
         t_region TEXT, \
         t_city TEXT, \
         long DOUBLE PRECISION, \
         lat DOUBLE PRECISION, \
         {}, \
         geom geometry(Point,4326))",
        table,
        indicators.join(", ")
    )
}

pub fn create_index_sql(table: &TableName) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} USING GIST (geom)",
        table.index_name(),
        table
    )
}

/// Only canonical `YYYY-MM-DD` fits a DATE column; anything else is NULL.
pub fn date_for_column(d_date: Option<&str>) -> Option<NaiveDate> {
    d_date.and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

fn insert_columns() -> String {
    let mut cols: Vec<String> = ["d_date", "t_region", "t_city", "long", "lat"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    cols.extend((0..VALUE_SLOTS).map(indicator_name));
    cols.push("geom".into());
    cols.join(", ")
}

/// INSERT statements covering `batch`, each within the bind-parameter limit.
pub fn build_inserts(table: &TableName, batch: &[Feature]) -> Vec<QueryBuilder<'static, Postgres>> {
    batch
        .chunks(MAX_ROWS_PER_INSERT)
        .map(|chunk| build_insert(table, chunk))
        .collect()
}

/// Multi-row INSERT for at most [`MAX_ROWS_PER_INSERT`] features; geometry
/// goes through `ST_GeomFromText`.
pub fn build_insert(table: &TableName, batch: &[Feature]) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("INSERT INTO {} ({}) ", table, insert_columns()));
    qb.push_values(batch, |mut row, f| {
        let a = &f.attributes;
        row.push_bind(date_for_column(a.d_date.as_deref()))
            .push_bind(a.t_region.clone())
            .push_bind(a.t_city.clone())
            .push_bind(a.long)
            .push_bind(a.lat);
        for flag in a.indicators {
            row.push_bind(i32::from(flag));
        }
        row.push("ST_GeomFromText(")
            .push_bind_unseparated(f.wkt())
            .push_unseparated(", 4326)");
    });
    qb
}

pub struct PostgisSink {
    pool: PgPool,
    table: TableName,
}

impl PostgisSink {
    pub fn new(pool: PgPool, table: TableName) -> Self {
        Self { pool, table }
    }

    /// PostGIS extension, table and spatial index. A missing privilege for
    /// the extension is logged and ignored; the table must succeed.
    #[instrument(level = "info", skip(self), fields(table = %self.table))]
    pub async fn ensure_table(&self) -> Result<()> {
        if let Err(e) = sqlx::query("CREATE EXTENSION IF NOT EXISTS postgis")
            .execute(&self.pool)
            .await
        {
            warn!(error = %e, "could not create postgis extension, assuming it exists");
        }
        sqlx::query(&create_table_sql(&self.table))
            .execute(&self.pool)
            .await
            .with_context(|| format!("creating table {}", self.table))?;
        if let Err(e) = sqlx::query(&create_index_sql(&self.table))
            .execute(&self.pool)
            .await
        {
            warn!(error = %e, "could not create spatial index");
        }
        Ok(())
    }

    pub async fn truncate(&self) -> Result<()> {
        sqlx::query(&format!("TRUNCATE TABLE {}", self.table))
            .execute(&self.pool)
            .await
            .with_context(|| format!("truncating {}", self.table))?;
        info!(table = %self.table, "table truncated");
        Ok(())
    }
}

#[async_trait]
impl BatchSink for PostgisSink {
    type Item = Feature;

    fn name(&self) -> &'static str {
        "postgis"
    }

    /// One transaction per batch, however many statements it takes.
    async fn write_batch(&self, _index: usize, batch: &[Feature]) -> Result<Value> {
        let mut tx = self.pool.begin().await.context("opening transaction")?;
        let mut inserted = 0;
        for mut qb in build_inserts(&self.table, batch) {
            let result = qb
                .build()
                .execute(&mut *tx)
                .await
                .with_context(|| format!("inserting into {}", self.table))?;
            inserted += result.rows_affected();
        }
        tx.commit().await.context("committing batch")?;
        Ok(json!({ "inserted": inserted }))
    }
}
