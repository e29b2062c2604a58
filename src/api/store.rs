use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use sqlx::postgres::PgPool;
use sqlx::{Postgres, QueryBuilder};
use tracing::{info, instrument};

use super::filters::FeatureFilter;
use crate::sink::postgis::TableName;

/// A row of the feature table as served by the API.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StoredFeature {
    pub id: i32,
    pub d_date: Option<NaiveDate>,
    pub t_region: Option<String>,
    pub t_city: Option<String>,
    pub long: Option<f64>,
    pub lat: Option<f64>,
    /// `ST_AsGeoJSON(geom)`
    pub geom_json: Option<String>,
}

impl StoredFeature {
    pub fn to_geojson(&self) -> Value {
        let geometry = self
            .geom_json
            .as_deref()
            .and_then(|g| serde_json::from_str::<Value>(g).ok())
            .unwrap_or(Value::Null);
        json!({
            "type": "Feature",
            "geometry": geometry,
            "properties": {
                "id": self.id,
                "d_date": self.d_date.map(|d| d.format("%Y-%m-%d").to_string()),
                "t_region": self.t_region,
                "t_city": self.t_city,
                "long": self.long,
                "lat": self.lat,
            }
        })
    }
}

/// Read access to the published feature table.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn list(&self, filter: &FeatureFilter) -> Result<Vec<StoredFeature>>;
    async fn count(&self, filter: &FeatureFilter) -> Result<i64>;
    async fn get(&self, id: i64) -> Result<Option<StoredFeature>>;
}

const SELECT_COLUMNS: &str =
    "SELECT id, d_date, t_region, t_city, long, lat, ST_AsGeoJSON(geom) AS geom_json FROM ";

/// Append the `WHERE` clause for `filter`; every value is a bind parameter.
pub fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &FeatureFilter) {
    let mut sep = " WHERE ";
    if let Some(region) = &filter.region {
        qb.push(sep).push("t_region ILIKE ").push_bind(format!("%{}%", region));
        sep = " AND ";
    }
    if let Some(from) = filter.date_from {
        qb.push(sep).push("d_date >= ").push_bind(from);
        sep = " AND ";
    }
    if let Some(to) = filter.date_to {
        qb.push(sep).push("d_date <= ").push_bind(to);
        sep = " AND ";
    }
    if let Some(b) = filter.bbox {
        qb.push(sep)
            .push("ST_Intersects(geom, ST_MakeEnvelope(")
            .push_bind(b.minx)
            .push(", ")
            .push_bind(b.miny)
            .push(", ")
            .push_bind(b.maxx)
            .push(", ")
            .push_bind(b.maxy)
            .push(", 4326))");
    }
}

pub fn list_query(table: &TableName, filter: &FeatureFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("{}{}", SELECT_COLUMNS, table));
    push_filters(&mut qb, filter);
    qb.push(" ORDER BY id LIMIT ")
        .push_bind(filter.limit)
        .push(" OFFSET ")
        .push_bind(filter.offset);
    qb
}

pub fn count_query(table: &TableName, filter: &FeatureFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", table));
    push_filters(&mut qb, filter);
    qb
}

pub struct PgFeatureStore {
    pool: PgPool,
    table: TableName,
}

impl PgFeatureStore {
    /// Wraps the pool after checking it answers `SELECT 1`.
    #[instrument(level = "info", skip(pool))]
    pub async fn new(pool: PgPool, table: &str) -> Result<Self> {
        let table = TableName::parse(table)?;
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("database health check failed")?;
        info!(table = %table, "feature store ready");
        Ok(Self { pool, table })
    }
}

#[async_trait]
impl FeatureStore for PgFeatureStore {
    async fn list(&self, filter: &FeatureFilter) -> Result<Vec<StoredFeature>> {
        list_query(&self.table, filter)
            .build_query_as::<StoredFeature>()
            .fetch_all(&self.pool)
            .await
            .context("querying features")
    }

    async fn count(&self, filter: &FeatureFilter) -> Result<i64> {
        let (n,): (i64,) = count_query(&self.table, filter)
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .context("counting features")?;
        Ok(n)
    }

    async fn get(&self, id: i64) -> Result<Option<StoredFeature>> {
        // ids are SERIAL (int4); anything wider cannot exist
        let Ok(id) = i32::try_from(id) else {
            return Ok(None);
        };
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("{}{} WHERE id = ", SELECT_COLUMNS, self.table));
        qb.push_bind(id);
        qb.build_query_as::<StoredFeature>()
            .fetch_optional(&self.pool)
            .await
            .context("fetching feature")
    }
}
