//! Read-only HTTP service over the published feature table.

pub mod filters;
pub mod store;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::{path::PathBuf, sync::Arc};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, warn};

use crate::config::ApiConfig;
use filters::{FeatureFilter, FeatureQuery};
pub use store::{FeatureStore, PgFeatureStore, StoredFeature};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn FeatureStore>,
    pub gpkg_path: PathBuf,
}

/// Error body is always `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: detail.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        error!(error = %format!("{:#}", e), "store failure");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: format!("{:#}", e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

async fn root() -> Redirect {
    Redirect::temporary("/health")
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn features_geojson(
    State(state): State<AppState>,
    Query(query): Query<FeatureQuery>,
) -> Result<Json<Value>, ApiError> {
    let filter = FeatureFilter::try_from(query).map_err(ApiError::bad_request)?;
    let rows = state.store.list(&filter).await?;
    // counting is only worth it for the first page
    let total = if filter.offset == 0 {
        Some(state.store.count(&filter).await?)
    } else {
        None
    };
    let features: Vec<Value> = rows.iter().map(StoredFeature::to_geojson).collect();
    Ok(Json(json!({
        "type": "FeatureCollection",
        "features": features,
        "meta": { "limit": filter.limit, "offset": filter.offset, "total": total },
    })))
}

async fn feature_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id: i64 = id
        .parse()
        .map_err(|_| ApiError::bad_request("feature id must be an integer"))?;
    match state.store.get(id).await? {
        Some(f) => Ok(Json(f.to_geojson())),
        None => Err(ApiError::not_found("Feature not found")),
    }
}

async fn download_gpkg(State(state): State<AppState>) -> Result<Response, ApiError> {
    let bytes = match tokio::fs::read(&state.gpkg_path).await {
        Ok(b) => b,
        Err(_) => return Err(ApiError::not_found("GPKG not found")),
    };
    let filename = state
        .gpkg_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("features.gpkg");
    let disposition = format!("attachment; filename=\"{}\"", filename);
    Ok((
        [
            (header::CONTENT_TYPE, "application/geopackage+sqlite".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// Any origin when the list is empty, otherwise exactly the listed ones.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(parsed))
}

pub fn router(store: Arc<dyn FeatureStore>, cfg: &ApiConfig) -> Router {
    let state = AppState {
        store,
        gpkg_path: PathBuf::from(&cfg.gpkg_path),
    };
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/features.geojson", get(features_geojson))
        .route("/feature/:id", get(feature_by_id))
        .route("/download/gpkg", get(download_gpkg))
        .layer(cors_layer(&cfg.cors_allow_origins))
        .with_state(state)
}
