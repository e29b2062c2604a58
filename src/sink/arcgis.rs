//! ArcGIS feature-layer upload through the REST `addFeatures` operation.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use super::BatchSink;
use crate::config::ArcgisConfig;
use crate::transform::{FeatureRecord, PointGeometry};

/// Date layouts converted to epoch milliseconds before upload.
const UPLOAD_DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d"];

/// A feature in the shape `addFeatures` expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArcGisFeature {
    pub attributes: Map<String, Value>,
    pub geometry: PointGeometry,
}

/// Midnight UTC of a recognised date string, in epoch milliseconds.
pub fn date_to_epoch_ms(s: &str) -> Option<i64> {
    UPLOAD_DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(s, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp_millis())
    })
}

/// Attach geometry and convert dates. Records without a usable point are dropped.
pub fn convert_for_arcgis(records: &[FeatureRecord]) -> Vec<ArcGisFeature> {
    records
        .iter()
        .filter_map(|rec| {
            let Some(geometry) = rec.point().filter(|p| p.x.is_finite() && p.y.is_finite()) else {
                let attrs = Value::Object(rec.attributes.clone());
                info!(attributes = %attrs, "skipping feature with missing geometry");
                return None;
            };
            let mut attributes = rec.attributes.clone();
            if let Some(ms) = rec.attr_str("d_date").and_then(date_to_epoch_ms) {
                attributes.insert("d_date".into(), json!(ms));
            }
            Some(ArcGisFeature {
                attributes,
                geometry,
            })
        })
        .collect()
}

pub fn add_features_url(layer_url: &str) -> Result<Url> {
    let base = format!("{}/addFeatures", layer_url.trim_end_matches('/'));
    Url::parse(&base).with_context(|| format!("invalid feature layer URL {:?}", layer_url))
}

/// Form body for one `addFeatures` call.
pub fn build_form(batch: &[ArcGisFeature], token: Option<&str>) -> Result<Vec<(&'static str, String)>> {
    let mut form = vec![
        ("f", "json".to_string()),
        ("features", serde_json::to_string(batch).context("serializing batch")?),
    ];
    if let Some(t) = token.filter(|t| !t.is_empty()) {
        form.push(("token", t.to_string()));
    }
    Ok(form)
}

/// ArcGIS reports many failures as HTTP 200 with an `error` object.
pub fn interpret_response(status: StatusCode, body: &str) -> Result<Value> {
    if !status.is_success() {
        bail!("HTTP {}: {}", status, body.chars().take(500).collect::<String>());
    }
    let v: Value = serde_json::from_str(body).context("response is not JSON")?;
    if let Some(err) = v.get("error") {
        bail!("service error: {}", err);
    }
    Ok(v)
}

pub struct ArcGisSink {
    client: Client,
    url: Option<Url>,
    token: Option<String>,
    max_retries: u32,
    retry_backoff: Duration,
    sleep_between: Duration,
    timeout: Duration,
    dry_run: bool,
}

impl ArcGisSink {
    /// A dry run needs no layer URL; a real upload does.
    pub fn new(client: Client, cfg: &ArcgisConfig, dry_run: bool) -> Result<Self> {
        let url = match cfg.feature_layer_url.as_deref().filter(|u| !u.is_empty()) {
            Some(u) => Some(add_features_url(u)?),
            None if dry_run => None,
            None => bail!("ARCGIS_FEATURE_LAYER_URL or --feature-layer-url is required for upload"),
        };
        Ok(Self {
            client,
            url,
            token: cfg.token.clone(),
            max_retries: cfg.max_retries,
            retry_backoff: Duration::from_secs(1),
            sleep_between: Duration::from_millis(cfg.sleep_between_ms),
            timeout: Duration::from_secs(cfg.timeout_secs),
            dry_run,
        })
    }

    async fn post_once(&self, url: &Url, form: &[(&'static str, String)]) -> Result<Value> {
        let resp = self
            .client
            .post(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.timeout)
            .form(form)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;
        let status = resp.status();
        let body = resp.text().await.context("reading response body")?;
        interpret_response(status, &body)
    }
}

#[async_trait]
impl BatchSink for ArcGisSink {
    type Item = ArcGisFeature;

    fn name(&self) -> &'static str {
        "arcgis"
    }

    async fn write_batch(&self, index: usize, batch: &[ArcGisFeature]) -> Result<Value> {
        if self.dry_run {
            let preview = batch
                .first()
                .map(|f| serde_json::to_string(f).unwrap_or_default())
                .unwrap_or_default();
            info!(batch = index, size = batch.len(), %preview, "[dry-run] batch");
            return Ok(json!({ "dry_run": true }));
        }
        let url = self
            .url
            .as_ref()
            .ok_or_else(|| anyhow!("no feature layer URL configured"))?;
        let form = build_form(batch, self.token.as_deref())?;

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match self.post_once(url, &form).await {
                Ok(v) => break v,
                Err(e) if attempt <= self.max_retries => {
                    let delay = self.retry_backoff * attempt;
                    warn!(batch = index, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    sleep(delay).await;
                }
                Err(e) => return Err(e.context(format!("after {} attempts", attempt))),
            }
        };
        debug!(batch = index, %response, "addFeatures response");
        sleep(self.sleep_between).await;
        Ok(response)
    }
}
