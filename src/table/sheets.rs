//! Google Sheets readers: the public CSV export and the authenticated Sheets API.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use tokio::{fs, time::sleep};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::{csv::read_csv_bytes, Cell, RawTable};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets/";
const READONLY_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

/// `https://docs.google.com/spreadsheets/d/{id}/export?format=csv&gid={gid}`
pub fn public_export_url(sheet_id: &str, gid: u64) -> Result<Url> {
    let mut url = Url::parse("https://docs.google.com/spreadsheets/d/")?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("export base URL cannot be a base"))?
        .pop_if_empty()
        .push(sheet_id)
        .push("export");
    url.query_pairs_mut()
        .append_pair("format", "csv")
        .append_pair("gid", &gid.to_string());
    Ok(url)
}

async fn get_bytes_core(client: &Client, url: &Url) -> Result<Vec<u8>> {
    debug!("fetching {}", url);
    let bytes = client
        .get(url.clone())
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await
        .with_context(|| format!("GET {} failed", url))?
        .error_for_status()
        .with_context(|| format!("non-success status {}", url))?
        .bytes()
        .await
        .with_context(|| format!("reading body from {}", url))?;
    Ok(bytes.to_vec())
}

async fn get_bytes_with_retry(client: &Client, url: &Url) -> Result<Vec<u8>> {
    let mut attempts = 0;
    loop {
        match get_bytes_core(client, url).await {
            Ok(b) => return Ok(b),
            Err(e) if attempts < MAX_RETRIES => {
                attempts += 1;
                let backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempts - 1);
                warn!(%url, attempt = attempts, delay_ms = backoff, error = %e, "retrying");
                sleep(Duration::from_millis(backoff)).await;
            }
            Err(e) => {
                error!(%url, error = %e, "exhausted retries");
                return Err(e);
            }
        }
    }
}

/// Download the public CSV export of a sheet to `dest` and parse it.
#[instrument(level = "info", skip(client, dest), fields(dest = %dest.as_ref().display()))]
pub async fn download_public_csv(
    client: &Client,
    sheet_id: &str,
    gid: u64,
    dest: impl AsRef<Path>,
) -> Result<RawTable> {
    let dest = dest.as_ref();
    let url = public_export_url(sheet_id, gid)?;
    let bytes = get_bytes_with_retry(client, &url).await?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(dest, &bytes)
        .await
        .with_context(|| format!("writing download to {}", dest.display()))?;
    info!(bytes = bytes.len(), "downloaded public export");
    read_csv_bytes(&bytes)
}

/// The fields we need from a Google service-account key file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ServiceAccountKey {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading service account file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing service account file {}", path.display()))
    }

    fn token_uri(&self) -> &str {
        self.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Signed RS256 assertion for the JWT-bearer grant, valid for one hour.
pub fn build_assertion(key: &ServiceAccountKey, now: i64) -> Result<String> {
    let claims = Claims {
        iss: &key.client_email,
        scope: READONLY_SCOPE,
        aud: key.token_uri(),
        iat: now,
        exp: now + 3600,
    };
    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .context("service account private_key is not a valid RSA PEM")?;
    encode(&Header::new(Algorithm::RS256), &claims, &signing_key).context("signing JWT assertion")
}

async fn fetch_access_token(client: &Client, key: &ServiceAccountKey) -> Result<String> {
    let assertion = build_assertion(key, Utc::now().timestamp())?;
    let resp: TokenResponse = client
        .post(key.token_uri())
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
        .send()
        .await
        .context("token exchange request failed")?
        .error_for_status()
        .context("token exchange rejected")?
        .json()
        .await
        .context("decoding token response")?;
    Ok(resp.access_token)
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
pub struct ValueRange {
    #[serde(default)]
    pub values: Vec<Vec<serde_json::Value>>,
}

fn spreadsheet_url(sheet_id: &str, tail: &[&str]) -> Result<Url> {
    let mut url = Url::parse(SHEETS_API)?;
    {
        let mut segs = url
            .path_segments_mut()
            .map_err(|_| anyhow!("Sheets API URL cannot be a base"))?;
        segs.pop_if_empty().push(sheet_id);
        for t in tail {
            segs.push(t);
        }
    }
    Ok(url)
}

/// A1 range covering a whole worksheet; titles are always quoted.
pub fn worksheet_range(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

/// Turn a `values.get` response into a table. Row 0 is the header.
pub fn table_from_values(values: ValueRange) -> RawTable {
    let mut rows = values.values.into_iter();
    let headers: Vec<String> = match rows.next() {
        Some(h) => h.iter().map(json_to_text).collect(),
        None => return RawTable::default(),
    };
    let grid = rows
        .map(|r| {
            r.iter()
                .map(|v| match json_to_text(v) {
                    s if s.is_empty() => Cell::Empty,
                    s => Cell::Text(s),
                })
                .collect()
        })
        .collect();
    RawTable::from_grid(headers, grid)
}

fn json_to_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Read a worksheet through the Sheets API using a service-account key.
/// `worksheet = None` reads the first worksheet.
#[instrument(level = "info", skip(client, credentials), fields(credentials = %credentials.as_ref().display()))]
pub async fn read_with_service_account(
    client: &Client,
    credentials: impl AsRef<Path>,
    sheet_id: &str,
    worksheet: Option<&str>,
) -> Result<RawTable> {
    let key = ServiceAccountKey::load(credentials).await?;
    let token = fetch_access_token(client, &key).await?;

    let title = match worksheet {
        Some(w) => w.to_string(),
        None => {
            let mut url = spreadsheet_url(sheet_id, &[])?;
            url.query_pairs_mut()
                .append_pair("fields", "sheets.properties.title");
            let meta: SpreadsheetMeta = client
                .get(url)
                .bearer_auth(&token)
                .send()
                .await?
                .error_for_status()
                .context("reading spreadsheet metadata")?
                .json()
                .await?;
            meta.sheets
                .into_iter()
                .next()
                .map(|s| s.properties.title)
                .ok_or_else(|| anyhow!("spreadsheet {} has no worksheets", sheet_id))?
        }
    };

    let url = spreadsheet_url(sheet_id, &["values", &worksheet_range(&title)])?;
    let values: ValueRange = client
        .get(url)
        .bearer_auth(&token)
        .send()
        .await?
        .error_for_status()
        .with_context(|| format!("reading worksheet {:?}", title))?
        .json()
        .await?;

    let table = table_from_values(values);
    info!(worksheet = %title, rows = table.len(), "sheet read");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_public_export_url() -> Result<()> {
        let url = public_export_url("abc123", 7)?;
        assert_eq!(
            url.as_str(),
            "https://docs.google.com/spreadsheets/d/abc123/export?format=csv&gid=7"
        );
        Ok(())
    }

    #[test]
    fn test_values_url_quotes_title() -> Result<()> {
        let url = spreadsheet_url("abc", &["values", &worksheet_range("Sheet 1")])?;
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc/values/'Sheet%201'"
        );
        assert_eq!(worksheet_range("O'Brien"), "'O''Brien'");
        Ok(())
    }

    #[test]
    fn test_table_from_values_pads_ragged_rows() {
        let values: ValueRange = serde_json::from_value(json!({
            "range": "Sheet1!A1:C3",
            "values": [["col1", "col2", "col3"], ["a", 1], ["b", "", "x"]]
        }))
        .unwrap();
        let table = table_from_values(values);
        assert_eq!(table.headers, vec!["col1", "col2", "col3"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0].get("col1"), Some(&Cell::from("a")));
        assert_eq!(table.rows[0].get("col2"), Some(&Cell::from("1")));
        assert_eq!(table.rows[0].get("col3"), Some(&Cell::Empty));
        assert_eq!(table.rows[1].get("col2"), Some(&Cell::Empty));
    }

    #[test]
    fn test_empty_value_range() {
        let values: ValueRange = serde_json::from_value(json!({"range": "A1"})).unwrap();
        assert!(table_from_values(values).headers.is_empty());
    }

    #[test]
    fn test_bad_private_key_is_reported() {
        let key = ServiceAccountKey {
            client_email: "svc@example.iam.gserviceaccount.com".into(),
            private_key: "not a key".into(),
            token_uri: None,
        };
        let err = build_assertion(&key, 0).unwrap_err();
        assert!(err.to_string().contains("RSA PEM"));
    }
}
