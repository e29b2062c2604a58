use chrono::NaiveDate;
use serde::Deserialize;

pub const DEFAULT_LIMIT: i64 = 1000;
pub const MAX_LIMIT: i64 = 10_000;

/// `minx,miny,maxx,maxy` in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl Bbox {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let parts: Vec<&str> = raw.split(',').collect();
        if parts.len() != 4 {
            return Err("bbox must be 'minx,miny,maxx,maxy'".into());
        }
        let nums = parts
            .iter()
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| "bbox coordinates must be numbers".to_string())?;
        Ok(Self {
            minx: nums[0],
            miny: nums[1],
            maxx: nums[2],
            maxy: nums[3],
        })
    }
}

/// Query string of `/features.geojson` exactly as received.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeatureQuery {
    pub bbox: Option<String>,
    pub region: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

/// Validated filter and paging.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFilter {
    pub bbox: Option<Bbox>,
    /// Case-insensitive substring of `t_region`.
    pub region: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for FeatureFilter {
    fn default() -> Self {
        Self {
            bbox: None,
            region: None,
            date_from: None,
            date_to: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_date(name: &str, raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("{} must be a date in YYYY-MM-DD format", name))
}

impl TryFrom<FeatureQuery> for FeatureFilter {
    type Error = String;

    fn try_from(q: FeatureQuery) -> Result<Self, Self::Error> {
        let limit = match non_blank(&q.limit) {
            None => DEFAULT_LIMIT,
            Some(s) => s
                .parse::<i64>()
                .ok()
                .filter(|l| (1..=MAX_LIMIT).contains(l))
                .ok_or_else(|| format!("limit must be an integer between 1 and {}", MAX_LIMIT))?,
        };
        let offset = match non_blank(&q.offset) {
            None => 0,
            Some(s) => s
                .parse::<i64>()
                .ok()
                .filter(|o| *o >= 0)
                .ok_or_else(|| "offset must be a non-negative integer".to_string())?,
        };
        Ok(Self {
            bbox: non_blank(&q.bbox).map(Bbox::parse).transpose()?,
            region: non_blank(&q.region).map(str::to_string),
            date_from: non_blank(&q.date_from)
                .map(|d| parse_date("date_from", d))
                .transpose()?,
            date_to: non_blank(&q.date_to)
                .map(|d| parse_date("date_to", d))
                .transpose()?,
            limit,
            offset,
        })
    }
}
