use serde::ser::{Serialize, SerializeMap, SerializeStruct, Serializer};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::columns::VALUE_SLOTS;

/// WGS84 geographic coordinates.
pub const WGS84: u32 = 4326;

/// Attribute names of the ten indicator flags, `i_value_1..i_value_10`.
pub fn indicator_name(slot: usize) -> String {
    format!("i_value_{}", slot + 1)
}

/// Attributes shared by every feature expanded from one row, plus the
/// per-repeat indicator flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Attributes {
    pub d_date: Option<String>,
    pub t_region: Option<String>,
    pub t_city: Option<String>,
    pub long: f64,
    pub lat: f64,
    pub indicators: [u8; VALUE_SLOTS],
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(5 + VALUE_SLOTS))?;
        map.serialize_entry("d_date", &self.d_date)?;
        map.serialize_entry("t_region", &self.t_region)?;
        map.serialize_entry("t_city", &self.t_city)?;
        map.serialize_entry("long", &self.long)?;
        map.serialize_entry("lat", &self.lat)?;
        for (k, flag) in self.indicators.iter().enumerate() {
            map.serialize_entry(&indicator_name(k), flag)?;
        }
        map.end()
    }
}

/// Point geometry in the ArcGIS JSON shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointGeometry {
    pub x: f64,
    pub y: f64,
    pub srid: u32,
}

impl Serialize for PointGeometry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(serde::Serialize)]
        struct SpatialReference {
            wkid: u32,
        }
        let mut st = serializer.serialize_struct("PointGeometry", 3)?;
        st.serialize_field("x", &self.x)?;
        st.serialize_field("y", &self.y)?;
        st.serialize_field("spatialReference", &SpatialReference { wkid: self.srid })?;
        st.end()
    }
}

impl PointGeometry {
    pub fn wgs84(x: f64, y: f64) -> Self {
        Self { x, y, srid: WGS84 }
    }

    /// `POINT(x y)`
    pub fn to_wkt(&self) -> String {
        format!("POINT({} {})", self.x, self.y)
    }

    /// Read `{x, y}` (ArcGIS) or GeoJSON `{type: "Point", coordinates: [x, y]}`.
    pub fn from_json(v: &Value) -> Option<Self> {
        let obj = v.as_object()?;
        if let (Some(x), Some(y)) = (obj.get("x"), obj.get("y")) {
            return Some(Self::wgs84(json_f64(x)?, json_f64(y)?));
        }
        let coords = obj.get("coordinates")?.as_array()?;
        match coords.as_slice() {
            [x, y, ..] => Some(Self::wgs84(json_f64(x)?, json_f64(y)?)),
            _ => None,
        }
    }
}

/// Parse `POINT(x y)` (case-insensitive, any inner whitespace).
pub fn parse_point_wkt(wkt: &str) -> Option<PointGeometry> {
    let s = wkt.trim();
    let head = s.get(..5)?;
    if !head.eq_ignore_ascii_case("point") {
        return None;
    }
    let inner = s[5..].trim().strip_prefix('(')?.strip_suffix(')')?;
    let mut parts = inner.split_whitespace();
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(PointGeometry::wgs84(x, y))
}

/// Number from a JSON value, accepting numeric strings.
pub fn json_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// One expanded point. Geometry is always the `(long, lat)` of its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub attributes: Attributes,
}

impl Feature {
    pub fn geometry(&self) -> PointGeometry {
        PointGeometry::wgs84(self.attributes.long, self.attributes.lat)
    }

    pub fn wkt(&self) -> String {
        self.geometry().to_wkt()
    }
}

/// Exported as `{attributes, geometry, wkt}` so either geometry encoding can
/// be consumed.
impl Serialize for Feature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("Feature", 3)?;
        st.serialize_field("attributes", &self.attributes)?;
        st.serialize_field("geometry", &self.geometry())?;
        st.serialize_field("wkt", &self.wkt())?;
        st.end()
    }
}

/// A feature record as read back from a JSON export or any other producer.
///
/// Attributes are kept loose; geometry may come as an object, a WKT string
/// or only through the `long`/`lat` attributes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FeatureRecord {
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub geometry: Option<Value>,
    #[serde(default, alias = "geometry_wkt")]
    pub wkt: Option<String>,
}

impl FeatureRecord {
    /// Attributes first, then the geometry object, then WKT.
    pub fn point(&self) -> Option<PointGeometry> {
        let from_attrs = match (self.attributes.get("long"), self.attributes.get("lat")) {
            (Some(x), Some(y)) => json_f64(x)
                .zip(json_f64(y))
                .map(|(x, y)| PointGeometry::wgs84(x, y)),
            _ => None,
        };
        from_attrs
            .or_else(|| self.geometry.as_ref().and_then(PointGeometry::from_json))
            .or_else(|| self.wkt.as_deref().and_then(parse_point_wkt))
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    pub fn attr_i64(&self, key: &str) -> Option<i64> {
        match self.attributes.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::Bool(b) => Some(*b as i64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<&Feature> for FeatureRecord {
    fn from(f: &Feature) -> Self {
        let attributes = match serde_json::to_value(&f.attributes) {
            Ok(Value::Object(m)) => m,
            _ => Map::new(),
        };
        Self {
            attributes,
            geometry: serde_json::to_value(f.geometry()).ok(),
            wkt: Some(f.wkt()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Feature {
        let mut indicators = [0; VALUE_SLOTS];
        indicators[0] = 1;
        Feature {
            attributes: Attributes {
                d_date: Some("2025-10-17".into()),
                t_region: Some("Київська".into()),
                t_city: None,
                long: 30.5,
                lat: 50.45,
                indicators,
            },
        }
    }

    #[test]
    fn test_feature_json_shape() -> serde_json::Result<()> {
        let v = serde_json::to_value(sample())?;
        assert_eq!(v["attributes"]["d_date"], "2025-10-17");
        assert_eq!(v["attributes"]["t_city"], Value::Null);
        assert_eq!(v["attributes"]["i_value_1"], 1);
        assert_eq!(v["attributes"]["i_value_10"], 0);
        assert_eq!(v["geometry"], json!({"x": 30.5, "y": 50.45, "spatialReference": {"wkid": 4326}}));
        assert_eq!(v["wkt"], "POINT(30.5 50.45)");
        Ok(())
    }

    #[test]
    fn test_attribute_key_order() -> serde_json::Result<()> {
        let s = serde_json::to_string(&sample().attributes)?;
        let d = s.find("\"d_date\"").unwrap_or(usize::MAX);
        let lat = s.find("\"lat\"").unwrap_or(usize::MAX);
        let last = s.find("\"i_value_10\"").unwrap_or(usize::MAX);
        assert!(d < lat && lat < last && last != usize::MAX);
        Ok(())
    }

    #[test]
    fn test_parse_point_wkt() {
        assert_eq!(parse_point_wkt("POINT(12.34 56.78)"), Some(PointGeometry::wgs84(12.34, 56.78)));
        assert_eq!(parse_point_wkt(" point ( -1  2.5 ) "), Some(PointGeometry::wgs84(-1.0, 2.5)));
        assert_eq!(parse_point_wkt("POINT(1)"), None);
        assert_eq!(parse_point_wkt("LINESTRING(1 2, 3 4)"), None);
        assert_eq!(parse_point_wkt("POINT(1 2 3)"), None);
    }

    #[test]
    fn test_record_accepts_either_geometry() -> serde_json::Result<()> {
        let by_object: FeatureRecord = serde_json::from_value(json!({
            "attributes": {"d_date": null},
            "geometry": {"x": 1.5, "y": 2.5}
        }))?;
        assert_eq!(by_object.point(), Some(PointGeometry::wgs84(1.5, 2.5)));

        let by_wkt: FeatureRecord = serde_json::from_value(json!({
            "attributes": {},
            "wkt": "POINT(3 4)"
        }))?;
        assert_eq!(by_wkt.point(), Some(PointGeometry::wgs84(3.0, 4.0)));

        let by_alias: FeatureRecord = serde_json::from_value(json!({"geometry_wkt": "POINT(5 6)"}))?;
        assert_eq!(by_alias.point(), Some(PointGeometry::wgs84(5.0, 6.0)));

        let by_attrs: FeatureRecord = serde_json::from_value(json!({
            "attributes": {"long": "7.5", "lat": 8}
        }))?;
        assert_eq!(by_attrs.point(), Some(PointGeometry::wgs84(7.5, 8.0)));

        let geojson: FeatureRecord = serde_json::from_value(json!({
            "geometry": {"type": "Point", "coordinates": [9, 10]}
        }))?;
        assert_eq!(geojson.point(), Some(PointGeometry::wgs84(9.0, 10.0)));

        let none: FeatureRecord = serde_json::from_value(json!({"attributes": {"long": "x"}}))?;
        assert_eq!(none.point(), None);
        Ok(())
    }

    #[test]
    fn test_record_from_feature() {
        let rec = FeatureRecord::from(&sample());
        assert_eq!(rec.attr_str("t_region"), Some("Київська"));
        assert_eq!(rec.attr_i64("i_value_1"), Some(1));
        assert_eq!(rec.point(), Some(PointGeometry::wgs84(30.5, 50.45)));
        assert_eq!(rec.wkt.as_deref(), Some("POINT(30.5 50.45)"));
    }
}
