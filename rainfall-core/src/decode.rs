//! Decoding of the station archive's composite and fixed-point fields.
//!
//! Nothing in here fails: a malformed sub-field becomes `None`, and it is up
//! to the caller to impute or reject it. `None` must never be read as zero.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{
    error::{PipelineError, PipelineResult},
    model::{FeatureVector, HistoricalRow},
};

/// Wind group `direction,quality,type,speed,quality`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindReading {
    /// Degrees.
    pub direction: Option<f64>,
    /// Meters per second.
    pub speed: Option<f64>,
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn leading_number(field: &str) -> Option<f64> {
    let first = field.split(',').next()?;
    if is_digits(first) { first.parse().ok() } else { None }
}

/// `"240,1,N,0051,1"` decodes to direction 240 and speed 5.1 m/s.
///
/// A field with fewer than four parts decodes to nothing at all.
pub fn decode_wind(field: &str) -> WindReading {
    let parts: Vec<&str> = field.split(',').collect();
    if parts.len() < 4 {
        return WindReading::default();
    }

    let direction = if is_digits(parts[0]) { parts[0].parse().ok() } else { None };
    // Archive speed is tenths of m/s.
    let speed = if is_digits(parts[3]) {
        parts[3].parse::<f64>().ok().map(|s| s / 10.0)
    } else {
        None
    };

    WindReading { direction, speed }
}

/// Ceiling group `height,quality,method,flag`; meters.
pub fn decode_ceiling(field: &str) -> Option<f64> {
    leading_number(field)
}

/// Visibility group `distance,quality,variability,quality`; meters.
pub fn decode_visibility(field: &str) -> Option<f64> {
    leading_number(field)
}

/// Signed fixed-point scalar such as `+0250,1` (tenths of a degree).
///
/// All-nines magnitudes are the archive's missing marker. Values that
/// already carry a decimal point are taken as converted and not divided.
pub fn decode_scaled(field: &str, divisor: f64) -> Option<f64> {
    let value = field.split(',').next()?.trim();
    let magnitude = value.trim_start_matches(['+', '-']);
    if magnitude.is_empty() {
        return None;
    }

    if magnitude.contains('.') {
        return value.parse::<f64>().ok().filter(|v| v.is_finite());
    }
    if !is_digits(magnitude) {
        return None;
    }
    if magnitude.len() >= 4 && magnitude.bytes().all(|b| b == b'9') {
        return None;
    }

    value.parse::<f64>().ok().map(|v| v / divisor)
}

/// Parse the timestamp layouts seen in archive exports and the store.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    const LAYOUTS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"];

    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(raw, layout).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc()))
}

fn parse_rain_flag(raw: &str) -> bool {
    matches!(raw.trim(), "1" | "1.0" | "true" | "True" | "TRUE")
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

pub(crate) mod serde_helpers {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer};

    pub fn opt_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(super::parse_timestamp))
    }

    pub fn rain_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().is_some_and(super::parse_rain_flag))
    }
}

/// Fixed-point scale of an archive's scalar fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArchiveScale {
    pub temperature_divisor: f64,
    pub pressure_divisor: f64,
}

impl Default for ArchiveScale {
    fn default() -> Self {
        Self { temperature_divisor: 10.0, pressure_divisor: 10.0 }
    }
}

/// One raw archive row, exactly as read from CSV.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawStationRecord {
    #[serde(default)]
    pub station: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub latitude: String,
    #[serde(default)]
    pub longitude: String,
    #[serde(default)]
    pub elevation: String,
    #[serde(default)]
    pub wnd: String,
    #[serde(default)]
    pub cig: String,
    #[serde(default)]
    pub vis: String,
    #[serde(default)]
    pub tmp: String,
    #[serde(default)]
    pub dew: String,
    #[serde(default)]
    pub slp: String,
    #[serde(default, alias = "LLOVIÓ")]
    pub rained: String,
}

impl RawStationRecord {
    pub fn decode(&self, scale: &ArchiveScale) -> DecodedRecord {
        let wind = decode_wind(&self.wnd);

        DecodedRecord {
            station: self.station.trim().to_string(),
            date: parse_timestamp(&self.date),
            latitude: parse_number(&self.latitude).map(|v| round_to(v, 6)),
            longitude: parse_number(&self.longitude).map(|v| round_to(v, 6)),
            elevation: parse_number(&self.elevation).map(|v| round_to(v, 2)),
            wind_direction: wind.direction,
            wind_speed: wind.speed,
            ceiling_height: decode_ceiling(&self.cig),
            visibility: decode_visibility(&self.vis),
            temperature: decode_scaled(&self.tmp, scale.temperature_divisor),
            dew_point: decode_scaled(&self.dew, scale.temperature_divisor),
            sea_level_pressure: decode_scaled(&self.slp, scale.pressure_divisor),
            rained: parse_rain_flag(&self.rained),
        }
    }
}

/// Typed archive row with every optional value made explicit.
///
/// Serializes to the `WeatherData` column layout used by the historical store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedRecord {
    #[serde(rename = "STATION")]
    pub station: String,
    #[serde(rename = "DATE")]
    pub date: Option<NaiveDateTime>,
    #[serde(rename = "LATITUDE")]
    pub latitude: Option<f64>,
    #[serde(rename = "LONGITUDE")]
    pub longitude: Option<f64>,
    #[serde(rename = "ELEVATION")]
    pub elevation: Option<f64>,
    #[serde(rename = "WND_DIRECTION")]
    pub wind_direction: Option<f64>,
    #[serde(rename = "WND_SPEED")]
    pub wind_speed: Option<f64>,
    #[serde(rename = "CIG_HEIGHT")]
    pub ceiling_height: Option<f64>,
    #[serde(rename = "VIS_DISTANCE")]
    pub visibility: Option<f64>,
    #[serde(rename = "TMP")]
    pub temperature: Option<f64>,
    #[serde(rename = "DEW")]
    pub dew_point: Option<f64>,
    #[serde(rename = "SLP")]
    pub sea_level_pressure: Option<f64>,
    #[serde(rename = "RAINED")]
    pub rained: bool,
}

impl DecodedRecord {
    /// Full feature vector, or the first field that is still missing.
    pub fn to_feature_vector(&self) -> PipelineResult<FeatureVector> {
        fn req(value: Option<f64>, field: &'static str) -> PipelineResult<f64> {
            value.ok_or(PipelineError::missing(field))
        }

        let date = self.date.ok_or(PipelineError::missing("DATE"))?;
        let vector = FeatureVector {
            timestamp: date.and_utc().timestamp() as f64,
            latitude: req(self.latitude, "LATITUDE")?,
            longitude: req(self.longitude, "LONGITUDE")?,
            elevation: req(self.elevation, "ELEVATION")?,
            wind_direction: req(self.wind_direction, "WND_DIRECTION")?,
            wind_speed: req(self.wind_speed, "WND_SPEED")?,
            ceiling_height: req(self.ceiling_height, "CIG_HEIGHT")?,
            visibility: req(self.visibility, "VIS_DISTANCE")?,
            temperature: req(self.temperature, "TMP")?,
            dew_point: req(self.dew_point, "DEW")?,
            sea_level_pressure: req(self.sea_level_pressure, "SLP")?,
        };
        vector.validate()?;
        Ok(vector)
    }

    /// Projection onto the columns the historical query exposes.
    pub fn to_historical_row(&self) -> Option<HistoricalRow> {
        Some(HistoricalRow {
            date: self.date,
            latitude: self.latitude?,
            longitude: self.longitude?,
            temperature: self.temperature,
            dew_point: self.dew_point,
            wind_speed: self.wind_speed,
            sea_level_pressure: self.sea_level_pressure,
            rained: self.rained,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wind_group_decodes_direction_and_tenths_speed() {
        let w = decode_wind("240,1,N,0051,1");
        assert_eq!(w.direction, Some(240.0));
        assert_eq!(w.speed, Some(5.1));
    }

    #[test]
    fn malformed_wind_group_decodes_to_nothing() {
        assert_eq!(decode_wind("invalid"), WindReading::default());
        assert_eq!(decode_wind(""), WindReading::default());
        assert_eq!(decode_wind("240,1"), WindReading::default());
    }

    #[test]
    fn wind_subfields_decode_independently() {
        let w = decode_wind("VRB,1,V,0030,1");
        assert_eq!(w.direction, None);
        assert_eq!(w.speed, Some(3.0));

        let w = decode_wind("090,1,N,-12,1");
        assert_eq!(w.direction, Some(90.0));
        assert_eq!(w.speed, None);
    }

    #[test]
    fn ceiling_and_visibility_take_leading_number() {
        assert_eq!(decode_ceiling("22000,1,9,N"), Some(22000.0));
        assert_eq!(decode_ceiling("N/A"), None);
        assert_eq!(decode_visibility("016093,1,9,9"), Some(16093.0));
        assert_eq!(decode_visibility(""), None);
    }

    #[test]
    fn scaled_fields_honor_sign_and_sentinel() {
        assert_eq!(decode_scaled("+0250,1", 10.0), Some(25.0));
        assert_eq!(decode_scaled("-0012,1", 10.0), Some(-1.2));
        assert_eq!(decode_scaled("10132,1", 10.0), Some(1013.2));
        assert_eq!(decode_scaled("+9999,9", 10.0), None);
        assert_eq!(decode_scaled("99999,9", 10.0), None);
        assert_eq!(decode_scaled("25.3", 10.0), Some(25.3));
        assert_eq!(decode_scaled("x", 10.0), None);
        assert_eq!(decode_scaled("", 10.0), None);
    }

    #[test]
    fn timestamps_in_several_layouts() {
        assert!(parse_timestamp("2023-05-01T12:00:00").is_some());
        assert!(parse_timestamp("2023-05-01 12:00:00.000").is_some());
        assert!(parse_timestamp("2023-05-01T12:00:00Z").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    fn raw() -> RawStationRecord {
        RawStationRecord {
            station: "76458099999".into(),
            date: "2023-05-01T12:00:00".into(),
            latitude: "24.7666667".into(),
            longitude: "-107.4666667".into(),
            elevation: "32.917".into(),
            wnd: "240,1,N,0051,1".into(),
            cig: "22000,1,9,N".into(),
            vis: "016093,1,9,9".into(),
            tmp: "+0280,1".into(),
            dew: "+0230,1".into(),
            slp: "10120,1".into(),
            rained: "1".into(),
        }
    }

    #[test]
    fn complete_row_becomes_feature_vector() {
        let decoded = raw().decode(&ArchiveScale::default());
        assert_eq!(decoded.latitude, Some(24.766667));
        assert_eq!(decoded.elevation, Some(32.92));
        assert!(decoded.rained);

        let v = decoded.to_feature_vector().unwrap();
        assert_eq!(v.temperature, 28.0);
        assert_eq!(v.dew_point, 23.0);
        assert_eq!(v.sea_level_pressure, 1012.0);
        assert_eq!(v.wind_speed, 5.1);
    }

    #[test]
    fn missing_subfield_is_reported_not_zeroed() {
        let mut r = raw();
        r.cig = "bad".into();
        let decoded = r.decode(&ArchiveScale::default());
        assert_eq!(decoded.ceiling_height, None);

        let err = decoded.to_feature_vector().unwrap_err();
        assert!(matches!(err, PipelineError::MissingData { field: "CIG_HEIGHT" }));
    }

    #[test]
    fn historical_projection_keeps_nullable_columns() {
        let mut r = raw();
        r.slp = "99999,9".into();
        let row = r.decode(&ArchiveScale::default()).to_historical_row().unwrap();
        assert_eq!(row.sea_level_pressure, None);
        assert_eq!(row.temperature, Some(28.0));
        assert!(row.rained);
    }
}
