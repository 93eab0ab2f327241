use chrono::NaiveDateTime;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{
    decode::serde_helpers,
    error::{PipelineError, PipelineResult},
};

/// Number of positions in a [`FeatureVector`].
pub const FEATURE_COUNT: usize = 11;

/// Column order the scaler and classifier were fitted on.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "timestamp",
    "latitude",
    "longitude",
    "elevation",
    "wind_direction",
    "wind_speed",
    "ceiling_height",
    "visibility",
    "temperature",
    "dew_point",
    "sea_level_pressure",
];

/// Canonical classifier input.
///
/// The field order below is a contract with the persisted scaler: reordering
/// it silently corrupts every prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters.
    pub elevation: f64,
    /// Degrees, `[0, 360)`.
    pub wind_direction: f64,
    /// Meters per second.
    pub wind_speed: f64,
    /// Meters.
    pub ceiling_height: f64,
    /// Meters.
    pub visibility: f64,
    /// Degrees Celsius.
    pub temperature: f64,
    /// Degrees Celsius.
    pub dew_point: f64,
    /// Hectopascals.
    pub sea_level_pressure: f64,
}

impl FeatureVector {
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.timestamp,
            self.latitude,
            self.longitude,
            self.elevation,
            self.wind_direction,
            self.wind_speed,
            self.ceiling_height,
            self.visibility,
            self.temperature,
            self.dew_point,
            self.sea_level_pressure,
        ]
    }

    pub fn from_slice(values: &[f64]) -> PipelineResult<Self> {
        let [
            timestamp,
            latitude,
            longitude,
            elevation,
            wind_direction,
            wind_speed,
            ceiling_height,
            visibility,
            temperature,
            dew_point,
            sea_level_pressure,
        ] = <[f64; FEATURE_COUNT]>::try_from(values).map_err(|_| PipelineError::Shape {
            expected: FEATURE_COUNT,
            found: values.len(),
        })?;

        Ok(Self {
            timestamp,
            latitude,
            longitude,
            elevation,
            wind_direction,
            wind_speed,
            ceiling_height,
            visibility,
            temperature,
            dew_point,
            sea_level_pressure,
        })
    }

    /// Check physical ranges. Dew point above temperature is tolerated.
    pub fn validate(&self) -> PipelineResult<()> {
        if let Some((name, value)) = FEATURE_NAMES
            .iter()
            .zip(self.to_array())
            .find(|(_, v)| !v.is_finite())
        {
            return Err(PipelineError::InvalidInput(format!("{name} is not finite ({value})")));
        }

        let checks = [
            ("latitude", (-90.0..=90.0).contains(&self.latitude)),
            ("longitude", (-180.0..=180.0).contains(&self.longitude)),
            ("wind_direction", (0.0..360.0).contains(&self.wind_direction)),
            ("wind_speed", self.wind_speed >= 0.0),
            ("ceiling_height", self.ceiling_height >= 0.0),
            ("visibility", self.visibility >= 0.0),
        ];

        match checks.iter().find(|(_, ok)| !ok) {
            Some((name, _)) => Err(PipelineError::InvalidInput(format!(
                "{name} is out of range in {self:?}"
            ))),
            None => Ok(()),
        }
    }

    /// Stack vectors into an `(N, 11)` matrix in canonical column order.
    pub fn to_matrix(vectors: &[FeatureVector]) -> Array2<f64> {
        let rows: Vec<[f64; FEATURE_COUNT]> = vectors.iter().map(FeatureVector::to_array).collect();
        Array2::from_shape_fn((rows.len(), FEATURE_COUNT), |(i, j)| rows[i][j])
    }
}

/// Display-oriented view of one observation, shared with the narrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedObservation {
    pub temperature: f64,
    pub humidity: f64,
    pub dew_point: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub wind_direction: f64,
    pub lat: f64,
    pub lon: f64,
}

/// Current-conditions payload of the live weather API.
///
/// Every block is optional so that an absent block is reported by the
/// normalizer as missing data instead of failing JSON parsing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LivePayload {
    pub main: Option<LiveMain>,
    pub wind: Option<LiveWind>,
    /// Meters.
    pub visibility: Option<f64>,
    pub dt: Option<i64>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveMain {
    pub temp: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveWind {
    pub deg: Option<f64>,
    pub speed: Option<f64>,
}

/// One row of the historical `WeatherData` store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HistoricalRow {
    #[serde(default, deserialize_with = "serde_helpers::opt_timestamp")]
    pub date: Option<NaiveDateTime>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "TMP")]
    pub temperature: Option<f64>,
    #[serde(rename = "DEW")]
    pub dew_point: Option<f64>,
    #[serde(rename = "WND_SPEED")]
    pub wind_speed: Option<f64>,
    #[serde(rename = "SLP")]
    pub sea_level_pressure: Option<f64>,
    #[serde(default, alias = "LLOVIÓ", deserialize_with = "serde_helpers::rain_flag")]
    pub rained: bool,
}

/// Values typed in by a dashboard user. Nothing is re-derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManualEntry {
    pub features: FeatureVector,
    /// Relative humidity shown alongside the features; not a model input.
    pub humidity: f64,
}

/// The six fields a dashboard user can edit in manual mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DashboardInput {
    pub temperature: f64,
    pub humidity: f64,
    pub dew_point: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub wind_direction: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FeatureVector {
        FeatureVector {
            timestamp: 1_700_000_000.0,
            latitude: 24.8,
            longitude: -107.4,
            elevation: 4.87,
            wind_direction: 180.0,
            wind_speed: 3.2,
            ceiling_height: 22_000.0,
            visibility: 10_000.0,
            temperature: 28.0,
            dew_point: 23.0,
            sea_level_pressure: 1012.0,
        }
    }

    #[test]
    fn array_order_matches_feature_names() {
        let arr = sample().to_array();
        assert_eq!(arr[FEATURE_NAMES.iter().position(|n| *n == "temperature").unwrap()], 28.0);
        assert_eq!(arr[4], 180.0);
        assert_eq!(arr[10], 1012.0);
    }

    #[test]
    fn from_slice_rejects_wrong_width() {
        let err = FeatureVector::from_slice(&[0.0; 9]).unwrap_err();
        assert!(matches!(err, PipelineError::Shape { expected: 11, found: 9 }));

        let back = FeatureVector::from_slice(&sample().to_array()).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn validate_flags_out_of_range_fields() {
        assert!(sample().validate().is_ok());

        let mut v = sample();
        v.latitude = 91.0;
        assert!(v.validate().unwrap_err().to_string().contains("latitude"));

        let mut v = sample();
        v.wind_direction = 360.0;
        assert!(v.validate().is_err());

        let mut v = sample();
        v.visibility = f64::NAN;
        assert!(v.validate().unwrap_err().to_string().contains("visibility"));
    }

    #[test]
    fn dew_point_above_temperature_is_tolerated() {
        let mut v = sample();
        v.dew_point = v.temperature + 0.5;
        assert!(v.validate().is_ok());
    }

    #[test]
    fn matrix_has_one_row_per_vector() {
        let m = FeatureVector::to_matrix(&[sample(), sample()]);
        assert_eq!(m.dim(), (2, FEATURE_COUNT));
        assert_eq!(m[[1, 8]], 28.0);
    }

    #[test]
    fn live_payload_without_main_still_parses() {
        let payload: LivePayload = serde_json::from_str(r#"{"wind":{"speed":1.0}}"#).unwrap();
        assert!(payload.main.is_none());
        assert_eq!(payload.wind.unwrap().speed, Some(1.0));
    }
}
