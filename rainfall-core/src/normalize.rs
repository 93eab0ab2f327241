//! Turns the three observation sources into one [`FeatureVector`].

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    dewpoint::DewPointMode,
    error::{PipelineError, PipelineResult},
    model::{
        DashboardInput, FeatureVector, HistoricalRow, LivePayload, ManualEntry,
        NormalizedObservation,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    LiveApi,
    HistoricalDbRow,
    ManualEntry,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::LiveApi => "live_api",
            SourceKind::HistoricalDbRow => "historical_db_row",
            SourceKind::ManualEntry => "manual_entry",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum ObservationSource {
    LiveApi(LivePayload),
    HistoricalRow(HistoricalRow),
    Manual(ManualEntry),
}

impl ObservationSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            ObservationSource::LiveApi(_) => SourceKind::LiveApi,
            ObservationSource::HistoricalRow(_) => SourceKind::HistoricalDbRow,
            ObservationSource::Manual(_) => SourceKind::ManualEntry,
        }
    }
}

/// Stand-in values for fields the non-archival sources never report.
///
/// Elevation is not looked up per coordinate and the ceiling constant means
/// "unknown", not "very high"; both are kept for parity with training data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerSettings {
    pub elevation_m: f64,
    pub ceiling_height_m: f64,
    pub visibility_m: f64,
    pub manual_visibility_m: f64,
    pub historical_humidity_pct: f64,
    pub historical_pressure_hpa: f64,
    pub dew_point_mode: DewPointMode,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            elevation_m: 4.87,
            ceiling_height_m: 22_000.0,
            visibility_m: 10_000.0,
            manual_visibility_m: 16_093.0,
            historical_humidity_pct: 70.0,
            historical_pressure_hpa: 1010.0,
            dew_point_mode: DewPointMode::Linear,
        }
    }
}

impl NormalizerSettings {
    /// Complete a dashboard form into a manual entry.
    pub fn manual_entry(
        &self,
        input: DashboardInput,
        lat: f64,
        lon: f64,
        now: DateTime<Utc>,
    ) -> ManualEntry {
        ManualEntry {
            features: FeatureVector {
                timestamp: epoch_seconds(now),
                latitude: lat,
                longitude: lon,
                elevation: self.elevation_m,
                wind_direction: input.wind_direction,
                wind_speed: input.wind_speed,
                ceiling_height: self.ceiling_height_m,
                visibility: self.manual_visibility_m,
                temperature: input.temperature,
                dew_point: input.dew_point,
                sea_level_pressure: input.pressure,
            },
            humidity: input.humidity,
        }
    }
}

fn epoch_seconds(now: DateTime<Utc>) -> f64 {
    now.timestamp_micros() as f64 / 1_000_000.0
}

/// Compass degrees folded into `[0, 360)`.
fn compass(deg: f64) -> f64 {
    deg.rem_euclid(360.0)
}

#[derive(Debug, Clone, Default)]
pub struct WeatherNormalizer {
    settings: NormalizerSettings,
}

impl WeatherNormalizer {
    pub fn new(settings: NormalizerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &NormalizerSettings {
        &self.settings
    }

    pub fn normalize(
        &self,
        source: &ObservationSource,
        lat: f64,
        lon: f64,
    ) -> PipelineResult<(NormalizedObservation, FeatureVector)> {
        self.normalize_at(source, lat, lon, Utc::now())
    }

    /// Same as [`normalize`](Self::normalize) with an explicit clock reading.
    pub fn normalize_at(
        &self,
        source: &ObservationSource,
        lat: f64,
        lon: f64,
        now: DateTime<Utc>,
    ) -> PipelineResult<(NormalizedObservation, FeatureVector)> {
        debug!("normalizing {} observation at ({lat}, {lon})", source.kind());

        let (observation, features) = match source {
            ObservationSource::LiveApi(payload) => self.from_live(payload, lat, lon, now)?,
            ObservationSource::HistoricalRow(row) => self.from_history(row, lat, lon, now)?,
            ObservationSource::Manual(entry) => self.from_manual(entry),
        };

        features.validate()?;
        Ok((observation, features))
    }

    fn from_live(
        &self,
        payload: &LivePayload,
        lat: f64,
        lon: f64,
        now: DateTime<Utc>,
    ) -> PipelineResult<(NormalizedObservation, FeatureVector)> {
        let main = payload.main.as_ref().ok_or(PipelineError::missing("main"))?;
        let temperature = main.temp.ok_or(PipelineError::missing("main.temp"))?;
        let humidity = main.humidity.ok_or(PipelineError::missing("main.humidity"))?;
        let pressure = main.pressure.ok_or(PipelineError::missing("main.pressure"))?;

        let wind = payload.wind.clone().unwrap_or_default();
        let wind_direction = compass(wind.deg.unwrap_or(0.0));
        let wind_speed = wind.speed.unwrap_or(0.0);
        let dew_point = self.settings.dew_point_mode.estimate(temperature, humidity)?;

        let features = FeatureVector {
            timestamp: epoch_seconds(now),
            latitude: lat,
            longitude: lon,
            elevation: self.settings.elevation_m,
            wind_direction,
            wind_speed,
            ceiling_height: self.settings.ceiling_height_m,
            visibility: payload.visibility.unwrap_or(self.settings.visibility_m),
            temperature,
            dew_point,
            sea_level_pressure: pressure,
        };

        let observation = NormalizedObservation {
            temperature,
            humidity,
            dew_point,
            pressure,
            wind_speed,
            wind_direction,
            lat,
            lon,
        };

        Ok((observation, features))
    }

    fn from_history(
        &self,
        row: &HistoricalRow,
        lat: f64,
        lon: f64,
        now: DateTime<Utc>,
    ) -> PipelineResult<(NormalizedObservation, FeatureVector)> {
        let temperature = row.temperature.ok_or(PipelineError::missing("TMP"))?;
        let dew_point = row.dew_point.ok_or(PipelineError::missing("DEW"))?;
        let pressure = row.sea_level_pressure.unwrap_or(self.settings.historical_pressure_hpa);
        let wind_speed = row.wind_speed.unwrap_or(0.0);

        let features = FeatureVector {
            timestamp: epoch_seconds(now),
            latitude: lat,
            longitude: lon,
            elevation: self.settings.elevation_m,
            wind_direction: 0.0,
            wind_speed,
            ceiling_height: self.settings.ceiling_height_m,
            visibility: self.settings.visibility_m,
            temperature,
            dew_point,
            sea_level_pressure: pressure,
        };

        let observation = NormalizedObservation {
            temperature,
            humidity: self.settings.historical_humidity_pct,
            dew_point,
            pressure,
            wind_speed,
            wind_direction: 0.0,
            lat,
            lon,
        };

        Ok((observation, features))
    }

    fn from_manual(&self, entry: &ManualEntry) -> (NormalizedObservation, FeatureVector) {
        let mut features = entry.features;
        features.wind_direction = compass(features.wind_direction);

        let observation = NormalizedObservation {
            temperature: features.temperature,
            humidity: entry.humidity,
            dew_point: features.dew_point,
            pressure: features.sea_level_pressure,
            wind_speed: features.wind_speed,
            wind_direction: features.wind_direction,
            lat: features.latitude,
            lon: features.longitude,
        };

        (observation, features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn live(json: &str) -> ObservationSource {
        ObservationSource::LiveApi(serde_json::from_str(json).unwrap())
    }

    fn clock(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    const PAYLOAD: &str = r#"{"main":{"temp":28.0,"humidity":75,"pressure":1012},"wind":{"deg":180,"speed":3.2}}"#;

    #[test]
    fn live_payload_maps_onto_feature_positions() {
        let normalizer = WeatherNormalizer::default();
        let (obs, v) = normalizer.normalize(&live(PAYLOAD), 24.8, -107.4).unwrap();

        let arr = v.to_array();
        assert_eq!(arr[8], 28.0);
        assert_eq!(arr[10], 1012.0);
        assert_eq!(arr[4], 180.0);
        assert_eq!(arr[9], 28.0 - (100.0 - 75.0) / 5.0);
        assert_eq!(arr[9], 23.0);
        assert_eq!(arr[1], 24.8);
        assert_eq!(arr[2], -107.4);

        assert_eq!(v.elevation, 4.87);
        assert_eq!(v.ceiling_height, 22_000.0);
        assert_eq!(v.visibility, 10_000.0);
        assert_eq!(obs.humidity, 75.0);
        assert_eq!(obs.dew_point, 23.0);
    }

    #[test]
    fn live_payload_defaults_absent_wind_and_visibility() {
        let normalizer = WeatherNormalizer::default();
        let (_, v) = normalizer
            .normalize(&live(r#"{"main":{"temp":20.0,"humidity":50,"pressure":1000},"visibility":8000}"#), 0.0, 0.0)
            .unwrap();
        assert_eq!(v.wind_direction, 0.0);
        assert_eq!(v.wind_speed, 0.0);
        assert_eq!(v.visibility, 8000.0);
    }

    #[test]
    fn live_payload_without_main_is_missing_data() {
        let normalizer = WeatherNormalizer::default();
        let err = normalizer
            .normalize(&live(r#"{"wind":{"deg":180,"speed":3.2}}"#), 24.8, -107.4)
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingData { field: "main" }));

        let err = normalizer.normalize(&live(r#"{"main":{"temp":20.0}}"#), 0.0, 0.0).unwrap_err();
        assert!(matches!(err, PipelineError::MissingData { field: "main.humidity" }));
    }

    #[test]
    fn repeated_calls_differ_only_in_timestamp() {
        let normalizer = WeatherNormalizer::default();
        let source = live(PAYLOAD);
        let (_, a) = normalizer.normalize_at(&source, 24.8, -107.4, clock(1_000)).unwrap();
        let (_, b) = normalizer.normalize_at(&source, 24.8, -107.4, clock(2_000)).unwrap();

        assert_ne!(a.timestamp, b.timestamp);
        assert_eq!(a.to_array()[1..], b.to_array()[1..]);
        assert_eq!(a.timestamp, 1_000.0);
    }

    #[test]
    fn historical_row_uses_stored_values_and_fallbacks() {
        let normalizer = WeatherNormalizer::default();
        let row = HistoricalRow {
            latitude: 24.8,
            longitude: -107.4,
            temperature: Some(26.0),
            dew_point: Some(21.5),
            wind_speed: None,
            sea_level_pressure: None,
            ..Default::default()
        };

        let (obs, v) = normalizer
            .normalize(&ObservationSource::HistoricalRow(row), 24.8, -107.4)
            .unwrap();
        assert_eq!(v.temperature, 26.0);
        assert_eq!(v.dew_point, 21.5);
        assert_eq!(v.sea_level_pressure, 1010.0);
        assert_eq!(v.wind_speed, 0.0);
        assert_eq!(v.wind_direction, 0.0);
        assert_eq!(v.visibility, 10_000.0);
        assert_eq!(obs.humidity, 70.0);
    }

    #[test]
    fn historical_row_without_temperature_is_rejected() {
        let normalizer = WeatherNormalizer::default();
        let row = HistoricalRow { dew_point: Some(20.0), ..Default::default() };
        let err = normalizer
            .normalize(&ObservationSource::HistoricalRow(row), 0.0, 0.0)
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingData { field: "TMP" }));
    }

    #[test]
    fn manual_entry_is_taken_verbatim() {
        let settings = NormalizerSettings::default();
        let input = DashboardInput {
            temperature: 25.0,
            humidity: 60.0,
            dew_point: 18.0,
            pressure: 1013.0,
            wind_speed: 5.0,
            wind_direction: 360.0,
        };
        let entry = settings.manual_entry(input, 25.685194, -109.080806, clock(42));
        let normalizer = WeatherNormalizer::new(settings);

        let (obs, v) = normalizer.normalize(&ObservationSource::Manual(entry), 0.0, 0.0).unwrap();
        assert_eq!(v.dew_point, 18.0);
        assert_eq!(v.visibility, 16_093.0);
        assert_eq!(v.timestamp, 42.0);
        assert_eq!(v.wind_direction, 0.0);
        assert_eq!(obs.lat, 25.685194);
        assert_eq!(obs.humidity, 60.0);
    }

    #[test]
    fn strict_mode_rejects_impossible_humidity() {
        let settings = NormalizerSettings { dew_point_mode: DewPointMode::Strict, ..Default::default() };
        let normalizer = WeatherNormalizer::new(settings);
        let source = live(r#"{"main":{"temp":20.0,"humidity":140,"pressure":1000}}"#);
        assert!(matches!(
            normalizer.normalize(&source, 0.0, 0.0),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn source_kind_tags() {
        assert_eq!(live(PAYLOAD).kind(), SourceKind::LiveApi);
        assert_eq!(SourceKind::HistoricalDbRow.to_string(), "historical_db_row");
    }
}
