//! End-to-end rainfall prediction: normalize, scale, shape, classify.

use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    classifier::{LstmClassifier, RainfallClassifier},
    config::Config,
    error::{PipelineError, PipelineResult},
    history::HistoryStore,
    model::{FeatureVector, HistoricalRow, NormalizedObservation},
    normalize::{ObservationSource, SourceKind, WeatherNormalizer},
    provider::WeatherProvider,
    scaler::{AffineScaler, Scaler},
    sequence,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RainRisk {
    Low,
    Moderate,
    High,
}

impl RainRisk {
    pub fn from_probability(probability: f64) -> Self {
        if probability < 0.3 {
            RainRisk::Low
        } else if probability < 0.7 {
            RainRisk::Moderate
        } else {
            RainRisk::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RainRisk::Low => "low",
            RainRisk::Moderate => "moderate",
            RainRisk::High => "high",
        }
    }
}

impl std::fmt::Display for RainRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub source: SourceKind,
    pub observation: NormalizedObservation,
    pub features: FeatureVector,
    /// In `[0, 1]`; `0.0` when inference failed.
    pub probability: f64,
    pub risk: RainRisk,
    /// Time steps the classifier actually saw.
    pub timesteps: usize,
    /// Why the probability is a fallback rather than a model output.
    pub degraded: Option<String>,
}

impl Prediction {
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Scaler and classifier are loaded once and only read afterwards.
#[derive(Debug)]
pub struct RainfallPredictor {
    normalizer: WeatherNormalizer,
    scaler: Box<dyn Scaler>,
    classifier: Box<dyn RainfallClassifier>,
    timesteps: usize,
}

impl RainfallPredictor {
    pub fn new(
        normalizer: WeatherNormalizer,
        scaler: Box<dyn Scaler>,
        classifier: Box<dyn RainfallClassifier>,
    ) -> Self {
        Self { normalizer, scaler, classifier, timesteps: 1 }
    }

    /// Look-back window length; values below 1 mean single-point inference.
    pub fn with_timesteps(mut self, timesteps: usize) -> Self {
        self.timesteps = timesteps.max(1);
        self
    }

    /// Load the persisted artifacts named in `config`.
    pub fn load(config: &Config) -> PipelineResult<Self> {
        let scaler = AffineScaler::load(&config.model.scaler_path)?;
        let classifier = LstmClassifier::load(&config.model.classifier_path)?;
        info!(
            "loaded scaler {} and classifier {} ({} timesteps)",
            config.model.scaler_path.display(),
            config.model.classifier_path.display(),
            config.model.timesteps
        );

        Ok(Self::new(
            WeatherNormalizer::new(config.normalizer),
            Box::new(scaler),
            Box::new(classifier),
        )
        .with_timesteps(config.model.timesteps))
    }

    pub fn normalizer(&self) -> &WeatherNormalizer {
        &self.normalizer
    }

    pub fn scaler(&self) -> &dyn Scaler {
        self.scaler.as_ref()
    }

    pub fn timesteps(&self) -> usize {
        self.timesteps
    }

    /// Prediction from one observation source with no stored context.
    ///
    /// Missing source data is an error; a failing classifier is not, it
    /// yields probability `0.0` with the reason in [`Prediction::degraded`].
    pub fn predict_rainfall(
        &self,
        source: &ObservationSource,
        lat: f64,
        lon: f64,
    ) -> PipelineResult<Prediction> {
        self.predict_sequence(source, &[], lat, lon)
    }

    /// Prediction with `source` as the latest step of the look-back window.
    ///
    /// `context` is stored history near the point, newest first, as a
    /// [`HistoryStore`] returns it. Context rows that cannot be normalized are
    /// skipped. With fewer than [`timesteps`](Self::timesteps) usable
    /// observations the latest one is classified on its own.
    pub fn predict_sequence(
        &self,
        source: &ObservationSource,
        context: &[HistoricalRow],
        lat: f64,
        lon: f64,
    ) -> PipelineResult<Prediction> {
        let (observation, features) = self.normalizer.normalize(source, lat, lon)?;

        let mut rows = self.context_vectors(context, lat, lon);
        rows.push(features);

        let scaled = self.scaler.transform(FeatureVector::to_matrix(&rows).view())?;
        let tensor = match sequence::shape(scaled.view(), self.timesteps) {
            Ok(tensor) => tensor,
            Err(PipelineError::InsufficientHistory { needed, available }) => {
                warn!(
                    "only {available} of {needed} observations near ({lat}, {lon}), \
                     predicting from the latest one"
                );
                sequence::shape(scaled.view(), 1)?
            }
            Err(e) => return Err(e),
        };
        debug!("classifier input shape {:?}", tensor.dim());

        let (probability, degraded) = match self.classifier.predict(&tensor) {
            Ok(p) => (p, None),
            Err(e) => {
                warn!("rainfall inference failed, reporting 0.0: {e}");
                (0.0, Some(e.to_string()))
            }
        };

        Ok(Prediction {
            source: source.kind(),
            observation,
            features,
            probability,
            risk: RainRisk::from_probability(probability),
            timesteps: tensor.dim().1,
            degraded,
        })
    }

    /// The newest `timesteps - 1` context rows, oldest first.
    fn context_vectors(&self, context: &[HistoricalRow], lat: f64, lon: f64) -> Vec<FeatureVector> {
        let wanted = self.timesteps - 1;
        let mut vectors: Vec<FeatureVector> = context
            .iter()
            .filter_map(|row| {
                let when = row.date.map(|d| d.and_utc()).unwrap_or_else(chrono::Utc::now);
                let source = ObservationSource::HistoricalRow(row.clone());
                match self.normalizer.normalize_at(&source, lat, lon, when) {
                    Ok((_, features)) => Some(features),
                    Err(e) => {
                        debug!("skipping context row: {e}");
                        None
                    }
                }
            })
            .take(wanted)
            .collect();
        vectors.reverse();
        vectors
    }

    async fn context_near(
        &self,
        history: Option<&dyn HistoryStore>,
        lat: f64,
        lon: f64,
    ) -> Vec<HistoricalRow> {
        let Some(history) = history.filter(|_| self.timesteps > 1) else {
            return Vec::new();
        };
        match history.recent_near(lat, lon, self.timesteps - 1).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("no stored context for the look-back window: {e}");
                Vec::new()
            }
        }
    }

    /// Live conditions first, then the most recent stored observation near
    /// the point.
    pub async fn predict_with_fallback(
        &self,
        provider: &dyn WeatherProvider,
        history: Option<&dyn HistoryStore>,
        lat: f64,
        lon: f64,
    ) -> PipelineResult<Prediction> {
        let live_err = match provider.current(lat, lon).await {
            Ok(payload) => {
                let context = self.context_near(history, lat, lon).await;
                let source = ObservationSource::LiveApi(payload);
                match self.predict_sequence(&source, &context, lat, lon) {
                    Ok(prediction) => return Ok(prediction),
                    Err(e) if e.is_recoverable() => e,
                    Err(e) => return Err(e),
                }
            }
            Err(e) if e.is_recoverable() => e,
            Err(e) => return Err(e),
        };

        let Some(history) = history else {
            warn!("live conditions unavailable and no history store configured: {live_err}");
            return Err(live_err);
        };

        warn!("live conditions unavailable ({live_err}), falling back to stored history");
        let rows = history.recent_near(lat, lon, self.timesteps).await?;
        match rows.split_first() {
            Some((latest, context)) => self.predict_sequence(
                &ObservationSource::HistoricalRow(latest.clone()),
                context,
                lat,
                lon,
            ),
            None => {
                warn!("no stored observations near ({lat}, {lon})");
                Err(live_err)
            }
        }
    }
}
