//! Core library for the `rainfall` CLI.
//!
//! This crate defines:
//! - Decoding of raw station archives and batch ingestion
//! - Normalization of live, historical and manual observations into the
//!   classifier's fixed feature order
//! - Scaling, sequence shaping and recurrent-classifier inference
//! - Live weather, history and LLM collaborators with graceful fallbacks
//! - Configuration & credentials handling
//!
//! It is used by `rainfall-cli`, but can also be reused by other binaries or services.

pub mod archive;
pub mod classifier;
pub mod config;
pub mod decode;
pub mod dewpoint;
pub mod error;
pub mod history;
pub mod llm;
pub mod model;
pub mod normalize;
pub mod predictor;
pub mod provider;
pub mod scaler;
pub mod sequence;

pub use config::{Config, ProviderConfig};
pub use error::{PipelineError, PipelineResult};
pub use model::{
    DashboardInput, FEATURE_COUNT, FeatureVector, HistoricalRow, LivePayload, ManualEntry,
    NormalizedObservation,
};
pub use normalize::{ObservationSource, SourceKind, WeatherNormalizer};
pub use predictor::{Prediction, RainRisk, RainfallPredictor};
pub use provider::{ProviderId, WeatherProvider};
