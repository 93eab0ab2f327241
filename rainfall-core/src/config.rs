use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    decode::ArchiveScale, llm::LlmConfig, normalize::NormalizerSettings, provider::ProviderId,
};

fn default_request_timeout_secs() -> u64 {
    10
}

/// Configuration for a single weather provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Persisted scaler and classifier locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub classifier_path: PathBuf,
    pub scaler_path: PathBuf,
    /// Look-back window the classifier expects; 1 for single-point inference.
    /// Earlier steps come from the history store.
    pub timesteps: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            classifier_path: PathBuf::from("models/rain_classifier.json"),
            scaler_path: PathBuf::from("models/scaler.json"),
            timesteps: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self { latitude: 25.685194, longitude: -109.080806 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Export of the `WeatherData` table used when the live API fails.
    pub csv_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub scale: ArchiveScale,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { batch_size: 1_000, scale: ArchiveScale::default() }
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Optional default provider id, e.g. "openweather".
    pub default_provider: Option<String>,

    /// Example TOML:
    /// [providers.openweather]
    /// api_key = "..."
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub location: LocationConfig,

    #[serde(default)]
    pub normalizer: NormalizerSettings,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub ingest: IngestConfig,
}

impl Config {
    /// Return the default provider as a strongly-typed ProviderId.
    pub fn default_provider_id(&self) -> Result<ProviderId> {
        let s = self.default_provider.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "No default provider configured.\n\
                 Hint: run `rainfall configure <provider>` (e.g. `rainfall configure openweather`) first."
            )
        })?;

        ProviderId::try_from(s.as_str())
    }

    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(id.as_str())
    }

    /// Store default provider as string.
    pub fn set_default_provider(&mut self, id: ProviderId) {
        self.default_provider = Some(id.as_str().to_string());
    }

    /// Load config from the platform location, or defaults if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to the platform location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    /// Save config to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "rainfall", "rainfall-cli")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Set/replace a provider API key and set the default provider if none is set.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        match self.providers.get_mut(provider_id.as_str()) {
            Some(existing) => existing.api_key = api_key,
            None => {
                self.providers.insert(
                    provider_id.as_str().to_string(),
                    ProviderConfig { api_key, request_timeout_secs: default_request_timeout_secs() },
                );
            }
        }

        if self.default_provider.is_none() {
            self.default_provider = Some(provider_id.to_string());
        }
    }

    /// Returns API key for a provider, if present.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.providers.get(provider_id.as_str()).map(|cfg| cfg.api_key.as_str())
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id).is_some()
    }

    /// Overlay values from the environment (or any other key lookup).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_f64 = |key: &str, raw: String| -> Result<f64> {
            raw.trim()
                .parse::<f64>()
                .with_context(|| format!("{key} must be a number, got '{raw}'"))
        };

        if let Some(key) = lookup("OPENWEATHER_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.upsert_provider_api_key(ProviderId::OpenWeather, key);
        }
        if let Some(path) = lookup("MODEL_PATH") {
            self.model.classifier_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("SCALER_PATH") {
            self.model.scaler_path = PathBuf::from(path);
        }
        if let Some(url) = lookup("LLM_API_URL") {
            self.llm.api_url = url;
        }
        if let Some(model) = lookup("LLM_MODEL_NAME") {
            self.llm.model = model;
        }
        if let Some(raw) = lookup("DEFAULT_LATITUDE") {
            self.location.latitude = parse_f64("DEFAULT_LATITUDE", raw)?;
        }
        if let Some(raw) = lookup("DEFAULT_LONGITUDE") {
            self.location.longitude = parse_f64("DEFAULT_LONGITUDE", raw)?;
        }

        Ok(())
    }

    /// Problems worth warning about at startup. An empty list means ready.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if !self.is_provider_configured(ProviderId::OpenWeather) {
            problems.push("No API key configured for provider 'openweather'".to_string());
        }
        if !self.model.classifier_path.exists() {
            problems.push(format!(
                "Classifier artifact not found: {}",
                self.model.classifier_path.display()
            ));
        }
        if !self.model.scaler_path.exists() {
            problems
                .push(format!("Scaler artifact not found: {}", self.model.scaler_path.display()));
        }
        if self.model.timesteps == 0 {
            problems.push("model.timesteps must be at least 1".to_string());
        }
        if let Some(path) = &self.history.csv_path {
            if !path.exists() {
                problems.push(format!("History export not found: {}", path.display()));
            }
        }

        problems
    }
}
