use std::path::PathBuf;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::warn;
use rainfall_core::{
    Config, DashboardInput, ObservationSource, Prediction, ProviderId, RainfallPredictor,
    archive::{self, ArchiveIngest, CsvRecordSink},
    dewpoint,
    history::{CsvHistoryStore, HistoryStore},
    llm::{LlmClient, Narration, Narrator},
    model::FeatureVector,
    provider::default_provider_from_config,
    scaler::{AffineScaler, Scaler},
    sequence,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "rainfall", version, about = "Rainfall probability from weather observations")]
pub struct Cli {
    /// Use this config file instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "openweather".
        provider: String,
    },

    /// Predict rain at a point from live conditions, falling back to stored history.
    Predict {
        #[arg(long, allow_negative_numbers = true)]
        lat: Option<f64>,

        #[arg(long, allow_negative_numbers = true)]
        lon: Option<f64>,

        /// Ask the LLM for a plain-language explanation.
        #[arg(long)]
        explain: bool,

        /// Print the prediction as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Predict rain from manually entered conditions.
    Manual {
        /// Degrees Celsius.
        #[arg(long, allow_negative_numbers = true)]
        temperature: f64,

        /// Relative humidity, percent.
        #[arg(long)]
        humidity: f64,

        /// Degrees Celsius; estimated from temperature and humidity if omitted.
        #[arg(long, allow_negative_numbers = true)]
        dew_point: Option<f64>,

        /// Sea-level pressure, hPa.
        #[arg(long)]
        pressure: f64,

        /// Meters per second.
        #[arg(long, default_value_t = 0.0)]
        wind_speed: f64,

        /// Degrees.
        #[arg(long, default_value_t = 0.0)]
        wind_direction: f64,

        #[arg(long, allow_negative_numbers = true)]
        lat: Option<f64>,

        #[arg(long, allow_negative_numbers = true)]
        lon: Option<f64>,

        #[arg(long)]
        explain: bool,

        #[arg(long)]
        json: bool,
    },

    /// Decode a raw station archive CSV into the WeatherData layout.
    Ingest {
        archive: PathBuf,

        output: PathBuf,

        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Build training windows from a decoded WeatherData export.
    Windows {
        input: PathBuf,

        /// Window length; defaults to the model's configured timesteps.
        #[arg(long)]
        timesteps: Option<usize>,
    },

    /// Check configuration, model artifacts and the LLM server.
    Check,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;

        match self.command {
            Command::Configure { provider } => configure(config, self.config, &provider),
            Command::Predict { lat, lon, explain, json } => {
                let lat = lat.unwrap_or(config.location.latitude);
                let lon = lon.unwrap_or(config.location.longitude);
                predict(&config, lat, lon, Output { explain, json }).await
            }
            Command::Manual {
                temperature,
                humidity,
                dew_point,
                pressure,
                wind_speed,
                wind_direction,
                lat,
                lon,
                explain,
                json,
            } => {
                let input = DashboardInput {
                    temperature,
                    humidity,
                    dew_point: dew_point
                        .unwrap_or_else(|| dewpoint::estimate(temperature, humidity)),
                    pressure,
                    wind_speed,
                    wind_direction,
                };
                let lat = lat.unwrap_or(config.location.latitude);
                let lon = lon.unwrap_or(config.location.longitude);
                manual(&config, input, lat, lon, Output { explain, json }).await
            }
            Command::Ingest { archive, output, batch_size } => {
                let ingest = ArchiveIngest::new(
                    batch_size.unwrap_or(config.ingest.batch_size),
                    config.ingest.scale,
                );
                let mut sink = CsvRecordSink::create(&output)?;
                let report = ingest.run_file(&archive, &mut sink)?;
                println!(
                    "Decoded {} rows into {} ({} batches, {} unreadable rows skipped)",
                    report.rows,
                    output.display(),
                    report.batches,
                    report.skipped
                );
                Ok(())
            }
            Command::Windows { input, timesteps } => {
                windows(&config, &input, timesteps.unwrap_or(config.model.timesteps))
            }
            Command::Check => check(&config).await,
        }
    }
}

fn configure(mut config: Config, path: Option<PathBuf>, provider: &str) -> anyhow::Result<()> {
    let id = ProviderId::try_from(provider)?;

    let api_key = inquire::Password::new(&format!("API key for {id}:"))
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;
    if api_key.trim().is_empty() {
        bail!("API key must not be empty");
    }
    config.upsert_provider_api_key(id, api_key.trim().to_string());

    if config.default_provider_id().ok() != Some(id) {
        let make_default = inquire::Confirm::new(&format!("Use {id} as the default provider?"))
            .with_default(true)
            .prompt()
            .context("Failed to read answer")?;
        if make_default {
            config.set_default_provider(id);
        }
    }

    match path {
        Some(path) => config.save_to(&path)?,
        None => config.save()?,
    }
    println!("Saved credentials for {id}.");
    Ok(())
}

/// How a prediction is shown.
#[derive(Debug, Clone, Copy)]
struct Output {
    explain: bool,
    json: bool,
}

fn load_predictor(config: &Config) -> anyhow::Result<RainfallPredictor> {
    RainfallPredictor::load(config).context("Model artifacts could not be loaded")
}

async fn predict(config: &Config, lat: f64, lon: f64, output: Output) -> anyhow::Result<()> {
    let predictor = load_predictor(config)?;
    let provider = default_provider_from_config(config)?;
    let history = config.history.csv_path.as_ref().map(CsvHistoryStore::new);

    let prediction = predictor
        .predict_with_fallback(
            provider.as_ref(),
            history.as_ref().map(|h| h as &dyn HistoryStore),
            lat,
            lon,
        )
        .await
        .with_context(|| format!("No weather information available for ({lat}, {lon})"))?;

    report(config, &prediction, output).await
}

async fn manual(
    config: &Config,
    input: DashboardInput,
    lat: f64,
    lon: f64,
    output: Output,
) -> anyhow::Result<()> {
    let predictor = load_predictor(config)?;
    let entry = predictor.normalizer().settings().manual_entry(input, lat, lon, Utc::now());

    let prediction = predictor.predict_rainfall(&ObservationSource::Manual(entry), lat, lon)?;
    report(config, &prediction, output).await
}

async fn narrate(config: &Config, prediction: &Prediction) -> Narration {
    Narrator::new(LlmClient::new(config.llm.clone())).explain(prediction).await
}

async fn report(config: &Config, prediction: &Prediction, output: Output) -> anyhow::Result<()> {
    if output.json {
        let mut value = serde_json::to_value(prediction).context("Failed to encode prediction")?;
        if output.explain {
            let narration = narrate(config, prediction).await;
            value["narration"] = serde_json::json!({
                "text": narration.text,
                "from_llm": narration.from_llm,
            });
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let o = &prediction.observation;

    println!("Source:        {}", prediction.source);
    println!("Location:      {:.4}, {:.4}", o.lat, o.lon);
    println!("Temperature:   {:.1} °C", o.temperature);
    println!("Humidity:      {:.0} %", o.humidity);
    println!("Dew point:     {:.1} °C", o.dew_point);
    println!("Pressure:      {:.1} hPa", o.pressure);
    println!("Wind:          {:.1} m/s from {:.0}°", o.wind_speed, o.wind_direction);
    println!();
    println!(
        "Rain probability: {:.1}% ({} risk)",
        prediction.probability * 100.0,
        prediction.risk
    );
    if prediction.timesteps < config.model.timesteps {
        println!("Note: not enough stored history, predicted from the latest observation only");
    }
    if let Some(reason) = &prediction.degraded {
        println!("Warning: model output unavailable, showing neutral value ({reason})");
    }

    if output.explain {
        let narration = narrate(config, prediction).await;
        println!();
        println!("{}", narration.text);
    }
    Ok(())
}

fn windows(config: &Config, input: &std::path::Path, timesteps: usize) -> anyhow::Result<()> {
    let scaler = AffineScaler::load(&config.model.scaler_path)?;
    let records = archive::read_decoded(input)?;
    let (vectors, labels) = archive::training_series(&records);
    if vectors.len() < records.len() {
        warn!("{} incomplete rows dropped", records.len() - vectors.len());
    }

    let scaled = scaler.transform(FeatureVector::to_matrix(&vectors).view())?;
    let batch = sequence::windows(scaled.view(), &labels, timesteps)?;

    let (count, steps, width) = batch.inputs.dim();
    let rainy = batch.labels.iter().filter(|l| **l > 0.5).count();
    println!("{count} windows of {steps} steps x {width} features");
    println!("{rainy} windows followed by rain ({:.1}%)", rainy as f64 * 100.0 / count as f64);
    Ok(())
}

async fn check(config: &Config) -> anyhow::Result<()> {
    let problems = config.validate();
    if problems.is_empty() {
        println!("Configuration: ok");
    } else {
        println!("Configuration warnings:");
        for problem in &problems {
            println!("  - {problem}");
        }
    }

    match RainfallPredictor::load(config) {
        Ok(_) => println!("Model artifacts: ok"),
        Err(e) => println!("Model artifacts: {e}"),
    }

    match LlmClient::new(config.llm.clone()).health_check().await {
        Ok(()) => println!("LLM server: reachable at {}", config.llm.api_url),
        Err(e) => println!("LLM server: {e}"),
    }

    Ok(())
}
