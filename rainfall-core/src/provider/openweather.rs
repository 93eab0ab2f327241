use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;

use crate::{
    error::{PipelineError, PipelineResult},
    model::LivePayload,
};

use super::WeatherProvider;

const SERVICE: &str = "OpenWeather";
const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    timeout: Duration,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout,
            http: Client::new(),
        }
    }

    /// Point the provider at a compatible endpoint (a proxy or a local mock).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn current_url(&self) -> String {
        format!("{}/weather", self.base_url)
    }
}

/// Parse a current-conditions body. A missing `main` block is not an error here.
pub fn parse_current(body: &str) -> PipelineResult<LivePayload> {
    serde_json::from_str(body)
        .map_err(|e| PipelineError::upstream(SERVICE, format!("unparseable response: {e}")))
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    async fn current(&self, lat: f64, lon: f64) -> PipelineResult<LivePayload> {
        debug!("requesting current conditions for ({lat}, {lon})");

        let res = self
            .http
            .get(self.current_url())
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("appid", self.api_key.clone()),
                ("units", "metric".to_string()),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PipelineError::upstream(SERVICE, e))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| PipelineError::upstream(SERVICE, format!("failed to read body: {e}")))?;

        if !status.is_success() {
            return Err(PipelineError::upstream(
                SERVICE,
                format!("status {}: {}", status, truncate_body(&body)),
            ));
        }

        parse_current(&body)
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
