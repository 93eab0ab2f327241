//! Natural-language explanations from a local OpenAI-compatible LLM server.

use std::time::Duration;

use log::warn;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{
    error::{PipelineError, PipelineResult},
    predictor::{Prediction, RainRisk},
};

const SERVICE: &str = "LLM server";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub completion_timeout_secs: u64,
    pub health_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:1234/v1".to_string(),
            model: "local-model".to_string(),
            max_tokens: 1000,
            temperature: 0.4,
            completion_timeout_secs: 90,
            health_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: String,
}

const SYSTEM_PROMPT: &str = "You are a meteorologist explaining rainfall predictions \
    to non-technical users. Be clear and brief.";

fn extract_content(body: &str) -> PipelineResult<String> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| PipelineError::upstream(SERVICE, format!("unparseable completion: {e}")))?;

    parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| PipelineError::upstream(SERVICE, "completion had no content"))
}

#[derive(Debug, Clone)]
pub struct LlmClient {
    config: LlmConfig,
    http: Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self { config, http: Client::new() }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.api_url.trim_end_matches('/'))
    }

    pub async fn health_check(&self) -> PipelineResult<()> {
        let res = self
            .http
            .get(self.endpoint("models"))
            .bearer_auth("not-needed")
            .timeout(Duration::from_secs(self.config.health_timeout_secs))
            .send()
            .await
            .map_err(|e| PipelineError::upstream(SERVICE, e))?;

        if res.status().is_success() {
            Ok(())
        } else {
            Err(PipelineError::upstream(SERVICE, format!("status {}", res.status())))
        }
    }

    pub async fn complete(&self, prompt: &str) -> PipelineResult<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: prompt },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };

        let res = self
            .http
            .post(self.endpoint("chat/completions"))
            .bearer_auth("not-needed")
            .json(&request)
            .timeout(Duration::from_secs(self.config.completion_timeout_secs))
            .send()
            .await
            .map_err(|e| PipelineError::upstream(SERVICE, e))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| PipelineError::upstream(SERVICE, format!("failed to read body: {e}")))?;
        if !status.is_success() {
            return Err(PipelineError::upstream(SERVICE, format!("status {status}")));
        }

        extract_content(&body)
    }
}

pub fn prompt_for(prediction: &Prediction) -> String {
    let o = &prediction.observation;
    format!(
        "Rain probability: {:.1}%.\n\
         Temperature {:.1} °C, relative humidity {:.0}%, dew point {:.1} °C, \
         pressure {:.1} hPa, wind {:.1} m/s from {:.0}°, at ({:.4}, {:.4}).\n\
         Explain what these conditions mean and give one practical recommendation.",
        prediction.probability * 100.0,
        o.temperature,
        o.humidity,
        o.dew_point,
        o.pressure,
        o.wind_speed,
        o.wind_direction,
        o.lat,
        o.lon,
    )
}

/// Summary produced locally when the LLM cannot be reached.
pub fn fallback_analysis(prediction: &Prediction) -> String {
    let o = &prediction.observation;
    let recommendation = match prediction.risk {
        RainRisk::Low => "Conditions look favorable for outdoor activities.",
        RainRisk::Moderate => "Carrying an umbrella is a sensible precaution.",
        RainRisk::High => "Rain is likely; consider rescheduling outdoor activities.",
    };

    format!(
        "Rain probability is {:.1}% ({} risk).\n\
         Temperature: {:.1} °C\n\
         Humidity: {:.0}%\n\
         Pressure: {:.1} hPa\n\
         Recommendation: {recommendation}\n\
         (Generated locally; LLM service unavailable.)",
        prediction.probability * 100.0,
        prediction.risk,
        o.temperature,
        o.humidity,
        o.pressure,
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Narration {
    pub text: String,
    pub from_llm: bool,
}

/// Explains predictions, degrading to [`fallback_analysis`] on any LLM failure.
#[derive(Debug, Clone, Default)]
pub struct Narrator {
    client: Option<LlmClient>,
}

impl Narrator {
    pub fn new(client: LlmClient) -> Self {
        Self { client: Some(client) }
    }

    /// Narrator that never contacts an LLM.
    pub fn offline() -> Self {
        Self { client: None }
    }

    pub async fn explain(&self, prediction: &Prediction) -> Narration {
        let Some(client) = &self.client else {
            return Narration { text: fallback_analysis(prediction), from_llm: false };
        };

        match client.complete(&prompt_for(prediction)).await {
            Ok(text) => Narration { text, from_llm: true },
            Err(e) => {
                warn!("using local analysis: {e}");
                Narration { text: fallback_analysis(prediction), from_llm: false }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{FeatureVector, NormalizedObservation},
        normalize::SourceKind,
    };

    fn prediction(probability: f64) -> Prediction {
        Prediction {
            source: SourceKind::ManualEntry,
            observation: NormalizedObservation {
                temperature: 28.0,
                humidity: 75.0,
                dew_point: 23.0,
                pressure: 1012.0,
                wind_speed: 3.2,
                wind_direction: 180.0,
                lat: 24.8,
                lon: -107.4,
            },
            features: FeatureVector::from_slice(&[0.0; 11]).unwrap(),
            probability,
            risk: RainRisk::from_probability(probability),
            timesteps: 1,
            degraded: None,
        }
    }

    #[test]
    fn completion_content_is_extracted() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Expect showers."}}]}"#;
        assert_eq!(extract_content(body).unwrap(), "Expect showers.");

        let empty = r#"{"choices":[]}"#;
        assert!(matches!(extract_content(empty), Err(PipelineError::UpstreamUnavailable { .. })));
    }

    #[test]
    fn fallback_mentions_risk_and_conditions() {
        let text = fallback_analysis(&prediction(0.82));
        assert!(text.contains("82.0%"));
        assert!(text.contains("high risk"));
        assert!(text.contains("1012.0 hPa"));

        assert!(fallback_analysis(&prediction(0.1)).contains("favorable"));
    }

    #[test]
    fn prompt_carries_observation() {
        let prompt = prompt_for(&prediction(0.5));
        assert!(prompt.contains("50.0%"));
        assert!(prompt.contains("dew point 23.0"));
    }

    #[test]
    fn endpoint_joins_paths() {
        let client = LlmClient::new(LlmConfig { api_url: "http://llm:1234/v1/".into(), ..Default::default() });
        assert_eq!(client.endpoint("models"), "http://llm:1234/v1/models");
    }

    #[tokio::test]
    async fn offline_narrator_uses_local_analysis() {
        let narration = Narrator::offline().explain(&prediction(0.4)).await;
        assert!(!narration.from_llm);
        assert!(narration.text.contains("umbrella"));
    }

    #[tokio::test]
    async fn unreachable_llm_falls_back() {
        let config = LlmConfig {
            api_url: "http://127.0.0.1:9/v1".into(),
            completion_timeout_secs: 2,
            ..Default::default()
        };
        let narration = Narrator::new(LlmClient::new(config)).explain(&prediction(0.9)).await;
        assert!(!narration.from_llm);
        assert!(narration.text.contains("rescheduling"));
    }
}
