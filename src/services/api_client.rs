// Gemini generateContent client shared by region detection and Gemini translation
//
// Key rotation, the circuit breaker and retry/backoff all live here so the
// RegionDetector and Translator interfaces stay free of resilience concerns.

use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::{ApiError, ApiResult};
use crate::middleware::{ApiKeyPool, CircuitBreaker, CircuitBreakerStats, KeyStats};
use crate::utils::Metrics;

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Build the shared reqwest client with pooled connections and a hard timeout.
pub fn build_http_client(timeout: Duration) -> ApiResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|e| ApiError::Transport(format!("failed to create HTTP client: {}", e)))
}

/// Exponential backoff with jitter: 500ms, 1s, 2s ... plus up to 250ms
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let base = 500u64.saturating_mul(1u64 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..250);
    Duration::from_millis(base + jitter)
}

/// Key pool and circuit state, served on /health/api-keys
#[derive(Debug, Clone, Serialize)]
pub struct ApiHealth {
    pub model: String,
    pub total_keys: usize,
    pub healthy_keys: usize,
    pub circuit: CircuitBreakerStats,
    pub keys: Vec<KeyStats>,
}

pub struct ApiClient {
    model: String,
    max_retries: u32,
    api_key_pool: ApiKeyPool,
    http_client: reqwest::Client,
    circuit_breaker: CircuitBreaker,
    metrics: Option<Metrics>,
}

impl ApiClient {
    pub fn new(
        config: &Config,
        circuit_breaker: CircuitBreaker,
        metrics: Option<Metrics>,
    ) -> ApiResult<Self> {
        Ok(Self {
            model: config.detection.model.clone(),
            max_retries: config.api.max_retries,
            api_key_pool: ApiKeyPool::new(config.api_keys().to_vec()),
            http_client: build_http_client(config.api.timeout)?,
            circuit_breaker,
            metrics,
        })
    }

    /// True when at least one key is configured
    pub fn is_configured(&self) -> bool {
        !self.api_key_pool.is_empty()
    }

    pub fn health(&self) -> ApiHealth {
        ApiHealth {
            model: self.model.clone(),
            total_keys: self.api_key_pool.total_keys(),
            healthy_keys: self.api_key_pool.healthy_count(),
            circuit: self.circuit_breaker.stats(),
            keys: self.api_key_pool.stats(),
        }
    }

    /// Send `parts` with a JSON response schema and return the model's JSON text.
    ///
    /// Rate-limited keys are rotated out; transport and 5xx errors are retried
    /// with backoff on the same key.
    #[instrument(skip(self, parts, response_schema), fields(model = %self.model))]
    pub async fn generate_json(&self, parts: Vec<Value>, response_schema: Value) -> ApiResult<String> {
        if self.api_key_pool.is_empty() {
            return Err(ApiError::NoApiKeys);
        }
        if !self.circuit_breaker.allow_request() {
            warn!("Circuit '{}' is open, failing fast", self.circuit_breaker.name());
            return Err(ApiError::CircuitOpen(self.circuit_breaker.name()));
        }

        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "response_mime_type": "application/json",
                "response_schema": response_schema,
                "temperature": 0.0,
                "thinkingConfig": { "thinking_budget": 0 }
            }
        });

        let mut last_error = ApiError::NoHealthyKey;
        for key_attempt in 0..self.api_key_pool.total_keys() {
            let Some(lease) = self.api_key_pool.acquire() else {
                break;
            };
            if key_attempt > 0 {
                debug!("Retrying with API key {}", lease.index);
            }

            let url = format!(
                "{}/{}:generateContent?key={}",
                GEMINI_ENDPOINT, self.model, lease.key
            );
            let start = Instant::now();
            let result = self.send_with_retries(&url, &body).await;
            let success = result.is_ok();
            if let Some(ref m) = self.metrics {
                m.record_api_call(success, start.elapsed());
            }

            match result {
                Ok(text) => {
                    self.api_key_pool.record_success(lease.index);
                    self.circuit_breaker.record_success();
                    return extract_candidate_text(&text);
                }
                Err(ApiError::RateLimited) => {
                    self.api_key_pool.record_failure(lease.index);
                    last_error = ApiError::RateLimited;
                }
                Err(e) => {
                    self.api_key_pool.record_failure(lease.index);
                    self.circuit_breaker.record_failure();
                    return Err(e);
                }
            }
        }

        self.circuit_breaker.record_failure();
        Err(last_error)
    }

    async fn send_with_retries(&self, url: &str, body: &Value) -> ApiResult<String> {
        let mut attempt = 0;
        loop {
            let error = match self.http_client.post(url).json(body).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .text()
                            .await
                            .map_err(|e| ApiError::Transport(e.to_string()));
                    }
                    if status.as_u16() == 429 {
                        return Err(ApiError::RateLimited);
                    }
                    let body = response.text().await.unwrap_or_default();
                    let error = ApiError::Status {
                        status: status.as_u16(),
                        body: truncate(&body, 300),
                    };
                    if !status.is_server_error() {
                        return Err(error);
                    }
                    error
                }
                Err(e) => ApiError::Transport(e.to_string()),
            };

            if attempt >= self.max_retries {
                return Err(error);
            }
            let delay = backoff_delay(attempt);
            debug!(
                "Gemini request failed: {}. Retrying in {:?} ({}/{})",
                error,
                delay,
                attempt + 1,
                self.max_retries
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Pull `candidates[0].content.parts[0].text` out of a generateContent reply.
pub(crate) fn extract_candidate_text(response_text: &str) -> ApiResult<String> {
    let response: Value = serde_json::from_str(response_text)
        .map_err(|e| ApiError::InvalidResponse(format!("response is not JSON: {}", e)))?;

    if let Some(reason) = response["promptFeedback"]["blockReason"].as_str() {
        return Err(ApiError::InvalidResponse(format!("prompt blocked: {}", reason)));
    }

    response["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ApiError::InvalidResponse("missing candidate text".to_string()))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_candidate_text() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"{\"regions\":[]}"}]}}]}"#;
        assert_eq!(extract_candidate_text(raw).unwrap(), r#"{"regions":[]}"#);
    }

    #[test]
    fn test_blocked_prompt_is_invalid_response() {
        let raw = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        assert!(matches!(
            extract_candidate_text(raw),
            Err(ApiError::InvalidResponse(reason)) if reason.contains("SAFETY")
        ));
    }

    #[test]
    fn test_backoff_grows() {
        assert!(backoff_delay(0) < Duration::from_millis(750));
        assert!(backoff_delay(2) >= Duration::from_millis(2000));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("مرحبا بالعالم", 5), "مرحبا...");
        assert_eq!(truncate("short", 10), "short");
    }

    #[tokio::test]
    async fn test_client_without_keys_is_unconfigured() {
        let config = Config::from_lookup(|_| None).unwrap();
        let client = ApiClient::new(&config, CircuitBreaker::new("gemini"), None).unwrap();
        assert!(!client.is_configured());
        assert_eq!(client.health().total_keys, 0);
        let err = client.generate_json(vec![], json!({})).await.unwrap_err();
        assert!(matches!(err, ApiError::NoApiKeys));
    }
}
