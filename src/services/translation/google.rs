// Keyless Google translate endpoint (the "gtx" web client)

use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, instrument, warn};

use super::{validate_language_pair, Translator};
use crate::core::config::Config;
use crate::core::errors::{ApiResult, TranslationError, TranslationResult};
use crate::middleware::CircuitBreaker;
use crate::services::api_client::{backoff_delay, build_http_client};
use crate::utils::Metrics;

const GOOGLE_ENDPOINT: &str = "https://translate.googleapis.com/translate_a/single";

pub struct GoogleTranslator {
    http_client: reqwest::Client,
    circuit_breaker: CircuitBreaker,
    max_retries: u32,
    metrics: Option<Metrics>,
}

impl GoogleTranslator {
    pub fn new(config: &Config, metrics: Option<Metrics>) -> ApiResult<Self> {
        Ok(Self {
            http_client: build_http_client(config.api.timeout)?,
            circuit_breaker: CircuitBreaker::new("google-translate"),
            max_retries: config.api.max_retries,
            metrics,
        })
    }

    async fn request(&self, text: &str, source: &str, target: &str) -> TranslationResult<Value> {
        let mut attempt = 0;
        loop {
            let start = Instant::now();
            let result = self
                .http_client
                .get(GOOGLE_ENDPOINT)
                .query(&[
                    ("client", "gtx"),
                    ("sl", source),
                    ("tl", target),
                    ("dt", "t"),
                    ("q", text),
                ])
                .send()
                .await;

            let error = match result {
                Ok(response) if response.status().is_success() => {
                    if let Some(ref m) = self.metrics {
                        m.record_api_call(true, start.elapsed());
                    }
                    return response
                        .json::<Value>()
                        .await
                        .map_err(|e| TranslationError::InvalidResponse(e.to_string()));
                }
                Ok(response) => {
                    let status = response.status();
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    let error = TranslationError::RequestFailed(format!("HTTP {}", status));
                    if !retryable {
                        if let Some(ref m) = self.metrics {
                            m.record_api_call(false, start.elapsed());
                        }
                        return Err(error);
                    }
                    error
                }
                Err(e) => TranslationError::RequestFailed(e.to_string()),
            };

            if let Some(ref m) = self.metrics {
                m.record_api_call(false, start.elapsed());
            }
            if attempt >= self.max_retries {
                return Err(error);
            }
            let delay = backoff_delay(attempt);
            debug!("Google translate failed: {}. Retrying in {:?}", error, delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl Translator for GoogleTranslator {
    fn name(&self) -> &'static str {
        "google"
    }

    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    async fn translate(&self, text: &str, source: &str, target: &str) -> TranslationResult<String> {
        validate_language_pair(source, target)?;
        if text.trim().is_empty() || source == target {
            return Ok(text.to_string());
        }
        if !self.circuit_breaker.allow_request() {
            return Err(TranslationError::CircuitOpen);
        }

        let result = match self.request(text, source, target).await {
            Ok(body) => parse_google_response(&body),
            Err(e) => Err(e),
        };
        match result {
            Ok(translated) => {
                self.circuit_breaker.record_success();
                Ok(translated)
            }
            Err(e) => {
                warn!("Google translate error: {}", e);
                self.circuit_breaker.record_failure();
                Err(e)
            }
        }
    }
}

/// The body is a nested array; `[0]` lists sentence segments whose first
/// element is the translated sentence.
pub fn parse_google_response(body: &Value) -> TranslationResult<String> {
    let segments = body
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| TranslationError::InvalidResponse("missing segment list".to_string()))?;

    let translated: String = segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(Value::as_str))
        .collect();

    if translated.trim().is_empty() {
        return Err(TranslationError::InvalidResponse(
            "empty translation".to_string(),
        ));
    }
    Ok(translated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_concatenates_segments() {
        let body = json!([
            [
                ["مرحبا. ", "Hello. ", null, null, 10],
                ["كيف حالك؟", "How are you?", null, null, 10]
            ],
            null,
            "en"
        ]);
        assert_eq!(parse_google_response(&body).unwrap(), "مرحبا. كيف حالك؟");
    }

    #[test]
    fn test_parse_rejects_unexpected_shapes() {
        assert!(parse_google_response(&json!({"error": "quota"})).is_err());
        assert!(parse_google_response(&json!([[]])).is_err());
    }

    #[tokio::test]
    async fn test_blank_text_skips_network() {
        let config = Config::from_lookup(|_| None).unwrap();
        let translator = GoogleTranslator::new(&config, None).unwrap();
        assert_eq!(translator.translate("  ", "en", "ar").await.unwrap(), "  ");
    }
}
