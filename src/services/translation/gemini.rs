use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use super::{validate_language_pair, Translator};
use crate::core::errors::{TranslationError, TranslationResult};
use crate::services::api_client::ApiClient;

#[derive(Debug, Deserialize)]
struct TranslationResponse {
    translation: String,
}

/// Text translation through the same Gemini client used for detection
pub struct GeminiTranslator {
    client: Arc<ApiClient>,
}

impl GeminiTranslator {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Translator for GeminiTranslator {
    fn name(&self) -> &'static str {
        "gemini"
    }

    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    async fn translate(&self, text: &str, source: &str, target: &str) -> TranslationResult<String> {
        validate_language_pair(source, target)?;
        if text.trim().is_empty() || source == target {
            return Ok(text.to_string());
        }

        let prompt = format!(
            "Translate the following text from language '{}' to language '{}'. \
             It was read from an image (comic, poster or document page), so keep it short and natural. \
             Return only the translation in the 'translation' field.\n\n{}",
            source, target, text
        );
        let schema = json!({
            "type": "object",
            "properties": { "translation": {"type": "string"} },
            "required": ["translation"]
        });

        let reply = self
            .client
            .generate_json(vec![json!({ "text": prompt })], schema)
            .await?;
        let response: TranslationResponse = serde_json::from_str(&reply)
            .map_err(|e| TranslationError::InvalidResponse(e.to_string()))?;

        let translation = response.translation.trim().to_string();
        if translation.is_empty() {
            return Err(TranslationError::InvalidResponse(
                "empty translation".to_string(),
            ));
        }
        Ok(translation)
    }
}
