pub mod cache;
mod gemini;
mod google;

pub use cache::TranslationCache;
pub use gemini::GeminiTranslator;
pub use google::{parse_google_response, GoogleTranslator};

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::config::{Config, TranslationService};
use crate::core::errors::{ApiResult, TranslationError, TranslationResult};
use crate::services::api_client::ApiClient;
use crate::utils::Metrics;

/// Translate one string. Implementations may fail per call; the orchestrator
/// substitutes the original text when they do.
#[async_trait]
pub trait Translator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn translate(&self, text: &str, source: &str, target: &str) -> TranslationResult<String>;
}

/// Accepts codes like `en`, `ar`, `zh-CN`, `auto` (source only).
pub fn validate_language_pair(source: &str, target: &str) -> TranslationResult<()> {
    let valid = |code: &str| {
        let mut parts = code.splitn(2, '-');
        let base = parts.next().unwrap_or_default();
        let region_ok = parts
            .next()
            .map_or(true, |region| !region.is_empty() && region.chars().all(|c| c.is_ascii_alphanumeric()));
        (2..=3).contains(&base.len()) && base.chars().all(|c| c.is_ascii_alphabetic()) && region_ok
    };

    if (valid(source) || source == "auto") && valid(target) && target != "auto" {
        Ok(())
    } else {
        Err(TranslationError::UnsupportedLanguage {
            source_lang: source.to_string(),
            target_lang: target.to_string(),
        })
    }
}

/// Memoizes another translator through the process-wide LRU cache.
pub struct CachedTranslator {
    inner: Arc<dyn Translator>,
    cache: TranslationCache,
}

impl CachedTranslator {
    pub fn new(inner: Arc<dyn Translator>, cache: TranslationCache) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl Translator for CachedTranslator {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn translate(&self, text: &str, source: &str, target: &str) -> TranslationResult<String> {
        let key = TranslationCache::generate_key(source, target, text);
        if let Some(hit) = self.cache.get(key) {
            debug!("Translation cache hit ({} chars)", text.len());
            return Ok(hit);
        }

        let translated = self.inner.translate(text, source, target).await?;
        self.cache.put(key, translated.clone());
        Ok(translated)
    }
}

/// Build the configured backend, wrapped in the cache.
pub fn select_translator(
    config: &Config,
    gemini_client: Option<Arc<ApiClient>>,
    metrics: Option<Metrics>,
) -> ApiResult<Arc<dyn Translator>> {
    let backend: Arc<dyn Translator> = match (config.translation.service, gemini_client) {
        (TranslationService::Gemini, Some(client)) if client.is_configured() => {
            Arc::new(GeminiTranslator::new(client))
        }
        (TranslationService::Gemini, _) => {
            info!("Gemini translation requested without API keys, using Google translate");
            Arc::new(GoogleTranslator::new(config, metrics.clone())?)
        }
        (TranslationService::Google, _) => Arc::new(GoogleTranslator::new(config, metrics.clone())?),
    };
    info!(
        "Translator: {} ({} -> {})",
        backend.name(),
        config.source_language(),
        config.target_language()
    );

    let cache = TranslationCache::new(config.translation.cache_size, metrics);
    Ok(Arc::new(CachedTranslator::new(backend, cache)))
}
