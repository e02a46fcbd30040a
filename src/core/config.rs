use crate::core::errors::{ConfigError, ConfigResult};
use std::collections::BTreeSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

/// Upload limits
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Maximum accepted upload size in bytes
    pub max_file_size: usize,
    /// Maximum number of images extracted from a single input file
    pub max_batch_size: usize,
    /// Maximum uncompressed size of one archive entry in bytes
    pub max_entry_size: usize,
}

/// Which detection engine to probe at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrEngine {
    Gemini,
    None,
}

/// Detection configuration
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub engine: OcrEngine,
    pub confidence_threshold: f32,
    pub languages: Vec<String>,
    pub model: String,
}

/// Remote API configuration (shared by detection and Gemini translation)
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_keys: Vec<String>,
    pub max_retries: u32,
    pub timeout: Duration,
}

/// Translation backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationService {
    Google,
    Gemini,
}

/// Translation configuration
#[derive(Debug, Clone)]
pub struct TranslationConfig {
    pub service: TranslationService,
    pub source_language: String,
    pub target_language: String,
    /// Maximum in-flight translation calls across the process
    pub concurrency: usize,
    pub cache_size: usize,
}

/// Image handling configuration
#[derive(Debug, Clone)]
pub struct ImageConfig {
    /// JPEG quality used for detection payloads (1-100)
    pub quality: u8,
    pub max_dimension: u32,
    pub pdf_render_dpi: u32,
}

/// How text regions are erased
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InpaintMode {
    /// Solid fill with the dominant border colour
    Fill,
    /// Fill, then soften the seam with a Gaussian blur
    Blend,
}

/// Inpainting configuration
#[derive(Debug, Clone)]
pub struct InpaintConfig {
    pub mode: InpaintMode,
    pub border: u32,
    pub blur_sigma: f32,
}

/// Rendering configuration
#[derive(Debug, Clone)]
pub struct RenderingConfig {
    pub font_path: String,
    pub min_font_size: u32,
    pub max_font_size: u32,
    pub font_size_padding: f32,
}

/// Supported extension sets (lowercase, without the dot)
#[derive(Debug, Clone)]
pub struct FormatsConfig {
    pub image: BTreeSet<String>,
    pub pdf: BTreeSet<String>,
    pub archive: BTreeSet<String>,
}

impl FormatsConfig {
    /// All accepted upload extensions
    pub fn all(&self) -> BTreeSet<String> {
        self.image
            .iter()
            .chain(self.pdf.iter())
            .chain(self.archive.iter())
            .cloned()
            .collect()
    }

    pub fn is_image_format(&self, extension: &str) -> bool {
        self.image.contains(&normalize_extension(extension))
    }

    pub fn is_pdf_format(&self, extension: &str) -> bool {
        self.pdf.contains(&normalize_extension(extension))
    }

    pub fn is_archive_format(&self, extension: &str) -> bool {
        self.archive.contains(&normalize_extension(extension))
    }

    pub fn is_supported(&self, extension: &str) -> bool {
        self.is_image_format(extension)
            || self.is_pdf_format(extension)
            || self.is_archive_format(extension)
    }
}

/// What happens to a file when one of its images fails inpainting or rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Drop the failed image from the bundle and keep going
    DropImage,
    /// Fail the whole file
    FailFile,
}

/// Pipeline concurrency, timeouts and failure policy
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub worker_pool_size: usize,
    pub failure_policy: FailurePolicy,
    pub extract_timeout: Duration,
    pub detect_timeout: Duration,
    pub translate_timeout: Duration,
    pub inpaint_timeout: Duration,
    pub render_timeout: Duration,
}

/// Main application configuration, built once at startup and never mutated
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub detection: DetectionConfig,
    pub api: ApiConfig,
    pub translation: TranslationConfig,
    pub image: ImageConfig,
    pub inpaint: InpaintConfig,
    pub rendering: RenderingConfig,
    pub formats: FormatsConfig,
    pub pipeline: PipelineConfig,
}

const DEFAULT_IMAGE_FORMATS: &str = "png,jpg,jpeg,webp,bmp,tiff,gif";
const DEFAULT_PDF_FORMATS: &str = "pdf";
const DEFAULT_ARCHIVE_FORMATS: &str = "zip,rar,cbz,cbr";

impl Config {
    pub fn new() -> ConfigResult<Self> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::load(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn load<F>(lookup: &F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_level = lookup("LOG_LEVEL")
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let engine = match lookup("OCR_ENGINE").map(|s| s.trim().to_lowercase()) {
            None => OcrEngine::Gemini,
            Some(s) if s == "gemini" => OcrEngine::Gemini,
            Some(s) if s == "none" || s == "fallback" => OcrEngine::None,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "OCR_ENGINE",
                    value: other,
                })
            }
        };

        let service = match lookup("TRANSLATION_SERVICE").map(|s| s.trim().to_lowercase()) {
            None => TranslationService::Google,
            Some(s) if s == "google" => TranslationService::Google,
            Some(s) if s == "gemini" => TranslationService::Gemini,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "TRANSLATION_SERVICE",
                    value: other,
                })
            }
        };

        let inpaint_mode = match lookup("INPAINT_MODE").map(|s| s.trim().to_lowercase()) {
            None => InpaintMode::Blend,
            Some(s) if s == "blend" => InpaintMode::Blend,
            Some(s) if s == "fill" => InpaintMode::Fill,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "INPAINT_MODE",
                    value: other,
                })
            }
        };

        let failure_policy = match lookup("IMAGE_FAILURE_POLICY").map(|s| s.trim().to_lowercase()) {
            None => FailurePolicy::DropImage,
            Some(s) if s == "drop" => FailurePolicy::DropImage,
            Some(s) if s == "fail" => FailurePolicy::FailFile,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "IMAGE_FAILURE_POLICY",
                    value: other,
                })
            }
        };

        let seconds = |key: &'static str, default: u64| -> ConfigResult<Duration> {
            parse_or(lookup, key, default).map(Duration::from_secs)
        };

        Ok(Self {
            server: ServerConfig {
                port: parse_or(lookup, "SERVER_PORT", 5000)?,
                host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                log_level,
            },
            limits: LimitsConfig {
                max_file_size: parse_or(lookup, "MAX_FILE_SIZE", 200 * 1024 * 1024)?,
                max_batch_size: parse_or(lookup, "MAX_BATCH_SIZE", 50)?,
                max_entry_size: parse_or(lookup, "MAX_ENTRY_SIZE", 64 * 1024 * 1024)?,
            },
            detection: DetectionConfig {
                engine,
                confidence_threshold: parse_or(lookup, "OCR_CONFIDENCE_THRESHOLD", 0.3)?,
                languages: split_list(&lookup("OCR_LANGUAGES").unwrap_or_else(|| "en,ar".to_string())),
                model: lookup("OCR_MODEL").unwrap_or_else(|| "gemini-2.5-flash".to_string()),
            },
            api: ApiConfig {
                api_keys: lookup("GEMINI_API_KEYS")
                    .map(|keys| split_list(&keys))
                    .unwrap_or_default(),
                max_retries: parse_or(lookup, "MAX_RETRIES", 2)?,
                timeout: seconds("API_TIMEOUT_SECONDS", 60)?,
            },
            translation: TranslationConfig {
                service,
                source_language: lookup("SOURCE_LANGUAGE").unwrap_or_else(|| "en".to_string()),
                target_language: lookup("TARGET_LANGUAGE").unwrap_or_else(|| "ar".to_string()),
                concurrency: parse_or(lookup, "TRANSLATION_CONCURRENCY", 8)?,
                cache_size: parse_or(lookup, "TRANSLATION_CACHE_SIZE", 10_000)?,
            },
            image: ImageConfig {
                quality: parse_or(lookup, "IMAGE_QUALITY", 95)?,
                max_dimension: parse_or(lookup, "MAX_IMAGE_DIMENSION", 4096)?,
                pdf_render_dpi: parse_or(lookup, "PDF_RENDER_DPI", 150)?,
            },
            inpaint: InpaintConfig {
                mode: inpaint_mode,
                border: parse_or(lookup, "INPAINT_BORDER", 4)?,
                blur_sigma: parse_or(lookup, "INPAINT_BLUR_SIGMA", 1.5)?,
            },
            rendering: RenderingConfig {
                font_path: lookup("ARABIC_FONT_PATH")
                    .unwrap_or_else(|| "fonts/Amiri-Regular.ttf".to_string()),
                min_font_size: parse_or(lookup, "MIN_FONT_SIZE", 8)?,
                max_font_size: parse_or(lookup, "MAX_FONT_SIZE", 200)?,
                font_size_padding: parse_or(lookup, "FONT_SIZE_PADDING", 0.1)?,
            },
            formats: FormatsConfig {
                image: extension_set(
                    &lookup("SUPPORTED_IMAGE_FORMATS").unwrap_or_else(|| DEFAULT_IMAGE_FORMATS.to_string()),
                ),
                pdf: extension_set(
                    &lookup("SUPPORTED_PDF_FORMATS").unwrap_or_else(|| DEFAULT_PDF_FORMATS.to_string()),
                ),
                archive: extension_set(
                    &lookup("SUPPORTED_ARCHIVE_FORMATS")
                        .unwrap_or_else(|| DEFAULT_ARCHIVE_FORMATS.to_string()),
                ),
            },
            pipeline: PipelineConfig {
                worker_pool_size: parse_or(
                    lookup,
                    "WORKER_POOL_SIZE",
                    std::cmp::max(num_cpus::get() / 2, 2),
                )?,
                failure_policy,
                extract_timeout: seconds("EXTRACT_TIMEOUT_SECONDS", 60)?,
                detect_timeout: seconds("DETECT_TIMEOUT_SECONDS", 90)?,
                translate_timeout: seconds("TRANSLATE_TIMEOUT_SECONDS", 30)?,
                inpaint_timeout: seconds("INPAINT_TIMEOUT_SECONDS", 30)?,
                render_timeout: seconds("RENDER_TIMEOUT_SECONDS", 60)?,
            },
        })
    }

    fn validate(&self) -> ConfigResult<()> {
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ConfigError::InvalidConfidenceThreshold(
                self.detection.confidence_threshold,
            ));
        }

        if !(0.0..1.0).contains(&self.rendering.font_size_padding) {
            return Err(ConfigError::InvalidPadding(self.rendering.font_size_padding));
        }

        let (min, max) = (self.rendering.min_font_size, self.rendering.max_font_size);
        if min == 0 || min > max {
            return Err(ConfigError::InvalidFontBounds { min, max });
        }

        if self.image.quality == 0 || self.image.quality > 100 {
            return Err(ConfigError::InvalidValue {
                key: "IMAGE_QUALITY",
                value: self.image.quality.to_string(),
            });
        }

        let positive: [(&'static str, u64); 10] = [
            ("MAX_FILE_SIZE", self.limits.max_file_size as u64),
            ("MAX_BATCH_SIZE", self.limits.max_batch_size as u64),
            ("MAX_ENTRY_SIZE", self.limits.max_entry_size as u64),
            ("MAX_IMAGE_DIMENSION", self.image.max_dimension as u64),
            ("PDF_RENDER_DPI", self.image.pdf_render_dpi as u64),
            ("TRANSLATION_CONCURRENCY", self.translation.concurrency as u64),
            ("TRANSLATION_CACHE_SIZE", self.translation.cache_size as u64),
            ("WORKER_POOL_SIZE", self.pipeline.worker_pool_size as u64),
            ("API_TIMEOUT_SECONDS", self.api.timeout.as_secs()),
            ("EXTRACT_TIMEOUT_SECONDS", self.pipeline.extract_timeout.as_secs()),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::NotPositive { name, value });
            }
        }

        let stage_timeouts = [
            ("DETECT_TIMEOUT_SECONDS", self.pipeline.detect_timeout),
            ("TRANSLATE_TIMEOUT_SECONDS", self.pipeline.translate_timeout),
            ("INPAINT_TIMEOUT_SECONDS", self.pipeline.inpaint_timeout),
            ("RENDER_TIMEOUT_SECONDS", self.pipeline.render_timeout),
        ];
        for (name, timeout) in stage_timeouts {
            if timeout.is_zero() {
                return Err(ConfigError::NotPositive { name, value: 0 });
            }
        }

        if !self.inpaint.blur_sigma.is_finite() || self.inpaint.blur_sigma < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "INPAINT_BLUR_SIGMA",
                value: self.inpaint.blur_sigma.to_string(),
            });
        }

        let formats = &self.formats;
        if formats.image.is_empty() || formats.pdf.is_empty() || formats.archive.is_empty() {
            return Err(ConfigError::InvalidFormats(
                "image, pdf and archive extension sets must not be empty".to_string(),
            ));
        }
        let total = formats.image.len() + formats.pdf.len() + formats.archive.len();
        if formats.all().len() != total {
            return Err(ConfigError::InvalidFormats(
                "an extension appears in more than one format set".to_string(),
            ));
        }

        Ok(())
    }

    // Accessors
    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn max_file_size(&self) -> usize {
        self.limits.max_file_size
    }

    pub fn max_batch_size(&self) -> usize {
        self.limits.max_batch_size
    }

    pub fn max_entry_size(&self) -> usize {
        self.limits.max_entry_size
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.detection.confidence_threshold
    }

    pub fn api_keys(&self) -> &[String] {
        &self.api.api_keys
    }

    pub fn source_language(&self) -> &str {
        &self.translation.source_language
    }

    pub fn target_language(&self) -> &str {
        &self.translation.target_language
    }

    pub fn max_image_dimension(&self) -> u32 {
        self.image.max_dimension
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> ConfigResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key,
            value: raw,
        }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn extension_set(raw: &str) -> BTreeSet<String> {
    split_list(raw).iter().map(|s| normalize_extension(s)).collect()
}

/// Lowercase and strip a leading dot: ".PNG" -> "png"
pub fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_lowercase()
}
