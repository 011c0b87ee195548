//! Configuration for the classifier, the upstream clients and the HTTP API
//!
//! Every struct has a `Default` matching the deployed service; the CLI
//! overrides individual fields from flags and environment variables.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::inference::heuristics::OverridePolicy;
use crate::inference::preprocess::{ClaheConfig, Normalization};
use crate::model::ModelKind;
use crate::IMAGE_SIZE;

/// Sentence shown instead of the healthy label
pub const DEFAULT_HEALTHY_SENTENCE: &str = "No disease, the banana is healthy";

/// Disease classifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Directory holding the weights and the class index
    pub model_dir: PathBuf,
    /// Explicit weights file, overrides the lookup in `model_dir`
    pub weights: Option<PathBuf>,
    /// Explicit class index file
    pub class_indices: Option<PathBuf>,
    pub kind: ModelKind,
    /// Square input resolution the weights were trained at
    pub image_size: u32,
    pub normalization: Normalization,
    pub clahe: ClaheConfig,
    /// Thresholds for the healthy override; the preset for the loaded model's kind when unset
    pub override_policy: Option<OverridePolicy>,
    pub healthy_sentence: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            weights: None,
            class_indices: None,
            kind: ModelKind::Single,
            image_size: IMAGE_SIZE,
            normalization: Normalization::EfficientNet,
            clahe: ClaheConfig::default(),
            override_policy: None,
            healthy_sentence: DEFAULT_HEALTHY_SENTENCE.to_string(),
        }
    }
}

impl ClassifierConfig {
    /// Override thresholds in effect for a model of `kind`
    pub fn policy_for(&self, kind: ModelKind) -> OverridePolicy {
        self.override_policy
            .clone()
            .unwrap_or_else(|| OverridePolicy::for_kind(kind))
    }
}

/// Forecast provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    pub api_key: String,
    /// Base URL without the trailing `/forecast.json`
    pub base_url: String,
    pub forecast_days: u8,
    pub timeout_secs: Option<u64>,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "http://api.weatherapi.com/v1".to_string(),
            forecast_days: 3,
            timeout_secs: None,
        }
    }
}

/// Chat completion provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    /// Value of the `x-rapidapi-host` header
    pub host: String,
    /// Scheme and authority to post to; `https://{host}` when unset
    pub base_url: Option<String>,
    pub path: String,
    pub timeout_secs: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            host: String::new(),
            base_url: None,
            path: "/conversationllama".to_string(),
            timeout_secs: Some(60),
        }
    }
}

impl LlmConfig {
    /// Full URL of the chat endpoint
    pub fn endpoint(&self) -> String {
        let base = match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}", self.host),
        };
        format!("{}{}", base, self.path)
    }
}

/// How `disease_recomendations` is written into the `/predict` response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationEncoding {
    /// JSON string wrapping a `{"result": "<json string>", ...}` envelope
    Legacy,
    /// Plain JSON object
    Structured,
}

impl std::str::FromStr for RecommendationEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "legacy" => Ok(RecommendationEncoding::Legacy),
            "structured" => Ok(RecommendationEncoding::Structured),
            other => Err(format!("unknown recommendation encoding '{}'", other)),
        }
    }
}

/// HTTP API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Location used when the form omits one
    pub default_location: String,
    /// Crop labels are cut to this many characters
    pub crop_max_chars: Option<usize>,
    pub recommendation_encoding: RecommendationEncoding,
    pub cors_origin: String,
    pub max_upload_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            default_location: "Colombo".to_string(),
            crop_max_chars: Some(50),
            recommendation_encoding: RecommendationEncoding::Legacy,
            cors_origin: "http://localhost:5173".to_string(),
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}
