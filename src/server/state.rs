//! Application context shared by all handlers
//!
//! Built once at start-up and never mutated afterwards.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::backend::backend_name;
use crate::clients::{RecommendationClient, WeatherClient};
use crate::config::{ApiConfig, ClassifierConfig, LlmConfig, WeatherConfig};
use crate::inference::DiseaseClassifier;
use crate::utils::error::Result;

/// Shared state type
pub type SharedState = Arc<AppContext>;

/// Loaded model plus upstream clients
pub struct AppContext {
    pub classifier: DiseaseClassifier,
    pub weather: WeatherClient,
    pub recommender: RecommendationClient,
    pub api: ApiConfig,
    /// Inference backend in use
    pub backend: &'static str,
    /// Server start time
    pub started_at: Instant,
    pub started_at_utc: DateTime<Utc>,
}

impl AppContext {
    pub fn new(
        classifier: DiseaseClassifier,
        weather: WeatherClient,
        recommender: RecommendationClient,
        api: ApiConfig,
    ) -> Self {
        Self {
            classifier,
            weather,
            recommender,
            api,
            backend: backend_name(),
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
        }
    }

    /// Load the model from disk and connect the real upstream clients
    pub fn from_config(
        classifier: &ClassifierConfig,
        weather: WeatherConfig,
        llm: &LlmConfig,
        api: ApiConfig,
    ) -> Result<Self> {
        Ok(Self::new(
            DiseaseClassifier::load(classifier)?,
            WeatherClient::new(weather)?,
            RecommendationClient::rapidapi(llm)?,
            api,
        ))
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(self)
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
