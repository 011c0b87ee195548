//! # Crop Disease Diagnosis
//!
//! Leaf image classification with weather-aware agronomic advice, built on
//! the Burn framework and served over HTTP with axum.
//!
//! ## Modules
//!
//! - `model`: CNN architectures, class index maps and weight loading
//! - `inference`: Preprocessing, the healthy override and the predictor
//! - `clients`: Weather and chat-completion providers
//! - `server`: The HTTP API and its shared context
//! - `config`: Settings for all of the above
//! - `utils`: Logging, errors and helper functions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use crop_diagnosis::config::ClassifierConfig;
//! use crop_diagnosis::inference::DiseaseClassifier;
//!
//! let classifier = DiseaseClassifier::load(&ClassifierConfig::default())?;
//! let diagnosis = classifier.diagnose(&std::fs::read("leaf.jpg")?, "Banana")?;
//! println!("{}", diagnosis.display());
//! ```

pub mod backend;
pub mod clients;
pub mod config;
pub mod inference;
pub mod model;
pub mod server;
pub mod utils;

// Re-export commonly used items for convenience
pub use clients::{Advice, RecommendationClient, WeatherClient, WeatherReport};
pub use config::{ApiConfig, ClassifierConfig, LlmConfig, RecommendationEncoding, WeatherConfig};
pub use inference::{Diagnosis, DiseaseClassifier, ProbabilityModel};
pub use model::{ClassIndexMap, ModelKind};
pub use server::{router, AppContext, SharedState};
pub use utils::error::{DiagnosisError, Result};

/// Default square input resolution of the classifier
pub const IMAGE_SIZE: u32 = 224;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
