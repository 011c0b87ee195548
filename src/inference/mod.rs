//! Inference module: preprocessing, the healthy override and the predictor
//!
//! This module provides:
//! - Nearest-neighbour resize, CLAHE and backbone normalization
//! - Green-ratio and edge-intensity cues with the override policy
//! - The `DiseaseClassifier` that ties them to a `ProbabilityModel`

pub mod heuristics;
pub mod predictor;
pub mod preprocess;

pub use heuristics::{OverridePolicy, VisualCues, DEFAULT_HEALTHY_LABEL};
pub use predictor::{
    humanize_label, BurnModel, Diagnosis, DiseaseClassifier, OverrideReport, ProbabilityModel,
    RankedClass,
};
pub use preprocess::{ClaheConfig, Normalization};
