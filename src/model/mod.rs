//! Model module: CNN architectures, class index maps and weight loading
//!
//! This module provides:
//! - The `LeafClassifier` backbone and the `DualBranchClassifier` ensemble
//! - The `ClassIndexMap` side-car that names the model outputs
//! - Resolution and loading of Burn record files from a model directory
//!
//! A model directory looks like:
//!
//! ```text
//! models/
//! ├── best_model.mpk            # preferred when present
//! ├── disease_classifier.mpk    # fallback weights
//! ├── model_config.json         # optional architecture side-car
//! └── class_indices.json        # {"Banana_Healthy": 2, ...}
//! ```

pub mod cnn;
pub mod labels;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use burn::config::Config;
use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::utils::error::{DiagnosisError, Result};

// Re-export main types for convenience
pub use cnn::{DualBranchClassifier, DualBranchConfig, LeafClassifier, LeafClassifierConfig};
pub use labels::ClassIndexMap;

/// Weights file preferred when present
pub const BEST_MODEL_FILE: &str = "best_model.mpk";
/// Weights file used otherwise
pub const MODEL_FILE: &str = "disease_classifier.mpk";
/// Optional architecture side-car
pub const MODEL_CONFIG_FILE: &str = "model_config.json";
/// Default class index file
pub const CLASS_INDEX_FILE: &str = "class_indices.json";

/// Which network layout the weights were saved from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// One backbone with a dense head
    Single,
    /// Two backbones, softmax outputs averaged
    Ensemble,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Single => write!(f, "single"),
            ModelKind::Ensemble => write!(f, "ensemble"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = DiagnosisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "single" => Ok(ModelKind::Single),
            "ensemble" | "dual" => Ok(ModelKind::Ensemble),
            other => Err(DiagnosisError::Config(format!("unknown model kind '{}'", other))),
        }
    }
}

/// Files making up a deployed model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifacts {
    pub weights: PathBuf,
    pub class_indices: PathBuf,
    pub architecture: Option<PathBuf>,
}

impl ModelArtifacts {
    /// Resolve the files inside a model directory
    ///
    /// `best_model.mpk` wins over `disease_classifier.mpk`; an explicit
    /// `weights` path wins over both.
    pub fn resolve(
        model_dir: &Path,
        weights: Option<&Path>,
        class_indices: Option<&Path>,
    ) -> Self {
        let weights = match weights {
            Some(path) => path.to_path_buf(),
            None => {
                let best = model_dir.join(BEST_MODEL_FILE);
                if best.exists() {
                    best
                } else {
                    model_dir.join(MODEL_FILE)
                }
            }
        };

        let class_indices = class_indices
            .map(Path::to_path_buf)
            .unwrap_or_else(|| model_dir.join(CLASS_INDEX_FILE));

        let side_car = model_dir.join(MODEL_CONFIG_FILE);
        let architecture = side_car.exists().then_some(side_car);

        Self {
            weights,
            class_indices,
            architecture,
        }
    }
}

/// A network with weights loaded, ready for inference
#[derive(Debug)]
pub enum LoadedNetwork<B: Backend> {
    Single(LeafClassifier<B>),
    Ensemble(DualBranchClassifier<B>),
}

impl<B: Backend> LoadedNetwork<B> {
    /// Softmax scores of shape [batch_size, num_classes]
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            LoadedNetwork::Single(model) => model.forward_softmax(x),
            LoadedNetwork::Ensemble(model) => model.forward_softmax(x),
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            LoadedNetwork::Single(_) => ModelKind::Single,
            LoadedNetwork::Ensemble(_) => ModelKind::Ensemble,
        }
    }
}

/// Load weights for `kind` from the artifacts
///
/// The architecture comes from the side-car when present, otherwise from the
/// defaults for `num_classes` and `input_size`.
pub fn load_network<B: Backend>(
    artifacts: &ModelArtifacts,
    kind: ModelKind,
    num_classes: usize,
    input_size: usize,
    device: &B::Device,
) -> Result<LoadedNetwork<B>> {
    if !artifacts.weights.exists() {
        return Err(DiagnosisError::PathNotFound(artifacts.weights.clone()));
    }

    info!("Loading {} model from {:?}", kind, artifacts.weights);
    let recorder = CompactRecorder::new();

    let network = match kind {
        ModelKind::Single => {
            let config = match &artifacts.architecture {
                Some(path) => LeafClassifierConfig::load(path).map_err(|e| {
                    DiagnosisError::Config(format!("Failed to read {:?}: {:?}", path, e))
                })?,
                None => LeafClassifierConfig::new(num_classes).with_input_size(input_size),
            };
            let model = config
                .init::<B>(device)
                .load_file(artifacts.weights.clone(), &recorder, device)
                .map_err(|e| DiagnosisError::Model(format!("Failed to load weights: {:?}", e)))?;
            LoadedNetwork::Single(model)
        }
        ModelKind::Ensemble => {
            let config = match &artifacts.architecture {
                Some(path) => DualBranchConfig::load(path).map_err(|e| {
                    DiagnosisError::Config(format!("Failed to read {:?}: {:?}", path, e))
                })?,
                None => DualBranchConfig::for_classes(num_classes, input_size),
            };
            let model = config
                .init::<B>(device)
                .load_file(artifacts.weights.clone(), &recorder, device)
                .map_err(|e| DiagnosisError::Model(format!("Failed to load weights: {:?}", e)))?;
            LoadedNetwork::Ensemble(model)
        }
    };

    Ok(network)
}
