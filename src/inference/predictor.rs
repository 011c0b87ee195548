//! Disease predictor
//!
//! Runs the full path from uploaded bytes to a humanized diagnosis:
//! decode, resize, CLAHE, normalize, forward pass, arg-max and the healthy
//! override.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{default_device, DefaultBackend};
use crate::config::ClassifierConfig;
use crate::inference::heuristics::{rank_classes, OverridePolicy, VisualCues};
use crate::inference::preprocess::{enhance_contrast, resize_to_square, ClaheConfig, Normalization};
use crate::model::{load_network, ClassIndexMap, LoadedNetwork, ModelArtifacts, ModelKind};
use crate::utils::error::{DiagnosisError, Result};
use crate::utils::format_percentage;

/// Number of ranked classes kept on a diagnosis
const TOP_K: usize = 3;

/// Anything that turns a normalized CHW image into class probabilities
pub trait ProbabilityModel: Send + Sync {
    /// Width of the probability vector
    fn num_classes(&self) -> usize;

    /// Softmax scores for one `3 x image_size x image_size` input
    fn predict(&self, input: &[f32], image_size: u32) -> Result<Vec<f32>>;

    fn kind(&self) -> ModelKind {
        ModelKind::Single
    }
}

/// Burn network served from a single device
///
/// The forward pass is serialized through a mutex.
pub struct BurnModel<B: Backend> {
    network: Mutex<LoadedNetwork<B>>,
    device: B::Device,
    kind: ModelKind,
    num_classes: usize,
}

impl<B: Backend> BurnModel<B> {
    /// Wrap a loaded network, probing it once to learn its output width
    pub fn new(network: LoadedNetwork<B>, device: B::Device, image_size: usize) -> Result<Self> {
        let probe = Tensor::<B, 4>::zeros([1, 3, image_size, image_size], &device);
        let [_, num_classes] = network.forward_softmax(probe).dims();
        let kind = network.kind();

        Ok(Self {
            network: Mutex::new(network),
            device,
            kind,
            num_classes,
        })
    }
}

impl<B: Backend> ProbabilityModel for BurnModel<B> {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, input: &[f32], image_size: u32) -> Result<Vec<f32>> {
        let size = image_size as usize;
        if input.len() != 3 * size * size {
            return Err(DiagnosisError::Inference(format!(
                "expected {} input values, got {}",
                3 * size * size,
                input.len()
            )));
        }

        let data = TensorData::new(input.to_vec(), [1, 3, size, size]);
        let tensor = Tensor::<B, 4>::from_data(data, &self.device);

        let network = self
            .network
            .lock()
            .map_err(|_| DiagnosisError::Inference("model lock poisoned".to_string()))?;
        let scores = network.forward_softmax(tensor);
        drop(network);

        scores
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| DiagnosisError::Inference(format!("{:?}", e)))
    }

    fn kind(&self) -> ModelKind {
        self.kind
    }
}

/// One entry of the ranked class list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedClass {
    pub label: String,
    pub probability: f32,
}

/// Outcome of the visual check for a low-confidence disease prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideReport {
    pub cues: VisualCues,
    /// Label the model predicted before the check
    pub model_label: String,
    pub overridden: bool,
}

/// Result of a single diagnosis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnosis {
    /// Humanized label shown to users
    pub disease_name: String,

    /// Raw class label
    pub label: String,

    pub class_index: usize,

    /// Probability of the reported class
    pub confidence: f32,

    pub crop_type: String,

    /// Highest-scoring classes, most likely first
    pub top_k: Vec<RankedClass>,

    /// Present when the healthy override was evaluated
    pub override_check: Option<OverrideReport>,

    pub inference_time_ms: f64,
}

impl Diagnosis {
    /// Confidence formatted as `"NN.NN%"`
    pub fn confidence_percent(&self) -> String {
        format_percentage(self.confidence)
    }

    /// Pretty print the diagnosis
    pub fn display(&self) -> String {
        let mut output = String::new();

        if !self.crop_type.is_empty() {
            output.push_str(&format!("Crop: {}\n", self.crop_type));
        }
        output.push_str(&format!(
            "Diagnosis: {} ({}, class {})\n",
            self.disease_name, self.label, self.class_index
        ));
        output.push_str(&format!("Confidence: {}\n", self.confidence_percent()));
        output.push_str(&format!("Inference time: {:.2} ms\n", self.inference_time_ms));

        output.push_str(&format!("\nTop-{} predictions:\n", self.top_k.len()));
        for (i, ranked) in self.top_k.iter().enumerate() {
            output.push_str(&format!(
                "  {}. {} - {}\n",
                i + 1,
                ranked.label,
                format_percentage(ranked.probability)
            ));
        }

        if let Some(check) = &self.override_check {
            output.push_str(&format!(
                "\nHealthy check: green ratio {:.3}, edge intensity {:.2} -> {}\n",
                check.cues.green_ratio,
                check.cues.edge_intensity,
                if check.overridden {
                    format!("overridden from {}", check.model_label)
                } else {
                    "kept".to_string()
                }
            ));
        }

        output
    }
}

/// Human-readable form of a class label
pub fn humanize_label(label: &str, healthy_label: &str, healthy_sentence: &str) -> String {
    if label == healthy_label {
        healthy_sentence.to_string()
    } else {
        label.replace('_', " ")
    }
}

/// Classifier with its label map and preprocessing settings
pub struct DiseaseClassifier {
    model: Box<dyn ProbabilityModel>,
    labels: ClassIndexMap,
    image_size: u32,
    normalization: Normalization,
    clahe: ClaheConfig,
    policy: OverridePolicy,
    healthy_sentence: String,
}

impl DiseaseClassifier {
    /// Combine a model with its label map
    ///
    /// Fails when the label map does not match the model's output width.
    pub fn new(
        model: Box<dyn ProbabilityModel>,
        labels: ClassIndexMap,
        config: &ClassifierConfig,
    ) -> Result<Self> {
        labels.ensure_width(model.num_classes())?;

        let policy = config.policy_for(model.kind());

        if labels.index_of(&policy.healthy_label).is_none() {
            tracing::warn!(
                "Healthy label '{}' is not in the class index; the override is disabled",
                policy.healthy_label
            );
        }

        Ok(Self {
            model,
            labels,
            image_size: config.image_size,
            normalization: config.normalization,
            clahe: config.clahe,
            policy,
            healthy_sentence: config.healthy_sentence.clone(),
        })
    }

    /// Load weights and class index from disk on the default backend
    pub fn load(config: &ClassifierConfig) -> Result<Self> {
        let artifacts = ModelArtifacts::resolve(
            &config.model_dir,
            config.weights.as_deref(),
            config.class_indices.as_deref(),
        );

        let labels = ClassIndexMap::load(&artifacts.class_indices)?;
        info!(
            "Loaded {} classes from {:?}",
            labels.len(),
            artifacts.class_indices
        );

        let device = default_device();
        let network = load_network::<DefaultBackend>(
            &artifacts,
            config.kind,
            labels.len(),
            config.image_size as usize,
            &device,
        )?;
        let model = BurnModel::new(network, device, config.image_size as usize)?;

        Self::new(Box::new(model), labels, config)
    }

    pub fn labels(&self) -> &ClassIndexMap {
        &self.labels
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    /// Diagnose an encoded image (PNG, JPEG, BMP, GIF)
    pub fn diagnose(&self, image_bytes: &[u8], crop: &str) -> Result<Diagnosis> {
        if image_bytes.is_empty() {
            return Err(DiagnosisError::InvalidInput("empty image".to_string()));
        }
        let image = image::load_from_memory(image_bytes)?;
        self.diagnose_image(&image, crop)
    }

    /// Diagnose an already decoded image
    pub fn diagnose_image(&self, image: &DynamicImage, crop: &str) -> Result<Diagnosis> {
        let start = Instant::now();

        let original = resize_to_square(image, self.image_size);
        let enhanced = enhance_contrast(&original, &self.clahe);
        let input = self.normalization.apply(&enhanced);

        let probabilities = self.model.predict(&input, self.image_size)?;
        if probabilities.len() != self.labels.len() {
            return Err(DiagnosisError::Inference(format!(
                "model returned {} scores for {} classes",
                probabilities.len(),
                self.labels.len()
            )));
        }

        self.interpret(&probabilities, &original, crop, start.elapsed())
    }

    /// Arg-max, ranking and the healthy override on a probability vector
    fn interpret(
        &self,
        probabilities: &[f32],
        original: &RgbImage,
        crop: &str,
        elapsed: Duration,
    ) -> Result<Diagnosis> {
        let ranked = rank_classes(probabilities);
        let top = *ranked
            .first()
            .ok_or_else(|| DiagnosisError::Inference("empty probability vector".to_string()))?;

        let label_at = |index: usize| -> Result<String> {
            self.labels
                .label(index)
                .map(str::to_string)
                .ok_or_else(|| DiagnosisError::ClassIndex(format!("no label for index {}", index)))
        };

        let top_k = ranked
            .iter()
            .take(TOP_K)
            .map(|&i| {
                Ok(RankedClass {
                    label: label_at(i)?,
                    probability: probabilities[i],
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!("Top-{}: {:?}", TOP_K, top_k);

        let mut label = label_at(top)?;
        let mut class_index = top;
        let mut confidence = probabilities[top];
        let mut override_check = None;

        if self.policy.applies_to(&label, confidence) {
            let cues = VisualCues::measure(original);
            let healthy_index = self.labels.index_of(&self.policy.healthy_label);
            let decision = self
                .policy
                .decide(&cues, healthy_index, &ranked, probabilities);

            debug!(
                "Healthy check for {} ({}): green ratio {:.3}, edge intensity {:.2}",
                label,
                format_percentage(confidence),
                cues.green_ratio,
                cues.edge_intensity
            );

            let model_label = label.clone();
            if let (Some(healthy_prob), Some(healthy)) = (decision, healthy_index) {
                info!(
                    "Overriding {} ({}) to {} ({})",
                    label,
                    format_percentage(confidence),
                    self.policy.healthy_label,
                    format_percentage(healthy_prob)
                );
                label = self.policy.healthy_label.clone();
                class_index = healthy;
                confidence = healthy_prob;
            }

            override_check = Some(OverrideReport {
                cues,
                model_label,
                overridden: decision.is_some() && healthy_index.is_some(),
            });
        }

        let disease_name =
            humanize_label(&label, &self.policy.healthy_label, &self.healthy_sentence);

        Ok(Diagnosis {
            disease_name,
            label,
            class_index,
            confidence,
            crop_type: crop.to_string(),
            top_k,
            override_check,
            inference_time_ms: elapsed.as_secs_f64() * 1000.0,
        })
    }
}
