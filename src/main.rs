//! Crop Disease Diagnosis CLI
//!
//! Serves the diagnosis API or classifies a single local image.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::{debug, info, warn};

use crop_diagnosis::backend::backend_name;
use crop_diagnosis::config::{
    ApiConfig, ClassifierConfig, LlmConfig, RecommendationEncoding, WeatherConfig,
};
use crop_diagnosis::inference::{DiseaseClassifier, Normalization, OverridePolicy};
use crop_diagnosis::model::ModelKind;
use crop_diagnosis::server::{self, AppContext};
use crop_diagnosis::utils::logging::{init_logging, LogConfig, LogLevel};
use crop_diagnosis::IMAGE_SIZE;

/// Crop disease diagnosis from leaf images
///
/// Classifies leaf photos with a Burn CNN and adds weather data and
/// agronomic advice from upstream providers.
#[derive(Parser, Debug)]
#[command(name = "crop-diagnosis")]
#[command(version)]
#[command(about = "Crop disease diagnosis service", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Plain log output without colors, for log collectors
    #[arg(long, default_value = "false")]
    no_color: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CROP_DIAGNOSIS_LOG")]
    log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API
    Serve {
        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        upstream: UpstreamArgs,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port to listen on
        #[arg(short, long, env = "CROP_DIAGNOSIS_PORT", default_value = "5000")]
        port: u16,

        /// Location used when a request omits one
        #[arg(long, default_value = "Colombo")]
        default_location: String,

        /// Truncate crop labels to this many characters (0 disables)
        #[arg(long, default_value = "50")]
        crop_max_chars: usize,

        /// Encoding of disease_recomendations (legacy, structured)
        #[arg(long, default_value = "legacy")]
        recommendation_encoding: RecommendationEncoding,

        /// Allowed CORS origin ("*" for any)
        #[arg(long, default_value = "http://localhost:5173")]
        cors_origin: String,

        /// Maximum upload size in MiB
        #[arg(long, default_value = "16")]
        max_upload_mb: usize,
    },

    /// Diagnose a single local image
    Diagnose {
        #[command(flatten)]
        model: ModelArgs,

        /// Path to the leaf image
        #[arg(short, long)]
        image: PathBuf,

        /// Crop label reported with the result
        #[arg(short, long, default_value = "")]
        crop: String,

        /// Print the diagnosis as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Directory with the weights and class_indices.json
    #[arg(long, env = "CROP_DIAGNOSIS_MODEL_DIR", default_value = "models")]
    model_dir: PathBuf,

    /// Weights file (defaults to best_model.mpk or disease_classifier.mpk)
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Class index file (defaults to class_indices.json in the model dir)
    #[arg(long)]
    class_indices: Option<PathBuf>,

    /// Network layout of the weights (single, ensemble)
    #[arg(long, default_value = "single")]
    model_kind: ModelKind,

    /// Input resolution the weights were trained at
    #[arg(long, default_value_t = IMAGE_SIZE)]
    image_size: u32,

    /// Pixel normalization (efficientnet, mobilenet, imagenet)
    #[arg(long, default_value = "efficientnet")]
    normalization: Normalization,

    /// Class label treated as healthy
    #[arg(long)]
    healthy_label: Option<String>,

    /// Reconsider disease predictions below this confidence
    #[arg(long)]
    confidence_threshold: Option<f32>,

    /// Green pixel fraction needed for the healthy override
    #[arg(long)]
    min_green_ratio: Option<f32>,

    /// Edge intensity ceiling for the healthy override
    #[arg(long)]
    max_edge_intensity: Option<f32>,

    /// Healthy probability floor for the healthy override
    #[arg(long)]
    healthy_floor: Option<f32>,
}

impl ModelArgs {
    fn into_config(self) -> ClassifierConfig {
        let customized = self.healthy_label.is_some()
            || self.confidence_threshold.is_some()
            || self.min_green_ratio.is_some()
            || self.max_edge_intensity.is_some()
            || self.healthy_floor.is_some();

        let override_policy = customized.then(|| {
            let mut policy = OverridePolicy::for_kind(self.model_kind);
            if let Some(label) = self.healthy_label {
                policy.healthy_label = label;
            }
            if let Some(value) = self.confidence_threshold {
                policy.confidence_threshold = value;
            }
            if let Some(value) = self.min_green_ratio {
                policy.min_green_ratio = value;
            }
            if let Some(value) = self.max_edge_intensity {
                policy.max_edge_intensity = value;
            }
            if let Some(value) = self.healthy_floor {
                policy.healthy_floor = value;
            }
            policy
        });

        ClassifierConfig {
            model_dir: self.model_dir,
            weights: self.weights,
            class_indices: self.class_indices,
            kind: self.model_kind,
            image_size: self.image_size,
            normalization: self.normalization,
            override_policy,
            ..ClassifierConfig::default()
        }
    }
}

#[derive(Args, Debug)]
struct UpstreamArgs {
    /// weatherapi.com key
    #[arg(long, env = "WEATHER_API_KEY", default_value = "", hide_env_values = true)]
    weather_api_key: String,

    /// Forecast API base URL
    #[arg(long, env = "WEATHER_BASE_URL", default_value = "http://api.weatherapi.com/v1")]
    weather_base_url: String,

    /// Forecast request timeout in seconds
    #[arg(long)]
    weather_timeout: Option<u64>,

    /// RapidAPI key
    #[arg(long, env = "RAPIDAPI_KEY", default_value = "", hide_env_values = true)]
    rapidapi_key: String,

    /// RapidAPI host of the chat endpoint
    #[arg(long, env = "RAPIDAPI_HOST", default_value = "")]
    rapidapi_host: String,

    /// Override for the chat endpoint base URL (defaults to https://<host>)
    #[arg(long, env = "RAPIDAPI_BASE_URL")]
    rapidapi_base_url: Option<String>,

    /// Chat request timeout in seconds
    #[arg(long, default_value = "60")]
    llm_timeout: u64,
}

impl UpstreamArgs {
    fn into_configs(self) -> (WeatherConfig, LlmConfig) {
        let weather = WeatherConfig {
            api_key: self.weather_api_key,
            base_url: self.weather_base_url,
            timeout_secs: self.weather_timeout,
            ..WeatherConfig::default()
        };
        let llm = LlmConfig {
            api_key: self.rapidapi_key,
            host: self.rapidapi_host,
            base_url: self.rapidapi_base_url,
            timeout_secs: Some(self.llm_timeout),
            ..LlmConfig::default()
        };
        (weather, llm)
    }
}

fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else if cli.no_color {
        LogConfig::production()
    } else {
        LogConfig::default()
    };
    if let Some(level) = &cli.log_level {
        log_config = log_config.with_level(LogLevel::parse(level));
    }

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Serve {
            model,
            upstream,
            host,
            port,
            default_location,
            crop_max_chars,
            recommendation_encoding,
            cors_origin,
            max_upload_mb,
        } => {
            let api = ApiConfig {
                host,
                port,
                default_location,
                crop_max_chars: (crop_max_chars > 0).then_some(crop_max_chars),
                recommendation_encoding,
                cors_origin,
                max_upload_bytes: max_upload_mb * 1024 * 1024,
            };
            cmd_serve(model.into_config(), upstream, api)?;
        }

        Commands::Diagnose {
            model,
            image,
            crop,
            json,
        } => {
            cmd_diagnose(&model.into_config(), &image, &crop, json)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +----------------------------------------------------------+
 |   Crop Disease Diagnosis                                 |
 |   Leaf classification with Burn, weather-aware advice    |
 +----------------------------------------------------------+
  "#
        .green()
    );
}

fn cmd_serve(classifier: ClassifierConfig, upstream: UpstreamArgs, api: ApiConfig) -> Result<()> {
    let (weather, llm) = upstream.into_configs();

    info!("Crop Diagnosis Server v{}", crop_diagnosis::VERSION);
    info!("Configuration:");
    info!("  Backend:    {}", backend_name());
    info!("  Model dir:  {:?}", classifier.model_dir);
    info!("  Model kind: {}", classifier.kind);
    info!("  Normalize:  {}", classifier.normalization);
    info!("  Encoding:   {:?}", api.recommendation_encoding);

    if weather.api_key.is_empty() {
        warn!("WEATHER_API_KEY is not set; weather lookups will be rejected upstream");
    }
    if llm.host.is_empty() && llm.base_url.is_none() {
        warn!("RAPIDAPI_HOST is not set; recommendations will fall back to empty advice");
    }

    let context = AppContext::from_config(&classifier, weather, &llm, api)
        .context("Failed to initialize the service")?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;
    runtime.block_on(server::serve(context.into_shared()))?;

    Ok(())
}

fn cmd_diagnose(config: &ClassifierConfig, image: &Path, crop: &str, json: bool) -> Result<()> {
    info!("Diagnosing {:?}", image);

    let classifier = DiseaseClassifier::load(config).context("Failed to load the classifier")?;
    debug!("Classes: {:?}", classifier.labels().labels());
    let bytes = std::fs::read(image).with_context(|| format!("Failed to read {:?}", image))?;
    let diagnosis = classifier.diagnose(&bytes, crop)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&diagnosis)?);
    } else {
        println!("{}", "Result".cyan().bold());
        println!("{}", diagnosis.display());
    }

    Ok(())
}
