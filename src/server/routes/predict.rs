//! Diagnosis endpoint

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::clients::WeatherReport;
use crate::config::RecommendationEncoding;
use crate::server::error::ApiError;
use crate::server::form::{allowed_file, FormFields};
use crate::server::state::SharedState;
use crate::utils::error::Result;
use crate::utils::{to_python_json, truncate_chars};

/// Body of a successful `/predict`
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub crop_type: String,
    pub disease: String,
    /// `"NN.NN%"`
    pub confidence: String,
    pub weather: WeatherReport,
    pub disease_recomendations: Value,
}

/// Recommendation payload handed to the front-end
#[derive(Debug, Clone, Serialize)]
pub struct RecommendationBody<'a> {
    pub disease_name: &'a str,
    pub crop_type: &'a str,
    pub recommendations: &'a [String],
}

#[derive(Serialize)]
struct LegacyEnvelope {
    result: String,
    status: bool,
    server_code: u16,
}

/// Encode the recommendation payload for the response
///
/// `Legacy` yields a JSON string whose `result` member is itself a JSON
/// string, both in Python `json.dumps` layout.
pub fn encode_recommendations(
    encoding: RecommendationEncoding,
    body: &RecommendationBody<'_>,
) -> Result<Value> {
    match encoding {
        RecommendationEncoding::Structured => Ok(serde_json::to_value(body)?),
        RecommendationEncoding::Legacy => {
            let envelope = LegacyEnvelope {
                result: to_python_json(body)?,
                status: true,
                server_code: 200,
            };
            Ok(Value::String(to_python_json(&envelope)?))
        }
    }
}

/// POST /predict - Diagnose a leaf image, with weather and advice
pub async fn predict(
    State(state): State<SharedState>,
    form: FormFields,
) -> std::result::Result<Json<PredictResponse>, ApiError> {
    let image = form
        .file("image")
        .ok_or_else(|| ApiError::BadRequest("No image provided".to_string()))?;
    if image.file_name.is_empty() || !allowed_file(&image.file_name) {
        return Err(ApiError::BadRequest("Invalid image".to_string()));
    }

    let crop = form.text("crop").unwrap_or_default();
    let crop = match state.api.crop_max_chars {
        Some(max_chars) => truncate_chars(crop, max_chars),
        None => crop.to_string(),
    };
    let location = form
        .text("location")
        .unwrap_or(&state.api.default_location)
        .to_string();

    let diagnosis = {
        let state = state.clone();
        let bytes = image.bytes.clone();
        let crop = crop.clone();
        tokio::task::spawn_blocking(move || state.classifier.diagnose(&bytes, &crop))
            .await
            .map_err(|e| ApiError::Internal(format!("Inference task failed: {}", e)))??
    };
    info!(
        "Diagnosed '{}' as {} ({})",
        image.file_name,
        diagnosis.disease_name,
        diagnosis.confidence_percent()
    );

    let (weather, advice) = tokio::join!(
        state.weather.fetch(&location),
        state
            .recommender
            .recommend_for_disease(&diagnosis.disease_name, &crop),
    );
    let weather = weather?;

    let disease_recomendations = encode_recommendations(
        state.api.recommendation_encoding,
        &RecommendationBody {
            disease_name: &diagnosis.disease_name,
            crop_type: &crop,
            recommendations: &advice.value().recommendations,
        },
    )?;

    Ok(Json(PredictResponse {
        confidence: diagnosis.confidence_percent(),
        crop_type: crop,
        disease: diagnosis.disease_name,
        weather,
        disease_recomendations,
    }))
}
