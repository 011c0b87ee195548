//! Weather advice endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use crate::clients::{Advice, WeatherAdvice};
use crate::server::error::ApiError;
use crate::server::form::FormFields;
use crate::server::state::SharedState;

#[derive(Debug, Serialize)]
pub struct RecommendationsResponse {
    pub crop: String,
    pub recommendations: Advice<WeatherAdvice>,
}

/// POST /recommendations - Weather risks and advice for a crop
pub async fn recommendations(
    State(state): State<SharedState>,
    form: FormFields,
) -> Result<Json<RecommendationsResponse>, ApiError> {
    let (Some(crop), Some(weather_data)) = (form.text("crop"), form.text("weather_data")) else {
        return Err(ApiError::BadRequest(
            "Crop type and weather data are required".to_string(),
        ));
    };
    let lang = form.text("lang").unwrap_or("en");

    let advice = state
        .recommender
        .recommend_for_weather(weather_data, crop, lang)
        .await;

    Ok(Json(RecommendationsResponse {
        crop: crop.to_string(),
        recommendations: advice,
    }))
}
