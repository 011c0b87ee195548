//! Agronomic advice from a chat completion provider
//!
//! Builds the weather-risk and disease prompts, posts them through a
//! `ChatTransport` and turns whatever comes back into `Advice`. Nothing in
//! this module fails the caller: every problem becomes a defaulted answer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::clients::extract::{
    parse_json_object, Advice, AdviceSchema, AnswerExtraction, DiseaseAdvice, SoftFailure,
    WeatherAdvice,
};
use crate::config::LlmConfig;
use crate::utils::error::Result;

const WEATHER_SYSTEM_PROMPT: &str = "You are an expert agronomist that strictly returns valid JSON. \
No extra explanations. No disclaimers. Return only the 'risks' and 'recommendations' arrays. \
Write every item of 'risks' and 'recommendations' in the language given by the language code \
in the request, for example English for 'en' and Sinhala for 'si'.";

const DISEASE_SYSTEM_PROMPT: &str = "You are an expert agronomist that gives disease-specific \
management strategies and tips for a crop, and strictly returns valid JSON.";

/// One chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request body of the chat endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub web_access: bool,
}

impl ChatRequest {
    /// Prompt asking for weather risks and advice in `lang`
    pub fn weather(weather_json: &str, crop: &str, lang: &str) -> Self {
        let user = format!(
            "I have a {crop} crop with weather data: {weather_json}.\n\n\
             Identify possible weather-related risks in a 'risks' array, and provide management \
             strategies in a 'recommendations' array. Return ONLY valid JSON of the form:\n\
             {{\n  \"risks\": [\"...\"],\n  \"recommendations\": [\"...\"]\n}}\n\n\
             No text outside of that JSON object. Language code: {lang}"
        );
        Self {
            messages: vec![ChatMessage::system(WEATHER_SYSTEM_PROMPT), ChatMessage::user(user)],
            web_access: false,
        }
    }

    /// Prompt asking for management advice for a diagnosed disease
    pub fn disease(disease: &str, crop: &str) -> Self {
        let user = format!(
            "I have a {crop} crop affected by {disease}. Provide disease management strategies \
             and tips specific to this disease and crop type. Return ONLY valid JSON in the \
             following format:\n\
             {{\n  \"disease_name\": \"...\",\n  \"crop_type\": \"...\",\n  \"recommendations\": [\"...\"]\n}}\n\n\
             No extra text outside the JSON object."
        );
        Self {
            messages: vec![ChatMessage::system(DISEASE_SYSTEM_PROMPT), ChatMessage::user(user)],
            web_access: false,
        }
    }
}

/// Raw provider answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatResponse {
    pub status: u16,
    pub body: String,
}

/// Sends a chat request somewhere and returns the raw answer
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

/// RapidAPI-hosted chat endpoint
#[derive(Debug, Clone)]
pub struct RapidApiTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    host: String,
}

impl RapidApiTransport {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            client: builder.build()?,
            endpoint: config.endpoint(),
            api_key: config.api_key.clone(),
            host: config.host.clone(),
        })
    }
}

#[async_trait]
impl ChatTransport for RapidApiTransport {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-rapidapi-key", &self.api_key)
            .header("x-rapidapi-host", &self.host)
            .json(request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(ChatResponse { status, body })
    }
}

/// Recommendation client over any transport
#[derive(Clone)]
pub struct RecommendationClient {
    transport: Arc<dyn ChatTransport>,
    extraction: AnswerExtraction,
}

impl RecommendationClient {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            extraction: AnswerExtraction::default(),
        }
    }

    /// Client posting to the configured RapidAPI endpoint
    pub fn rapidapi(config: &LlmConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(RapidApiTransport::new(config)?)))
    }

    pub fn with_extraction(mut self, extraction: AnswerExtraction) -> Self {
        self.extraction = extraction;
        self
    }

    /// Weather-related risks and advice for a crop
    pub async fn recommend_for_weather(
        &self,
        weather_json: &str,
        crop: &str,
        lang: &str,
    ) -> Advice<WeatherAdvice> {
        let request = ChatRequest::weather(weather_json, crop, lang);
        self.ask(&request, WeatherAdvice::default()).await
    }

    /// Management advice for a diagnosed disease
    pub async fn recommend_for_disease(&self, disease: &str, crop: &str) -> Advice<DiseaseAdvice> {
        let request = ChatRequest::disease(disease, crop);
        self.ask(&request, DiseaseAdvice::empty(disease, crop)).await
    }

    async fn ask<T: AdviceSchema>(&self, request: &ChatRequest, fallback: T) -> Advice<T> {
        match self.answer(request, &fallback).await {
            Ok(value) => Advice::Parsed(value),
            Err(reason) => {
                warn!("Falling back to empty advice: {}", reason);
                Advice::Defaulted {
                    value: fallback,
                    reason,
                }
            }
        }
    }

    async fn answer<T: AdviceSchema>(
        &self,
        request: &ChatRequest,
        fallback: &T,
    ) -> std::result::Result<T, SoftFailure> {
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| SoftFailure::Transport(e.to_string()))?;

        if !(200..300).contains(&response.status) {
            return Err(SoftFailure::ProviderError {
                status: response.status,
                body: response.body,
            });
        }

        let body: Value =
            serde_json::from_str(&response.body).map_err(|_| SoftFailure::NonJsonBody)?;

        let (locator, text) = self
            .extraction
            .locate(&body, T::KEYS)
            .ok_or(SoftFailure::NoAnswer)?;
        debug!("Answer found in '{}'", locator);

        let object = parse_json_object(&text).map_err(SoftFailure::MalformedAnswer)?;
        T::from_object(object, fallback).map_err(SoftFailure::MalformedAnswer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::DiagnosisError;
    use std::sync::Mutex;

    /// Replays a canned response and remembers the last request
    struct StubTransport {
        reply: Result<ChatResponse>,
        last: Mutex<Option<ChatRequest>>,
    }

    impl StubTransport {
        fn ok(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(ChatResponse {
                    status,
                    body: body.to_string(),
                }),
                last: Mutex::new(None),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(DiagnosisError::Upstream("connection refused".to_string())),
                last: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl ChatTransport for StubTransport {
        async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
            *self.last.lock().unwrap() = Some(request.clone());
            match &self.reply {
                Ok(response) => Ok(response.clone()),
                Err(e) => Err(DiagnosisError::Upstream(e.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_non_json_body_defaults_to_empty_lists() {
        let client = RecommendationClient::new(StubTransport::ok(200, "I cannot help with that."));
        let advice = client.recommend_for_weather("{}", "Banana", "en").await;

        assert_eq!(
            advice,
            Advice::Defaulted {
                value: WeatherAdvice::default(),
                reason: SoftFailure::NonJsonBody,
            }
        );
        assert_eq!(
            serde_json::to_value(&advice).unwrap(),
            serde_json::json!({"risks": [], "recommendations": []})
        );
    }

    #[tokio::test]
    async fn test_result_envelope_is_parsed() {
        let body = r#"{"result": "{\"risks\": [\"Leaf spot after rain\"], \"recommendations\": [\"Improve drainage\"]}", "status": true, "server_code": 200}"#;
        let client = RecommendationClient::new(StubTransport::ok(200, body));
        let advice = client.recommend_for_weather("{}", "Banana", "en").await;

        assert_eq!(
            advice,
            Advice::Parsed(WeatherAdvice {
                risks: vec!["Leaf spot after rain".to_string()],
                recommendations: vec!["Improve drainage".to_string()],
            })
        );
    }

    #[tokio::test]
    async fn test_fenced_choices_answer_is_parsed() {
        let body = serde_json::json!({
            "choices": [{"message": {"content": "```json\n{\"disease_name\": \"Black Sigatoka\", \"recommendations\": [\"Prune\"]}\n```"}}]
        })
        .to_string();
        let client = RecommendationClient::new(StubTransport::ok(200, &body));
        let advice = client.recommend_for_disease("Banana Black Sigatoka", "Banana").await;

        assert!(!advice.is_defaulted());
        let value = advice.into_value();
        assert_eq!(value.disease_name, "Black Sigatoka");
        assert_eq!(value.crop_type, "Banana");
        assert_eq!(value.recommendations, vec!["Prune"]);
    }

    #[tokio::test]
    async fn test_provider_error_status() {
        let client = RecommendationClient::new(StubTransport::ok(
            429,
            r#"{"message": "You have exceeded the rate limit"}"#,
        ));
        let advice = client.recommend_for_disease("Panama Disease", "Banana").await;

        assert_eq!(advice.value(), &DiseaseAdvice::empty("Panama Disease", "Banana"));
        assert!(matches!(
            advice.failure(),
            Some(SoftFailure::ProviderError { status: 429, .. })
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_and_missing_answer() {
        let client = RecommendationClient::new(StubTransport::failing());
        let advice = client.recommend_for_weather("{}", "Banana", "en").await;
        assert!(matches!(advice.failure(), Some(SoftFailure::Transport(_))));

        let client = RecommendationClient::new(StubTransport::ok(200, r#"{"status": false}"#));
        let advice = client.recommend_for_weather("{}", "Banana", "en").await;
        assert_eq!(advice.failure(), Some(&SoftFailure::NoAnswer));

        let client = RecommendationClient::new(StubTransport::ok(200, r#"{"result": "no json at all"}"#));
        let advice = client.recommend_for_weather("{}", "Banana", "en").await;
        assert!(matches!(advice.failure(), Some(SoftFailure::MalformedAnswer(_))));
    }

    #[tokio::test]
    async fn test_prompt_carries_context_and_language() {
        let transport = StubTransport::ok(200, "{}");
        let client = RecommendationClient::new(transport.clone());
        client
            .recommend_for_weather(r#"{"temp_c": 31}"#, "Banana", "si")
            .await;

        let request = transport.last.lock().unwrap().clone().unwrap();
        assert!(!request.web_access);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].role, "user");
        assert!(request.messages[1].content.contains("Banana"));
        assert!(request.messages[1].content.contains(r#"{"temp_c": 31}"#));
        assert!(request.messages[1].content.contains("Language code: si"));
    }

    #[tokio::test]
    async fn test_rapidapi_transport_sends_headers() {
        use axum::http::HeaderMap;
        use axum::routing::post;
        use axum::{Json, Router};

        let router = Router::new().route(
            "/conversationllama",
            post(|headers: HeaderMap, Json(request): Json<ChatRequest>| async move {
                assert_eq!(headers["x-rapidapi-key"], "secret");
                assert_eq!(headers["x-rapidapi-host"], "chat.example.com");
                assert_eq!(headers["content-type"], "application/json");
                assert_eq!(request.messages.len(), 2);
                Json(serde_json::json!({
                    "result": "{\"risks\": [], \"recommendations\": [\"Mulch\"]}",
                    "status": true,
                    "server_code": 200
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let config = LlmConfig {
            api_key: "secret".to_string(),
            host: "chat.example.com".to_string(),
            base_url: Some(format!("http://{}", addr)),
            ..LlmConfig::default()
        };
        let client = RecommendationClient::rapidapi(&config).unwrap();
        let advice = client.recommend_for_weather("{}", "Banana", "en").await;

        assert_eq!(advice.value().recommendations, vec!["Mulch"]);
    }
}
