//! Forecast provider client
//!
//! One GET per lookup against a weatherapi.com compatible `forecast.json`
//! endpoint. Non-200 answers are returned as an error envelope rather than
//! an error.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::WeatherConfig;
use crate::utils::error::Result;

/// Message carried by every error envelope
pub const WEATHER_FAILURE_MESSAGE: &str = "Failed to fetch weather data";

/// Provider sub-objects passed through untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub location: Value,
    pub current: Value,
    pub forecast: Value,
}

/// Provider answered with a non-200 status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherErrorEnvelope {
    pub error: String,
    pub status_code: u16,
    pub response_body: String,
}

/// Either a snapshot or an error envelope, serialized without a tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeatherReport {
    Failed(WeatherErrorEnvelope),
    Snapshot(WeatherSnapshot),
}

impl WeatherReport {
    pub fn is_failed(&self) -> bool {
        matches!(self, WeatherReport::Failed(_))
    }
}

/// Weather API client
#[derive(Debug, Clone)]
pub struct WeatherClient {
    client: reqwest::Client,
    config: WeatherConfig,
}

impl WeatherClient {
    pub fn new(config: WeatherConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    fn forecast_url(&self) -> String {
        format!("{}/forecast.json", self.config.base_url.trim_end_matches('/'))
    }

    /// Fetch current conditions and the forecast for a location
    ///
    /// Transport failures (DNS, refused connection, timeout) and an
    /// unparseable 200 body are errors.
    pub async fn fetch(&self, location: &str) -> Result<WeatherReport> {
        let days = self.config.forecast_days.to_string();
        debug!("Fetching {}-day forecast for '{}'", days, location);

        let response = self
            .client
            .get(self.forecast_url())
            .query(&[
                ("key", self.config.api_key.as_str()),
                ("q", location),
                ("days", days.as_str()),
                ("aqi", "no"),
                ("alerts", "no"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("Failed to read weather error body: {}", e);
                    String::new()
                }
            };
            warn!("Weather provider returned {} for '{}'", status, location);
            return Ok(WeatherReport::Failed(WeatherErrorEnvelope {
                error: WEATHER_FAILURE_MESSAGE.to_string(),
                status_code: status.as_u16(),
                response_body: body,
            }));
        }

        let body: Value = response.json().await?;
        let section = |key: &str| {
            body.get(key)
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()))
        };

        Ok(WeatherReport::Snapshot(WeatherSnapshot {
            location: section("location"),
            current: section("current"),
            forecast: section("forecast"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base_url: String) -> WeatherClient {
        WeatherClient::new(WeatherConfig {
            api_key: "test-key".to_string(),
            base_url,
            ..WeatherConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_passes_sections_through() {
        let router = Router::new().route(
            "/forecast.json",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params["key"], "test-key");
                assert_eq!(params["q"], "Kandy");
                assert_eq!(params["days"], "3");
                assert_eq!(params["aqi"], "no");
                assert_eq!(params["alerts"], "no");
                Json(json!({
                    "location": {"name": "Kandy"},
                    "current": {"temp_c": 27.5},
                    "forecast": {"forecastday": []},
                    "extra": "dropped"
                }))
            }),
        );

        let report = client(spawn(router).await).fetch("Kandy").await.unwrap();
        assert_eq!(
            report,
            WeatherReport::Snapshot(WeatherSnapshot {
                location: json!({"name": "Kandy"}),
                current: json!({"temp_c": 27.5}),
                forecast: json!({"forecastday": []}),
            })
        );
    }

    #[tokio::test]
    async fn test_missing_sections_become_empty_objects() {
        let router = Router::new().route(
            "/forecast.json",
            get(|| async { Json(json!({"location": {"name": "Galle"}})) }),
        );

        let report = client(spawn(router).await).fetch("Galle").await.unwrap();
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["current"], json!({}));
        assert_eq!(value["forecast"], json!({}));
    }

    #[tokio::test]
    async fn test_non_200_becomes_envelope() {
        let router = Router::new().route(
            "/forecast.json",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "upstream maintenance") }),
        );

        let report = client(spawn(router).await).fetch("Colombo").await.unwrap();
        assert!(report.is_failed());
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({
                "error": "Failed to fetch weather data",
                "status_code": 503,
                "response_body": "upstream maintenance"
            })
        );
    }

    #[tokio::test]
    async fn test_truncated_error_body_still_yields_envelope() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // promise 100 body bytes, send 7, then hang up
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let _ = socket.read(&mut request).await;
            let _ = socket
                .write_all(b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 100\r\n\r\npartial")
                .await;
            let _ = socket.shutdown().await;
        });

        let report = client(format!("http://{}", addr)).fetch("Colombo").await.unwrap();
        assert_eq!(
            report,
            WeatherReport::Failed(WeatherErrorEnvelope {
                error: WEATHER_FAILURE_MESSAGE.to_string(),
                status_code: 502,
                response_body: String::new(),
            })
        );
    }

    #[tokio::test]
    async fn test_connection_failure_is_an_error() {
        // bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = client(format!("http://{}", addr)).fetch("Colombo").await;
        assert!(result.is_err());
    }
}
