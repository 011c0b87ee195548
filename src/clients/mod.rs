//! Clients for the upstream providers
//!
//! This module provides:
//! - The forecast lookup (`WeatherClient`)
//! - Chat-based agronomic advice (`RecommendationClient`)
//! - The answer extraction policy and soft-failure types shared by both

pub mod extract;
pub mod recommender;
pub mod weather;

pub use extract::{
    Advice, AnswerExtraction, AnswerLocator, DiseaseAdvice, SoftFailure, WeatherAdvice,
};
pub use recommender::{
    ChatMessage, ChatRequest, ChatResponse, ChatTransport, RapidApiTransport, RecommendationClient,
};
pub use weather::{WeatherClient, WeatherErrorEnvelope, WeatherReport, WeatherSnapshot};
