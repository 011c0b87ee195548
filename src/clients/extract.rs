//! Locating and parsing the model's answer inside a chat response
//!
//! Providers wrap the generated text in different envelopes. The
//! `AnswerExtraction` policy tries a fixed list of locators in order and the
//! first non-empty match is parsed as a JSON object. Every failure degrades to
//! a default value tagged with the reason.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// Why an answer fell back to its default
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SoftFailure {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("provider returned status {status}: {body}")]
    ProviderError { status: u16, body: String },

    #[error("response body is not JSON")]
    NonJsonBody,

    #[error("no answer field in response")]
    NoAnswer,

    #[error("answer is not the expected JSON: {0}")]
    MalformedAnswer(String),
}

/// An answer that was either parsed or replaced by its default
///
/// Both variants serialize as the bare value.
#[derive(Debug, Clone, PartialEq)]
pub enum Advice<T> {
    Parsed(T),
    Defaulted { value: T, reason: SoftFailure },
}

impl<T> Advice<T> {
    pub fn value(&self) -> &T {
        match self {
            Advice::Parsed(value) => value,
            Advice::Defaulted { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Advice::Parsed(value) => value,
            Advice::Defaulted { value, .. } => value,
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, Advice::Defaulted { .. })
    }

    pub fn failure(&self) -> Option<&SoftFailure> {
        match self {
            Advice::Parsed(_) => None,
            Advice::Defaulted { reason, .. } => Some(reason),
        }
    }
}

impl<T: Serialize> Serialize for Advice<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value().serialize(serializer)
    }
}

/// Where to look for the answer in a response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerLocator {
    /// `{"result": ...}`
    Result,
    /// `{"content": ...}`
    Content,
    /// `{"message": ...}` or `{"message": {"content": ...}}`
    Message,
    /// `{"choices": [{"message": {"content": ...}}]}`
    ChatChoices,
    /// The body itself, when it already carries one of the schema keys
    WholeBody,
}

impl AnswerLocator {
    /// Text of the answer, if this locator finds a non-empty one
    pub fn locate(&self, body: &Value, schema_keys: &[&str]) -> Option<String> {
        match self {
            AnswerLocator::Result => answer_text(body.get("result")?),
            AnswerLocator::Content => answer_text(body.get("content")?),
            AnswerLocator::Message => {
                let message = body.get("message")?;
                match message.get("content") {
                    Some(content) => answer_text(content),
                    None => answer_text(message),
                }
            }
            AnswerLocator::ChatChoices => answer_text(body.pointer("/choices/0/message/content")?),
            AnswerLocator::WholeBody => {
                let object = body.as_object()?;
                schema_keys
                    .iter()
                    .any(|key| object.contains_key(*key))
                    .then(|| body.to_string())
            }
        }
    }
}

impl fmt::Display for AnswerLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerLocator::Result => write!(f, "result"),
            AnswerLocator::Content => write!(f, "content"),
            AnswerLocator::Message => write!(f, "message"),
            AnswerLocator::ChatChoices => write!(f, "choices[0].message.content"),
            AnswerLocator::WholeBody => write!(f, "body"),
        }
    }
}

/// Strings are taken as-is, containers are re-serialized
fn answer_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Object(map) if !map.is_empty() => Some(value.to_string()),
        Value::Array(items) if !items.is_empty() => Some(value.to_string()),
        _ => None,
    }
}

/// Ordered list of locators, first match wins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerExtraction {
    pub locators: Vec<AnswerLocator>,
}

impl Default for AnswerExtraction {
    fn default() -> Self {
        Self {
            locators: vec![
                AnswerLocator::Result,
                AnswerLocator::Content,
                AnswerLocator::Message,
                AnswerLocator::ChatChoices,
                AnswerLocator::WholeBody,
            ],
        }
    }
}

impl AnswerExtraction {
    pub fn new(locators: Vec<AnswerLocator>) -> Self {
        Self { locators }
    }

    /// First answer found, with the locator that found it
    pub fn locate(&self, body: &Value, schema_keys: &[&str]) -> Option<(AnswerLocator, String)> {
        self.locators
            .iter()
            .find_map(|locator| locator.locate(body, schema_keys).map(|text| (*locator, text)))
    }
}

/// Drop a surrounding Markdown code fence (```json ... ```)
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // skip the info string on the opening line
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse an answer as a JSON object
///
/// Falls back to the outermost `{...}` slice when the text carries prose
/// around the object. A JSON string is unwrapped once.
pub fn parse_json_object(text: &str) -> Result<Map<String, Value>, String> {
    let cleaned = strip_code_fences(text);

    match serde_json::from_str::<Value>(cleaned) {
        Ok(Value::Object(map)) => return Ok(map),
        Ok(Value::String(inner)) => return parse_json_object(&inner),
        Ok(other) => return Err(format!("expected an object, got {}", json_kind(&other))),
        Err(_) => {}
    }

    let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) else {
        return Err("no JSON object in answer".to_string());
    };
    if end < start {
        return Err("no JSON object in answer".to_string());
    }

    match serde_json::from_str::<Value>(&cleaned[start..=end]) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected an object, got {}", json_kind(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Answer shapes the recommendation client asks for
pub trait AdviceSchema: Sized {
    /// Top-level keys of the requested object
    const KEYS: &'static [&'static str];

    /// Build from a parsed answer; `fallback` supplies request-side values
    fn from_object(object: Map<String, Value>, fallback: &Self) -> Result<Self, String>;
}

/// Accept a list of strings, a single string, or a list of anything
///
/// Non-string items are kept as their JSON text.
fn string_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::String(text) => vec![text],
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(text) => text,
                other => other.to_string(),
            })
            .collect(),
        other => vec![other.to_string()],
    })
}

fn ensure_schema_key(object: &Map<String, Value>, keys: &[&str]) -> Result<(), String> {
    if keys.iter().any(|key| object.contains_key(*key)) {
        Ok(())
    } else {
        Err(format!("none of {:?} present", keys))
    }
}

/// Weather-driven risks and management advice
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherAdvice {
    #[serde(default, deserialize_with = "string_list")]
    pub risks: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub recommendations: Vec<String>,
}

impl AdviceSchema for WeatherAdvice {
    const KEYS: &'static [&'static str] = &["risks", "recommendations"];

    fn from_object(object: Map<String, Value>, _fallback: &Self) -> Result<Self, String> {
        ensure_schema_key(&object, Self::KEYS)?;
        serde_json::from_value(Value::Object(object)).map_err(|e| e.to_string())
    }
}

/// Disease-specific management advice
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiseaseAdvice {
    pub disease_name: String,
    pub crop_type: String,
    #[serde(default, deserialize_with = "string_list")]
    pub recommendations: Vec<String>,
}

impl DiseaseAdvice {
    /// Empty advice for a request
    pub fn empty(disease_name: &str, crop_type: &str) -> Self {
        Self {
            disease_name: disease_name.to_string(),
            crop_type: crop_type.to_string(),
            recommendations: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct DiseaseAnswer {
    #[serde(default)]
    disease_name: Option<String>,
    #[serde(default)]
    crop_type: Option<String>,
    #[serde(default, deserialize_with = "string_list")]
    recommendations: Vec<String>,
}

impl AdviceSchema for DiseaseAdvice {
    const KEYS: &'static [&'static str] = &["disease_name", "crop_type", "recommendations"];

    fn from_object(object: Map<String, Value>, fallback: &Self) -> Result<Self, String> {
        ensure_schema_key(&object, Self::KEYS)?;
        let answer: DiseaseAnswer =
            serde_json::from_value(Value::Object(object)).map_err(|e| e.to_string())?;

        Ok(Self {
            disease_name: answer
                .disease_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| fallback.disease_name.clone()),
            crop_type: answer
                .crop_type
                .filter(|crop| !crop.trim().is_empty())
                .unwrap_or_else(|| fallback.crop_type.clone()),
            recommendations: answer.recommendations,
        })
    }
}
