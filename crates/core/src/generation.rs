use crate::error::GenerationError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// The external generative-text service.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[async_trait]
impl<G: Generator + ?Sized> Generator for Box<G> {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        (**self).generate(prompt).await
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key: None,
            timeout: Duration::from_secs(60),
            temperature: 0.0,
            max_output_tokens: 1_024,
        }
    }
}

pub struct GeminiGenerator {
    client: Client,
    options: GenerationOptions,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

impl GeminiGenerator {
    /// The credential is only checked when a call is made.
    pub fn new(options: GenerationOptions) -> Result<Self, GenerationError> {
        let client = Client::builder().timeout(options.timeout).build()?;
        Ok(Self { client, options })
    }

    pub fn has_credential(&self) -> bool {
        self.options.api_key.is_some()
    }

    fn endpoint(&self) -> Result<Url, GenerationError> {
        let base = Url::parse(&self.options.base_url)?;
        Ok(base.join(&format!(
            "v1beta/models/{}:generateContent",
            self.options.model
        ))?)
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let api_key = self
            .options
            .api_key
            .as_deref()
            .ok_or(GenerationError::MissingCredential)?;

        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.options.temperature,
                top_k: 1,
                max_output_tokens: self.options.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(self.endpoint()?)
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let payload: GenerateResponse = response.json().await.map_err(classify_transport)?;
        answer_text(payload)
    }
}

fn classify_transport(error: reqwest::Error) -> GenerationError {
    if error.is_timeout() {
        GenerationError::Timeout
    } else {
        GenerationError::Http(error)
    }
}

pub(crate) fn classify_status(status: StatusCode, body: String) -> GenerationError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GenerationError::Unauthorized(body),
        StatusCode::TOO_MANY_REQUESTS => GenerationError::RateLimited(body),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => GenerationError::Timeout,
        other => GenerationError::Backend {
            status: other.as_u16(),
            details: body,
        },
    }
}

fn answer_text(payload: GenerateResponse) -> Result<String, GenerationError> {
    let text = payload
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_failure_kinds() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, String::new()),
            GenerationError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, String::new()),
            GenerationError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "quota".to_string()),
            GenerationError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::GATEWAY_TIMEOUT, String::new()),
            GenerationError::Timeout
        ));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, String::new()),
            GenerationError::Backend { status: 500, .. }
        ));
    }

    #[test]
    fn answer_joins_parts_of_first_candidate() {
        let payload: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Grade is M35 "},{"text":"[1]"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(answer_text(payload).unwrap(), "Grade is M35 [1]");
    }

    #[test]
    fn blank_answer_is_an_error() {
        let payload: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(matches!(answer_text(payload), Err(GenerationError::EmptyResponse)));
    }

    #[tokio::test]
    async fn missing_credential_fails_at_call_time() {
        let generator = GeminiGenerator::new(GenerationOptions::default()).unwrap();
        assert!(!generator.has_credential());
        assert!(matches!(
            generator.generate("prompt").await,
            Err(GenerationError::MissingCredential)
        ));
    }
}
