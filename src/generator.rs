//! Generator Collaborator - The External Image Service
//!
//! The engine never talks to a concrete service directly; it goes through
//! the `Generator` trait so the materializer can be exercised against an
//! in-memory double. Errors carry a transient/permanent split that drives
//! the retry policy.

use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::schema::GeneratorModel;

/// Failure classes for generator calls. Only `Transient` is ever retried.
#[derive(Debug, Clone, Error)]
pub enum GeneratorError {
    #[error("transient generator failure: {0}")]
    Transient(String),

    #[error("permanent generator failure: {0}")]
    Permanent(String),
}

impl GeneratorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Handle to a generated image, returned by `generate` and consumed by
/// `download`. For the HTTP implementation this is a short-lived URL.
#[derive(Debug, Clone)]
pub struct GeneratedRef(pub String);

/// The external generator at its interface boundary: ask for an image of a
/// given size, then fetch the binary. Download is a separate call because
/// it fails (and retries) independently of generation.
pub trait Generator {
    fn generate(&self, prompt: &str, size: &str) -> Result<GeneratedRef, GeneratorError>;

    fn download(&self, image: &GeneratedRef) -> Result<Vec<u8>, GeneratorError>;
}

/// OpenAI images API client over a blocking HTTP connection.
pub struct OpenAiImageClient {
    http: reqwest::blocking::Client,
    api_key: String,
    model: GeneratorModel,
    base_url: String,
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

impl OpenAiImageClient {
    pub fn new(api_key: String, model: GeneratorModel) -> Result<Self, GeneratorError> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(
        api_key: String,
        model: GeneratorModel,
        base_url: String,
    ) -> Result<Self, GeneratorError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GeneratorError::Permanent(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key,
            model,
            base_url,
        })
    }

    fn model_name(&self) -> &'static str {
        match self.model {
            GeneratorModel::DallE3 => "dall-e-3",
            GeneratorModel::DallE2 => "dall-e-2",
        }
    }
}

fn classify(err: reqwest::Error) -> GeneratorError {
    if err.is_connect() || err.is_timeout() {
        GeneratorError::Transient(err.to_string())
    } else {
        GeneratorError::Permanent(err.to_string())
    }
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> GeneratorError {
    // Rate limits and server-side faults are worth retrying; everything
    // else (bad request, auth, content policy) will not get better.
    if status.as_u16() == 429 || status.is_server_error() {
        GeneratorError::Transient(format!("HTTP {status}: {body}"))
    } else {
        GeneratorError::Permanent(format!("HTTP {status}: {body}"))
    }
}

impl Generator for OpenAiImageClient {
    fn generate(&self, prompt: &str, size: &str) -> Result<GeneratedRef, GeneratorError> {
        let url = format!("{}/images/generations", self.base_url);
        tracing::debug!(size, model = self.model_name(), "requesting image generation");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model_name(),
                "prompt": prompt,
                "size": size,
                "n": 1,
                "response_format": "url",
            }))
            .send()
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let payload: serde_json::Value = response
            .json()
            .map_err(|e| GeneratorError::Permanent(format!("malformed generator response: {e}")))?;

        payload["data"][0]["url"]
            .as_str()
            .map(|u| GeneratedRef(u.to_string()))
            .ok_or_else(|| {
                GeneratorError::Permanent("generator response carried no image URL".to_string())
            })
    }

    fn download(&self, image: &GeneratedRef) -> Result<Vec<u8>, GeneratorError> {
        let response = self
            .http
            .get(&image.0)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, "image download"));
        }

        let bytes = response.bytes().map_err(classify)?;
        tracing::debug!(bytes = bytes.len(), "downloaded generated image");
        Ok(bytes.to_vec())
    }
}
