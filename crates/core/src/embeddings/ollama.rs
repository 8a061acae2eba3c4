use super::EmbeddingModel;
use crate::error::EmbedError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

const BACKEND: &str = "ollama";

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
            batch_size: 32,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Embeds through an Ollama server's `/api/embed` endpoint.
///
/// Every request carries the configured timeout, so a stalled model cannot
/// hold a build or a query indefinitely.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    endpoint: Url,
    model: String,
    dimensions: usize,
    batch_size: usize,
    client: Client,
}

impl OllamaEmbedder {
    pub fn new(config: OllamaConfig) -> Result<Self, EmbedError> {
        let endpoint = Url::parse(&config.base_url)?.join("/api/embed")?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            endpoint,
            model: config.model,
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
            client,
        })
    }

    fn encode_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        debug!(endpoint = %self.endpoint, inputs = batch.len(), "posting embedding batch");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&EmbedRequest {
                model: &self.model,
                input: batch,
            })
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let details = serde_json::from_str::<ErrorResponse>(&body)
                .map(|parsed| parsed.error)
                .unwrap_or(body);
            return Err(EmbedError::Backend {
                backend: BACKEND.to_string(),
                details: format!("{status}: {details}"),
            });
        }

        let parsed: EmbedResponse = response.json()?;
        if parsed.embeddings.len() != batch.len() {
            return Err(EmbedError::MalformedOutput(format!(
                "{BACKEND} returned {} vectors for {} inputs",
                parsed.embeddings.len(),
                batch.len()
            )));
        }
        Ok(parsed.embeddings)
    }
}

impl EmbeddingModel for OllamaEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut vectors = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(self.batch_size) {
            vectors.extend(self.encode_batch(batch)?);
        }
        Ok(vectors)
    }
}
