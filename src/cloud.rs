//! Vertex AI text embeddings over HTTPS
//!
//! Each call is one round trip per 250 texts (the API's instance limit).
//! There is no retry here; a failed request fails the whole call.

use crate::config::Config;
use crate::embedder::EmbeddingProvider;
use crate::error::{Result, SemindexError};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const MAX_INSTANCES_PER_REQUEST: usize = 250;
const PROJECT_ENV: &str = "GOOGLE_CLOUD_PROJECT";

/// Task hint sent with every instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    /// Documents being indexed
    RetrievalDocument,
    /// Search queries
    RetrievalQuery,
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    instances: Vec<Instance<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Parameters>,
}

#[derive(Debug, Serialize)]
struct Instance<'a> {
    content: &'a str,
    task_type: TaskType,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Parameters {
    output_dimensionality: usize,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    embeddings: PredictionEmbeddings,
}

#[derive(Debug, Deserialize)]
struct PredictionEmbeddings {
    values: Vec<f32>,
}

/// Embedding provider backed by a Vertex AI publisher model
pub struct CloudEmbedder {
    client: Client,
    url: String,
    access_token: String,
    model: String,
    dimension: usize,
    requested_dimension: Option<usize>,
}

impl CloudEmbedder {
    /// Bind a client to the configured project, region and model
    ///
    /// Fails if the project or the access token cannot be resolved, or if the
    /// model's dimension is unknown and not configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let project = config
            .cloud_project_id
            .clone()
            .or_else(|| std::env::var(PROJECT_ENV).ok())
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                SemindexError::Config(format!(
                    "cloud_project_id is not set and {} is empty",
                    PROJECT_ENV
                ))
            })?;

        let access_token = std::env::var(&config.cloud_access_token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                SemindexError::Config(format!(
                    "Missing credentials: environment variable {} is not set",
                    config.cloud_access_token_env
                ))
            })?;

        let dimension = config
            .cloud_dimension
            .or_else(|| default_dimension(&config.cloud_model))
            .ok_or_else(|| {
                SemindexError::Config(format!(
                    "Unknown dimension for model {}; set cloud_dimension",
                    config.cloud_model
                ))
            })?;

        let base = config.cloud_endpoint.clone().unwrap_or_else(|| {
            format!("https://{}-aiplatform.googleapis.com", config.cloud_location)
        });
        let url = format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:predict",
            base.trim_end_matches('/'),
            project,
            config.cloud_location,
            config.cloud_model
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.cloud_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url,
            access_token,
            model: config.cloud_model.clone(),
            dimension,
            requested_dimension: config.cloud_dimension,
        })
    }

    /// Full prediction endpoint this embedder posts to
    pub fn url(&self) -> &str {
        &self.url
    }

    fn predict(&self, texts: &[&str], task_type: TaskType) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(MAX_INSTANCES_PER_REQUEST) {
            let request = build_request(batch, task_type, self.requested_dimension);
            debug!("Requesting {} embeddings from {}", batch.len(), self.model);

            let response = self
                .client
                .post(&self.url)
                .bearer_auth(&self.access_token)
                .json(&request)
                .send()?;

            let status = response.status();
            let body = response.text()?;
            if !status.is_success() {
                return Err(SemindexError::Embedding(format!(
                    "Vertex AI returned {}: {}",
                    status,
                    body.trim()
                )));
            }

            embeddings.extend(parse_response(&body, batch.len(), self.dimension)?);
        }

        Ok(embeddings)
    }
}

impl EmbeddingProvider for CloudEmbedder {
    fn fingerprint(&self) -> String {
        format!("cloud:{}:{}", self.model, self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        self.predict(&refs, TaskType::RetrievalDocument)
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.predict(&[query], TaskType::RetrievalQuery)?
            .into_iter()
            .next()
            .ok_or_else(|| SemindexError::Embedding("No embedding returned".to_string()))
    }
}

/// Output dimension of the publisher models we know about
fn default_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-004" | "text-embedding-005" | "text-multilingual-embedding-002" => {
            Some(768)
        }
        m if m.starts_with("textembedding-gecko") => Some(768),
        "gemini-embedding-001" => Some(3072),
        _ => None,
    }
}

fn build_request<'a>(
    texts: &[&'a str],
    task_type: TaskType,
    dimension: Option<usize>,
) -> PredictRequest<'a> {
    PredictRequest {
        instances: texts
            .iter()
            .map(|&content| Instance { content, task_type })
            .collect(),
        parameters: dimension.map(|output_dimensionality| Parameters {
            output_dimensionality,
        }),
    }
}

fn parse_response(body: &str, expected: usize, dimension: usize) -> Result<Vec<Vec<f32>>> {
    let response: PredictResponse = serde_json::from_str(body)?;

    if response.predictions.len() != expected {
        return Err(SemindexError::Embedding(format!(
            "Expected {} embeddings, got {}",
            expected,
            response.predictions.len()
        )));
    }

    response
        .predictions
        .into_iter()
        .map(|p| {
            let values = p.embeddings.values;
            if values.len() == dimension {
                Ok(values)
            } else {
                Err(SemindexError::Embedding(format!(
                    "Expected dimension {}, got {}",
                    dimension,
                    values.len()
                )))
            }
        })
        .collect()
}
