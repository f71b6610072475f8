//! HTTP client for the extraction collaborators.
//!
//! Speaks a small JSON contract: POST /classify, /extract, /normalize on a
//! configured base URL. Connectivity problems, timeouts, and throttling map
//! to transient task errors; everything else is fatal.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CollaboratorConfig;
use crate::models::Classification;

use super::{Classifier, Normalizer, SectionExtractor, TaskError};

/// JSON client for all three collaborator roles.
pub struct HttpExtractionClient {
    base_url: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    document_id: &'a str,
    key: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    #[serde(flatten)]
    classification: Classification,
}

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    document_id: &'a str,
    key: &'a str,
    section: &'a str,
    pages: &'a [u32],
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    fields: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct NormalizeRequest<'a> {
    document_id: &'a str,
    document_type: &'a str,
    sections: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct NormalizeResponse {
    data: serde_json::Value,
}

impl HttpExtractionClient {
    pub fn new(config: &CollaboratorConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        route: &str,
        body: &Req,
    ) -> Result<Resp, TaskError> {
        let url = format!("{}/{route}", self.base_url);
        debug!(url = %url, "collaborator call");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<Resp>()
                .await
                .map_err(|e| TaskError::Fatal(format!("invalid collaborator response: {e}")))
        } else if is_transient_status(status) {
            Err(TaskError::Transient(format!(
                "collaborator returned {status}"
            )))
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(TaskError::Fatal(format!(
                "collaborator returned {status}: {detail}"
            )))
        }
    }
}

fn request_error(e: reqwest::Error) -> TaskError {
    if e.is_timeout() || e.is_connect() {
        TaskError::Transient(e.to_string())
    } else {
        TaskError::Fatal(e.to_string())
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl Classifier for HttpExtractionClient {
    async fn classify(&self, document_id: &str, key: &str) -> Result<Classification, TaskError> {
        let response: ClassifyResponse = self
            .post("classify", &ClassifyRequest { document_id, key })
            .await?;
        Ok(response.classification)
    }
}

#[async_trait]
impl SectionExtractor for HttpExtractionClient {
    async fn extract_section(
        &self,
        document_id: &str,
        key: &str,
        section: &str,
        pages: &[u32],
    ) -> Result<serde_json::Value, TaskError> {
        let response: ExtractResponse = self
            .post(
                "extract",
                &ExtractRequest {
                    document_id,
                    key,
                    section,
                    pages,
                },
            )
            .await?;
        Ok(response.fields)
    }
}

#[async_trait]
impl Normalizer for HttpExtractionClient {
    async fn normalize(
        &self,
        document_id: &str,
        document_type: &str,
        sections: &serde_json::Value,
    ) -> Result<serde_json::Value, TaskError> {
        let response: NormalizeResponse = self
            .post(
                "normalize",
                &NormalizeRequest {
                    document_id,
                    document_type,
                    sections,
                },
            )
            .await?;
        Ok(response.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_status_classification() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
    }
}
