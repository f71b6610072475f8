//! Configuration management for finpipe.
//!
//! Settings load from an optional TOML file plus environment overrides.
//! Deployment-specific knobs are configuration rather than constants: the
//! per-type extraction task sets, the classification confidence threshold,
//! retry/backoff parameters, validation rules, and the dashboard polling
//! cadences.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::repository::DbContext;
use crate::storage::ObjectStore;

/// Default classification confidence threshold (percent).
pub const DEFAULT_MIN_CONFIDENCE: f32 = 70.0;

/// How long an optimistic client placeholder lives before it is dropped.
pub const DEFAULT_PLACEHOLDER_TTL_SECONDS: u64 = 60;

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Secret for signing upload tickets and file links. Generated fresh at
    /// startup when not configured, which invalidates outstanding links on
    /// restart.
    #[serde(default = "default_secret")]
    pub link_secret: String,
    /// Lifetime of a pre-authorized upload ticket.
    #[serde(default = "default_upload_ttl")]
    pub upload_ttl_seconds: u64,
    /// Lifetime of a signed PDF download link.
    #[serde(default = "default_download_ttl")]
    pub download_ttl_seconds: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3050
}

fn default_secret() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_upload_ttl() -> u64 {
    900
}

fn default_download_ttl() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            link_secret: default_secret(),
            upload_ttl_seconds: default_upload_ttl(),
            download_ttl_seconds: default_download_ttl(),
        }
    }
}

/// Endpoint configuration for the external extraction collaborators.
///
/// Classification, section extraction, and normalization are remote black
/// boxes; finpipe only needs a base URL and a call timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    #[serde(default = "default_collaborator_url")]
    pub base_url: String,
    #[serde(default = "default_collaborator_timeout")]
    pub timeout_seconds: u64,
}

fn default_collaborator_url() -> String {
    "http://127.0.0.1:8750".to_string()
}

fn default_collaborator_timeout() -> u64 {
    120
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            base_url: default_collaborator_url(),
            timeout_seconds: default_collaborator_timeout(),
        }
    }
}

/// A document-type plugin: the branch of extraction sections to fan out for
/// documents classified as this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTypeConfig {
    /// Type id as produced by the classifier (e.g. "credit_agreement").
    pub id: String,
    pub label: String,
    /// Section names extracted in parallel for this type.
    pub sections: Vec<String>,
    /// Fields that must be present in the normalized payload; a missing
    /// field flags the document for human review.
    #[serde(default)]
    pub required_fields: Vec<String>,
}

/// Retry policy knobs for stage tasks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Pipeline orchestration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Classification confidence below this is treated as unknown-type.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// Per-attempt timeout for a stage task.
    #[serde(default = "default_task_timeout")]
    pub task_timeout_seconds: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Document-type plugins. The first entry is also the fallback branch
    /// for unmatched types unless `default_type` says otherwise.
    #[serde(default = "default_document_types")]
    pub document_types: Vec<DocumentTypeConfig>,
    /// Type id routed to when classification produces an unconfigured type.
    #[serde(default = "default_default_type")]
    pub default_type: String,
}

fn default_min_confidence() -> f32 {
    DEFAULT_MIN_CONFIDENCE
}

fn default_task_timeout() -> u64 {
    120
}

fn default_default_type() -> String {
    "mortgage".to_string()
}

fn default_document_types() -> Vec<DocumentTypeConfig> {
    vec![
        DocumentTypeConfig {
            id: "mortgage".to_string(),
            label: "Mortgage".to_string(),
            sections: vec![
                "borrower-info".to_string(),
                "property".to_string(),
                "loan-terms".to_string(),
                "escrow".to_string(),
            ],
            required_fields: vec!["borrower".to_string(), "loan_amount".to_string()],
        },
        DocumentTypeConfig {
            id: "credit_agreement".to_string(),
            label: "Credit Agreement".to_string(),
            sections: vec![
                "agreement-info".to_string(),
                "rates".to_string(),
                "facility-terms".to_string(),
                "lender-commitments".to_string(),
                "covenants".to_string(),
                "fees".to_string(),
                "definitions".to_string(),
            ],
            required_fields: vec!["borrower".to_string(), "facilities".to_string()],
        },
    ]
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            task_timeout_seconds: default_task_timeout(),
            retry: RetryConfig::default(),
            document_types: default_document_types(),
            default_type: default_default_type(),
        }
    }
}

impl PipelineConfig {
    /// Pure routing: select the extraction branch for a classified type.
    ///
    /// Unmatched or missing types fall back to the default branch.
    pub fn branch_for(&self, document_type: Option<&str>) -> &DocumentTypeConfig {
        document_type
            .and_then(|t| self.document_types.iter().find(|d| d.id == t))
            .or_else(|| {
                self.document_types
                    .iter()
                    .find(|d| d.id == self.default_type)
            })
            .or_else(|| self.document_types.first())
            .expect("at least one document type must be configured")
    }

    /// Validation: fields required for this type that are absent from the
    /// normalized payload.
    pub fn missing_fields(
        &self,
        document_type: Option<&str>,
        data: &serde_json::Value,
    ) -> Vec<String> {
        let branch = self.branch_for(document_type);
        branch
            .required_fields
            .iter()
            .filter(|field| {
                data.get(field.as_str())
                    .map(|v| v.is_null())
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }
}

/// Dashboard polling cadences.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PollingConfig {
    /// List poll interval while any document is actively processing.
    #[serde(default = "default_active_ms")]
    pub active_ms: u64,
    /// List poll interval while only optimistic placeholders are pending.
    #[serde(default = "default_waiting_ms")]
    pub waiting_ms: u64,
    /// List poll interval for an idle queue.
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,
    /// Fixed interval for a single document's status watcher.
    #[serde(default = "default_status_ms")]
    pub status_ms: u64,
    #[serde(default = "default_placeholder_ttl")]
    pub placeholder_ttl_seconds: u64,
}

fn default_active_ms() -> u64 {
    2_000
}

fn default_waiting_ms() -> u64 {
    5_000
}

fn default_idle_ms() -> u64 {
    30_000
}

fn default_status_ms() -> u64 {
    2_000
}

fn default_placeholder_ttl() -> u64 {
    DEFAULT_PLACEHOLDER_TTL_SECONDS
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            active_ms: default_active_ms(),
            waiting_ms: default_waiting_ms(),
            idle_ms: default_idle_ms(),
            status_ms: default_status_ms(),
            placeholder_ttl_seconds: default_placeholder_ttl(),
        }
    }
}

/// Admission retry knobs for the ingestion trigger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default = "default_admission_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_admission_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_admission_attempts() -> u32 {
    3
}

fn default_admission_delay_ms() -> u64 {
    200
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_admission_attempts(),
            base_delay_ms: default_admission_delay_ms(),
        }
    }
}

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root directory for the database and the object store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub collaborators: CollaboratorConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("finpipe"))
        .unwrap_or_else(|| PathBuf::from("finpipe-data"))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server: ServerConfig::default(),
            collaborators: CollaboratorConfig::default(),
            pipeline: PipelineConfig::default(),
            polling: PollingConfig::default(),
            admission: AdmissionConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from an explicit config path, `finpipe.toml` in the
    /// working directory, or defaults. Environment variables override the
    /// data directory (`FINPIPE_DATA_DIR`) and link secret
    /// (`FINPIPE_LINK_SECRET`).
    pub fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let candidate = config_path
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("finpipe.toml"));

        let mut settings: Settings = if candidate.exists() {
            let raw = fs::read_to_string(&candidate)?;
            toml::from_str(&raw)?
        } else if config_path.is_some() {
            anyhow::bail!("config file not found: {}", candidate.display());
        } else {
            Settings::default()
        };

        if let Ok(dir) = std::env::var("FINPIPE_DATA_DIR") {
            settings.data_dir = PathBuf::from(dir);
        }
        if let Ok(secret) = std::env::var("FINPIPE_LINK_SECRET") {
            settings.server.link_secret = secret;
        }

        Ok(settings)
    }

    /// Path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("finpipe.db")
    }

    /// Root of the on-disk object store.
    pub fn objects_dir(&self) -> PathBuf {
        self.data_dir.join("objects")
    }

    /// Create the database context for this configuration.
    pub fn create_db_context(&self) -> DbContext {
        DbContext::from_sqlite_path(&self.database_path())
    }

    /// Create the object store for this configuration.
    pub fn object_store(&self) -> ObjectStore {
        ObjectStore::new(self.objects_dir(), self.server.link_secret.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_for_routes_by_type() {
        let config = PipelineConfig::default();
        assert_eq!(
            config.branch_for(Some("credit_agreement")).id,
            "credit_agreement"
        );
        assert_eq!(config.branch_for(Some("mortgage")).id, "mortgage");
    }

    #[test]
    fn test_branch_for_falls_back_to_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.branch_for(Some("promissory_note")).id, "mortgage");
        assert_eq!(config.branch_for(None).id, "mortgage");
    }

    #[test]
    fn test_missing_fields() {
        let config = PipelineConfig::default();
        let complete = serde_json::json!({
            "borrower": "Acme Corp",
            "facilities": [{"amount": 1_000_000}],
        });
        assert!(config
            .missing_fields(Some("credit_agreement"), &complete)
            .is_empty());

        let incomplete = serde_json::json!({"borrower": "Acme Corp"});
        assert_eq!(
            config.missing_fields(Some("credit_agreement"), &incomplete),
            vec!["facilities".to_string()]
        );

        let null_field = serde_json::json!({"borrower": null, "facilities": []});
        assert_eq!(
            config.missing_fields(Some("credit_agreement"), &null_field),
            vec!["borrower".to_string()]
        );
    }

    #[test]
    fn test_settings_parse_from_toml() {
        let raw = r#"
            data_dir = "/tmp/finpipe-test"

            [server]
            port = 4000

            [pipeline]
            min_confidence = 80.0

            [[pipeline.document_types]]
            id = "invoice"
            label = "Invoice"
            sections = ["header", "line-items"]
        "#;
        let settings: Settings = toml::from_str(raw).unwrap();
        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.pipeline.min_confidence, 80.0);
        assert_eq!(settings.pipeline.document_types.len(), 1);
        // Unconfigured default type falls back to the first entry.
        assert_eq!(settings.pipeline.branch_for(Some("other")).id, "invoice");
    }
}
