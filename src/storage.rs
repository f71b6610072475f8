//! On-disk object store for raw uploads and derived artifacts.
//!
//! Raw uploaded bytes live under the `incoming/` prefix, derived artifacts
//! under `processed/` with a two-level hash-prefix directory layout for
//! filesystem efficiency. Access from the HTTP surface goes through signed,
//! time-limited tokens since there is no auth provider in front of this
//! service.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Prefix for raw uploaded bytes.
pub const INCOMING_PREFIX: &str = "incoming";

/// Prefix for derived artifacts (normalized payload snapshots).
pub const PROCESSED_PREFIX: &str = "processed";

/// Errors from signed-token verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("token signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

/// Filesystem-backed object store.
#[derive(Clone)]
pub struct ObjectStore {
    root: PathBuf,
    secret: String,
}

impl ObjectStore {
    pub fn new(root: PathBuf, secret: String) -> Self {
        Self { root, secret }
    }

    /// Absolute path for an object key.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Key for a raw upload.
    pub fn incoming_key(document_id: &str) -> String {
        format!("{INCOMING_PREFIX}/{document_id}.pdf")
    }

    /// Key for a normalized-payload artifact, laid out by content hash:
    /// `processed/{hash[0..2]}/{hash[0..8]}.json`
    pub fn processed_key(content_hash: &str) -> String {
        format!(
            "{PROCESSED_PREFIX}/{}/{}.json",
            &content_hash[..2],
            &content_hash[..8]
        )
    }

    /// Write an object, creating parent directories as needed.
    ///
    /// Keys are rejected if they try to escape the store root.
    pub fn put(&self, key: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        validate_key(key)?;
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Read an object's bytes.
    pub fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        validate_key(key)?;
        Ok(std::fs::read(self.path_for(key))?)
    }

    /// Whether an object exists.
    pub fn exists(&self, key: &str) -> bool {
        validate_key(key).is_ok() && self.path_for(key).exists()
    }

    // ========================================================================
    // Signed tokens
    // ========================================================================

    /// Sign an upload ticket binding a document id to its storage key.
    pub fn sign_upload(&self, document_id: &str, key: &str, expires_at: DateTime<Utc>) -> String {
        self.sign("up", &format!("{document_id}|{key}"), expires_at)
    }

    /// Verify an upload ticket; returns (document_id, key).
    pub fn verify_upload(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<(String, String), TokenError> {
        let payload = self.verify("up", token, now)?;
        let (document_id, key) = payload.split_once('|').ok_or(TokenError::Malformed)?;
        Ok((document_id.to_string(), key.to_string()))
    }

    /// Sign a time-limited download link for a stored object.
    pub fn sign_download(&self, key: &str, expires_at: DateTime<Utc>) -> String {
        self.sign("dl", key, expires_at)
    }

    /// Verify a download token; returns the object key.
    pub fn verify_download(&self, token: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        self.verify("dl", token, now)
    }

    fn sign(&self, scope: &str, payload: &str, expires_at: DateTime<Utc>) -> String {
        let claims = format!("{scope}|{}|{payload}", expires_at.timestamp());
        let sig = self.signature(&claims);
        URL_SAFE_NO_PAD.encode(format!("{claims}|{sig}"))
    }

    fn verify(&self, scope: &str, token: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| TokenError::Malformed)?;
        let decoded = String::from_utf8(raw).map_err(|_| TokenError::Malformed)?;
        let (claims, sig) = decoded.rsplit_once('|').ok_or(TokenError::Malformed)?;
        if self.signature(claims) != sig {
            return Err(TokenError::BadSignature);
        }

        let mut parts = claims.splitn(3, '|');
        let token_scope = parts.next().ok_or(TokenError::Malformed)?;
        let expires: i64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(TokenError::Malformed)?;
        let payload = parts.next().ok_or(TokenError::Malformed)?;

        if token_scope != scope {
            return Err(TokenError::BadSignature);
        }
        if now.timestamp() > expires {
            return Err(TokenError::Expired);
        }
        Ok(payload.to_string())
    }

    fn signature(&self, claims: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b"|");
        hasher.update(claims.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn validate_key(key: &str) -> anyhow::Result<()> {
    let path = Path::new(key);
    if path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        anyhow::bail!("invalid object key: {key}");
    }
    Ok(())
}

/// Verify that uploaded bytes look like a PDF (magic-byte check).
pub fn is_pdf(content: &[u8]) -> bool {
    infer::get(content)
        .map(|kind| kind.mime_type() == "application/pdf")
        .unwrap_or(false)
}

/// Detect the MIME type of uploaded bytes, falling back to octet-stream.
pub fn detect_mime(content: &[u8]) -> &'static str {
    infer::get(content)
        .map(|kind| kind.mime_type())
        .unwrap_or("application/octet-stream")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn store(dir: &Path) -> ObjectStore {
        ObjectStore::new(dir.to_path_buf(), "test-secret".to_string())
    }

    #[test]
    fn test_put_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        let key = ObjectStore::incoming_key("doc-1");
        store.put(&key, b"%PDF-1.7 test").unwrap();
        assert!(store.exists(&key));
        assert_eq!(store.get(&key).unwrap(), b"%PDF-1.7 test");
    }

    #[test]
    fn test_key_escape_rejected() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        assert!(store.put("../outside", b"x").is_err());
        assert!(store.put("/etc/passwd", b"x").is_err());
    }

    #[test]
    fn test_processed_key_layout() {
        let hash = "abcdef1234567890abcdef1234567890";
        assert_eq!(
            ObjectStore::processed_key(hash),
            "processed/ab/abcdef12.json"
        );
    }

    #[test]
    fn test_upload_token_round_trip() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let now = Utc::now();

        let token = store.sign_upload("doc-1", "incoming/doc-1.pdf", now + Duration::minutes(10));
        let (document_id, key) = store.verify_upload(&token, now).unwrap();
        assert_eq!(document_id, "doc-1");
        assert_eq!(key, "incoming/doc-1.pdf");
    }

    #[test]
    fn test_token_expiry() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let now = Utc::now();

        let token = store.sign_download("incoming/doc-1.pdf", now - Duration::seconds(1));
        assert_eq!(store.verify_download(&token, now), Err(TokenError::Expired));
    }

    #[test]
    fn test_token_tamper_detected() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let now = Utc::now();

        let token = store.sign_download("incoming/doc-1.pdf", now + Duration::minutes(5));
        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(&token).unwrap()).unwrap();
        let tampered =
            URL_SAFE_NO_PAD.encode(decoded.replace("doc-1", "doc-2"));
        assert_eq!(
            store.verify_download(&tampered, now),
            Err(TokenError::BadSignature)
        );

        // Upload tokens are not valid as download tokens.
        let upload = store.sign_upload("doc-1", "incoming/doc-1.pdf", now + Duration::minutes(5));
        assert!(store.verify_download(&upload, now).is_err());
    }

    #[test]
    fn test_is_pdf() {
        assert!(is_pdf(b"%PDF-1.7\n..."));
        assert!(!is_pdf(b"GIF89a..."));
        assert!(!is_pdf(b"plain text"));
    }
}
