//! Image storage collaborator: persist page and inline images, return URLs.
//!
//! The pipeline needs storage in two places — page images flagged as maps
//! (uploaded once per page) and inline base64 payloads the model embeds in
//! image questions (materialised during post-processing). Both go through
//! [`ImageStore`] so the host application decides where bytes live; the
//! built-in [`LocalImageStore`] writes beneath a base directory and returns
//! URLs under a configurable public prefix.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ExtractError;

/// Storage collaborator contract.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Persist `bytes` under `filename`, returning the public URL.
    async fn store(&self, bytes: &[u8], filename: &str) -> Result<String, ExtractError>;
}

/// Filesystem-backed store: `<base_dir>/<filename>` served as
/// `<public_base>/<filename>`.
pub struct LocalImageStore {
    base_dir: PathBuf,
    public_base: String,
}

impl LocalImageStore {
    pub fn new(base_dir: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn store(&self, bytes: &[u8], filename: &str) -> Result<String, ExtractError> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| ExtractError::Internal(format!("image store mkdir: {e}")))?;

        let path = self.base_dir.join(filename);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ExtractError::Internal(format!("image store write: {e}")))?;

        debug!("stored image {} ({} bytes)", path.display(), bytes.len());
        Ok(format!("{}/{filename}", self.public_base))
    }
}
