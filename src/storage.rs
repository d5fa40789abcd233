//! Azure Blob Storage uploads.
//!
//! Uses `object_store` so the uploader runs against an in-memory store in
//! tests and an Azure container in production.

use crate::config::AzureBlobConfig;
use crate::error::{HarvestError, Result};
use object_store::azure::MicrosoftAzureBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Uploads local files into one blob container.
pub struct BlobUploader {
    store: Arc<dyn ObjectStore>,
    container: String,
}

impl BlobUploader {
    /// Builds an uploader for the configured Azure account and container.
    pub fn from_config(config: &AzureBlobConfig) -> Result<Self> {
        let store = MicrosoftAzureBuilder::new()
            .with_account(&config.account)
            .with_access_key(&config.access_key)
            .with_container_name(&config.container)
            .build()
            .map_err(|e| HarvestError::storage(format!("Azure: {e}")))?;

        Ok(Self::with_store(Arc::new(store), &config.container))
    }

    /// Wraps an existing store.
    pub fn with_store(store: Arc<dyn ObjectStore>, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
        }
    }

    /// Uploads `file` as `blob_name`, defaulting to the file's own name.
    ///
    /// Returns the blob path written.
    pub async fn upload_file(&self, file: &Path, blob_name: Option<&str>) -> Result<String> {
        let name = match blob_name {
            Some(name) => name.trim_start_matches('/').to_string(),
            None => file
                .file_name()
                .and_then(|n| n.to_str())
                .map(String::from)
                .ok_or_else(|| {
                    HarvestError::storage(format!("Cannot derive a blob name from {}", file.display()))
                })?,
        };
        let location = ObjectPath::parse(&name)
            .map_err(|e| HarvestError::storage(format!("Invalid blob name '{name}': {e}")))?;

        let bytes = tokio::fs::read(file)
            .await
            .map_err(|e| HarvestError::storage(format!("Cannot read {}: {e}", file.display())))?;
        let size = bytes.len();

        self.store
            .put(&location, PutPayload::from(bytes))
            .await
            .map_err(|e| HarvestError::storage(format!("Upload of {name} failed: {e}")))?;

        info!(
            "Uploaded {} ({size} bytes) to {}/{location}",
            file.display(),
            self.container
        );
        Ok(location.to_string())
    }
}
