//! Artifact storage: image bytes in an object store, descriptive rows in SQLite.

mod memory;

pub use memory::MemoryObjectStore;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::constants::ARTIFACT_PREFIX;
use crate::db::{
    format_timestamp, insert_pending_screenshot, set_screenshot_complete, set_screenshot_failed,
    Database, NewScreenshot,
};
use crate::error::ScreenshotError;
use crate::request::{ImageFormat, RenderRequest};

/// Narrow interface over a binary object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous object.
    async fn write(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    /// Read the object at `key`; `Ok(None)` when it does not exist.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Storage key of an artifact: `screenshots/{workspace_id}/{record_id}.{format}`.
#[must_use]
pub fn artifact_key(workspace_id: &str, record_id: &str, format: ImageFormat) -> String {
    format!("{ARTIFACT_PREFIX}/{workspace_id}/{record_id}.{format}")
}

/// Render duration in seconds, rounded to two decimals.
#[must_use]
pub fn duration_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}

/// Writes captured images with their records and reads them back.
#[derive(Clone)]
pub struct Artifacts {
    db: Database,
    store: Arc<dyn ObjectStore>,
}

impl Artifacts {
    #[must_use]
    pub fn new(db: Database, store: Arc<dyn ObjectStore>) -> Self {
        Self { db, store }
    }

    /// Persist a fresh capture and return its storage key.
    ///
    /// The record id is generated up front so the key can embed it. The row
    /// goes in as `pending`, the bytes are uploaded, and only then is the row
    /// marked `complete`. A failed upload leaves a `failed` row behind, which
    /// lookups never match.
    ///
    /// # Errors
    ///
    /// Returns [`ScreenshotError::Storage`] if either write fails.
    pub async fn persist(
        &self,
        workspace_id: &str,
        request: &RenderRequest,
        bytes: &[u8],
        render_time: Duration,
    ) -> Result<String, ScreenshotError> {
        let id = Uuid::new_v4().simple().to_string();
        let key = artifact_key(workspace_id, &id, request.format);

        let new = NewScreenshot {
            id: &id,
            workspace_id,
            request,
            created_at: format_timestamp(Utc::now()),
        };
        insert_pending_screenshot(self.db.pool(), &new)
            .await
            .map_err(ScreenshotError::Storage)?;

        if let Err(e) = self
            .store
            .write(&key, bytes, request.format.content_type())
            .await
        {
            if let Err(mark_err) = set_screenshot_failed(self.db.pool(), &id, &format!("{e:#}")).await
            {
                warn!(id = %id, error = %mark_err, "Failed to mark screenshot failed");
            }
            return Err(ScreenshotError::Storage(e));
        }

        set_screenshot_complete(self.db.pool(), &id, duration_secs(render_time))
            .await
            .map_err(ScreenshotError::Storage)?;

        debug!(id = %id, key = %key, size = bytes.len(), "Screenshot persisted");
        Ok(key)
    }

    /// Read an artifact's bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ScreenshotError::ArtifactNotFound`] if nothing is stored
    /// under `key`, or [`ScreenshotError::Storage`] if the store fails.
    pub async fn fetch(&self, key: &str) -> Result<Vec<u8>, ScreenshotError> {
        match self.store.read(key).await {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => Err(ScreenshotError::ArtifactNotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(ScreenshotError::Storage(e)),
        }
    }
}

impl std::fmt::Debug for Artifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifacts").field("db", &self.db).finish()
    }
}
