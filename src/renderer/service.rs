//! Request orchestration: cache lookup, origin gate, render and persist.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::browser::BrowserEngine;
use super::scheduler::RenderScheduler;
use super::single_flight::SingleFlight;
use crate::blocking::RuleCompiler;
use crate::db::{find_matching_screenshot, format_timestamp, Database, Screenshot};
use crate::error::ScreenshotError;
use crate::origin::OriginPolicy;
use crate::request::RenderRequest;
use crate::storage::{artifact_key, Artifacts, ObjectStore};

/// Result of [`ScreenshotService::get_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenshotOutcome {
    /// An equivalent, unexpired screenshot already existed.
    Cached { key: String, bytes: Vec<u8> },
    /// A fresh screenshot was rendered and stored.
    Created { key: String, bytes: Vec<u8> },
    /// The origin policy refused the URL. Nothing was rendered or stored.
    NotAllowed,
}

impl ScreenshotOutcome {
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Cached { bytes, .. } | Self::Created { bytes, .. } => Some(bytes),
            Self::NotAllowed => None,
        }
    }

    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Cached { key, .. } | Self::Created { key, .. } => Some(key),
            Self::NotAllowed => None,
        }
    }

    /// True only when this call rendered the screenshot.
    #[must_use]
    pub fn created(&self) -> bool {
        matches!(self, Self::Created { .. })
    }

    #[must_use]
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::NotAllowed)
    }
}

/// Entry point of the pipeline.
///
/// Cheap to share behind an `Arc`; all mutable state (scheduler, single
/// flight map, block-list cache) is internally synchronized.
pub struct ScreenshotService {
    db: Database,
    artifacts: Artifacts,
    origins: Arc<dyn OriginPolicy>,
    compiler: RuleCompiler,
    engine: Arc<dyn BrowserEngine>,
    scheduler: RenderScheduler,
    flights: SingleFlight,
}

impl ScreenshotService {
    #[must_use]
    pub fn new(
        db: Database,
        store: Arc<dyn ObjectStore>,
        origins: Arc<dyn OriginPolicy>,
        compiler: RuleCompiler,
        engine: Arc<dyn BrowserEngine>,
        scheduler: RenderScheduler,
    ) -> Self {
        Self {
            artifacts: Artifacts::new(db.clone(), store),
            db,
            origins,
            compiler,
            engine,
            scheduler,
            flights: SingleFlight::new(),
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> &RenderScheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    /// Return a stored screenshot equivalent to `request`, rendering and
    /// storing a new one on a miss.
    ///
    /// Concurrent misses for the same fingerprint render once; the others
    /// wait and are then served from the cache.
    ///
    /// # Errors
    ///
    /// Any [`ScreenshotError`] raised by the lookup, rule compilation, the
    /// render or storage. Failed renders leave no matchable record.
    pub async fn get_or_create(
        &self,
        workspace_id: &str,
        request: &RenderRequest,
    ) -> Result<ScreenshotOutcome, ScreenshotError> {
        let fingerprint = request.fingerprint(workspace_id);

        if let Some(outcome) = self.cached(workspace_id, request).await? {
            debug!(workspace_id = %workspace_id, fingerprint = %fingerprint, "Screenshot cache hit");
            return Ok(outcome);
        }

        if !self
            .origins
            .is_origin_allowed(workspace_id, &request.url)
            .await
        {
            info!(workspace_id = %workspace_id, url = %request.url, "Origin not allowed");
            return Ok(ScreenshotOutcome::NotAllowed);
        }

        let _flight = self.flights.lock(&fingerprint).await;

        // Another caller may have finished the same render while we waited.
        if let Some(outcome) = self.cached(workspace_id, request).await? {
            debug!(fingerprint = %fingerprint, "Served by concurrent render");
            return Ok(outcome);
        }

        let rules = Arc::new(self.compiler.compile(request).await?);

        // The engine owns the slot from here and returns it once the browser
        // is gone, including after cancellation.
        let ticket = self.scheduler.admit().await?;
        let started = Instant::now();
        let rendered = self.engine.render(request, rules, ticket).await;
        let render_time = started.elapsed();

        let bytes = match rendered {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    url = %request.url,
                    fingerprint = %fingerprint,
                    kind = e.kind(),
                    error = %e,
                    "Render failed"
                );
                return Err(e);
            }
        };

        let key = self
            .artifacts
            .persist(workspace_id, request, &bytes, render_time)
            .await?;
        let bytes = self.artifacts.fetch(&key).await?;

        info!(
            workspace_id = %workspace_id,
            url = %request.url,
            key = %key,
            render_ms = render_time.as_millis(),
            "Screenshot created"
        );
        Ok(ScreenshotOutcome::Created { key, bytes })
    }

    /// Find an unexpired record equivalent to `request`.
    ///
    /// # Errors
    ///
    /// Returns [`ScreenshotError::Storage`] if the query fails.
    pub async fn lookup(
        &self,
        workspace_id: &str,
        request: &RenderRequest,
    ) -> Result<Option<Screenshot>, ScreenshotError> {
        self.lookup_at(workspace_id, request, Utc::now()).await
    }

    /// [`Self::lookup`] evaluated at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ScreenshotError::Storage`] if the query fails.
    pub async fn lookup_at(
        &self,
        workspace_id: &str,
        request: &RenderRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<Screenshot>, ScreenshotError> {
        find_matching_screenshot(self.db.pool(), workspace_id, request, &format_timestamp(now))
            .await
            .map_err(ScreenshotError::Storage)
    }

    async fn cached(
        &self,
        workspace_id: &str,
        request: &RenderRequest,
    ) -> Result<Option<ScreenshotOutcome>, ScreenshotError> {
        let Some(record) = self.lookup(workspace_id, request).await? else {
            return Ok(None);
        };

        let format = record.image_format().unwrap_or(request.format);
        let key = artifact_key(workspace_id, &record.id, format);
        let bytes = self.artifacts.fetch(&key).await?;
        Ok(Some(ScreenshotOutcome::Cached { key, bytes }))
    }
}

impl std::fmt::Debug for ScreenshotService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenshotService")
            .field("db", &self.db)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
