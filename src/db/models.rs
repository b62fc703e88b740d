use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::request::{ImageFormat, RenderRequest, ResourceType};

/// Lifecycle of a screenshot row.
///
/// Rows are inserted `pending` before the image is uploaded and flipped to
/// `complete` once the bytes are stored. Only `complete` rows satisfy lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotStatus {
    Pending,
    Complete,
    Failed,
}

impl ScreenshotStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A persisted screenshot record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Screenshot {
    pub id: String,
    pub workspace_id: String,
    pub status: String,
    pub url: String,
    pub selector: Option<String>,
    pub width: i64,
    pub height: i64,
    pub is_mobile: bool,
    pub is_landscape: bool,
    pub has_touch: bool,
    pub device_scale_factor: f64,
    pub format: String,
    pub block_ads: bool,
    pub block_cookie_banners: bool,
    pub block_trackers: bool,
    pub block_requests: String,
    pub block_resources: String,
    pub prefers_color_scheme: String,
    pub prefers_reduced_motion: String,
    pub is_cached: bool,
    pub cache_ttl: i64,
    pub cache_key: Option<String>,
    pub duration: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Screenshot {
    #[must_use]
    pub fn status(&self) -> Option<ScreenshotStatus> {
        ScreenshotStatus::from_str(&self.status)
    }

    #[must_use]
    pub fn image_format(&self) -> Option<ImageFormat> {
        ImageFormat::from_str(&self.format)
    }

    /// Stored `block_requests` patterns. Malformed JSON reads as empty.
    #[must_use]
    pub fn block_request_patterns(&self) -> Vec<String> {
        serde_json::from_str(&self.block_requests).unwrap_or_default()
    }

    /// Stored `block_resources` set. Malformed JSON reads as empty.
    #[must_use]
    pub fn block_resource_types(&self) -> BTreeSet<ResourceType> {
        serde_json::from_str(&self.block_resources).unwrap_or_default()
    }

    /// Whether the stored sets contain every pattern and resource type the
    /// request asks for.
    #[must_use]
    pub fn covers_block_sets(&self, request: &RenderRequest) -> bool {
        let patterns = self.block_request_patterns();
        let resources = self.block_resource_types();
        request.block_requests.iter().all(|p| patterns.contains(p))
            && request.block_resources.is_subset(&resources)
    }
}

/// A screenshot row to insert, in `pending` state.
#[derive(Debug, Clone)]
pub struct NewScreenshot<'a> {
    pub id: &'a str,
    pub workspace_id: &'a str,
    pub request: &'a RenderRequest,
    pub created_at: String,
}
