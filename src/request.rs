//! Rendering requests and their canonical (fingerprint) form.
//!
//! A [`RawRenderRequest`] carries the textual values received from a caller.
//! [`normalize`] turns it into a [`RenderRequest`] with every default applied,
//! which is the exact set of fields that defines cache identity.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::ValidationError;

pub const DEFAULT_WIDTH: u32 = 1920;
pub const DEFAULT_HEIGHT: u32 = 1080;
pub const DEFAULT_DEVICE_SCALE_FACTOR: f64 = 1.0;

/// Largest accepted width/height in physical pixels.
pub const MAX_DIMENSION: u32 = 16_384;
pub const MAX_DEVICE_SCALE_FACTOR: f64 = 10.0;

pub const MIN_CACHE_TTL: u32 = 3600;
pub const MAX_CACHE_TTL: u32 = 31_622_400;

/// Output image encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
        }
    }

    /// Whether the encoder takes a quality setting.
    #[must_use]
    pub fn is_lossy(&self) -> bool {
        !matches!(self, Self::Png)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network resource types, as reported by the browser for each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    Texttrack,
    Xhr,
    Fetch,
    Prefetch,
    Eventsource,
    Websocket,
    Manifest,
    Signedexchange,
    Ping,
    Cspviolationreport,
    Preflight,
    Other,
}

impl ResourceType {
    pub const ALL: [Self; 18] = [
        Self::Document,
        Self::Stylesheet,
        Self::Image,
        Self::Media,
        Self::Font,
        Self::Script,
        Self::Texttrack,
        Self::Xhr,
        Self::Fetch,
        Self::Prefetch,
        Self::Eventsource,
        Self::Websocket,
        Self::Manifest,
        Self::Signedexchange,
        Self::Ping,
        Self::Cspviolationreport,
        Self::Preflight,
        Self::Other,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Stylesheet => "stylesheet",
            Self::Image => "image",
            Self::Media => "media",
            Self::Font => "font",
            Self::Script => "script",
            Self::Texttrack => "texttrack",
            Self::Xhr => "xhr",
            Self::Fetch => "fetch",
            Self::Prefetch => "prefetch",
            Self::Eventsource => "eventsource",
            Self::Websocket => "websocket",
            Self::Manifest => "manifest",
            Self::Signedexchange => "signedexchange",
            Self::Ping => "ping",
            Self::Cspviolationreport => "cspviolationreport",
            Self::Preflight => "preflight",
            Self::Other => "other",
        }
    }

    /// Parse a resource type name. Case-insensitive so CDP names such as
    /// `TextTrack` or `CSPViolationReport` map onto the same variants.
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        let lower = s.to_ascii_lowercase();
        Self::ALL.into_iter().find(|t| t.as_str() == lower)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    Light,
    Dark,
}

impl ColorScheme {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "light" => Some(Self::Light),
            "dark" => Some(Self::Dark),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReducedMotion {
    NoPreference,
    Reduce,
}

impl ReducedMotion {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoPreference => "no-preference",
            Self::Reduce => "reduce",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "no-preference" => Some(Self::NoPreference),
            "reduce" => Some(Self::Reduce),
            _ => None,
        }
    }
}

/// A rendering request as received, every value still in textual form.
///
/// `block_requests` is newline-separated, `block_resources` comma-separated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRenderRequest {
    pub url: Option<String>,
    pub selector: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    pub is_mobile: Option<String>,
    pub is_landscape: Option<String>,
    pub has_touch: Option<String>,
    pub device_scale_factor: Option<String>,
    pub format: Option<String>,
    pub block_ads: Option<String>,
    pub block_cookie_banners: Option<String>,
    pub block_trackers: Option<String>,
    pub block_requests: Option<String>,
    pub block_resources: Option<String>,
    pub prefers_color_scheme: Option<String>,
    pub prefers_reduced_motion: Option<String>,
    pub is_cached: Option<String>,
    pub cache_ttl: Option<String>,
    pub cache_key: Option<String>,
}

impl RawRenderRequest {
    /// A request for `url` with every other field left to its default.
    #[must_use]
    pub fn for_url(url: &str) -> Self {
        Self {
            url: Some(url.to_string()),
            ..Self::default()
        }
    }
}

/// A normalized rendering request. Two requests with equal fields (within one
/// workspace) describe the same artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderRequest {
    pub url: String,
    pub selector: Option<String>,
    pub width: u32,
    pub height: u32,
    pub is_mobile: bool,
    pub is_landscape: bool,
    pub has_touch: bool,
    pub device_scale_factor: f64,
    pub format: ImageFormat,
    pub block_ads: bool,
    pub block_cookie_banners: bool,
    pub block_trackers: bool,
    pub block_requests: Vec<String>,
    pub block_resources: BTreeSet<ResourceType>,
    pub prefers_color_scheme: ColorScheme,
    pub prefers_reduced_motion: ReducedMotion,
    pub is_cached: bool,
    pub cache_ttl: u32,
    pub cache_key: Option<String>,
}

impl RenderRequest {
    /// CSS viewport size: the physical size divided by the scale factor.
    #[must_use]
    pub fn css_viewport(&self) -> (u32, u32) {
        let w = (f64::from(self.width) / self.device_scale_factor).round().max(1.0);
        let h = (f64::from(self.height) / self.device_scale_factor).round().max(1.0);
        (w as u32, h as u32)
    }

    /// Whether any content blocking was asked for.
    #[must_use]
    pub fn wants_blocking(&self) -> bool {
        self.block_ads
            || self.block_cookie_banners
            || self.block_trackers
            || !self.block_requests.is_empty()
            || !self.block_resources.is_empty()
    }

    /// Stable digest of this request within `workspace_id`.
    ///
    /// `block_requests` is a set as far as equality goes, so it is sorted and
    /// de-duplicated before hashing.
    #[must_use]
    pub fn fingerprint(&self, workspace_id: &str) -> String {
        let mut canonical = self.clone();
        canonical.block_requests.sort_unstable();
        canonical.block_requests.dedup();

        let mut hasher = Sha256::new();
        hasher.update(workspace_id.as_bytes());
        hasher.update([0u8]);
        // Serialization of plain fields and a BTreeSet cannot fail.
        hasher.update(serde_json::to_vec(&canonical).unwrap_or_default());
        hex::encode(hasher.finalize())
    }
}

/// Canonicalize a raw request, applying defaults and validating every field.
///
/// # Errors
///
/// Returns a [`ValidationError`] naming the first offending field.
pub fn normalize(raw: &RawRenderRequest) -> Result<RenderRequest, ValidationError> {
    let url = non_empty(raw.url.as_deref()).ok_or(ValidationError::Missing("url"))?;
    validate_url(url)?;

    let width = parse_dimension("width", raw.width.as_deref(), DEFAULT_WIDTH)?;
    let height = parse_dimension("height", raw.height.as_deref(), DEFAULT_HEIGHT)?;
    let device_scale_factor = parse_scale_factor(raw.device_scale_factor.as_deref())?;

    let format = match non_empty(raw.format.as_deref()) {
        None => ImageFormat::Jpeg,
        Some(v) => ImageFormat::from_str(&v.to_lowercase()).ok_or_else(|| {
            ValidationError::InvalidValue {
                field: "format",
                message: format!("must be one of jpeg, png, webp, got '{v}'"),
            }
        })?,
    };

    let prefers_color_scheme = match non_empty(raw.prefers_color_scheme.as_deref()) {
        None => ColorScheme::Light,
        Some(v) => ColorScheme::from_str(&v.to_lowercase()).ok_or_else(|| {
            ValidationError::InvalidValue {
                field: "prefers_color_scheme",
                message: format!("must be 'light' or 'dark', got '{v}'"),
            }
        })?,
    };

    let prefers_reduced_motion = match non_empty(raw.prefers_reduced_motion.as_deref()) {
        None => ReducedMotion::NoPreference,
        Some(v) => ReducedMotion::from_str(&v.to_lowercase()).ok_or_else(|| {
            ValidationError::InvalidValue {
                field: "prefers_reduced_motion",
                message: format!("must be 'no-preference' or 'reduce', got '{v}'"),
            }
        })?,
    };

    let cache_ttl = match non_empty(raw.cache_ttl.as_deref()) {
        None => MIN_CACHE_TTL,
        Some(v) => {
            let ttl: u32 = v.parse().map_err(|_| ValidationError::ParseNumber {
                field: "cache_ttl",
                value: v.to_string(),
            })?;
            if !(MIN_CACHE_TTL..=MAX_CACHE_TTL).contains(&ttl) {
                return Err(ValidationError::InvalidValue {
                    field: "cache_ttl",
                    message: format!("must be between {MIN_CACHE_TTL} and {MAX_CACHE_TTL}"),
                });
            }
            ttl
        }
    };

    Ok(RenderRequest {
        url: url.to_string(),
        selector: non_empty(raw.selector.as_deref()).map(ToString::to_string),
        width,
        height,
        is_mobile: parse_bool("is_mobile", raw.is_mobile.as_deref())?,
        is_landscape: parse_bool("is_landscape", raw.is_landscape.as_deref())?,
        has_touch: parse_bool("has_touch", raw.has_touch.as_deref())?,
        device_scale_factor,
        format,
        block_ads: parse_bool("block_ads", raw.block_ads.as_deref())?,
        block_cookie_banners: parse_bool(
            "block_cookie_banners",
            raw.block_cookie_banners.as_deref(),
        )?,
        block_trackers: parse_bool("block_trackers", raw.block_trackers.as_deref())?,
        block_requests: parse_patterns(raw.block_requests.as_deref()),
        block_resources: parse_resources(raw.block_resources.as_deref())?,
        prefers_color_scheme,
        prefers_reduced_motion,
        is_cached: parse_bool("is_cached", raw.is_cached.as_deref())?,
        cache_ttl,
        cache_key: non_empty(raw.cache_key.as_deref()).map(ToString::to_string),
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn validate_url(value: &str) -> Result<(), ValidationError> {
    let parsed = Url::parse(value).map_err(|e| ValidationError::InvalidUrl {
        value: value.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidUrl {
            value: value.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ValidationError::InvalidUrl {
            value: value.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(())
}

fn parse_bool(field: &'static str, value: Option<&str>) -> Result<bool, ValidationError> {
    match non_empty(value) {
        None => Ok(false),
        Some(v) => match v.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ValidationError::ParseBool {
                field,
                value: v.to_string(),
            }),
        },
    }
}

fn parse_dimension(
    field: &'static str,
    value: Option<&str>,
    default: u32,
) -> Result<u32, ValidationError> {
    let Some(v) = non_empty(value) else {
        return Ok(default);
    };
    let n: u32 = v.parse().map_err(|_| ValidationError::ParseNumber {
        field,
        value: v.to_string(),
    })?;
    if n == 0 || n > MAX_DIMENSION {
        return Err(ValidationError::InvalidValue {
            field,
            message: format!("must be between 1 and {MAX_DIMENSION}"),
        });
    }
    Ok(n)
}

fn parse_scale_factor(value: Option<&str>) -> Result<f64, ValidationError> {
    let Some(v) = non_empty(value) else {
        return Ok(DEFAULT_DEVICE_SCALE_FACTOR);
    };
    let n: f64 = v.parse().map_err(|_| ValidationError::ParseNumber {
        field: "device_scale_factor",
        value: v.to_string(),
    })?;
    if !n.is_finite() || n <= 0.0 || n > MAX_DEVICE_SCALE_FACTOR {
        return Err(ValidationError::InvalidValue {
            field: "device_scale_factor",
            message: format!("must be greater than 0 and at most {MAX_DEVICE_SCALE_FACTOR}"),
        });
    }
    Ok(n)
}

fn parse_patterns(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_resources(value: Option<&str>) -> Result<BTreeSet<ResourceType>, ValidationError> {
    let mut set = BTreeSet::new();
    let Some(v) = non_empty(value) else {
        return Ok(set);
    };
    for item in v.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let resource =
            ResourceType::from_str(item).ok_or_else(|| ValidationError::InvalidValue {
                field: "block_resources",
                message: format!("unknown resource type '{item}'"),
            })?;
        set.insert(resource);
    }
    Ok(set)
}
