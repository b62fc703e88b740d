//! Shared constants used across the application.

/// User agent presented by rendering sessions.
///
/// Replaces the `HeadlessChrome` token that headless Chromium advertises by default.
pub const RENDER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// User agent used when fetching block-list subscriptions.
pub const BLOCKLIST_USER_AGENT: &str = concat!("screenshot-cache/", env!("CARGO_PKG_VERSION"));

/// JPEG/WebP encoder quality.
pub const LOSSY_QUALITY: i64 = 80;

/// Prefix of every stored artifact key.
pub const ARTIFACT_PREFIX: &str = "screenshots";
