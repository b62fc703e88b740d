//! Filter list subscriptions and a process-wide cache of their contents.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::constants::BLOCKLIST_USER_AGENT;
use crate::error::ScreenshotError;

const GHOSTERY_ASSETS: &str =
    "https://raw.githubusercontent.com/ghostery/adblocker/master/packages/adblocker/assets";

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Subscription URLs pulled in by each blocking toggle.
#[derive(Debug, Clone)]
pub struct BlockListSources {
    pub ads: Vec<String>,
    pub trackers: Vec<String>,
    pub cookie_banners: Vec<String>,
}

impl Default for BlockListSources {
    fn default() -> Self {
        let ads: Vec<String> = [
            "easylist/easylist.txt",
            "peter-lowe/serverlist.txt",
            "ublock-origin/badware.txt",
            "ublock-origin/filters.txt",
            "ublock-origin/unbreak.txt",
        ]
        .iter()
        .map(|path| format!("{GHOSTERY_ASSETS}/{path}"))
        .collect();

        // Tracking protection is a superset of the ad lists.
        let mut trackers = ads.clone();
        trackers.extend(
            ["easylist/easyprivacy.txt", "ublock-origin/privacy.txt"]
                .iter()
                .map(|path| format!("{GHOSTERY_ASSETS}/{path}")),
        );

        Self {
            ads,
            trackers,
            cookie_banners: vec![
                "https://secure.fanboy.co.nz/fanboy-cookiemonster.txt".to_string(),
                "https://secure.fanboy.co.nz/fanboy-annoyance.txt".to_string(),
            ],
        }
    }
}

impl BlockListSources {
    /// Subscription URLs for the given toggles, de-duplicated, in a stable order.
    #[must_use]
    pub fn select(&self, ads: bool, cookie_banners: bool, trackers: bool) -> Vec<&str> {
        let mut selected: Vec<&str> = Vec::new();
        let groups = [
            (ads, &self.ads),
            (cookie_banners, &self.cookie_banners),
            (trackers, &self.trackers),
        ];
        for (enabled, urls) in groups {
            if !enabled {
                continue;
            }
            for url in urls {
                if !selected.contains(&url.as_str()) {
                    selected.push(url);
                }
            }
        }
        selected
    }
}

#[derive(Debug)]
struct CachedList {
    rules: Arc<Vec<String>>,
    fetched_at: Instant,
}

/// Downloaded filter lists keyed by source URL, refreshed after `ttl`.
///
/// Shared by every render; reads take the read lock only.
#[derive(Debug)]
pub struct BlockListCache {
    client: Client,
    ttl: Duration,
    lists: RwLock<HashMap<String, CachedList>>,
}

impl BlockListCache {
    /// Create a new cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(ttl: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(BLOCKLIST_USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            ttl,
            lists: RwLock::new(HashMap::new()),
        })
    }

    /// Get the rules of one subscription, downloading it if absent or stale.
    ///
    /// # Errors
    ///
    /// Returns [`ScreenshotError::BlockListFetch`] if the source cannot be
    /// downloaded or does not look like a filter list.
    pub async fn get(&self, source_url: &str) -> Result<Arc<Vec<String>>, ScreenshotError> {
        {
            let read_guard = self.lists.read().await;
            if let Some(cached) = read_guard.get(source_url) {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(&cached.rules));
                }
            }
        }

        let rules = Arc::new(self.fetch(source_url).await?);
        info!(source = %source_url, rules = rules.len(), "Block list downloaded");

        let mut write_guard = self.lists.write().await;
        write_guard.insert(
            source_url.to_string(),
            CachedList {
                rules: Arc::clone(&rules),
                fetched_at: Instant::now(),
            },
        );
        Ok(rules)
    }

    /// Number of lists currently held.
    pub async fn cached_count(&self) -> usize {
        self.lists.read().await.len()
    }

    async fn fetch(&self, source_url: &str) -> Result<Vec<String>, ScreenshotError> {
        let fetch_error = |message: String| ScreenshotError::BlockListFetch {
            source_url: source_url.to_string(),
            message,
        };

        debug!(source = %source_url, "Fetching block list");

        let response = self
            .client
            .get(source_url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        parse_filter_list(&body).ok_or_else(|| fetch_error("response is not a filter list".to_string()))
    }
}

/// Split a filter list into rule lines, dropping comments and headers.
///
/// Returns `None` for bodies that are clearly something else (an HTML error
/// page, for instance).
fn parse_filter_list(body: &str) -> Option<Vec<String>> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        return None;
    }

    Some(
        body.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('!') && !line.starts_with('['))
            .map(ToString::to_string)
            .collect(),
    )
}
