//! Origin policy: whether a workspace may screenshot a given URL.
//!
//! The decision itself belongs to the surrounding application; the renderer
//! only consumes the boolean.

use async_trait::async_trait;
use url::Url;

#[async_trait]
pub trait OriginPolicy: Send + Sync {
    async fn is_origin_allowed(&self, workspace_id: &str, url: &str) -> bool;
}

/// Permits every origin.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllOrigins;

#[async_trait]
impl OriginPolicy for AllowAllOrigins {
    async fn is_origin_allowed(&self, _workspace_id: &str, _url: &str) -> bool {
        true
    }
}

/// Permits hosts on a fixed list, including their subdomains.
///
/// The list applies to every workspace. An empty list permits nothing.
#[derive(Debug, Clone)]
pub struct HostAllowList {
    hosts: Vec<String>,
}

impl HostAllowList {
    #[must_use]
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().trim_start_matches("*.").to_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn allows_host(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.hosts
            .iter()
            .any(|allowed| host == *allowed || host.ends_with(&format!(".{allowed}")))
    }
}

#[async_trait]
impl OriginPolicy for HostAllowList {
    async fn is_origin_allowed(&self, _workspace_id: &str, url: &str) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| self.allows_host(h)))
            .unwrap_or(false)
    }
}
