//! Content blocking: filter list subscriptions, wildcard patterns and
//! resource-type filters compiled into one [`BlockRuleSet`] per render.

mod lists;
mod rules;

pub use lists::{BlockListCache, BlockListSources};
pub use rules::{BlockReason, BlockRuleSet, RequestVerdict, WildcardMatcher};

use std::sync::Arc;

use tracing::debug;

use crate::error::{ScreenshotError, ValidationError};
use crate::request::RenderRequest;

/// Builds the [`BlockRuleSet`] for a request.
#[derive(Debug, Clone)]
pub struct RuleCompiler {
    cache: Arc<BlockListCache>,
    sources: Arc<BlockListSources>,
}

impl RuleCompiler {
    #[must_use]
    pub fn new(cache: Arc<BlockListCache>, sources: BlockListSources) -> Self {
        Self {
            cache,
            sources: Arc::new(sources),
        }
    }

    /// Compile the rules for `request`.
    ///
    /// Subscriptions are served from the shared cache when fresh. Any list that
    /// cannot be fetched fails the whole compilation.
    ///
    /// # Errors
    ///
    /// Returns [`ScreenshotError::BlockListFetch`] for an unreachable or
    /// unparseable subscription, a validation error if the patterns cannot
    /// be compiled, or [`ScreenshotError::Internal`] if the filter engine
    /// build panics.
    pub async fn compile(&self, request: &RenderRequest) -> Result<BlockRuleSet, ScreenshotError> {
        let patterns = WildcardMatcher::new(&request.block_requests).map_err(|e| {
            ValidationError::InvalidValue {
                field: "block_requests",
                message: e.to_string(),
            }
        })?;

        let selected = self.sources.select(
            request.block_ads,
            request.block_cookie_banners,
            request.block_trackers,
        );

        let mut lists = Vec::with_capacity(selected.len());
        for source in &selected {
            lists.push(self.cache.get(source).await?);
        }
        let list_rules: usize = lists.iter().map(|list| list.len()).sum();

        let resources = request.block_resources.clone();
        let rules = if list_rules == 0 {
            BlockRuleSet::new(resources, patterns, &[])
        } else {
            // Building the filter engine is CPU-bound for large lists.
            tokio::task::spawn_blocking(move || BlockRuleSet::new(resources, patterns, &lists))
                .await
                .map_err(|e| ScreenshotError::Internal(format!("block rule compilation failed: {e}")))?
        };

        debug!(
            subscriptions = selected.len(),
            list_rules,
            patterns = request.block_requests.len(),
            resources = request.block_resources.len(),
            "Compiled block rules"
        );

        Ok(rules)
    }
}
