use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{NewScreenshot, Screenshot, ScreenshotStatus};
use crate::request::RenderRequest;

// ========== Screenshots ==========

/// Insert a screenshot row in `pending` state.
pub async fn insert_pending_screenshot(pool: &SqlitePool, new: &NewScreenshot<'_>) -> Result<()> {
    let req = new.request;
    let block_requests =
        serde_json::to_string(&req.block_requests).context("Failed to encode block_requests")?;
    let block_resources =
        serde_json::to_string(&req.block_resources).context("Failed to encode block_resources")?;

    sqlx::query(
        r"
        INSERT INTO screenshots (
            id, workspace_id, status, url, selector, width, height,
            is_mobile, is_landscape, has_touch, device_scale_factor, format,
            block_ads, block_cookie_banners, block_trackers,
            block_requests, block_resources,
            prefers_color_scheme, prefers_reduced_motion,
            is_cached, cache_ttl, cache_key, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(new.id)
    .bind(new.workspace_id)
    .bind(ScreenshotStatus::Pending.as_str())
    .bind(&req.url)
    .bind(&req.selector)
    .bind(i64::from(req.width))
    .bind(i64::from(req.height))
    .bind(req.is_mobile)
    .bind(req.is_landscape)
    .bind(req.has_touch)
    .bind(req.device_scale_factor)
    .bind(req.format.as_str())
    .bind(req.block_ads)
    .bind(req.block_cookie_banners)
    .bind(req.block_trackers)
    .bind(&block_requests)
    .bind(&block_resources)
    .bind(req.prefers_color_scheme.as_str())
    .bind(req.prefers_reduced_motion.as_str())
    .bind(req.is_cached)
    .bind(i64::from(req.cache_ttl))
    .bind(&req.cache_key)
    .bind(&new.created_at)
    .bind(&new.created_at)
    .execute(pool)
    .await
    .context("Failed to insert screenshot")?;

    Ok(())
}

/// Mark a screenshot as stored, recording how long the render took.
pub async fn set_screenshot_complete(pool: &SqlitePool, id: &str, duration_secs: f64) -> Result<()> {
    sqlx::query(
        r"
        UPDATE screenshots
        SET status = ?, duration = ?, updated_at = datetime('now')
        WHERE id = ?
        ",
    )
    .bind(ScreenshotStatus::Complete.as_str())
    .bind(duration_secs)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to mark screenshot complete")?;

    Ok(())
}

/// Mark a screenshot as failed. Failed rows never satisfy lookups.
pub async fn set_screenshot_failed(pool: &SqlitePool, id: &str, error_message: &str) -> Result<()> {
    sqlx::query(
        r"
        UPDATE screenshots
        SET status = ?, error_message = ?, updated_at = datetime('now')
        WHERE id = ?
        ",
    )
    .bind(ScreenshotStatus::Failed.as_str())
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to mark screenshot failed")?;

    Ok(())
}

/// Get a screenshot by ID.
pub async fn get_screenshot(pool: &SqlitePool, id: &str) -> Result<Option<Screenshot>> {
    sqlx::query_as("SELECT * FROM screenshots WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch screenshot")
}

/// Count screenshots of a workspace in the given status.
pub async fn count_screenshots(
    pool: &SqlitePool,
    workspace_id: &str,
    status: ScreenshotStatus,
) -> Result<i64> {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM screenshots WHERE workspace_id = ? AND status = ?")
            .bind(workspace_id)
            .bind(status.as_str())
            .fetch_one(pool)
            .await
            .context("Failed to count screenshots")?;
    Ok(row.0)
}

/// Find a complete, unexpired screenshot matching `request` in `workspace_id`.
///
/// Scalar fields are compared in SQL (`selector IS ?` so that NULL only
/// matches NULL; `cache_key` only when the request carries one). A row is
/// unexpired while `created_at + cache_ttl > now`. The two set-valued fields
/// are matched by containment: the stored set must include every member the
/// request asks for.
///
/// `now` uses the `YYYY-MM-DD HH:MM:SS` format (see [`super::format_timestamp`]).
pub async fn find_matching_screenshot(
    pool: &SqlitePool,
    workspace_id: &str,
    request: &RenderRequest,
    now: &str,
) -> Result<Option<Screenshot>> {
    let candidates: Vec<Screenshot> = sqlx::query_as(
        r"
        SELECT * FROM screenshots
        WHERE workspace_id = ?
          AND status = ?
          AND url = ?
          AND selector IS ?
          AND width = ?
          AND height = ?
          AND is_mobile = ?
          AND is_landscape = ?
          AND has_touch = ?
          AND device_scale_factor = ?
          AND format = ?
          AND block_ads = ?
          AND block_cookie_banners = ?
          AND block_trackers = ?
          AND prefers_color_scheme = ?
          AND prefers_reduced_motion = ?
          AND is_cached = ?
          AND cache_ttl = ?
          AND (? IS NULL OR cache_key = ?)
          AND datetime(created_at, '+' || cache_ttl || ' seconds') > ?
        ORDER BY created_at DESC
        ",
    )
    .bind(workspace_id)
    .bind(ScreenshotStatus::Complete.as_str())
    .bind(&request.url)
    .bind(&request.selector)
    .bind(i64::from(request.width))
    .bind(i64::from(request.height))
    .bind(request.is_mobile)
    .bind(request.is_landscape)
    .bind(request.has_touch)
    .bind(request.device_scale_factor)
    .bind(request.format.as_str())
    .bind(request.block_ads)
    .bind(request.block_cookie_banners)
    .bind(request.block_trackers)
    .bind(request.prefers_color_scheme.as_str())
    .bind(request.prefers_reduced_motion.as_str())
    .bind(request.is_cached)
    .bind(i64::from(request.cache_ttl))
    .bind(&request.cache_key)
    .bind(&request.cache_key)
    .bind(now)
    .fetch_all(pool)
    .await
    .context("Failed to look up matching screenshot")?;

    Ok(candidates
        .into_iter()
        .find(|candidate| candidate.covers_block_sets(request)))
}
