//! Integration tests for screenshot records and the dedup lookup.

use chrono::{Duration, Utc};
use screenshot_cache::db::{
    count_screenshots, find_matching_screenshot, format_timestamp, get_screenshot,
    insert_pending_screenshot, pool_size_for, set_screenshot_complete, set_screenshot_failed, Database,
    NewScreenshot, ScreenshotStatus,
};
use screenshot_cache::request::{normalize, RawRenderRequest, RenderRequest, ResourceType};
use tempfile::TempDir;

async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

fn request(url: &str) -> RenderRequest {
    normalize(&RawRenderRequest::for_url(url)).expect("valid request")
}

fn now() -> String {
    format_timestamp(Utc::now())
}

/// Insert a completed record created `age` ago.
async fn insert_complete(
    db: &Database,
    id: &str,
    workspace_id: &str,
    request: &RenderRequest,
    age: Duration,
) {
    let new = NewScreenshot {
        id,
        workspace_id,
        request,
        created_at: format_timestamp(Utc::now() - age),
    };
    insert_pending_screenshot(db.pool(), &new)
        .await
        .expect("Failed to insert screenshot");
    set_screenshot_complete(db.pool(), id, 1.25)
        .await
        .expect("Failed to complete screenshot");
}

#[tokio::test]
async fn test_insert_and_get_screenshot() {
    let (db, _temp_dir) = setup_db().await;
    let mut req = request("https://example.com/");
    req.block_requests = vec!["*.js".to_string()];
    req.block_resources.insert(ResourceType::Image);

    insert_complete(&db, "rec1", "ws", &req, Duration::zero()).await;

    let record = get_screenshot(db.pool(), "rec1")
        .await
        .expect("Failed to get screenshot")
        .expect("Screenshot not found");

    assert_eq!(record.status(), Some(ScreenshotStatus::Complete));
    assert_eq!(record.url, "https://example.com/");
    assert_eq!(record.width, 1920);
    assert_eq!(record.format, "jpeg");
    assert_eq!(record.cache_ttl, 3600);
    assert_eq!(record.duration, Some(1.25));
    assert_eq!(record.block_request_patterns(), vec!["*.js".to_string()]);
    assert!(record.block_resource_types().contains(&ResourceType::Image));
}

#[tokio::test]
async fn test_lookup_matches_equivalent_request() {
    let (db, _temp_dir) = setup_db().await;
    let req = request("https://example.com/");
    insert_complete(&db, "rec1", "ws", &req, Duration::minutes(5)).await;

    let found = find_matching_screenshot(db.pool(), "ws", &req, &now())
        .await
        .expect("lookup failed")
        .expect("expected a match");
    assert_eq!(found.id, "rec1");
}

#[tokio::test]
async fn test_lookup_is_scoped_to_workspace() {
    let (db, _temp_dir) = setup_db().await;
    let req = request("https://example.com/");
    insert_complete(&db, "rec1", "ws_a", &req, Duration::zero()).await;

    let found = find_matching_screenshot(db.pool(), "ws_b", &req, &now())
        .await
        .expect("lookup failed");
    assert!(found.is_none());
}

#[tokio::test]
async fn test_lookup_respects_ttl() {
    let (db, _temp_dir) = setup_db().await;
    let req = request("https://example.com/");
    // Default TTL is one hour.
    insert_complete(&db, "old", "ws", &req, Duration::hours(2)).await;

    let found = find_matching_screenshot(db.pool(), "ws", &req, &now())
        .await
        .expect("lookup failed");
    assert!(found.is_none(), "expired record must not match");

    insert_complete(&db, "fresh", "ws", &req, Duration::minutes(59)).await;
    let found = find_matching_screenshot(db.pool(), "ws", &req, &now())
        .await
        .expect("lookup failed")
        .expect("fresh record should match");
    assert_eq!(found.id, "fresh");
}

#[tokio::test]
async fn test_lookup_sensitive_to_each_scalar_field() {
    let (db, _temp_dir) = setup_db().await;
    let base = request("https://example.com/");
    insert_complete(&db, "rec1", "ws", &base, Duration::zero()).await;

    let mut variants: Vec<(&str, RenderRequest)> = Vec::new();

    let mut v = base.clone();
    v.url = "https://example.com/other".to_string();
    variants.push(("url", v));

    let mut v = base.clone();
    v.width = 1080;
    variants.push(("width", v));

    let mut v = base.clone();
    v.height = 720;
    variants.push(("height", v));

    let mut v = base.clone();
    v.is_mobile = true;
    variants.push(("is_mobile", v));

    let mut v = base.clone();
    v.has_touch = true;
    variants.push(("has_touch", v));

    let mut v = base.clone();
    v.device_scale_factor = 2.0;
    variants.push(("device_scale_factor", v));

    let mut v = base.clone();
    v.format = screenshot_cache::request::ImageFormat::Png;
    variants.push(("format", v));

    let mut v = base.clone();
    v.block_ads = true;
    variants.push(("block_ads", v));

    let mut v = base.clone();
    v.is_cached = !base.is_cached;
    variants.push(("is_cached", v));

    let mut v = base.clone();
    v.cache_ttl = 7200;
    variants.push(("cache_ttl", v));

    for (field, variant) in variants {
        let found = find_matching_screenshot(db.pool(), "ws", &variant, &now())
            .await
            .expect("lookup failed");
        assert!(found.is_none(), "changing {field} must miss");
    }
}

#[tokio::test]
async fn test_null_selector_only_matches_null() {
    let (db, _temp_dir) = setup_db().await;
    let plain = request("https://example.com/");
    insert_complete(&db, "plain", "ws", &plain, Duration::zero()).await;

    let mut scoped = plain.clone();
    scoped.selector = Some("#main".to_string());
    let found = find_matching_screenshot(db.pool(), "ws", &scoped, &now())
        .await
        .expect("lookup failed");
    assert!(found.is_none(), "selector request must not match a full-viewport record");

    insert_complete(&db, "scoped", "ws", &scoped, Duration::zero()).await;
    let found = find_matching_screenshot(db.pool(), "ws", &plain, &now())
        .await
        .expect("lookup failed")
        .expect("plain record should still match");
    assert_eq!(found.id, "plain");
}

#[tokio::test]
async fn test_cache_key_compared_only_when_present() {
    let (db, _temp_dir) = setup_db().await;
    let mut keyed = request("https://example.com/");
    keyed.cache_key = Some("v1".to_string());
    insert_complete(&db, "keyed", "ws", &keyed, Duration::zero()).await;

    let mut other_key = keyed.clone();
    other_key.cache_key = Some("v2".to_string());
    assert!(find_matching_screenshot(db.pool(), "ws", &other_key, &now())
        .await
        .expect("lookup failed")
        .is_none());

    let mut no_key = keyed.clone();
    no_key.cache_key = None;
    let found = find_matching_screenshot(db.pool(), "ws", &no_key, &now())
        .await
        .expect("lookup failed")
        .expect("request without a key ignores the stored key");
    assert_eq!(found.id, "keyed");
}

#[tokio::test]
async fn test_block_sets_match_by_containment() {
    let (db, _temp_dir) = setup_db().await;
    let mut stored = request("https://example.com/");
    stored.block_requests = vec!["*ads*".to_string(), "*.gif".to_string()];
    stored.block_resources.insert(ResourceType::Image);
    stored.block_resources.insert(ResourceType::Font);
    insert_complete(&db, "rec1", "ws", &stored, Duration::zero()).await;

    // Same members in a different order.
    let mut reordered = stored.clone();
    reordered.block_requests.reverse();
    assert!(find_matching_screenshot(db.pool(), "ws", &reordered, &now())
        .await
        .expect("lookup failed")
        .is_some());

    // A subset is covered.
    let mut subset = stored.clone();
    subset.block_requests = vec!["*.gif".to_string()];
    subset.block_resources.remove(&ResourceType::Font);
    assert!(find_matching_screenshot(db.pool(), "ws", &subset, &now())
        .await
        .expect("lookup failed")
        .is_some());

    // An extra member is not.
    let mut superset = stored.clone();
    superset.block_resources.insert(ResourceType::Media);
    assert!(find_matching_screenshot(db.pool(), "ws", &superset, &now())
        .await
        .expect("lookup failed")
        .is_none());
}

#[tokio::test]
async fn test_pending_and_failed_rows_never_match() {
    let (db, _temp_dir) = setup_db().await;
    let req = request("https://example.com/");

    let pending = NewScreenshot {
        id: "pending",
        workspace_id: "ws",
        request: &req,
        created_at: now(),
    };
    insert_pending_screenshot(db.pool(), &pending)
        .await
        .expect("insert failed");

    let failed = NewScreenshot {
        id: "failed",
        workspace_id: "ws",
        request: &req,
        created_at: now(),
    };
    insert_pending_screenshot(db.pool(), &failed)
        .await
        .expect("insert failed");
    set_screenshot_failed(db.pool(), "failed", "upload refused")
        .await
        .expect("update failed");

    assert!(find_matching_screenshot(db.pool(), "ws", &req, &now())
        .await
        .expect("lookup failed")
        .is_none());

    assert_eq!(
        count_screenshots(db.pool(), "ws", ScreenshotStatus::Pending)
            .await
            .expect("count failed"),
        1
    );
    let failed = get_screenshot(db.pool(), "failed")
        .await
        .expect("get failed")
        .expect("row exists");
    assert_eq!(failed.status(), Some(ScreenshotStatus::Failed));
    assert_eq!(failed.error_message.as_deref(), Some("upload refused"));
}

#[test]
fn test_pool_sized_for_render_concurrency() {
    assert_eq!(pool_size_for(10), 14);
    assert_eq!(pool_size_for(1), 5);
    assert_eq!(pool_size_for(usize::MAX), u32::MAX);
}

#[tokio::test]
async fn test_connect_with_pool_size() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db = Database::connect(&temp_dir.path().join("test.sqlite"), pool_size_for(3))
        .await
        .expect("Failed to create database");
    assert_eq!(db.pool().options().get_max_connections(), 7);

    // Migrations ran and the file accepts writes.
    let req = request("https://example.com/");
    insert_complete(&db, "rec1", "ws", &req, Duration::zero()).await;
    assert!(get_screenshot(db.pool(), "rec1").await.unwrap().is_some());
}
