//! Integration tests for block-list subscriptions and rule compilation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use screenshot_cache::blocking::{
    BlockListCache, BlockListSources, BlockReason, RequestVerdict, RuleCompiler,
};
use screenshot_cache::error::ScreenshotError;
use screenshot_cache::request::{normalize, RawRenderRequest, ResourceType};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EASYLIST_SAMPLE: &str = "[Adblock Plus 2.0]
! Title: sample list
||ads.tracker-network.com^
/banner/*
";

fn sources_for(server: &MockServer) -> BlockListSources {
    BlockListSources {
        ads: vec![format!("{}/ads.txt", server.uri())],
        trackers: vec![
            format!("{}/ads.txt", server.uri()),
            format!("{}/privacy.txt", server.uri()),
        ],
        cookie_banners: vec![format!("{}/cookies.txt", server.uri())],
    }
}

#[tokio::test]
async fn test_cache_downloads_once_within_ttl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ads.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EASYLIST_SAMPLE))
        .expect(1)
        .mount(&server)
        .await;

    let cache = BlockListCache::new(Duration::from_secs(3600)).unwrap();
    let url = format!("{}/ads.txt", server.uri());

    let first = cache.get(&url).await.unwrap();
    let second = cache.get(&url).await.unwrap();

    assert_eq!(first.as_slice(), ["||ads.tracker-network.com^", "/banner/*"]);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.cached_count().await, 1);
}

#[tokio::test]
async fn test_cache_refreshes_after_ttl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ads.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EASYLIST_SAMPLE))
        .expect(2)
        .mount(&server)
        .await;

    let cache = BlockListCache::new(Duration::ZERO).unwrap();
    let url = format!("{}/ads.txt", server.uri());

    cache.get(&url).await.unwrap();
    cache.get(&url).await.unwrap();
}

#[tokio::test]
async fn test_fetch_failure_is_typed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ads.txt"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let cache = BlockListCache::new(Duration::from_secs(60)).unwrap();
    let url = format!("{}/ads.txt", server.uri());

    let err = cache.get(&url).await.unwrap_err();
    match err {
        ScreenshotError::BlockListFetch { source_url, .. } => assert_eq!(source_url, url),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(cache.cached_count().await, 0);
}

#[tokio::test]
async fn test_html_body_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ads.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<!DOCTYPE html><html>captive portal</html>"),
        )
        .mount(&server)
        .await;

    let cache = BlockListCache::new(Duration::from_secs(60)).unwrap();
    let err = cache
        .get(&format!("{}/ads.txt", server.uri()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "block_list_fetch");
}

#[tokio::test]
async fn test_compiler_without_toggles_fetches_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EASYLIST_SAMPLE))
        .expect(0)
        .mount(&server)
        .await;

    let cache = Arc::new(BlockListCache::new(Duration::from_secs(60)).unwrap());
    let compiler = RuleCompiler::new(cache, sources_for(&server));

    let request = normalize(&RawRenderRequest::for_url("https://example.com/")).unwrap();
    let rules = compiler.compile(&request).await.unwrap();
    assert!(!rules.is_active());
}

#[tokio::test]
async fn test_compiler_applies_all_rule_kinds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ads.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EASYLIST_SAMPLE))
        .mount(&server)
        .await;

    let cache = Arc::new(BlockListCache::new(Duration::from_secs(60)).unwrap());
    let compiler = RuleCompiler::new(cache, sources_for(&server));

    let raw = RawRenderRequest {
        block_ads: Some("true".to_string()),
        block_requests: Some("*://cdn.example.com/*.woff2".to_string()),
        block_resources: Some("image".to_string()),
        ..RawRenderRequest::for_url("https://example.com/")
    };
    let request = normalize(&raw).unwrap();
    let rules = compiler.compile(&request).await.unwrap();
    assert!(rules.is_active());

    let page = "https://example.com/";
    assert_eq!(
        rules.verdict("https://example.com/logo.png", page, Some(ResourceType::Image)),
        RequestVerdict::Abort(BlockReason::ResourceType)
    );
    assert_eq!(
        rules.verdict(
            "https://cdn.example.com/fonts/inter.woff2",
            page,
            Some(ResourceType::Font)
        ),
        RequestVerdict::Abort(BlockReason::Pattern)
    );
    assert_eq!(
        rules.verdict("https://ads.tracker-network.com/tag.js", page, Some(ResourceType::Script)),
        RequestVerdict::Abort(BlockReason::FilterList)
    );
    assert_eq!(
        rules.verdict("https://example.com/app.js", page, Some(ResourceType::Script)),
        RequestVerdict::Continue
    );
    assert_eq!(
        rules.verdict(page, page, Some(ResourceType::Document)),
        RequestVerdict::Continue
    );
}

#[tokio::test]
async fn test_compiler_fails_when_subscription_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cookies.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let cache = Arc::new(BlockListCache::new(Duration::from_secs(60)).unwrap());
    let compiler = RuleCompiler::new(cache, sources_for(&server));

    let raw = RawRenderRequest {
        block_cookie_banners: Some("1".to_string()),
        ..RawRenderRequest::for_url("https://example.com/")
    };
    let request = normalize(&raw).unwrap();
    let err = compiler.compile(&request).await.unwrap_err();
    assert!(matches!(err, ScreenshotError::BlockListFetch { .. }));
}

#[tokio::test(flavor = "current_thread")]
async fn test_large_lists_compile_off_the_runtime() {
    let server = MockServer::start().await;
    let body: String = (0..20_000)
        .map(|i| format!("||ad{i}.tracker-network.com^$third-party\n"))
        .collect();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let cache = Arc::new(BlockListCache::new(Duration::from_secs(3600)).unwrap());
    let compiler = RuleCompiler::new(cache, sources_for(&server));
    let raw = RawRenderRequest {
        block_ads: Some("true".to_string()),
        ..RawRenderRequest::for_url("https://example.com/")
    };
    let request = normalize(&raw).unwrap();

    // Warm the subscription cache so the next compile does no network I/O.
    compiler.compile(&request).await.unwrap();

    let compiled = Arc::new(AtomicBool::new(false));
    let compile_task = {
        let compiled = Arc::clone(&compiled);
        tokio::spawn(async move {
            let rules = compiler.compile(&request).await.unwrap();
            compiled.store(true, Ordering::SeqCst);
            rules
        })
    };
    // On a single-threaded runtime this only runs before the compile
    // finishes if the compile yields the thread.
    let other_request = {
        let compiled = Arc::clone(&compiled);
        tokio::spawn(async move { compiled.load(Ordering::SeqCst) })
    };

    let rules = compile_task.await.unwrap();
    assert!(!other_request.await.unwrap(), "compile blocked the runtime");
    assert_eq!(
        rules.verdict(
            "https://ad42.tracker-network.com/p.js",
            "https://example.com/",
            Some(ResourceType::Script)
        ),
        RequestVerdict::Abort(BlockReason::FilterList)
    );
}
