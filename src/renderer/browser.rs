//! Headless Chromium rendering.
//!
//! Every render launches its own browser with its own profile directory so
//! concurrent sessions share no state. The browser is torn down once the
//! capture finishes, fails, or is cancelled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    MediaFeature, ScreenOrientation, ScreenOrientationType, SetDeviceMetricsOverrideParams,
    SetTouchEmulationEnabledParams,
};
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
    SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, GetLayoutMetricsParams,
    Viewport as ClipRect,
};
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};
use uuid::Uuid;

use super::idle::NetworkIdle;
use super::scheduler::RenderTicket;
use super::session::{ActiveSessions, SessionGuard, SessionState, SessionTracker};
use crate::blocking::{BlockRuleSet, RequestVerdict};
use crate::config::Config;
use crate::constants::{LOSSY_QUALITY, RENDER_USER_AGENT};
use crate::error::ScreenshotError;
use crate::request::{ImageFormat, RenderRequest, ResourceType};

/// Default ceiling for a page to load and go quiet.
pub const DEFAULT_NAVIGATION_TIMEOUT_SECS: u64 = 30;

/// Default quiet period that counts as network idle.
pub const DEFAULT_NETWORK_IDLE_MS: u64 = 500;

/// Default wait for a selector to match.
pub const DEFAULT_SELECTOR_TIMEOUT_SECS: u64 = 10;

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Hides the usual headless automation tells before any page script runs.
const STEALTH_SCRIPT: &str = r"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined, configurable: true });
window.chrome = window.chrome || { runtime: {}, loadTimes: function() {}, csi: function() {}, app: {} };
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'], configurable: true });
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {
    window.navigator.permissions.query = (parameters) => (
        parameters.name === 'notifications'
            ? Promise.resolve({ state: Notification.permission })
            : originalQuery(parameters)
    );
}
";

/// Produces image bytes for a normalized request.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Render `request` with `rules` applied to every outgoing request.
    ///
    /// `ticket` is the scheduler slot for this render. Engines keep it until
    /// every resource the render started has been released, including
    /// teardown that outlives a cancelled call.
    async fn render(
        &self,
        request: &RenderRequest,
        rules: Arc<BlockRuleSet>,
        ticket: RenderTicket,
    ) -> Result<Vec<u8>, ScreenshotError>;
}

/// Browser settings shared by every session.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to Chrome/Chromium executable (None for auto-detection).
    pub chrome_path: Option<String>,
    /// Ceiling for navigation plus network quiescence.
    pub navigation_timeout: Duration,
    /// Quiet period that counts as network idle.
    pub network_idle: Duration,
    /// How long to wait for a selector to match.
    pub selector_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            navigation_timeout: Duration::from_secs(DEFAULT_NAVIGATION_TIMEOUT_SECS),
            network_idle: Duration::from_millis(DEFAULT_NETWORK_IDLE_MS),
            selector_timeout: Duration::from_secs(DEFAULT_SELECTOR_TIMEOUT_SECS),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            chrome_path: config.chrome_path.clone(),
            navigation_timeout: config.navigation_timeout,
            network_idle: config.network_idle,
            selector_timeout: config.selector_timeout,
        }
    }
}

/// [`BrowserEngine`] backed by a local headless Chromium.
#[derive(Debug, Clone)]
pub struct ChromiumEngine {
    config: EngineConfig,
    active: ActiveSessions,
}

impl ChromiumEngine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            active: ActiveSessions::new(),
        }
    }

    /// Sessions currently between launch and close.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.active.current()
    }

    async fn launch(
        &self,
        request: &RenderRequest,
        ticket: RenderTicket,
    ) -> Result<SessionGuard, ScreenshotError> {
        let (width, height) = request.css_viewport();
        let profile_dir =
            std::env::temp_dir().join(format!("screenshot-cache-{}", Uuid::new_v4().simple()));

        let mut config_builder = BrowserConfig::builder()
            .window_size(width, height)
            .viewport(None::<Viewport>)
            .user_data_dir(&profile_dir)
            .request_timeout(self.config.navigation_timeout)
            .no_sandbox()
            .disable_default_args()
            .arg("--headless=new")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-software-rasterizer")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-extensions")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--mute-audio")
            .arg("--hide-scrollbars");

        if let Some(ref chrome_path) = self.config.chrome_path {
            config_builder = config_builder.chrome_executable(chrome_path);
        }

        let browser_config = config_builder
            .build()
            .map_err(|e| ScreenshotError::Browser(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = match Browser::launch(browser_config).await {
            Ok(launched) => launched,
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&profile_dir).await;
                return Err(e.into());
            }
        };

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    trace!("Browser handler error: {e}");
                }
            }
        });

        Ok(SessionGuard::new(
            &request.url,
            browser,
            handler_task,
            profile_dir,
            ticket,
        ))
    }

    async fn drive(
        &self,
        session: &SessionGuard,
        tracker: &mut SessionTracker,
        request: &RenderRequest,
        rules: Arc<BlockRuleSet>,
    ) -> Result<Vec<u8>, ScreenshotError> {
        let browser = session
            .browser()
            .ok_or_else(|| ScreenshotError::Browser("browser already closed".to_string()))?;

        tracker.advance(SessionState::Configuring);
        let page = browser.new_page("about:blank").await?;
        let mut tasks = PageTasks::default();
        configure_page(&page, request).await?;
        if rules.is_active() {
            tasks.push(install_interception(&page, &request.url, rules).await?);
        }
        let (idle, idle_task) = track_network(&page).await?;
        tasks.push(idle_task);

        tracker.advance(SessionState::Navigating);
        self.navigate(&page, &request.url, &idle).await?;

        tracker.advance(SessionState::Capturing);
        self.capture(&page, request).await
    }

    async fn navigate(&self, page: &Page, url: &str, idle: &NetworkIdle) -> Result<(), ScreenshotError> {
        let timeout = self.config.navigation_timeout;
        let timed_out = || ScreenshotError::NavigationTimeout {
            url: url.to_string(),
            timeout_secs: timeout.as_secs(),
        };

        let load = async {
            page.goto(url).await.map_err(|e| match e {
                CdpError::Timeout => timed_out(),
                other => ScreenshotError::from(other),
            })?;
            idle.settled(self.config.network_idle).await;
            Ok::<(), ScreenshotError>(())
        };

        tokio::time::timeout(timeout, load)
            .await
            .map_err(|_| timed_out())?
    }

    async fn capture(&self, page: &Page, request: &RenderRequest) -> Result<Vec<u8>, ScreenshotError> {
        let mut params = ScreenshotParams::builder().format(capture_format(request.format));
        if request.format.is_lossy() {
            params = params.quality(LOSSY_QUALITY);
        }

        if let Some(selector) = &request.selector {
            let element = self.wait_for_selector(page, selector).await?;
            let clip = element_clip(page, &element).await?;
            params = params.clip(clip).capture_beyond_viewport(true);
        }

        let bytes = page
            .screenshot(params.build())
            .await
            .map_err(|e| ScreenshotError::Capture(e.to_string()))?;

        if bytes.is_empty() {
            return Err(ScreenshotError::Capture(
                "encoder produced no bytes".to_string(),
            ));
        }
        Ok(bytes)
    }

    async fn wait_for_selector(&self, page: &Page, selector: &str) -> Result<Element, ScreenshotError> {
        let deadline = Instant::now() + self.config.selector_timeout;
        loop {
            match page.find_element(selector).await {
                Ok(element) => return Ok(element),
                Err(e) if Instant::now() >= deadline => {
                    return Err(ScreenshotError::Capture(format!(
                        "selector '{selector}' did not match within {}s: {e}",
                        self.config.selector_timeout.as_secs()
                    )));
                }
                Err(_) => tokio::time::sleep(SELECTOR_POLL_INTERVAL).await,
            }
        }
    }
}

#[async_trait]
impl BrowserEngine for ChromiumEngine {
    async fn render(
        &self,
        request: &RenderRequest,
        rules: Arc<BlockRuleSet>,
        ticket: RenderTicket,
    ) -> Result<Vec<u8>, ScreenshotError> {
        let started = Instant::now();
        let mut tracker = SessionTracker::new(&request.url, self.active.clone());

        tracker.advance(SessionState::Launching);
        debug!(url = %request.url, active_sessions = self.active_sessions(), "Launching browser");
        let session = match self.launch(request, ticket).await {
            Ok(session) => session,
            Err(e) => {
                tracker.fail(e.kind());
                return Err(e);
            }
        };

        let result = self.drive(&session, &mut tracker, request, rules).await;
        session.close().await;

        match result {
            Ok(bytes) => {
                tracker.advance(SessionState::Closed);
                info!(
                    url = %request.url,
                    size = bytes.len(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "Screenshot captured"
                );
                Ok(bytes)
            }
            Err(e) => {
                tracker.fail(e.kind());
                Err(e)
            }
        }
    }
}

/// Background tasks tied to one page; aborted when the render ends.
#[derive(Default)]
struct PageTasks(Vec<JoinHandle<()>>);

impl PageTasks {
    fn push(&mut self, task: JoinHandle<()>) {
        self.0.push(task);
    }
}

impl Drop for PageTasks {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

async fn configure_page(page: &Page, request: &RenderRequest) -> Result<(), ScreenshotError> {
    page.execute(SetUserAgentOverrideParams::new(RENDER_USER_AGENT))
        .await?;
    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
        .await?;

    let (width, height) = request.css_viewport();
    let mut metrics = SetDeviceMetricsOverrideParams::builder()
        .width(i64::from(width))
        .height(i64::from(height))
        .device_scale_factor(request.device_scale_factor)
        .mobile(request.is_mobile);
    if request.is_landscape {
        metrics = metrics.screen_orientation(ScreenOrientation::new(
            ScreenOrientationType::LandscapePrimary,
            90,
        ));
    }
    let metrics = metrics
        .build()
        .map_err(|e| ScreenshotError::Browser(format!("invalid device metrics: {e}")))?;
    page.execute(metrics).await?;
    page.execute(SetTouchEmulationEnabledParams::new(request.has_touch))
        .await?;

    page.emulate_media_features(vec![
        MediaFeature::new(
            "prefers-color-scheme",
            request.prefers_color_scheme.as_str(),
        ),
        MediaFeature::new(
            "prefers-reduced-motion",
            request.prefers_reduced_motion.as_str(),
        ),
    ])
    .await?;

    Ok(())
}

/// Pause every request and let `rules` decide whether it proceeds.
async fn install_interception(
    page: &Page,
    page_url: &str,
    rules: Arc<BlockRuleSet>,
) -> Result<JoinHandle<()>, ScreenshotError> {
    let mut paused = page.event_listener::<EventRequestPaused>().await?;
    page.execute(fetch::EnableParams::default()).await?;
    debug!(url = %page_url, rules = ?rules, "Request interception installed");

    let page = page.clone();
    let page_url = page_url.to_string();
    Ok(tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let resource = ResourceType::from_str(event.resource_type.as_ref());
            let outcome = match rules.verdict(&event.request.url, &page_url, resource) {
                RequestVerdict::Continue => page
                    .execute(ContinueRequestParams::new(event.request_id.clone()))
                    .await
                    .map(|_| ()),
                RequestVerdict::Abort(reason) => {
                    trace!(url = %event.request.url, reason = ?reason, "Blocked request");
                    page.execute(FailRequestParams::new(
                        event.request_id.clone(),
                        ErrorReason::BlockedByClient,
                    ))
                    .await
                    .map(|_| ())
                }
            };
            if let Err(e) = outcome {
                trace!(url = %event.request.url, error = %e, "Failed to resolve paused request");
            }
        }
    }))
}

/// Feed the page's network events into a [`NetworkIdle`] tracker.
async fn track_network(page: &Page) -> Result<(Arc<NetworkIdle>, JoinHandle<()>), ScreenshotError> {
    let mut sent = page.event_listener::<EventRequestWillBeSent>().await?;
    let mut finished = page.event_listener::<EventLoadingFinished>().await?;
    let mut failed = page.event_listener::<EventLoadingFailed>().await?;

    let idle = Arc::new(NetworkIdle::new());
    let tracker = Arc::clone(&idle);
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = sent.next() => tracker.request_started(event.request_id.inner()),
                Some(event) = finished.next() => tracker.request_finished(event.request_id.inner()),
                Some(event) = failed.next() => tracker.request_finished(event.request_id.inner()),
                else => break,
            }
        }
    });

    Ok((idle, task))
}

/// Clip rectangle covering `element`, in document coordinates.
async fn element_clip(page: &Page, element: &Element) -> Result<ClipRect, ScreenshotError> {
    let bounds = element
        .bounding_box()
        .await
        .map_err(|e| ScreenshotError::Capture(format!("failed to measure element: {e}")))?;
    if bounds.width <= 0.0 || bounds.height <= 0.0 {
        return Err(ScreenshotError::Capture(
            "selector matched an element with empty bounds".to_string(),
        ));
    }

    // Element bounds are viewport-relative; the clip is page-relative.
    let metrics = page.execute(GetLayoutMetricsParams::default()).await?;
    let scroll = &metrics.result.css_visual_viewport;

    Ok(ClipRect {
        x: bounds.x + scroll.page_x,
        y: bounds.y + scroll.page_y,
        width: bounds.width,
        height: bounds.height,
        scale: 1.0,
    })
}

fn capture_format(format: ImageFormat) -> CaptureScreenshotFormat {
    match format {
        ImageFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
        ImageFormat::Png => CaptureScreenshotFormat::Png,
        ImageFormat::Webp => CaptureScreenshotFormat::Webp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.navigation_timeout, Duration::from_secs(30));
        assert_eq!(config.network_idle, Duration::from_millis(500));
        assert!(config.chrome_path.is_none());
    }

    #[test]
    fn test_from_config() {
        let mut app = Config::for_testing();
        app.chrome_path = Some("/usr/bin/chromium".to_string());
        let config = EngineConfig::from_config(&app);
        assert_eq!(config.chrome_path.as_deref(), Some("/usr/bin/chromium"));
        assert_eq!(config.navigation_timeout, app.navigation_timeout);
        assert_eq!(config.selector_timeout, app.selector_timeout);
    }

    #[test]
    fn test_capture_format_mapping() {
        assert_eq!(capture_format(ImageFormat::Jpeg), CaptureScreenshotFormat::Jpeg);
        assert_eq!(capture_format(ImageFormat::Png), CaptureScreenshotFormat::Png);
        assert_eq!(capture_format(ImageFormat::Webp), CaptureScreenshotFormat::Webp);
    }

    #[test]
    fn test_engine_starts_without_sessions() {
        let engine = ChromiumEngine::new(EngineConfig::default());
        assert_eq!(engine.active_sessions(), 0);
    }
}
