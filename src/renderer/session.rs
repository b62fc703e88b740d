//! Browser session lifecycle.
//!
//! Each render owns one browser for its whole life. The browser is closed on
//! every exit path: explicitly on success or error, and from `Drop` when the
//! render future is cancelled.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chromiumoxide::Browser;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::scheduler::RenderTicket;

/// Where a render session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Launching,
    Configuring,
    Navigating,
    Capturing,
    Closed,
    Failed,
}

impl SessionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Launching => "launching",
            Self::Configuring => "configuring",
            Self::Navigating => "navigating",
            Self::Capturing => "capturing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }

    /// Terminal states accept no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Whether a browser is (or may be) alive in this state.
    #[must_use]
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle | Self::Closed)
    }

    /// Legal forward transitions. `Failed` is reachable from any
    /// non-terminal state.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (from, Self::Failed) => !from.is_terminal(),
            (Self::Idle, Self::Launching)
            | (Self::Launching, Self::Configuring)
            | (Self::Configuring, Self::Navigating)
            | (Self::Navigating, Self::Capturing)
            | (Self::Capturing, Self::Closed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts sessions that are neither idle nor closed.
#[derive(Debug, Clone, Default)]
pub struct ActiveSessions(Arc<AtomicUsize>);

impl ActiveSessions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tracks one session's state and keeps [`ActiveSessions`] in step with it.
#[derive(Debug)]
pub struct SessionTracker {
    url: String,
    state: SessionState,
    active: ActiveSessions,
}

impl SessionTracker {
    #[must_use]
    pub fn new(url: &str, active: ActiveSessions) -> Self {
        Self {
            url: url.to_string(),
            state: SessionState::Idle,
            active,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next`. Illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!(url = %self.url, from = %self.state, to = %next, "Ignoring illegal session transition");
            return;
        }

        match (self.state.is_active(), next.is_active()) {
            (false, true) => {
                self.active.0.fetch_add(1, Ordering::SeqCst);
            }
            (true, false) => {
                self.active.0.fetch_sub(1, Ordering::SeqCst);
            }
            _ => {}
        }

        trace!(url = %self.url, from = %self.state, to = %next, "Session transition");
        self.state = next;
    }

    /// Move to `Failed` unless already terminal.
    pub fn fail(&mut self, reason: &str) {
        if self.state.is_terminal() {
            return;
        }
        debug!(url = %self.url, state = %self.state, reason = %reason, "Session failed");
        self.advance(SessionState::Failed);
    }
}

impl Drop for SessionTracker {
    fn drop(&mut self) {
        // A cancelled render never reaches a terminal state on its own.
        if !self.state.is_terminal() {
            self.fail("cancelled");
        }
        // Failed is still counted as active until the tracker goes away.
        if self.state == SessionState::Failed {
            self.active.0.fetch_sub(1, Ordering::SeqCst);
            self.state = SessionState::Closed;
        }
    }
}

/// Owns a launched browser, its CDP handler task, its throwaway profile and
/// the scheduler slot it runs under.
///
/// The slot is only given back once the browser process is gone, so the
/// number of live Chromium processes never exceeds the scheduler capacity.
pub struct SessionGuard {
    url: String,
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    profile_dir: PathBuf,
    ticket: Option<RenderTicket>,
    runtime_handle: Handle,
}

impl SessionGuard {
    #[must_use]
    pub fn new(
        url: &str,
        browser: Browser,
        handler: JoinHandle<()>,
        profile_dir: PathBuf,
        ticket: RenderTicket,
    ) -> Self {
        Self {
            url: url.to_string(),
            browser: Some(browser),
            handler: Some(handler),
            profile_dir,
            ticket: Some(ticket),
            runtime_handle: Handle::current(),
        }
    }

    /// The live browser; `None` once closed.
    #[must_use]
    pub fn browser(&self) -> Option<&Browser> {
        self.browser.as_ref()
    }

    /// Close the browser and wait for the process to exit.
    pub async fn close(mut self) {
        if let Some(browser) = self.browser.take() {
            shutdown_browser(browser, &self.url, &self.profile_dir).await;
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        drop(self.ticket.take());
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let handler = self.handler.take();
        let ticket = self.ticket.take();
        if let Some(browser) = self.browser.take() {
            let url = std::mem::take(&mut self.url);
            let profile_dir = std::mem::take(&mut self.profile_dir);
            // The handler has to keep running until the close command is sent.
            drop(release_after(
                &self.runtime_handle,
                async move {
                    shutdown_browser(browser, &url, &profile_dir).await;
                    if let Some(handler) = handler {
                        handler.abort();
                    }
                },
                ticket,
            ));
        } else if let Some(handler) = handler {
            handler.abort();
        }
    }
}

/// Run `teardown` in the background and give `ticket` back once it is done.
fn release_after<F>(handle: &Handle, teardown: F, ticket: Option<RenderTicket>) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    handle.spawn(async move {
        teardown.await;
        drop(ticket);
    })
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("url", &self.url)
            .field("open", &self.browser.is_some())
            .finish()
    }
}

async fn shutdown_browser(mut browser: Browser, url: &str, profile_dir: &Path) {
    if let Err(e) = browser.close().await {
        debug!(url = %url, error = %e, "Browser close failed, killing process");
        if let Some(Err(e)) = browser.kill().await {
            warn!(url = %url, error = %e, "Failed to kill browser process");
        }
    }
    if let Err(e) = browser.wait().await {
        debug!(url = %url, error = %e, "Failed to reap browser process");
    }
    if let Err(e) = tokio::fs::remove_dir_all(profile_dir).await {
        debug!(url = %url, path = %profile_dir.display(), error = %e, "Failed to remove browser profile");
    }
    trace!(url = %url, "Browser closed");
}
