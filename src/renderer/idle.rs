//! Network quiescence detection.
//!
//! A page counts as settled once it has had no requests in flight for a
//! continuous idle window. Requests are tracked by id so duplicate or stray
//! completion events cannot drive the count negative.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::watch;

#[derive(Debug)]
pub struct NetworkIdle {
    in_flight: watch::Sender<HashSet<String>>,
}

impl Default for NetworkIdle {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkIdle {
    #[must_use]
    pub fn new() -> Self {
        let (in_flight, _) = watch::channel(HashSet::new());
        Self { in_flight }
    }

    /// Record that a request was sent.
    pub fn request_started(&self, request_id: &str) {
        self.in_flight
            .send_if_modified(|ids| ids.insert(request_id.to_string()));
    }

    /// Record that a request finished or failed.
    pub fn request_finished(&self, request_id: &str) {
        self.in_flight.send_if_modified(|ids| ids.remove(request_id));
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.borrow().len()
    }

    /// Resolve once no request has been in flight for `window`.
    ///
    /// Never resolves on a page that keeps the network busy; callers bound
    /// this with their own timeout.
    pub async fn settled(&self, window: Duration) {
        let mut rx = self.in_flight.subscribe();
        loop {
            if rx.wait_for(|ids| ids.is_empty()).await.is_err() {
                return;
            }
            match tokio::time::timeout(window, rx.changed()).await {
                // Quiet for the whole window.
                Err(_) | Ok(Err(_)) => return,
                Ok(Ok(())) => {}
            }
        }
    }
}
