//! A running discovery scan on one hub.

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use pawlink_hub_connection::Subscription;

/// Yields each `CONNECTED_DEVICES` list reported by the scanned hub until
/// the scan deadline. Dropping it stops listening.
pub struct ScanSession {
    hub: String,
    request_id: String,
    deadline: Instant,
    rx: mpsc::UnboundedReceiver<Vec<String>>,
    subscription: Option<Subscription>,
    latest: Vec<String>,
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("hub", &self.hub)
            .field("request_id", &self.request_id)
            .field("deadline", &self.deadline)
            .field("latest", &self.latest)
            .finish_non_exhaustive()
    }
}

impl ScanSession {
    pub(crate) fn new(
        hub: String,
        request_id: String,
        deadline: Instant,
        rx: mpsc::UnboundedReceiver<Vec<String>>,
        subscription: Subscription,
    ) -> Self {
        Self {
            hub,
            request_id,
            deadline,
            rx,
            subscription: Some(subscription),
            latest: Vec::new(),
        }
    }

    pub fn hub(&self) -> &str {
        &self.hub
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// The most recent list received so far.
    pub fn latest(&self) -> &[String] {
        &self.latest
    }

    /// Waits for the hub's next visible-device list. `None` once the scan
    /// deadline has passed.
    pub async fn next(&mut self) -> Option<Vec<String>> {
        if self.subscription.is_none() {
            return None;
        }
        match tokio::time::timeout_at(self.deadline, self.rx.recv()).await {
            Ok(Some(list)) => {
                self.latest.clone_from(&list);
                Some(list)
            }
            Ok(None) | Err(_) => {
                self.stop_listening();
                None
            }
        }
    }

    /// Runs the scan to its deadline and returns the last reported list.
    pub async fn finish(mut self) -> Vec<String> {
        while self.next().await.is_some() {}
        std::mem::take(&mut self.latest)
    }

    /// Stops listening before the deadline.
    pub fn stop(mut self) {
        self.stop_listening();
    }

    fn stop_listening(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
            debug!(hub = %self.hub, request_id = %self.request_id, "scan ended");
        }
    }
}
