//! Request/reply correlation over the fire-and-forget relay.
//!
//! A command is sent as a `control_request`; its outcome arrives later as
//! an ordinary server event. [`CommandCorrelator`] subscribes for the reply
//! *before* sending, then waits for the first matching event or a timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use pawlink_protocol::{CommandRequest, EventKind, ServerEvent, addresses_match};

use crate::bus::{Handler, Subscription};
use crate::error::CommandError;
use crate::realtime::Realtime;

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// Builds a request id unique within the process:
/// `{purpose}_{hub}_{device}_{unix_millis}_{seq}`.
pub fn request_id(purpose: &str, hub_id: &str, device_id: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{purpose}_{hub_id}_{device_id}_{millis}_{seq}")
}

/// Matches the `command_result` that answers `req`.
///
/// An echoed `requestId` decides on its own. Without one, the result must
/// name the same hub and, if it names a device, the same device.
pub fn reply_for(req: &CommandRequest) -> impl Fn(&ServerEvent) -> bool + Send + Sync + 'static {
    let request_id = req.request_id.clone();
    let hub_id = req.hub_id.clone();
    let device_id = req.device_id.clone();
    move |event| {
        let ServerEvent::CommandResult(result) = event else {
            return false;
        };
        match &result.request_id {
            Some(id) => *id == request_id,
            None => {
                result
                    .hub_id
                    .as_deref()
                    .is_some_and(|h| addresses_match(h, &hub_id))
                    && result
                        .device_id
                        .as_deref()
                        .is_none_or(|d| addresses_match(d, &device_id))
            }
        }
    }
}

/// Sends commands and awaits their correlated replies.
#[derive(Clone)]
pub struct CommandCorrelator {
    link: Arc<dyn Realtime>,
}

impl CommandCorrelator {
    pub fn new(link: Arc<dyn Realtime>) -> Self {
        Self { link }
    }

    /// Subscribes for the reply, sends `req`, and returns a handle to wait
    /// on. Fails immediately if the send fails; the subscription is removed
    /// in that case.
    pub async fn begin<M>(
        &self,
        req: &CommandRequest,
        reply_kind: EventKind,
        matcher: M,
        timeout: Duration,
    ) -> Result<PendingReply, CommandError>
    where
        M: Fn(&ServerEvent) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let handler: Handler = Arc::new(move |event| {
            if !matcher(event) {
                return;
            }
            let taken = slot.lock().ok().and_then(|mut s| s.take());
            if let Some(tx) = taken {
                let _ = tx.send(event.clone());
            }
        });

        let subscription = self.link.subscribe(reply_kind, handler);
        self.link.control_request(req).await?;
        debug!(request_id = %req.request_id, ?timeout, "awaiting reply");

        Ok(PendingReply {
            request_id: req.request_id.clone(),
            rx,
            subscription: Some(subscription),
            deadline: Instant::now() + timeout,
            timeout,
        })
    }

    /// Sends `req` and waits for the first event accepted by `matcher`.
    pub async fn issue<M>(
        &self,
        req: &CommandRequest,
        reply_kind: EventKind,
        matcher: M,
        timeout: Duration,
    ) -> Result<ServerEvent, CommandError>
    where
        M: Fn(&ServerEvent) -> bool + Send + Sync + 'static,
    {
        self.begin(req, reply_kind, matcher, timeout)
            .await?
            .wait()
            .await
    }

    /// Sends `req` without waiting for any reply.
    pub async fn fire(&self, req: &CommandRequest) -> Result<(), CommandError> {
        self.link.control_request(req).await?;
        Ok(())
    }

    pub fn link(&self) -> &Arc<dyn Realtime> {
        &self.link
    }
}

/// A sent command whose reply has not been collected yet.
///
/// Dropping it removes the reply subscription.
pub struct PendingReply {
    request_id: String,
    rx: oneshot::Receiver<ServerEvent>,
    subscription: Option<Subscription>,
    deadline: Instant,
    timeout: Duration,
}

impl PendingReply {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Waits for the reply until the deadline set when the command was sent.
    pub async fn wait(mut self) -> Result<ServerEvent, CommandError> {
        let outcome = tokio::time::timeout_at(self.deadline, &mut self.rx).await;
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        match outcome {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(CommandError::Abandoned {
                request_id: self.request_id,
            }),
            Err(_) => {
                debug!(request_id = %self.request_id, "reply timed out");
                Err(CommandError::Timeout {
                    request_id: self.request_id,
                    after: self.timeout,
                })
            }
        }
    }

    /// Stops waiting. A reply that arrives later is ignored.
    pub fn cancel(mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        debug!(request_id = %self.request_id, "reply wait cancelled");
    }
}
