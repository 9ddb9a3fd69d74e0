//! Object-safe view of the realtime link used by the store and workflows.

use std::future::Future;
use std::pin::Pin;

use pawlink_protocol::{CommandRequest, EventKind};

use crate::bus::{Handler, Subscription};
use crate::error::ConnectionError;

/// Boxed future returned by [`Realtime`] operations.
pub type LinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ConnectionError>> + Send + 'a>>;

/// The operations consumers need from the relay session.
///
/// Implemented by [`ConnectionManager`](crate::ConnectionManager) and by
/// [`LoopbackLink`](crate::LoopbackLink) for in-process use.
pub trait Realtime: Send + Sync {
    /// Ensures a session is up, sharing any attempt already in flight.
    fn connect(&self) -> LinkFuture<'_>;

    /// Sends a control request on the current session. Never connects.
    fn control_request<'a>(&'a self, req: &'a CommandRequest) -> LinkFuture<'a>;

    /// Registers a handler for one event kind.
    fn subscribe(&self, kind: EventKind, handler: Handler) -> Subscription;
}
