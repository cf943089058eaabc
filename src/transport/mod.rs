//! Remote process-variable transport seam.
//!
//! The control core never speaks a wire protocol itself. Everything it needs
//! from the control system is expressed by the [`ChannelAccess`] trait:
//!
//! - `create_channel` starts an asynchronous connection and later reports it
//!   through the supplied [`ConnectionSink`]
//! - `get` / `put` are request/response operations on a live channel
//! - `put_with_callback` reports completion through a [`PutCallback`]
//! - `set_monitor` subscribes a [`MonitorListener`] to value changes
//!
//! Like the capability traits of the hardware layer, the trait is async, is
//! `Send + Sync`, and uses `anyhow::Result`; typed errors are produced by the
//! registry at the boundary.
//!
//! [`SimulatedTransport`] is an in-memory implementation used by the tests,
//! the benchmarks and the `simulate` CLI command.

pub mod simulated;
pub mod value;

pub use simulated::{ConnectPolicy, Fault, SimulatedTransport};
pub use value::{ChannelValue, ValueKind};

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Opaque identity of a channel inside one transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    id: u64,
    name: Arc<str>,
}

impl ChannelHandle {
    /// Create a handle; only transports should need this
    pub fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: Arc::from(name),
        }
    }

    /// Transport-assigned identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Process variable name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Completion status delivered to a [`PutCallback`].
#[derive(Debug, Clone, PartialEq)]
pub enum PutStatus {
    /// The write was processed to completion
    Success,
    /// The remote end reported failure
    Failure(String),
}

impl PutStatus {
    /// True when the put completed normally
    pub fn is_success(&self) -> bool {
        matches!(self, PutStatus::Success)
    }
}

/// One-shot completion callback for `put_with_callback`.
pub type PutCallback = Box<dyn FnOnce(PutStatus) + Send + 'static>;

/// Listener invoked with every pushed value of a monitored channel.
pub type MonitorListener = Arc<dyn Fn(ChannelValue) + Send + Sync + 'static>;

/// Connection state change reported by a transport.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The channel became live; carries its native kind
    Connected {
        /// Channel that connected
        handle: ChannelHandle,
        /// Kind the remote side serves
        native_kind: ValueKind,
    },
    /// A previously live channel lost its link
    Disconnected {
        /// Channel that dropped
        handle: ChannelHandle,
    },
}

/// Where a transport delivers connection events.
///
/// Sending never blocks, so a transport callback thread cannot be stalled by
/// whoever consumes the events.
#[derive(Clone)]
pub struct ConnectionSink {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionSink {
    /// Wrap an unbounded sender
    pub fn new(tx: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        Self { tx }
    }

    /// Report that `handle` is connected
    pub fn connected(&self, handle: ChannelHandle, native_kind: ValueKind) {
        if self
            .tx
            .send(ConnectionEvent::Connected {
                handle,
                native_kind,
            })
            .is_err()
        {
            tracing::debug!("connection event dropped, consumer gone");
        }
    }

    /// Report that `handle` lost its connection
    pub fn disconnected(&self, handle: ChannelHandle) {
        if self
            .tx
            .send(ConnectionEvent::Disconnected { handle })
            .is_err()
        {
            tracing::debug!("disconnection event dropped, consumer gone");
        }
    }
}

impl fmt::Debug for ConnectionSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Client contract for a remote process-variable system.
#[async_trait]
pub trait ChannelAccess: Send + Sync {
    /// Start connecting to `name`.
    ///
    /// Returns as soon as the channel exists locally; the transport reports
    /// the connection (possibly much later) through `sink`.
    async fn create_channel(&self, name: &str, sink: ConnectionSink) -> Result<ChannelHandle>;

    /// Read the current value
    async fn get(&self, handle: &ChannelHandle) -> Result<ChannelValue>;

    /// Fire-and-forget write
    async fn put(&self, handle: &ChannelHandle, value: ChannelValue) -> Result<()>;

    /// Write and be told when the remote end has finished processing it.
    ///
    /// An `Err` means the write was never issued and `callback` will not run.
    async fn put_with_callback(
        &self,
        handle: &ChannelHandle,
        value: ChannelValue,
        callback: PutCallback,
    ) -> Result<()>;

    /// Subscribe to value changes delivered as `kind`
    async fn set_monitor(
        &self,
        handle: &ChannelHandle,
        kind: ValueKind,
        listener: MonitorListener,
    ) -> Result<()>;

    /// Release the channel
    async fn destroy(&self, handle: &ChannelHandle) -> Result<()>;
}
