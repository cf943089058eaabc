//! Registry-tracked channel handles.

use crate::error::{AppResult, IdError};
use crate::transport::{
    ChannelAccess, ChannelHandle, ChannelValue, MonitorListener, PutCallback, ValueKind,
};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Connection state of a named channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel has been created for the name
    Uncreated,
    /// Created, waiting for the first connection
    Created,
    /// Live
    Connected,
    /// Was connected, link currently down
    Disconnected,
    /// Released by registry teardown; terminal
    Destroyed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Uncreated => "uncreated",
            ConnectionState::Created => "created",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Destroyed => "destroyed",
        };
        f.write_str(label)
    }
}

/// Everything needed to create a channel.
///
/// # Example
///
/// ```rust,ignore
/// let spec = ChannelSpec::new("SR10I-MO-SERVC-01:GAP")
///     .critical()
///     .with_initial_value(ChannelValue::Double(20.0));
/// let channel = registry.create_channel(spec).await?;
/// ```
#[derive(Clone)]
pub struct ChannelSpec {
    pub(crate) name: String,
    pub(crate) critical: bool,
    pub(crate) monitor: Option<MonitorListener>,
    pub(crate) monitor_kind: Option<ValueKind>,
    pub(crate) initial_value: Option<ChannelValue>,
}

impl ChannelSpec {
    /// Optional channel with no monitor and no initial value
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            critical: false,
            monitor: None,
            monitor_kind: None,
            initial_value: None,
        }
    }

    /// Require this channel to connect before the registry is ready
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Set criticality explicitly
    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    /// Install `listener` as a monitor when the channel first connects
    pub fn with_monitor(mut self, listener: impl Fn(ChannelValue) + Send + Sync + 'static) -> Self {
        self.monitor = Some(Arc::new(listener));
        self
    }

    /// Deliver monitor updates as `kind` instead of the native kind
    pub fn with_monitor_kind(mut self, kind: ValueKind) -> Self {
        self.monitor_kind = Some(kind);
        self
    }

    /// Write `value` once the channel first connects
    pub fn with_initial_value(mut self, value: ChannelValue) -> Self {
        self.initial_value = Some(value);
        self
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSpec")
            .field("name", &self.name)
            .field("critical", &self.critical)
            .field("monitor", &self.monitor.is_some())
            .field("monitor_kind", &self.monitor_kind)
            .field("initial_value", &self.initial_value)
            .finish()
    }
}

struct ChannelInner {
    name: String,
    handle: ChannelHandle,
    critical: bool,
    state: RwLock<ConnectionState>,
    native_kind: RwLock<Option<ValueKind>>,
    transport: Arc<dyn ChannelAccess>,
}

/// Handle to one remote process variable owned by a registry.
///
/// Clones share the same underlying channel; the registry hands out clones
/// of a single instance per name.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub(crate) fn new(
        name: String,
        handle: ChannelHandle,
        critical: bool,
        transport: Arc<dyn ChannelAccess>,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                name,
                handle,
                critical,
                state: RwLock::new(ConnectionState::Created),
                native_kind: RwLock::new(None),
                transport,
            }),
        }
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the registry waits for this channel before becoming ready
    pub fn is_critical(&self) -> bool {
        self.inner.critical
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Native kind reported on connection, if connected at least once
    pub fn native_kind(&self) -> Option<ValueKind> {
        *self.inner.native_kind.read()
    }

    /// True if both handles refer to the same underlying channel
    pub fn same_channel(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn handle(&self) -> &ChannelHandle {
        &self.inner.handle
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.inner.state.write() = state;
    }

    pub(crate) fn set_native_kind(&self, kind: ValueKind) {
        *self.inner.native_kind.write() = Some(kind);
    }

    fn ensure_live(&self) -> AppResult<()> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Destroyed => Err(IdError::ChannelDestroyed(self.name().to_string())),
            _ => Err(IdError::ChannelNotConnected(self.name().to_string())),
        }
    }

    /// Read the current value
    pub async fn get(&self) -> AppResult<ChannelValue> {
        self.ensure_live()?;
        self.inner
            .transport
            .get(&self.inner.handle)
            .await
            .map_err(|e| IdError::ReadFailure {
                name: self.name().to_string(),
                reason: e.to_string(),
            })
    }

    /// Read a scalar number
    pub async fn get_f64(&self) -> AppResult<f64> {
        let value = self.get().await?;
        value.as_f64().ok_or_else(|| IdError::TypeMismatch {
            name: self.name().to_string(),
            expected: "double",
            found: value.type_name().to_string(),
        })
    }

    /// Read a scalar string
    pub async fn get_string(&self) -> AppResult<String> {
        match self.get().await? {
            ChannelValue::Text(text) => Ok(text),
            other => Err(IdError::TypeMismatch {
                name: self.name().to_string(),
                expected: "string",
                found: other.type_name().to_string(),
            }),
        }
    }

    /// Fire-and-forget write
    pub async fn put(&self, value: impl Into<ChannelValue>) -> AppResult<()> {
        self.ensure_live()?;
        self.inner
            .transport
            .put(&self.inner.handle, value.into())
            .await
            .map_err(|e| IdError::WriteFailed {
                name: self.name().to_string(),
                reason: e.to_string(),
            })
    }

    /// Write and have `callback` run when the remote end finishes processing
    pub async fn put_with_callback(
        &self,
        value: impl Into<ChannelValue>,
        callback: PutCallback,
    ) -> AppResult<()> {
        self.ensure_live()?;
        self.inner
            .transport
            .put_with_callback(&self.inner.handle, value.into(), callback)
            .await
            .map_err(|e| IdError::WriteFailed {
                name: self.name().to_string(),
                reason: e.to_string(),
            })
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("handle", &self.inner.handle)
            .field("critical", &self.inner.critical)
            .field("state", &self.state())
            .finish()
    }
}
