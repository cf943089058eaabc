//! The task that owns all registry state.
//!
//! Commands from [`ChannelRegistry`](super::ChannelRegistry) handles and
//! connection events from the transport arrive on two queues that only this
//! task reads. Because every mutation of the channel map, the unconnected
//! critical set and the `initialized` flag happens here, "last critical channel
//! connects" and "creation phase completed" are serialized and can never both
//! miss the transition to ready.

use super::channel::{Channel, ChannelSpec, ConnectionState};
use super::messages::{ReadyListener, RegistryCommand};
use crate::error::{AppResult, IdError};
use crate::transport::{
    ChannelAccess, ChannelHandle, ChannelValue, ConnectionEvent, ConnectionSink, MonitorListener,
    ValueKind,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

struct PendingMonitor {
    listener: MonitorListener,
    kind: Option<ValueKind>,
}

/// Sole owner of the registry state.
pub(crate) struct RegistryActor {
    transport: Arc<dyn ChannelAccess>,
    sink: ConnectionSink,
    channels: HashMap<String, Channel>,
    names_by_handle: HashMap<u64, String>,
    ever_connected: HashSet<String>,
    unconnected_critical: HashSet<String>,
    pending_monitors: HashMap<String, PendingMonitor>,
    initial_values: HashMap<String, ChannelValue>,
    ready_listener: Option<ReadyListener>,
    ready_tx: watch::Sender<bool>,
    creation_phase_completed: bool,
    initialized: bool,
    destroyed: bool,
}

impl RegistryActor {
    pub(crate) fn new(
        transport: Arc<dyn ChannelAccess>,
        sink: ConnectionSink,
        initial_values: HashMap<String, ChannelValue>,
        ready_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            transport,
            sink,
            channels: HashMap::new(),
            names_by_handle: HashMap::new(),
            ever_connected: HashSet::new(),
            unconnected_critical: HashSet::new(),
            pending_monitors: HashMap::new(),
            initial_values,
            ready_listener: None,
            ready_tx,
            creation_phase_completed: false,
            initialized: false,
            destroyed: false,
        }
    }

    /// Event loop; exits once every registry handle is dropped.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<RegistryCommand>,
        mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        loop {
            // Pending connection events drain before the next command.
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.handle_event(event).await,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }
        debug!("channel registry task exiting");
    }

    async fn handle_command(&mut self, command: RegistryCommand) {
        match command {
            RegistryCommand::CreateChannel { spec, response } => {
                let result = self.create_channel(spec).await;
                let _ = response.send(result);
            }
            RegistryCommand::MarkCreationPhaseCompleted { response } => {
                self.mark_creation_phase_completed();
                let _ = response.send(());
            }
            RegistryCommand::SetReadyListener { listener, response } => {
                self.set_ready_listener(listener);
                let _ = response.send(());
            }
            RegistryCommand::GetChannel { name, response } => {
                let _ = response.send(self.channels.get(&name).cloned());
            }
            RegistryCommand::UnconnectedCritical { response } => {
                let mut names: Vec<String> = self.unconnected_critical.iter().cloned().collect();
                names.sort();
                let _ = response.send(names);
            }
            RegistryCommand::Destroy { response } => {
                self.destroy().await;
                let _ = response.send(());
            }
        }
    }

    async fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected {
                handle,
                native_kind,
            } => self.on_channel_connected(handle, native_kind).await,
            ConnectionEvent::Disconnected { handle } => self.on_channel_disconnected(handle),
        }
    }

    async fn create_channel(&mut self, spec: ChannelSpec) -> AppResult<Channel> {
        if self.destroyed {
            return Err(IdError::RegistryDestroyed);
        }

        if let Some(existing) = self.channels.get(&spec.name) {
            debug!(channel = %spec.name, "reusing existing channel");
            return Ok(existing.clone());
        }

        let handle = self
            .transport
            .create_channel(&spec.name, self.sink.clone())
            .await
            .map_err(|e| {
                let err = IdError::ChannelCreationFailed {
                    name: spec.name.clone(),
                    reason: e.to_string(),
                };
                error!(channel = %spec.name, error = %err, "channel creation failed");
                err
            })?;

        let channel = Channel::new(
            spec.name.clone(),
            handle.clone(),
            spec.critical,
            self.transport.clone(),
        );

        if spec.critical {
            self.unconnected_critical.insert(spec.name.clone());
        }
        if let Some(listener) = spec.monitor {
            self.pending_monitors.insert(
                spec.name.clone(),
                PendingMonitor {
                    listener,
                    kind: spec.monitor_kind,
                },
            );
        }
        if let Some(value) = spec.initial_value {
            self.initial_values.insert(spec.name.clone(), value);
        }

        self.names_by_handle.insert(handle.id(), spec.name.clone());
        self.channels.insert(spec.name.clone(), channel.clone());
        debug!(channel = %spec.name, critical = spec.critical, "channel created");
        Ok(channel)
    }

    async fn on_channel_connected(&mut self, handle: ChannelHandle, native_kind: ValueKind) {
        if self.destroyed {
            debug!(channel = %handle, "ignoring connection after destroy");
            return;
        }
        let Some(name) = self.names_by_handle.get(&handle.id()).cloned() else {
            warn!(channel = %handle, "connection event for unknown channel");
            return;
        };
        let Some(channel) = self.channels.get(&name).cloned() else {
            return;
        };

        channel.set_native_kind(native_kind);
        channel.set_state(ConnectionState::Connected);

        if !self.ever_connected.insert(name.clone()) {
            info!(channel = %name, "channel reconnected");
            return;
        }
        info!(channel = %name, kind = %native_kind, "channel connected");

        if let Some(value) = self.initial_values.remove(&name) {
            if let Err(e) = self.transport.put(&handle, value.clone()).await {
                let err = IdError::InitialValueWriteFailed {
                    name: name.clone(),
                    reason: e.to_string(),
                };
                error!(channel = %name, error = %err, "initial value not written");
            } else {
                debug!(channel = %name, value = %value, "initial value written");
            }
        }

        if let Some(pending) = self.pending_monitors.remove(&name) {
            let kind = pending.kind.unwrap_or(native_kind);
            match self
                .transport
                .set_monitor(&handle, kind, pending.listener.clone())
                .await
            {
                Ok(()) => debug!(channel = %name, kind = %kind, "monitor installed"),
                Err(e) => {
                    let err = IdError::MonitorInstallFailed {
                        name: name.clone(),
                        reason: e.to_string(),
                    };
                    error!(channel = %name, error = %err, "monitor not installed");
                    self.pending_monitors.insert(name.clone(), pending);
                }
            }
        }

        self.unconnected_critical.remove(&name);
        self.try_initialize();
    }

    fn on_channel_disconnected(&mut self, handle: ChannelHandle) {
        let Some(name) = self.names_by_handle.get(&handle.id()) else {
            return;
        };
        if let Some(channel) = self.channels.get(name) {
            if channel.state() == ConnectionState::Connected {
                channel.set_state(ConnectionState::Disconnected);
                warn!(channel = %name, "channel disconnected");
            }
        }
    }

    fn mark_creation_phase_completed(&mut self) {
        if self.creation_phase_completed {
            debug!("creation phase already completed");
            return;
        }
        self.creation_phase_completed = true;
        debug!(
            pending = self.unconnected_critical.len(),
            "channel creation phase completed"
        );
        self.try_initialize();
    }

    fn set_ready_listener(&mut self, listener: ReadyListener) {
        if self.initialized {
            dispatch_ready(listener);
        } else {
            self.ready_listener = Some(listener);
        }
    }

    fn try_initialize(&mut self) {
        if self.initialized || !self.creation_phase_completed || !self.unconnected_critical.is_empty()
        {
            return;
        }
        self.initialized = true;
        self.ready_tx.send_replace(true);
        info!(channels = self.channels.len(), "all critical channels connected");

        if let Some(listener) = self.ready_listener.take() {
            dispatch_ready(listener);
        }
    }

    async fn destroy(&mut self) {
        if self.destroyed {
            debug!("channel registry already destroyed");
            return;
        }
        self.destroyed = true;
        self.pending_monitors.clear();
        self.initial_values.clear();

        for (name, channel) in &self.channels {
            channel.set_state(ConnectionState::Destroyed);
            if let Err(e) = self.transport.destroy(channel.handle()).await {
                error!(channel = %name, error = %e, "failed to release channel");
            }
        }
        info!(channels = self.channels.len(), "channel registry destroyed");
    }
}

/// Run the ready listener away from the event path so a slow listener never
/// stalls connection handling.
fn dispatch_ready(listener: ReadyListener) {
    tokio::task::spawn_blocking(listener);
}
