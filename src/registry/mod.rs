//! Channel registry.
//!
//! Tracks a set of named remote channels through creation, connection,
//! monitor installation and initial-value seeding, and reports readiness once
//! every critical channel has connected.
//!
//! # Architecture
//!
//! ```text
//! ChannelRegistry (handle, Clone) ──RegistryCommand──┐
//!                                                   ├──> RegistryActor ──watch<bool>──> await_ready
//! Transport callback threads ─────ConnectionEvent──┘      (owns all state)
//! ```
//!
//! Readiness is `creation phase completed && no unconnected critical channel`;
//! it only ever goes from `false` to `true`.
//!
//! # Example
//!
//! ```rust,ignore
//! let registry = ChannelRegistry::spawn(Arc::new(transport));
//! registry.create_channel(ChannelSpec::new("ID:GAP").critical()).await?;
//! registry.mark_creation_phase_completed().await?;
//! if !registry.await_ready(Duration::from_secs(5)).await {
//!     tracing::warn!("insertion device channels still connecting");
//! }
//! ```

mod actor;
pub mod channel;
pub mod messages;

pub use channel::{Channel, ChannelSpec, ConnectionState};
pub use messages::{ReadyListener, RegistryCommand};

use crate::error::{AppResult, IdError};
use crate::transport::{ChannelAccess, ChannelValue, ConnectionSink};
use actor::RegistryActor;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{warn, Instrument};

const ACTOR_NAME: &str = "channel registry";

/// Builder for a [`ChannelRegistry`].
pub struct RegistryBuilder {
    transport: Arc<dyn ChannelAccess>,
    mailbox_capacity: usize,
    initial_values: HashMap<String, ChannelValue>,
}

impl RegistryBuilder {
    /// Command mailbox capacity (default 64)
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }

    /// Values to write to channels of these names on first connection
    pub fn initial_values(mut self, values: HashMap<String, ChannelValue>) -> Self {
        self.initial_values.extend(values);
        self
    }

    /// Spawn the registry task on the current Tokio runtime
    pub fn spawn(self) -> ChannelRegistry {
        let (commands_tx, commands_rx) = mpsc::channel(self.mailbox_capacity);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = watch::channel(false);

        let actor = RegistryActor::new(
            self.transport,
            ConnectionSink::new(events_tx),
            self.initial_values,
            ready_tx,
        );
        tokio::spawn(actor.run(commands_rx, events_rx).in_current_span());

        ChannelRegistry {
            commands: commands_tx,
            ready: ready_rx,
        }
    }
}

/// Cloneable handle to a running registry task.
#[derive(Clone)]
pub struct ChannelRegistry {
    commands: mpsc::Sender<RegistryCommand>,
    ready: watch::Receiver<bool>,
}

impl ChannelRegistry {
    /// Start configuring a registry over `transport`
    pub fn builder(transport: Arc<dyn ChannelAccess>) -> RegistryBuilder {
        RegistryBuilder {
            transport,
            mailbox_capacity: 64,
            initial_values: HashMap::new(),
        }
    }

    /// Spawn a registry with default settings
    pub fn spawn(transport: Arc<dyn ChannelAccess>) -> Self {
        Self::builder(transport).spawn()
    }

    async fn request<T>(&self, (command, rx): (RegistryCommand, oneshot::Receiver<T>)) -> AppResult<T> {
        self.commands
            .send(command)
            .await
            .map_err(|_| IdError::ActorUnavailable(ACTOR_NAME))?;
        rx.await.map_err(|_| IdError::ActorUnavailable(ACTOR_NAME))
    }

    /// Create the channel named by `spec`, or return the existing one.
    ///
    /// # Errors
    ///
    /// - `RegistryDestroyed` after [`destroy`](Self::destroy)
    /// - `ChannelCreationFailed` if the transport refuses the channel
    pub async fn create_channel(&self, spec: ChannelSpec) -> AppResult<Channel> {
        self.request(RegistryCommand::create_channel(spec)).await?
    }

    /// Declare that every critical channel has been created
    pub async fn mark_creation_phase_completed(&self) -> AppResult<()> {
        self.request(RegistryCommand::mark_creation_phase_completed())
            .await
    }

    /// Run `listener` once when the registry becomes ready.
    ///
    /// The listener runs on a blocking worker, never on the task handling
    /// connection events. Registering after readiness runs it straight away.
    pub async fn set_ready_listener(
        &self,
        listener: impl FnOnce() + Send + 'static,
    ) -> AppResult<()> {
        self.request(RegistryCommand::set_ready_listener(Box::new(listener)))
            .await
    }

    /// Wait until ready or `timeout` elapses; returns the readiness at return.
    pub async fn await_ready(&self, timeout: Duration) -> bool {
        let mut ready = self.ready.clone();
        if let Ok(Ok(_)) = tokio::time::timeout(timeout, ready.wait_for(|ready| *ready)).await {
            return true;
        }

        let ready = *self.ready.borrow();
        if !ready {
            let pending = self.unconnected_critical().await.unwrap_or_default();
            warn!(
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                pending = ?pending,
                "channel registry not ready"
            );
        }
        ready
    }

    /// Current readiness without waiting
    pub fn is_initialized(&self) -> bool {
        *self.ready.borrow()
    }

    /// Channel registered under `name`
    pub async fn channel(&self, name: &str) -> AppResult<Option<Channel>> {
        self.request(RegistryCommand::get_channel(name.to_string()))
            .await
    }

    /// Critical channels still waiting for their first connection, sorted
    pub async fn unconnected_critical(&self) -> AppResult<Vec<String>> {
        self.request(RegistryCommand::unconnected_critical()).await
    }

    /// Tear down the registry, releasing every channel.
    ///
    /// Release failures are logged per channel and do not stop the others.
    /// Calling this twice is harmless.
    pub async fn destroy(&self) -> AppResult<()> {
        self.request(RegistryCommand::destroy()).await
    }
}
