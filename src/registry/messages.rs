//! Message types for the registry actor.
//!
//! Every public operation of [`ChannelRegistry`](super::ChannelRegistry) is a
//! [`RegistryCommand`] sent over the actor's mpsc mailbox; the reply comes
//! back on the oneshot channel embedded in the variant. Each variant has a
//! helper that builds the command and returns the receiver:
//!
//! ```rust,ignore
//! let (cmd, rx) = RegistryCommand::create_channel(ChannelSpec::new("ID:GAP"));
//! commands.send(cmd).await?;
//! let channel = rx.await??;
//! ```

use super::channel::{Channel, ChannelSpec};
use crate::error::AppResult;
use std::fmt;
use tokio::sync::oneshot;

/// One-shot listener run when every critical channel has connected.
pub type ReadyListener = Box<dyn FnOnce() + Send + 'static>;

/// Commands processed sequentially by the registry actor.
pub enum RegistryCommand {
    /// Create a channel, or return the existing one for the name
    CreateChannel {
        /// Name and options of the channel
        spec: ChannelSpec,
        /// The created or existing channel
        response: oneshot::Sender<AppResult<Channel>>,
    },

    /// Declare that no more critical channels will be registered
    MarkCreationPhaseCompleted {
        /// Acknowledged once recorded
        response: oneshot::Sender<()>,
    },

    /// Register the ready listener
    SetReadyListener {
        /// Run once, possibly immediately
        listener: ReadyListener,
        /// Acknowledged once registered
        response: oneshot::Sender<()>,
    },

    /// Look up a channel by name
    GetChannel {
        /// Channel name
        name: String,
        /// The channel, if created
        response: oneshot::Sender<Option<Channel>>,
    },

    /// Names of critical channels that have not connected yet
    UnconnectedCritical {
        /// Pending names, sorted
        response: oneshot::Sender<Vec<String>>,
    },

    /// Tear down the registry and release every channel
    Destroy {
        /// Acknowledged after every channel is released
        response: oneshot::Sender<()>,
    },
}

impl RegistryCommand {
    /// Build a `CreateChannel` command
    pub fn create_channel(spec: ChannelSpec) -> (Self, oneshot::Receiver<AppResult<Channel>>) {
        let (response, rx) = oneshot::channel();
        (Self::CreateChannel { spec, response }, rx)
    }

    /// Build a `MarkCreationPhaseCompleted` command
    pub fn mark_creation_phase_completed() -> (Self, oneshot::Receiver<()>) {
        let (response, rx) = oneshot::channel();
        (Self::MarkCreationPhaseCompleted { response }, rx)
    }

    /// Build a `SetReadyListener` command
    pub fn set_ready_listener(listener: ReadyListener) -> (Self, oneshot::Receiver<()>) {
        let (response, rx) = oneshot::channel();
        (Self::SetReadyListener { listener, response }, rx)
    }

    /// Build a `GetChannel` command
    pub fn get_channel(name: String) -> (Self, oneshot::Receiver<Option<Channel>>) {
        let (response, rx) = oneshot::channel();
        (Self::GetChannel { name, response }, rx)
    }

    /// Build an `UnconnectedCritical` command
    pub fn unconnected_critical() -> (Self, oneshot::Receiver<Vec<String>>) {
        let (response, rx) = oneshot::channel();
        (Self::UnconnectedCritical { response }, rx)
    }

    /// Build a `Destroy` command
    pub fn destroy() -> (Self, oneshot::Receiver<()>) {
        let (response, rx) = oneshot::channel();
        (Self::Destroy { response }, rx)
    }
}

impl fmt::Debug for RegistryCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateChannel { spec, .. } => f
                .debug_struct("CreateChannel")
                .field("spec", spec)
                .finish(),
            Self::MarkCreationPhaseCompleted { .. } => f.write_str("MarkCreationPhaseCompleted"),
            Self::SetReadyListener { .. } => f.write_str("SetReadyListener"),
            Self::GetChannel { name, .. } => {
                f.debug_struct("GetChannel").field("name", name).finish()
            }
            Self::UnconnectedCritical { .. } => f.write_str("UnconnectedCritical"),
            Self::Destroy { .. } => f.write_str("Destroy"),
        }
    }
}
