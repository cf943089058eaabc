//! Custom error types for the control core.
//!
//! This module defines the primary error type, `IdError`, shared by the channel
//! registry, the insertion-device implementations and the motion sequencer.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle the different kinds of failures the core can report.
//!
//! ## Error Hierarchy
//!
//! `IdError` consolidates three families of errors:
//!
//! - **Registry errors** (`RegistryDestroyed`, `ChannelCreationFailed`,
//!   `ChannelDestroyed`, `ChannelNotConnected`, `MonitorInstallFailed`,
//!   `InitialValueWriteFailed`). The last two are only ever logged at the point
//!   of origin; they exist as values so the log line and the tests agree on
//!   the wording.
//! - **Move validation errors** (`DeviceDisabled`, `ModeMismatch`,
//!   `InvalidTarget`, `Busy`). These are returned synchronously from
//!   `move_to` before any state is touched.
//! - **Execution errors** (`StepIssuanceFailed`, `StepFailed`, `ReadFailure`,
//!   `WriteFailed`).
//!   Step errors abandon the current plan and reach observers as
//!   `MoveEvent::Failed`.
//!
//! Configuration problems are reported through `Config` (figment parse errors)
//! and `Configuration` (semantic validation).

use thiserror::Error;

/// Convenience alias for results using the core error type.
pub type AppResult<T> = std::result::Result<T, IdError>;

/// Primary error type for the control core.
#[derive(Error, Debug, Clone)]
pub enum IdError {
    /// An operation was attempted after the registry was torn down.
    #[error("Channel registry has been destroyed")]
    RegistryDestroyed,

    /// The transport refused to create the channel.
    #[error("Failed to create channel '{name}': {reason}")]
    ChannelCreationFailed {
        /// Channel or axis involved
        name: String,
        /// Underlying failure
        reason: String,
    },

    /// The channel was released by registry teardown.
    #[error("Channel '{0}' has been destroyed")]
    ChannelDestroyed(String),

    /// The channel has not completed its first connection.
    #[error("Channel '{0}' is not connected")]
    ChannelNotConnected(String),

    /// Installing a monitor on a connected channel failed.
    #[error("Failed to install monitor on '{name}': {reason}")]
    MonitorInstallFailed {
        /// Channel or axis involved
        name: String,
        /// Underlying failure
        reason: String,
    },

    /// Writing the configured initial value failed.
    #[error("Failed to write initial value to '{name}': {reason}")]
    InitialValueWriteFailed {
        /// Channel or axis involved
        name: String,
        /// Underlying failure
        reason: String,
    },

    /// A channel returned a value of the wrong kind.
    #[error("Channel '{name}' returned {found}, expected {expected}")]
    TypeMismatch {
        /// Channel that was read
        name: String,
        /// Kind the caller asked for
        expected: &'static str,
        /// Kind actually delivered
        found: String,
    },

    /// The insertion device reports that it is not enabled.
    #[error("Insertion device is disabled")]
    DeviceDisabled,

    /// The insertion device is not in gap-and-phase control mode.
    #[error("Insertion device is in {0} mode, moves require gap and phase mode")]
    ModeMismatch(String),

    /// The requested position failed validation.
    #[error("Invalid target position: {0}")]
    InvalidTarget(String),

    /// A move is already in progress.
    #[error("Insertion device is busy with a move in progress")]
    Busy,

    /// A plan step could not be issued to the device.
    #[error("Failed to issue move step {step}: {reason}")]
    StepIssuanceFailed {
        /// Zero-based plan step
        step: usize,
        /// Underlying failure
        reason: String,
    },

    /// The device reported failure for an issued step.
    #[error("Move step {step} completed with failure: {reason}")]
    StepFailed {
        /// Zero-based plan step
        step: usize,
        /// Underlying failure
        reason: String,
    },

    /// Reading a channel or one of the device axes failed.
    #[error("Failed to read {name}: {reason}")]
    ReadFailure {
        /// Channel or axis involved
        name: String,
        /// Underlying failure
        reason: String,
    },

    /// Writing a connected channel failed.
    #[error("Failed to write {name}: {reason}")]
    WriteFailed {
        /// Channel or axis involved
        name: String,
        /// Underlying failure
        reason: String,
    },

    /// The owning task of a registry or sequencer is gone.
    #[error("{0} task is no longer running")]
    ActorUnavailable(&'static str),

    /// Configuration file parsing failed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration values parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl IdError {
    /// True for the synchronous `move_to` validation failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            IdError::DeviceDisabled
                | IdError::ModeMismatch(_)
                | IdError::InvalidTarget(_)
                | IdError::Busy
        )
    }
}

impl From<figment::Error> for IdError {
    fn from(value: figment::Error) -> Self {
        IdError::Config(value.to_string())
    }
}
