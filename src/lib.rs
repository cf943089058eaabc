//! # Insertion Device Control Library
//!
//! Control of an Apple II type undulator (insertion device): a gap plus four
//! phase motors whose relative offsets select the polarisation of the
//! emitted light.
//!
//! ## Crate Structure
//!
//! - **`transport`**: the [`ChannelAccess`](transport::ChannelAccess) trait for a
//!   remote process-variable system, channel values, and an in-memory
//!   [`SimulatedTransport`](transport::SimulatedTransport).
//! - **`registry`**: the [`ChannelRegistry`](registry::ChannelRegistry) task that
//!   creates channels, seeds initial values, installs monitors and reports
//!   readiness once every critical channel is connected.
//! - **`device`**: polarisation modes, move planning through LH, the
//!   [`InsertionDevice`](device::InsertionDevice) capability and the
//!   [`MotionSequencer`](device::MotionSequencer).
//! - **`config`**: Figment-based [`Settings`](config::Settings).
//! - **`tracing_setup`**: subscriber initialisation.
//! - **`error`**: the [`IdError`](error::IdError) enum.

pub mod config;
pub mod device;
pub mod error;
pub mod registry;
pub mod tracing_setup;
pub mod transport;

pub use error::{AppResult, IdError};
