//! Apple II insertion device control.
//!
//! - [`position`]: gap and phase-motor positions
//! - [`mode`]: polarisation-mode classification and target validation
//! - [`plan`]: routing every mode change through LH
//! - [`capability`]: the [`InsertionDevice`] trait the sequencer drives
//! - [`sequencer`]: the [`MotionSequencer`] task executing plans step by step
//! - [`simulated`], [`channel_backed`]: device implementations

pub mod capability;
pub mod channel_backed;
pub mod mode;
pub mod observer;
pub mod plan;
pub mod position;
pub mod sequencer;
pub mod simulated;

pub use capability::{IdControlMode, InsertionDevice, StepCompletion};
pub use channel_backed::{AxisChannels, ChannelBackedId, IdChannelNames};
pub use mode::{IdLimits, PolarisationMode};
pub use observer::{MoveEvent, ObserverId, ObserverList};
pub use plan::{differs, plan_move, MovePlan};
pub use position::{Axis, AxisPosition};
pub use sequencer::{MotionSequencer, MoveAccepted};
pub use simulated::{CompletionMode, SimulatedId, SimulatedIdBuilder};
