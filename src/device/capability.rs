//! The insertion-device capability.
//!
//! The sequencer never talks to channels directly. It drives any type that
//! implements [`InsertionDevice`]:
//!
//! - [`SimulatedId`](super::SimulatedId) moves in memory after a delay
//! - [`ChannelBackedId`](super::ChannelBackedId) writes setpoints and a start
//!   command through a [`ChannelRegistry`](crate::registry::ChannelRegistry)
//!
//! Like other capability traits it is async, `Send + Sync`, and reports
//! failures as `anyhow::Result`.

use super::position::{Axis, AxisPosition};
use crate::error::IdError;
use crate::transport::{PutCallback, PutStatus};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which axes the device's control system lets us drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdControlMode {
    /// Gap and phase motors; the only mode that accepts polarisation moves
    GapAndPhase,
    /// Gap only, phase motors locked
    GapOnly,
    /// Phase motors only, gap locked
    PhaseOnly,
}

impl IdControlMode {
    /// Mode for an enumerated channel index
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Self::GapAndPhase),
            1 => Some(Self::GapOnly),
            2 => Some(Self::PhaseOnly),
            _ => None,
        }
    }

    /// Enumerated channel index
    pub fn index(&self) -> i64 {
        match self {
            Self::GapAndPhase => 0,
            Self::GapOnly => 1,
            Self::PhaseOnly => 2,
        }
    }
}

impl fmt::Display for IdControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::GapAndPhase => "GAP_AND_PHASE",
            Self::GapOnly => "GAP_ONLY",
            Self::PhaseOnly => "PHASE_ONLY",
        };
        f.write_str(label)
    }
}

impl FromStr for IdControlMode {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "GAPANDPHASE" => Ok(Self::GapAndPhase),
            "GAPONLY" | "GAP" => Ok(Self::GapOnly),
            "PHASEONLY" | "PHASE" => Ok(Self::PhaseOnly),
            _ => Err(IdError::ModeMismatch(format!("unrecognised control mode '{s}'"))),
        }
    }
}

/// One-shot completion token for a single issued step.
///
/// The device must call [`complete`](Self::complete) exactly once, from any
/// thread, when the hardware reports that the step has finished. Dropping the
/// token without completing it leaves the step outstanding.
pub struct StepCompletion {
    notify: Box<dyn FnOnce(PutStatus) + Send>,
}

impl StepCompletion {
    /// Wrap the function that delivers the completion
    pub fn new(notify: impl FnOnce(PutStatus) + Send + 'static) -> Self {
        Self {
            notify: Box::new(notify),
        }
    }

    /// Report the outcome of the step
    pub fn complete(self, status: PutStatus) {
        (self.notify)(status);
    }

    /// Use this token as a transport put-callback
    pub fn into_put_callback(self) -> PutCallback {
        self.notify
    }
}

impl fmt::Debug for StepCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StepCompletion")
    }
}

/// A device the motion sequencer can drive.
#[async_trait]
pub trait InsertionDevice: Send + Sync {
    /// Begin moving every axis to `target`.
    ///
    /// Returns once the move is issued; `completion` fires when it finishes.
    /// An `Err` means nothing was issued and `completion` will never fire.
    async fn start_move(&self, target: AxisPosition, completion: StepCompletion) -> Result<()>;

    /// Current readback of one axis
    async fn read_axis(&self, axis: Axis) -> Result<f64>;

    /// Whether the device accepts moves at all
    async fn is_enabled(&self) -> Result<bool>;

    /// Current control mode
    async fn control_mode(&self) -> Result<IdControlMode>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_control_mode_spellings() {
        assert_eq!(
            "Gap and Phase".parse::<IdControlMode>().unwrap(),
            IdControlMode::GapAndPhase
        );
        assert_eq!("GAP_ONLY".parse::<IdControlMode>().unwrap(), IdControlMode::GapOnly);
        assert!("both".parse::<IdControlMode>().is_err());
    }

    #[test]
    fn control_mode_index_roundtrip() {
        for mode in [
            IdControlMode::GapAndPhase,
            IdControlMode::GapOnly,
            IdControlMode::PhaseOnly,
        ] {
            assert_eq!(IdControlMode::from_index(mode.index()), Some(mode));
        }
        assert_eq!(IdControlMode::from_index(7), None);
    }

    #[test]
    fn completion_runs_once() {
        let (tx, rx) = std::sync::mpsc::channel();
        let token = StepCompletion::new(move |status| {
            let _ = tx.send(status);
        });
        token.complete(PutStatus::Success);
        assert_eq!(rx.recv().unwrap(), PutStatus::Success);
        assert!(rx.try_recv().is_err());
    }
}
