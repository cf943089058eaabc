//! Move planning.
//!
//! Every change of polarisation mode is routed through LH: phase-motor
//! trajectories between two non-LH modes are not guaranteed collision-free,
//! while LH ↔ any mode is. A plan therefore has at most one intermediate
//! position, and when it has one that position classifies as LH.

use super::mode::{IdLimits, PolarisationMode};
use super::position::AxisPosition;
use std::ops::Index;

/// Ordered positions to visit for one move request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MovePlan {
    steps: Vec<AxisPosition>,
}

impl MovePlan {
    /// Positions in execution order
    pub fn steps(&self) -> &[AxisPosition] {
        &self.steps
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when the device is already where it was asked to go
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step at `index`
    pub fn get(&self, index: usize) -> Option<&AxisPosition> {
        self.steps.get(index)
    }

    /// Final position of the plan
    pub fn target(&self) -> Option<&AxisPosition> {
        self.steps.last()
    }
}

impl Index<usize> for MovePlan {
    type Output = AxisPosition;

    fn index(&self, index: usize) -> &Self::Output {
        &self.steps[index]
    }
}

/// True if any axis differs by at least its tolerance.
pub fn differs(a: &AxisPosition, b: &AxisPosition, limits: &IdLimits) -> bool {
    (a.gap - b.gap).abs() >= limits.gap_tolerance
        || a
            .motors()
            .iter()
            .zip(b.motors().iter())
            .any(|(x, y)| (x - y).abs() >= limits.motor_position_tolerance)
}

/// Plan the move from `current` to `requested`.
///
/// - Same mode, some axis differs: `[requested]`
/// - Same mode, nothing differs: `[]`
/// - Different mode: an LH position at the requested gap unless already in
///   LH, then `requested` unless it is itself LH
pub fn plan_move(current: &AxisPosition, requested: &AxisPosition, limits: &IdLimits) -> MovePlan {
    let current_mode = limits.classify(current);
    let requested_mode = limits.classify(requested);

    let mut steps = Vec::with_capacity(2);
    if requested_mode == current_mode {
        if differs(current, requested, limits) {
            steps.push(*requested);
        }
    } else {
        if current_mode != PolarisationMode::LH {
            steps.push(AxisPosition::horizontal(requested.gap));
        }
        if requested_mode != PolarisationMode::LH {
            steps.push(*requested);
        }
    }

    MovePlan { steps }
}
