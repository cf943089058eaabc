//! Axis positions of an Apple II insertion device.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One physical axis of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Magnet gap
    Gap,
    /// Top outer phase motor
    TopOuter,
    /// Top inner phase motor
    TopInner,
    /// Bottom outer phase motor
    BottomOuter,
    /// Bottom inner phase motor
    BottomInner,
}

impl Axis {
    /// All axes in read order
    pub const ALL: [Axis; 5] = [
        Axis::Gap,
        Axis::TopOuter,
        Axis::TopInner,
        Axis::BottomOuter,
        Axis::BottomInner,
    ];

    /// The four phase motors
    pub const MOTORS: [Axis; 4] = [
        Axis::TopOuter,
        Axis::TopInner,
        Axis::BottomOuter,
        Axis::BottomInner,
    ];

    /// Label used in logs and errors
    pub fn label(&self) -> &'static str {
        match self {
            Axis::Gap => "gap",
            Axis::TopOuter => "top outer motor",
            Axis::TopInner => "top inner motor",
            Axis::BottomOuter => "bottom outer motor",
            Axis::BottomInner => "bottom inner motor",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Gap plus the four phase-motor offsets, all in mm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisPosition {
    /// Magnet gap
    pub gap: f64,
    /// Top outer motor offset
    pub top_outer: f64,
    /// Top inner motor offset
    pub top_inner: f64,
    /// Bottom outer motor offset
    pub bottom_outer: f64,
    /// Bottom inner motor offset
    pub bottom_inner: f64,
}

impl AxisPosition {
    /// Build a position from its five components
    pub fn new(gap: f64, top_outer: f64, top_inner: f64, bottom_outer: f64, bottom_inner: f64) -> Self {
        Self {
            gap,
            top_outer,
            top_inner,
            bottom_outer,
            bottom_inner,
        }
    }

    /// Gap with every phase motor at zero (linear horizontal)
    pub fn horizontal(gap: f64) -> Self {
        Self::new(gap, 0.0, 0.0, 0.0, 0.0)
    }

    /// Phase motors in `Axis::MOTORS` order
    pub fn motors(&self) -> [f64; 4] {
        [
            self.top_outer,
            self.top_inner,
            self.bottom_outer,
            self.bottom_inner,
        ]
    }

    /// Value of one axis
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Gap => self.gap,
            Axis::TopOuter => self.top_outer,
            Axis::TopInner => self.top_inner,
            Axis::BottomOuter => self.bottom_outer,
            Axis::BottomInner => self.bottom_inner,
        }
    }

    /// Copy with a different value on one axis
    pub fn with(mut self, axis: Axis, value: f64) -> Self {
        match axis {
            Axis::Gap => self.gap = value,
            Axis::TopOuter => self.top_outer = value,
            Axis::TopInner => self.top_inner = value,
            Axis::BottomOuter => self.bottom_outer = value,
            Axis::BottomInner => self.bottom_inner = value,
        }
        self
    }
}

impl fmt::Display for AxisPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(gap={:.3}, to={:.3}, ti={:.3}, bo={:.3}, bi={:.3})",
            self.gap, self.top_outer, self.top_inner, self.bottom_outer, self.bottom_inner
        )
    }
}
