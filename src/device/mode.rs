//! Polarisation modes and position limits.
//!
//! A mode is a recognised pattern of the four phase-motor offsets. Only the
//! top-outer / bottom-inner diagonal is ever driven; the other diagonal stays
//! at zero in every recognised mode:
//!
//! | Mode | top outer | top inner | bottom outer | bottom inner |
//! |------|-----------|-----------|--------------|--------------|
//! | LH   | 0         | 0         | 0            | 0            |
//! | LV   | max       | 0         | 0            | max          |
//! | CR   | +p        | 0         | 0            | +p (p ≠ max) |
//! | CL   | −p        | 0         | 0            | −p           |
//! | LAP  | +p        | 0         | 0            | −p           |
//! | LAN  | −p        | 0         | 0            | +p           |
//!
//! All comparisons use `|a − b| < motor_position_tolerance`, and `p` must be
//! at least one tolerance away from zero.

use super::position::AxisPosition;
use crate::error::{AppResult, IdError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Polarisation mode derived from phase-motor offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolarisationMode {
    /// Linear horizontal; the safe reference mode
    LH,
    /// Linear vertical
    LV,
    /// Circular right
    CR,
    /// Circular left
    CL,
    /// Linear arbitrary, positive angle
    LAP,
    /// Linear arbitrary, negative angle
    LAN,
    /// No recognised pattern
    Unknown,
}

impl PolarisationMode {
    /// The six recognised modes, in classification order
    pub const KNOWN: [PolarisationMode; 6] = [
        PolarisationMode::LH,
        PolarisationMode::LV,
        PolarisationMode::CR,
        PolarisationMode::CL,
        PolarisationMode::LAP,
        PolarisationMode::LAN,
    ];

    /// Short upper-case label
    pub fn label(&self) -> &'static str {
        match self {
            Self::LH => "LH",
            Self::LV => "LV",
            Self::CR => "CR",
            Self::CL => "CL",
            Self::LAP => "LAP",
            Self::LAN => "LAN",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for PolarisationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PolarisationMode {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LH" => Ok(Self::LH),
            "LV" => Ok(Self::LV),
            "CR" => Ok(Self::CR),
            "CL" => Ok(Self::CL),
            "LAP" => Ok(Self::LAP),
            "LAN" => Ok(Self::LAN),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(IdError::InvalidTarget(format!(
                "unrecognised polarisation mode '{other}'"
            ))),
        }
    }
}

/// Travel limits and tolerances of one device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdLimits {
    /// Smallest permitted gap (mm)
    pub min_gap: f64,
    /// Largest permitted absolute phase-motor offset (mm)
    pub max_phase_motor_position: f64,
    /// Two motor positions closer than this are equal (mm)
    pub motor_position_tolerance: f64,
    /// Two gaps closer than this are equal (mm)
    pub gap_tolerance: f64,
}

impl Default for IdLimits {
    fn default() -> Self {
        Self {
            min_gap: 16.0,
            max_phase_motor_position: 28.0,
            motor_position_tolerance: 0.01,
            gap_tolerance: 0.01,
        }
    }
}

impl IdLimits {
    fn motors_equal(&self, a: f64, b: f64) -> bool {
        (a - b).abs() < self.motor_position_tolerance
    }

    fn beyond_zero(&self, value: f64) -> bool {
        value.abs() >= self.motor_position_tolerance
    }

    /// Whether `position` matches the pattern of `mode`.
    ///
    /// Each recognised pattern is tested on its own; `Unknown` matches
    /// nothing.
    pub fn matches(&self, mode: PolarisationMode, position: &AxisPosition) -> bool {
        let [to, ti, bo, bi] = position.motors();
        let max = self.max_phase_motor_position;
        let off_diagonal_zero = self.motors_equal(ti, 0.0) && self.motors_equal(bo, 0.0);

        match mode {
            PolarisationMode::LH => {
                off_diagonal_zero && self.motors_equal(to, 0.0) && self.motors_equal(bi, 0.0)
            }
            PolarisationMode::LV => {
                off_diagonal_zero && self.motors_equal(to, max) && self.motors_equal(bi, max)
            }
            PolarisationMode::CR => {
                off_diagonal_zero
                    && self.motors_equal(to, bi)
                    && to > 0.0
                    && self.beyond_zero(to)
                    && !self.motors_equal(to, max)
            }
            PolarisationMode::CL => {
                off_diagonal_zero && self.motors_equal(to, bi) && to < 0.0 && self.beyond_zero(to)
            }
            PolarisationMode::LAP => {
                off_diagonal_zero && self.motors_equal(to, -bi) && to > 0.0 && self.beyond_zero(to)
            }
            PolarisationMode::LAN => {
                off_diagonal_zero && self.motors_equal(to, -bi) && to < 0.0 && self.beyond_zero(to)
            }
            PolarisationMode::Unknown => false,
        }
    }

    /// Classify a position; `Unknown` when no pattern matches
    pub fn classify(&self, position: &AxisPosition) -> PolarisationMode {
        PolarisationMode::KNOWN
            .into_iter()
            .find(|mode| self.matches(*mode, position))
            .unwrap_or(PolarisationMode::Unknown)
    }

    /// Check a requested target and return its mode.
    ///
    /// # Errors
    ///
    /// `InvalidTarget` if the gap is below `min_gap`, any motor offset
    /// exceeds `max_phase_motor_position` in absolute value, any component
    /// is not finite, or the position classifies as `Unknown`.
    pub fn validate(&self, target: &AxisPosition) -> AppResult<PolarisationMode> {
        if !target.gap.is_finite() || target.motors().iter().any(|m| !m.is_finite()) {
            return Err(IdError::InvalidTarget(format!(
                "non-finite component in {target}"
            )));
        }
        if target.gap < self.min_gap {
            return Err(IdError::InvalidTarget(format!(
                "gap {} is below the minimum {}",
                target.gap, self.min_gap
            )));
        }
        if let Some(motor) = target
            .motors()
            .into_iter()
            .find(|m| m.abs() > self.max_phase_motor_position)
        {
            return Err(IdError::InvalidTarget(format!(
                "phase motor offset {} exceeds the maximum travel {}",
                motor, self.max_phase_motor_position
            )));
        }

        match self.classify(target) {
            PolarisationMode::Unknown => Err(IdError::InvalidTarget(format!(
                "{target} does not match any polarisation mode"
            ))),
            mode => Ok(mode),
        }
    }

    /// Canonical position of `mode` at `gap`.
    ///
    /// `phase` is the diagonal offset for CR, CL, LAP and LAN (its sign is
    /// ignored); LH and LV ignore it.
    ///
    /// # Errors
    ///
    /// `InvalidTarget` for `Unknown`, or when the built position would
    /// classify as another mode (a phase within tolerance of zero, or CR at
    /// full phase travel).
    pub fn target_for(
        &self,
        mode: PolarisationMode,
        gap: f64,
        phase: f64,
    ) -> AppResult<AxisPosition> {
        let p = phase.abs();
        let max = self.max_phase_motor_position;
        let target = match mode {
            PolarisationMode::LH => AxisPosition::horizontal(gap),
            PolarisationMode::LV => AxisPosition::new(gap, max, 0.0, 0.0, max),
            PolarisationMode::CR => AxisPosition::new(gap, p, 0.0, 0.0, p),
            PolarisationMode::CL => AxisPosition::new(gap, -p, 0.0, 0.0, -p),
            PolarisationMode::LAP => AxisPosition::new(gap, p, 0.0, 0.0, -p),
            PolarisationMode::LAN => AxisPosition::new(gap, -p, 0.0, 0.0, p),
            PolarisationMode::Unknown => {
                return Err(IdError::InvalidTarget(
                    "cannot build a position for UNKNOWN".to_string(),
                ))
            }
        };

        let actual = self.classify(&target);
        if actual != mode {
            return Err(IdError::InvalidTarget(format!(
                "phase {phase} at gap {gap} gives {actual}, not {mode}"
            )));
        }
        Ok(target)
    }

    /// Check the limits themselves
    pub fn check(&self) -> AppResult<()> {
        if !(self.motor_position_tolerance > 0.0) || !(self.gap_tolerance > 0.0) {
            return Err(IdError::Configuration(
                "tolerances must be positive".to_string(),
            ));
        }
        if !(self.max_phase_motor_position > 2.0 * self.motor_position_tolerance) {
            return Err(IdError::Configuration(format!(
                "max phase motor position {} must exceed twice the motor tolerance {}",
                self.max_phase_motor_position, self.motor_position_tolerance
            )));
        }
        if !self.min_gap.is_finite() {
            return Err(IdError::Configuration("min gap must be finite".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> IdLimits {
        IdLimits {
            min_gap: 16.0,
            max_phase_motor_position: 28.0,
            motor_position_tolerance: 0.01,
            gap_tolerance: 0.01,
        }
    }

    #[test]
    fn classifies_each_canonical_pattern() {
        let l = limits();
        assert_eq!(l.classify(&AxisPosition::horizontal(50.0)), PolarisationMode::LH);
        assert_eq!(
            l.classify(&AxisPosition::new(50.0, 28.0, 0.0, 0.0, 28.0)),
            PolarisationMode::LV
        );
        assert_eq!(
            l.classify(&AxisPosition::new(60.0, 10.0, 0.0, 0.0, 10.0)),
            PolarisationMode::CR
        );
        assert_eq!(
            l.classify(&AxisPosition::new(60.0, -10.0, 0.0, 0.0, -10.0)),
            PolarisationMode::CL
        );
        assert_eq!(
            l.classify(&AxisPosition::new(60.0, 5.0, 0.0, 0.0, -5.0)),
            PolarisationMode::LAP
        );
        assert_eq!(
            l.classify(&AxisPosition::new(60.0, -5.0, 0.0, 0.0, 5.0)),
            PolarisationMode::LAN
        );
    }

    #[test]
    fn off_pattern_positions_are_unknown() {
        let l = limits();
        assert_eq!(
            l.classify(&AxisPosition::new(60.0, 10.0, 1.0, 0.0, 10.0)),
            PolarisationMode::Unknown
        );
        assert_eq!(
            l.classify(&AxisPosition::new(60.0, 10.0, 0.0, 0.0, 3.0)),
            PolarisationMode::Unknown
        );
    }

    #[test]
    fn tolerance_applies_to_comparisons() {
        let l = limits();
        assert_eq!(
            l.classify(&AxisPosition::new(50.0, 0.005, -0.005, 0.0, 0.009)),
            PolarisationMode::LH
        );
        assert_eq!(
            l.classify(&AxisPosition::new(50.0, 10.0, 0.0, 0.0, 10.009)),
            PolarisationMode::CR
        );
    }

    #[test]
    fn parses_labels() {
        assert_eq!("lap".parse::<PolarisationMode>().unwrap(), PolarisationMode::LAP);
        assert!("diagonal".parse::<PolarisationMode>().is_err());
    }

    #[test]
    fn unknown_has_no_target() {
        assert!(limits()
            .target_for(PolarisationMode::Unknown, 20.0, 1.0)
            .is_err());
    }

    #[test]
    fn target_must_land_in_the_requested_mode() {
        let l = limits();
        for mode in [
            PolarisationMode::CR,
            PolarisationMode::CL,
            PolarisationMode::LAP,
            PolarisationMode::LAN,
        ] {
            assert!(matches!(
                l.target_for(mode, 60.0, 0.0),
                Err(IdError::InvalidTarget(_))
            ));
            assert!(matches!(
                l.target_for(mode, 60.0, 0.005),
                Err(IdError::InvalidTarget(_))
            ));
            assert_eq!(l.classify(&l.target_for(mode, 60.0, 0.01).unwrap()), mode);
        }

        // full travel on both diagonals is LV
        assert!(matches!(
            l.target_for(PolarisationMode::CR, 60.0, 28.0),
            Err(IdError::InvalidTarget(_))
        ));
        assert_eq!(
            l.target_for(PolarisationMode::CL, 60.0, 28.0).unwrap(),
            AxisPosition::new(60.0, -28.0, 0.0, 0.0, -28.0)
        );
        assert_eq!(
            l.target_for(PolarisationMode::LH, 60.0, 0.0).unwrap(),
            AxisPosition::horizontal(60.0)
        );
        assert_eq!(
            l.classify(&l.target_for(PolarisationMode::LV, 60.0, 0.0).unwrap()),
            PolarisationMode::LV
        );
    }

    #[test]
    fn rejects_bad_limits() {
        let mut l = limits();
        l.motor_position_tolerance = 0.0;
        assert!(l.check().is_err());
        assert!(limits().check().is_ok());
    }
}
