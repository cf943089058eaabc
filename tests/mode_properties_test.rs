//! Classification and planning properties checked over grids of positions.

use id_control::device::{differs, plan_move, AxisPosition, IdLimits, PolarisationMode};

const DIAGONAL: [f64; 11] = [
    -28.0, -12.0, -0.02, -0.005, 0.0, 0.005, 0.02, 5.0, 27.995, 28.0, 28.5,
];
const OFF_DIAGONAL: [f64; 4] = [0.0, 0.005, -0.5, 3.0];

fn grid() -> Vec<AxisPosition> {
    let mut positions = Vec::new();
    for to in DIAGONAL {
        for bi in DIAGONAL {
            for ti in OFF_DIAGONAL {
                for bo in OFF_DIAGONAL {
                    positions.push(AxisPosition::new(30.0, to, ti, bo, bi));
                }
            }
        }
    }
    positions
}

fn canonical_targets(limits: &IdLimits) -> Vec<(PolarisationMode, AxisPosition)> {
    let mut targets = Vec::new();
    for mode in PolarisationMode::KNOWN {
        for gap in [16.0, 30.0, 100.0] {
            for phase in [0.5, 5.0, 27.5] {
                targets.push((mode, limits.target_for(mode, gap, phase).unwrap()));
            }
        }
    }
    targets
}

#[test]
fn at_most_one_mode_matches() {
    let limits = IdLimits::default();
    for position in grid() {
        let matching: Vec<_> = PolarisationMode::KNOWN
            .into_iter()
            .filter(|mode| limits.matches(*mode, &position))
            .collect();
        assert!(
            matching.len() <= 1,
            "{position} matches {:?}",
            matching
        );

        let mode = limits.classify(&position);
        match matching.first() {
            Some(expected) => assert_eq!(mode, *expected),
            None => assert_eq!(mode, PolarisationMode::Unknown),
        }
    }
}

#[test]
fn classification_is_repeatable() {
    let limits = IdLimits::default();
    for position in grid() {
        assert_eq!(limits.classify(&position), limits.classify(&position));
    }
}

#[test]
fn canonical_positions_classify_as_their_mode() {
    let limits = IdLimits::default();
    for (mode, target) in canonical_targets(&limits) {
        assert_eq!(limits.classify(&target), mode, "{target}");
        assert_eq!(limits.validate(&target).unwrap(), mode);
    }
}

#[test]
fn off_diagonal_motors_make_a_position_unknown() {
    let limits = IdLimits::default();
    for (_, target) in canonical_targets(&limits) {
        let skewed = AxisPosition::new(
            target.gap,
            target.top_outer,
            0.5,
            target.bottom_outer,
            target.bottom_inner,
        );
        assert_eq!(limits.classify(&skewed), PolarisationMode::Unknown);
        assert!(limits.validate(&skewed).is_err());
    }
}

#[test]
fn plans_end_at_the_request_and_only_pass_through_lh() {
    let limits = IdLimits::default();
    let targets = canonical_targets(&limits);

    for (current_mode, current) in &targets {
        for (requested_mode, requested) in &targets {
            let plan = plan_move(current, requested, &limits);
            assert!(plan.len() <= 2);

            if plan.is_empty() {
                assert_eq!(current_mode, requested_mode);
                assert!(!differs(current, requested, &limits));
                continue;
            }

            assert_eq!(plan.target(), Some(requested));
            for step in plan.steps() {
                let mode = limits.classify(step);
                assert!(mode == *requested_mode || mode == PolarisationMode::LH);
                assert_eq!(step.gap, requested.gap);
            }

            if plan.len() == 2 {
                assert_eq!(plan[0], AxisPosition::horizontal(requested.gap));
                assert_ne!(*current_mode, PolarisationMode::LH);
                assert_ne!(*requested_mode, PolarisationMode::LH);
                assert_ne!(current_mode, requested_mode);
            }

            if current_mode != requested_mode
                && *current_mode != PolarisationMode::LH
                && *requested_mode != PolarisationMode::LH
            {
                assert_eq!(plan.len(), 2);
            }
        }
    }
}

#[test]
fn every_planned_step_passes_validation() {
    let limits = IdLimits::default();
    let targets = canonical_targets(&limits);
    for (_, current) in &targets {
        for (_, requested) in &targets {
            for step in plan_move(current, requested, &limits).steps() {
                assert!(limits.validate(step).is_ok(), "{step}");
            }
        }
    }
}

#[test]
fn built_targets_never_land_in_another_mode() {
    let limits = IdLimits::default();
    let max = limits.max_phase_motor_position;
    for mode in PolarisationMode::KNOWN {
        for phase in [0.0, 0.005, -0.005, 0.01, 1.0, max - 0.005, max] {
            match limits.target_for(mode, 40.0, phase) {
                Ok(target) => assert_eq!(limits.classify(&target), mode, "{mode} at {phase}"),
                Err(err) => assert!(err.is_validation(), "{err}"),
            }
        }
    }
}
