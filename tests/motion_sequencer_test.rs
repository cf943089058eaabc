//! Integration tests for the motion sequencer against the simulated device.

use id_control::device::{
    Axis, AxisPosition, IdControlMode, IdLimits, MotionSequencer, MoveEvent, PolarisationMode,
    SimulatedId,
};
use id_control::IdError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

struct Harness {
    device: SimulatedId,
    sequencer: MotionSequencer,
    events: Arc<Mutex<Vec<MoveEvent>>>,
}

fn harness_at(position: AxisPosition) -> Harness {
    let device = SimulatedId::builder().position(position).manual().build();
    let sequencer = MotionSequencer::spawn(Arc::new(device.clone()), IdLimits::default());
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    sequencer.subscribe(move |event| sink.lock().push(event.clone()));
    Harness {
        device,
        sequencer,
        events,
    }
}

async fn wait_for(condition: impl Fn() -> bool) {
    timeout(Duration::from_secs(1), async {
        while !condition() {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached");
}

fn limits() -> IdLimits {
    IdLimits::default()
}

#[tokio::test]
async fn lh_to_cr_is_a_single_step() {
    let h = harness_at(AxisPosition::horizontal(50.0));
    let target = limits().target_for(PolarisationMode::CR, 60.0, 10.0).unwrap();

    let accepted = h.sequencer.move_to(target).await.unwrap();
    assert_eq!(
        accepted.plan.steps(),
        &[AxisPosition::new(60.0, 10.0, 0.0, 0.0, 10.0)]
    );
    assert!(h.sequencer.is_busy());

    assert!(h.device.complete_next());
    assert!(h.sequencer.wait_until_idle(Duration::from_secs(1)).await);
    assert_eq!(h.sequencer.position().await.unwrap(), target);

    let events = h.events.lock();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], MoveEvent::StepIssued { step: 0, total: 1, .. }));
    assert!(matches!(events[1], MoveEvent::Completed { target: t, .. } if t == target));
    assert!(events.iter().all(|e| e.move_id() == accepted.move_id));
}

#[tokio::test]
async fn lv_then_cl_routes_through_lh() {
    let h = harness_at(AxisPosition::horizontal(50.0));
    let lv = limits().target_for(PolarisationMode::LV, 50.0, 0.0).unwrap();
    let cl = limits().target_for(PolarisationMode::CL, 50.0, 12.0).unwrap();

    let first = h.sequencer.move_to(lv).await.unwrap();
    assert_eq!(first.plan.steps(), &[lv]);
    h.device.complete_next();
    assert!(h.sequencer.wait_until_idle(Duration::from_secs(1)).await);
    assert_eq!(h.sequencer.mode().await.unwrap(), PolarisationMode::LV);

    let second = h.sequencer.move_to(cl).await.unwrap();
    assert_eq!(second.plan.steps(), &[AxisPosition::horizontal(50.0), cl]);

    // one step outstanding at a time
    assert_eq!(h.device.pending(), 1);
    h.device.complete_next();
    wait_for(|| h.device.pending() == 1 && h.device.issued().len() == 3).await;
    assert!(h.sequencer.is_busy());
    assert_eq!(h.device.position(), AxisPosition::horizontal(50.0));

    h.device.complete_next();
    assert!(h.sequencer.wait_until_idle(Duration::from_secs(1)).await);
    assert_eq!(h.device.issued(), vec![lv, AxisPosition::horizontal(50.0), cl]);
    assert_eq!(h.sequencer.mode().await.unwrap(), PolarisationMode::CL);
}

#[tokio::test]
async fn busy_rejection_leaves_running_plan_alone() {
    let start = limits().target_for(PolarisationMode::LAP, 40.0, 6.0).unwrap();
    let h = harness_at(start);
    let target = limits().target_for(PolarisationMode::CR, 45.0, 9.0).unwrap();
    let accepted = h.sequencer.move_to(target).await.unwrap();
    assert_eq!(accepted.plan.len(), 2);

    let other = limits().target_for(PolarisationMode::LAN, 30.0, 3.0).unwrap();
    assert!(matches!(h.sequencer.move_to(other).await, Err(IdError::Busy)));
    assert!(matches!(
        h.sequencer.move_to(AxisPosition::horizontal(45.0)).await,
        Err(IdError::Busy)
    ));

    h.device.complete_next();
    wait_for(|| h.device.issued().len() == 2).await;
    h.device.complete_next();
    assert!(h.sequencer.wait_until_idle(Duration::from_secs(1)).await);
    assert_eq!(h.device.issued(), accepted.plan.steps().to_vec());
    assert_eq!(h.device.position(), target);
}

#[tokio::test]
async fn validation_failures_do_not_start_anything() {
    let h = harness_at(AxisPosition::horizontal(30.0));
    let valid = limits().target_for(PolarisationMode::CR, 30.0, 5.0).unwrap();

    h.device.set_enabled(false);
    assert!(matches!(
        h.sequencer.move_to(valid).await,
        Err(IdError::DeviceDisabled)
    ));
    // disabled wins over an invalid target
    assert!(matches!(
        h.sequencer.move_to(AxisPosition::horizontal(1.0)).await,
        Err(IdError::DeviceDisabled)
    ));

    h.device.set_enabled(true);
    h.device.set_control_mode(IdControlMode::GapOnly);
    assert!(matches!(
        h.sequencer.move_to(valid).await,
        Err(IdError::ModeMismatch(_))
    ));

    h.device.set_control_mode(IdControlMode::GapAndPhase);
    let unknown = AxisPosition::new(30.0, 5.0, 1.0, 0.0, 5.0);
    assert!(matches!(
        h.sequencer.move_to(unknown).await,
        Err(IdError::InvalidTarget(_))
    ));

    assert!(h.device.issued().is_empty());
    assert!(!h.sequencer.is_busy());
    assert!(h.events.lock().is_empty());
}

#[tokio::test]
async fn mode_request_without_a_phase_is_rejected() {
    let h = harness_at(AxisPosition::horizontal(30.0));
    for mode in [PolarisationMode::CR, PolarisationMode::LAP] {
        assert!(matches!(
            h.sequencer.move_to_mode(mode, 60.0, 0.0).await,
            Err(IdError::InvalidTarget(_))
        ));
    }
    assert!(matches!(
        h.sequencer
            .move_to_mode(PolarisationMode::CR, 60.0, h.sequencer.limits().max_phase_motor_position)
            .await,
        Err(IdError::InvalidTarget(_))
    ));
    assert!(h.device.issued().is_empty());
    assert!(h.events.lock().is_empty());
    assert_eq!(h.sequencer.mode().await.unwrap(), PolarisationMode::LH);
}

#[tokio::test]
async fn min_gap_boundary() {
    let l = limits();
    let h = harness_at(AxisPosition::horizontal(30.0));

    let exact = AxisPosition::horizontal(l.min_gap);
    h.sequencer.move_to(exact).await.unwrap();
    h.device.complete_next();
    assert!(h.sequencer.wait_until_idle(Duration::from_secs(1)).await);

    let below = AxisPosition::horizontal(f64::from_bits(l.min_gap.to_bits() - 1));
    assert!(below.gap < l.min_gap);
    assert!(matches!(
        h.sequencer.move_to(below).await,
        Err(IdError::InvalidTarget(_))
    ));
}

#[tokio::test]
async fn max_phase_boundary() {
    let l = limits();
    let max = l.max_phase_motor_position;
    let h = harness_at(AxisPosition::horizontal(30.0));

    let exact = AxisPosition::new(30.0, max, 0.0, 0.0, -max);
    assert_eq!(l.classify(&exact), PolarisationMode::LAP);
    h.sequencer.move_to(exact).await.unwrap();
    h.device.complete_next();
    assert!(h.sequencer.wait_until_idle(Duration::from_secs(1)).await);

    let above = f64::from_bits(max.to_bits() + 1);
    let beyond = AxisPosition::new(30.0, above, 0.0, 0.0, -above);
    assert!(matches!(
        h.sequencer.move_to(beyond).await,
        Err(IdError::InvalidTarget(_))
    ));
    let beyond_negative = AxisPosition::new(30.0, -above, 0.0, 0.0, above);
    assert!(matches!(
        h.sequencer.move_to(beyond_negative).await,
        Err(IdError::InvalidTarget(_))
    ));
}

#[tokio::test]
async fn first_step_issue_failure_is_returned_and_observed() {
    let h = harness_at(AxisPosition::horizontal(30.0));
    h.device.fail_next_issue("drive interlock");

    let err = h
        .sequencer
        .move_to(AxisPosition::horizontal(35.0))
        .await
        .unwrap_err();
    assert!(matches!(err, IdError::StepIssuanceFailed { step: 0, .. }));
    assert!(!h.sequencer.is_busy());

    let events = h.events.lock();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        MoveEvent::Failed {
            error: IdError::StepIssuanceFailed { step: 0, .. },
            ..
        }
    ));
}

#[tokio::test]
async fn later_step_issue_failure_abandons_plan() {
    let start = limits().target_for(PolarisationMode::CR, 30.0, 5.0).unwrap();
    let h = harness_at(start);
    let target = limits().target_for(PolarisationMode::CL, 30.0, 5.0).unwrap();
    h.sequencer.move_to(target).await.unwrap();

    h.device.fail_next_issue("drive interlock");
    h.device.complete_next();
    assert!(h.sequencer.wait_until_idle(Duration::from_secs(1)).await);

    assert_eq!(h.device.issued().len(), 1);
    let events = h.events.lock();
    assert!(matches!(
        events.last(),
        Some(MoveEvent::Failed {
            error: IdError::StepIssuanceFailed { step: 1, .. },
            ..
        })
    ));
}

#[tokio::test]
async fn failed_completion_stops_the_plan() {
    let start = limits().target_for(PolarisationMode::LV, 30.0, 0.0).unwrap();
    let h = harness_at(start);
    h.sequencer
        .move_to_mode(PolarisationMode::LAN, 30.0, 4.0)
        .await
        .unwrap();

    assert!(h.device.fail_next("motor stalled"));
    assert!(h.sequencer.wait_until_idle(Duration::from_secs(1)).await);
    assert_eq!(h.device.issued().len(), 1);
    assert_eq!(h.device.position(), start);

    let events = h.events.lock();
    match events.last() {
        Some(MoveEvent::Failed {
            error: IdError::StepFailed { step, reason },
            ..
        }) => {
            assert_eq!(*step, 0);
            assert!(reason.contains("motor stalled"));
        }
        other => panic!("unexpected final event: {:?}", other),
    }
}

#[tokio::test]
async fn position_read_failure_surfaces() {
    let h = harness_at(AxisPosition::horizontal(30.0));
    h.device.set_read_fault(Some(Axis::BottomOuter));

    assert!(matches!(
        h.sequencer.position().await,
        Err(IdError::ReadFailure { ref name, .. }) if name == "bottom outer motor"
    ));
    assert!(matches!(
        h.sequencer.move_to(AxisPosition::horizontal(35.0)).await,
        Err(IdError::ReadFailure { .. })
    ));
    assert!(!h.sequencer.is_busy());
}

#[tokio::test]
async fn no_op_move_needs_no_steps() {
    let h = harness_at(AxisPosition::horizontal(30.0));
    let accepted = h
        .sequencer
        .move_to(AxisPosition::new(30.001, 0.0, 0.0, 0.0, 0.002))
        .await
        .unwrap();
    assert!(accepted.plan.is_empty());
    assert!(!h.sequencer.is_busy());
    assert!(h.sequencer.wait_until_idle(Duration::from_millis(10)).await);
}

#[tokio::test]
async fn unsubscribed_observer_misses_later_moves() {
    let h = harness_at(AxisPosition::horizontal(30.0));
    let extra = Arc::new(Mutex::new(0usize));
    let counter = extra.clone();
    let id = h.sequencer.subscribe(move |_| *counter.lock() += 1);

    h.sequencer.move_to(AxisPosition::horizontal(31.0)).await.unwrap();
    h.device.complete_next();
    assert!(h.sequencer.wait_until_idle(Duration::from_secs(1)).await);
    assert_eq!(*extra.lock(), 2);

    assert!(h.sequencer.unsubscribe(id));
    h.sequencer.move_to(AxisPosition::horizontal(32.0)).await.unwrap();
    h.device.complete_next();
    assert!(h.sequencer.wait_until_idle(Duration::from_secs(1)).await);
    assert_eq!(*extra.lock(), 2);
    assert_eq!(h.events.lock().len(), 4);
}

#[tokio::test]
async fn timed_device_completes_on_its_own() {
    let device = SimulatedId::builder()
        .move_duration(Duration::from_millis(5))
        .build();
    let sequencer = MotionSequencer::spawn(Arc::new(device), IdLimits::default());

    sequencer
        .move_to_mode(PolarisationMode::LV, 25.0, 0.0)
        .await
        .unwrap();
    assert!(!sequencer
        .wait_until_idle(Duration::from_millis(1))
        .await);
    assert!(sequencer.wait_until_idle(Duration::from_secs(2)).await);
    assert_eq!(sequencer.mode().await.unwrap(), PolarisationMode::LV);

    sequencer
        .move_to_mode(PolarisationMode::CR, 25.0, 7.0)
        .await
        .unwrap();
    assert!(sequencer.wait_until_idle(Duration::from_secs(2)).await);
    assert_eq!(sequencer.mode().await.unwrap(), PolarisationMode::CR);
}
