//! In-memory insertion device.
//!
//! Moves complete after a fixed duration, or only when the test says so in
//! [`CompletionMode::Manual`]. Enable state, control mode and one-shot
//! failures can be changed at any time.

use super::capability::{IdControlMode, InsertionDevice, StepCompletion};
use super::position::{Axis, AxisPosition};
use crate::transport::PutStatus;
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// When a started move finishes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompletionMode {
    /// Finish on a background task after the given duration
    After(Duration),
    /// Hold moves until [`SimulatedId::complete_next`] or [`SimulatedId::fail_next`]
    Manual,
}

struct PendingMove {
    target: AxisPosition,
    completion: StepCompletion,
}

struct SimState {
    position: AxisPosition,
    enabled: bool,
    control_mode: IdControlMode,
    fail_next_issue: Option<String>,
    fail_next_completion: Option<String>,
    read_fault: Option<Axis>,
    pending: VecDeque<PendingMove>,
    issued: Vec<AxisPosition>,
}

/// Simulated Apple II insertion device.
#[derive(Clone)]
pub struct SimulatedId {
    state: Arc<Mutex<SimState>>,
    completion: CompletionMode,
}

impl Default for SimulatedId {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SimulatedId {
    /// Device at LH, gap 20 mm, finishing moves after 50 ms
    pub fn new() -> Self {
        Self::default()
    }

    /// Start configuring a device
    pub fn builder() -> SimulatedIdBuilder {
        SimulatedIdBuilder::new()
    }

    /// Current position
    pub fn position(&self) -> AxisPosition {
        self.state.lock().position
    }

    /// Every target handed to `start_move`, oldest first
    pub fn issued(&self) -> Vec<AxisPosition> {
        self.state.lock().issued.clone()
    }

    /// Moves started but not yet completed
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Enable or disable the device
    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
    }

    /// Switch the reported control mode
    pub fn set_control_mode(&self, mode: IdControlMode) {
        self.state.lock().control_mode = mode;
    }

    /// Place the device somewhere without a move
    pub fn set_position(&self, position: AxisPosition) {
        self.state.lock().position = position;
    }

    /// Make the next `start_move` fail without issuing
    pub fn fail_next_issue(&self, reason: impl Into<String>) {
        self.state.lock().fail_next_issue = Some(reason.into());
    }

    /// Make the next move that finishes report failure
    pub fn fail_next_completion(&self, reason: impl Into<String>) {
        self.state.lock().fail_next_completion = Some(reason.into());
    }

    /// Make reads of `axis` fail; `None` clears
    pub fn set_read_fault(&self, axis: Option<Axis>) {
        self.state.lock().read_fault = axis;
    }

    /// Finish the oldest held move successfully; false if none is held
    pub fn complete_next(&self) -> bool {
        let pending = {
            let mut state = self.state.lock();
            let Some(pending) = state.pending.pop_front() else {
                return false;
            };
            state.position = pending.target;
            pending
        };
        pending.completion.complete(PutStatus::Success);
        true
    }

    /// Fail the oldest held move without moving; false if none is held
    pub fn fail_next(&self, reason: impl Into<String>) -> bool {
        let Some(pending) = self.state.lock().pending.pop_front() else {
            return false;
        };
        pending.completion.complete(PutStatus::Failure(reason.into()));
        true
    }

    fn finish(state: &Mutex<SimState>, target: AxisPosition) -> PutStatus {
        let mut state = state.lock();
        match state.fail_next_completion.take() {
            Some(reason) => PutStatus::Failure(reason),
            None => {
                state.position = target;
                PutStatus::Success
            }
        }
    }
}

#[async_trait]
impl InsertionDevice for SimulatedId {
    async fn start_move(&self, target: AxisPosition, completion: StepCompletion) -> Result<()> {
        {
            let mut state = self.state.lock();
            if let Some(reason) = state.fail_next_issue.take() {
                bail!("simulated issue failure: {reason}");
            }
            if !state.enabled {
                bail!("simulated device is disabled");
            }
            state.issued.push(target);
            if self.completion == CompletionMode::Manual {
                state.pending.push_back(PendingMove { target, completion });
                tracing::debug!(%target, "SimulatedId: move held");
                return Ok(());
            }
        }

        tracing::debug!(%target, "SimulatedId: moving");
        if let CompletionMode::After(duration) = self.completion {
            let state = self.state.clone();
            tokio::spawn(async move {
                sleep(duration).await;
                let status = Self::finish(&state, target);
                tracing::debug!(%target, ?status, "SimulatedId: move finished");
                completion.complete(status);
            });
        }
        Ok(())
    }

    async fn read_axis(&self, axis: Axis) -> Result<f64> {
        let state = self.state.lock();
        if state.read_fault == Some(axis) {
            bail!("simulated read failure on {axis}");
        }
        Ok(state.position.get(axis))
    }

    async fn is_enabled(&self) -> Result<bool> {
        Ok(self.state.lock().enabled)
    }

    async fn control_mode(&self) -> Result<IdControlMode> {
        Ok(self.state.lock().control_mode)
    }
}

/// Builder for [`SimulatedId`].
pub struct SimulatedIdBuilder {
    position: AxisPosition,
    enabled: bool,
    control_mode: IdControlMode,
    completion: CompletionMode,
}

impl SimulatedIdBuilder {
    /// Same settings as [`SimulatedId::new`]
    pub fn new() -> Self {
        Self {
            position: AxisPosition::horizontal(20.0),
            enabled: true,
            control_mode: IdControlMode::GapAndPhase,
            completion: CompletionMode::After(Duration::from_millis(50)),
        }
    }

    /// Starting position
    pub fn position(mut self, position: AxisPosition) -> Self {
        self.position = position;
        self
    }

    /// Whether the device accepts moves
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Reported control mode
    pub fn control_mode(mut self, mode: IdControlMode) -> Self {
        self.control_mode = mode;
        self
    }

    /// Finish moves after `duration`
    pub fn move_duration(mut self, duration: Duration) -> Self {
        self.completion = CompletionMode::After(duration);
        self
    }

    /// Hold moves until completed by hand
    pub fn manual(mut self) -> Self {
        self.completion = CompletionMode::Manual;
        self
    }

    /// Finish the device
    pub fn build(self) -> SimulatedId {
        SimulatedId {
            state: Arc::new(Mutex::new(SimState {
                position: self.position,
                enabled: self.enabled,
                control_mode: self.control_mode,
                fail_next_issue: None,
                fail_next_completion: None,
                read_fault: None,
                pending: VecDeque::new(),
                issued: Vec::new(),
            })),
            completion: self.completion,
        }
    }
}

impl Default for SimulatedIdBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn token() -> (StepCompletion, oneshot::Receiver<PutStatus>) {
        let (tx, rx) = oneshot::channel();
        (
            StepCompletion::new(move |status| {
                let _ = tx.send(status);
            }),
            rx,
        )
    }

    #[tokio::test]
    async fn timed_move_updates_position() {
        let device = SimulatedId::builder()
            .move_duration(Duration::from_millis(5))
            .build();
        let target = AxisPosition::new(30.0, 4.0, 0.0, 0.0, 4.0);
        let (completion, rx) = token();
        device.start_move(target, completion).await.unwrap();
        assert_eq!(rx.await.unwrap(), PutStatus::Success);
        assert_eq!(device.position(), target);
    }

    #[tokio::test]
    async fn manual_moves_wait_for_the_test() {
        let device = SimulatedId::builder().manual().build();
        let target = AxisPosition::horizontal(40.0);
        let (completion, mut rx) = token();
        device.start_move(target, completion).await.unwrap();

        assert_eq!(device.pending(), 1);
        assert!(rx.try_recv().is_err());
        assert!(device.complete_next());
        assert_eq!(rx.await.unwrap(), PutStatus::Success);
        assert_eq!(device.position(), target);
        assert!(!device.complete_next());
    }

    #[test]
    fn reads_do_not_need_a_runtime() {
        let device = SimulatedId::builder()
            .position(AxisPosition::new(25.0, 4.0, 0.0, 0.0, -4.0))
            .build();
        assert_eq!(tokio_test::block_on(device.read_axis(Axis::TopOuter)).unwrap(), 4.0);
        assert!(tokio_test::block_on(device.is_enabled()).unwrap());
    }

    #[tokio::test]
    async fn injected_failures() {
        let device = SimulatedId::builder().manual().build();
        device.fail_next_issue("interlock");
        let (completion, _rx) = token();
        assert!(device
            .start_move(AxisPosition::horizontal(30.0), completion)
            .await
            .is_err());
        assert!(device.issued().is_empty());

        device.set_read_fault(Some(Axis::TopInner));
        assert!(device.read_axis(Axis::TopInner).await.is_err());
        assert!(device.read_axis(Axis::Gap).await.is_ok());
    }
}
