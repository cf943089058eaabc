//! Motion sequencer.
//!
//! Executes move plans one step at a time on a single task. A step is issued
//! only after the previous step's completion has been received, so at most
//! one step is ever outstanding on the device.
//!
//! ```text
//! MotionSequencer (handle) ──SequencerCommand──┐
//!                                              ├──> SequencerActor ──> InsertionDevice
//! StepCompletion (device thread) ──StepDone───┘        │
//!                                                      └──watch<bool> busy, MoveEvent observers
//! ```
//!
//! A new request while a move is in progress is rejected with
//! [`IdError::Busy`]; the running move is never replaced or cancelled.

use super::capability::{IdControlMode, InsertionDevice, StepCompletion};
use super::mode::{IdLimits, PolarisationMode};
use super::observer::{MoveEvent, ObserverId, ObserverList};
use super::plan::{plan_move, MovePlan};
use super::position::{Axis, AxisPosition};
use crate::error::{AppResult, IdError};
use crate::transport::PutStatus;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

const ACTOR_NAME: &str = "motion sequencer";

/// Result of an accepted move request.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveAccepted {
    /// Identifier carried by every [`MoveEvent`] of this move
    pub move_id: Uuid,
    /// Steps that will be executed; empty when already at the target
    pub plan: MovePlan,
}

enum SequencerCommand {
    MoveTo {
        target: AxisPosition,
        response: oneshot::Sender<AppResult<MoveAccepted>>,
    },
}

impl SequencerCommand {
    fn move_to(target: AxisPosition) -> (Self, oneshot::Receiver<AppResult<MoveAccepted>>) {
        let (response, rx) = oneshot::channel();
        (Self::MoveTo { target, response }, rx)
    }
}

/// Completion of one issued step, tagged so late arrivals can be recognised.
#[derive(Debug)]
struct StepDone {
    move_id: Uuid,
    step: usize,
    status: PutStatus,
}

struct ActiveMove {
    id: Uuid,
    target: AxisPosition,
    plan: MovePlan,
    step: usize,
}

struct SequencerActor {
    device: Arc<dyn InsertionDevice>,
    limits: IdLimits,
    observers: ObserverList,
    busy_tx: watch::Sender<bool>,
    done_tx: mpsc::UnboundedSender<StepDone>,
    active: Option<ActiveMove>,
}

impl SequencerActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SequencerCommand>,
        mut done: mpsc::UnboundedReceiver<StepDone>,
    ) {
        let mut commands_open = true;
        loop {
            tokio::select! {
                biased;
                Some(step_done) = done.recv() => self.on_step_done(step_done).await,
                command = commands.recv(), if commands_open => match command {
                    Some(SequencerCommand::MoveTo { target, response }) => {
                        let result = self.move_to(target).await;
                        let _ = response.send(result);
                    }
                    None => commands_open = false,
                },
            }
            if !commands_open && self.active.is_none() {
                break;
            }
        }
        debug!("motion sequencer task exiting");
    }

    async fn move_to(&mut self, target: AxisPosition) -> AppResult<MoveAccepted> {
        let enabled = self
            .device
            .is_enabled()
            .await
            .map_err(|e| read_failure("enabled", e))?;
        if !enabled {
            return Err(IdError::DeviceDisabled);
        }

        let control_mode = self
            .device
            .control_mode()
            .await
            .map_err(|e| read_failure("control mode", e))?;
        if control_mode != IdControlMode::GapAndPhase {
            return Err(IdError::ModeMismatch(format!(
                "device is in {control_mode}, moves need {}",
                IdControlMode::GapAndPhase
            )));
        }

        let requested_mode = self.limits.validate(&target)?;

        if self.active.is_some() {
            return Err(IdError::Busy);
        }

        let current = read_position(self.device.as_ref()).await?;
        let plan = plan_move(&current, &target, &self.limits);
        let move_id = Uuid::new_v4();
        info!(
            %move_id,
            from = %current,
            to = %target,
            mode = %requested_mode,
            steps = plan.len(),
            "move accepted"
        );

        if plan.is_empty() {
            return Ok(MoveAccepted { move_id, plan });
        }

        self.active = Some(ActiveMove {
            id: move_id,
            target,
            plan: plan.clone(),
            step: 0,
        });
        self.busy_tx.send_replace(true);

        if let Err(err) = self.issue_current_step().await {
            self.fail(err.clone());
            return Err(err);
        }
        Ok(MoveAccepted { move_id, plan })
    }

    async fn issue_current_step(&mut self) -> AppResult<()> {
        let Some(active) = self.active.as_ref() else {
            return Ok(());
        };
        let (move_id, step, total) = (active.id, active.step, active.plan.len());
        let target = active.plan[step];

        let done_tx = self.done_tx.clone();
        let completion = StepCompletion::new(move |status| {
            let _ = done_tx.send(StepDone {
                move_id,
                step,
                status,
            });
        });

        self.device
            .start_move(target, completion)
            .await
            .map_err(|e| IdError::StepIssuanceFailed {
                step,
                reason: e.to_string(),
            })?;

        debug!(%move_id, step, total, %target, "step issued");
        self.observers.notify(&MoveEvent::StepIssued {
            move_id,
            step,
            total,
            target,
            at: Utc::now(),
        });
        Ok(())
    }

    async fn on_step_done(&mut self, done: StepDone) {
        let matches = self
            .active
            .as_ref()
            .is_some_and(|active| active.id == done.move_id && active.step == done.step);
        if !matches {
            warn!(
                move_id = %done.move_id,
                step = done.step,
                "ignoring completion for a step that is not outstanding"
            );
            return;
        }

        if let PutStatus::Failure(reason) = done.status {
            self.fail(IdError::StepFailed {
                step: done.step,
                reason,
            });
            return;
        }

        let finished = match self.active.as_mut() {
            Some(active) => {
                active.step += 1;
                active.step >= active.plan.len()
            }
            None => return,
        };

        if finished {
            self.complete();
        } else if let Err(err) = self.issue_current_step().await {
            self.fail(err);
        }
    }

    fn complete(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.busy_tx.send_replace(false);
        info!(move_id = %active.id, target = %active.target, "move complete");
        self.observers.notify(&MoveEvent::Completed {
            move_id: active.id,
            target: active.target,
            at: Utc::now(),
        });
    }

    fn fail(&mut self, err: IdError) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.busy_tx.send_replace(false);
        error!(move_id = %active.id, step = active.step, error = %err, "move failed");
        self.observers.notify(&MoveEvent::Failed {
            move_id: active.id,
            error: err,
            at: Utc::now(),
        });
    }
}

fn read_failure(name: &str, err: anyhow::Error) -> IdError {
    IdError::ReadFailure {
        name: name.to_string(),
        reason: err.to_string(),
    }
}

async fn read_position(device: &dyn InsertionDevice) -> AppResult<AxisPosition> {
    let mut position = AxisPosition::horizontal(0.0);
    for axis in Axis::ALL {
        let value = device
            .read_axis(axis)
            .await
            .map_err(|e| read_failure(axis.label(), e))?;
        position = position.with(axis, value);
    }
    Ok(position)
}

/// Handle to a running motion sequencer.
///
/// # Example
///
/// ```rust,ignore
/// let sequencer = MotionSequencer::spawn(Arc::new(SimulatedId::new()), IdLimits::default());
/// let accepted = sequencer
///     .move_to_mode(PolarisationMode::CR, 60.0, 10.0)
///     .await?;
/// sequencer.wait_until_idle(Duration::from_secs(5)).await;
/// ```
#[derive(Clone)]
pub struct MotionSequencer {
    commands: mpsc::Sender<SequencerCommand>,
    busy: watch::Receiver<bool>,
    device: Arc<dyn InsertionDevice>,
    observers: ObserverList,
    limits: IdLimits,
}

impl MotionSequencer {
    /// Spawn the sequencer task for `device` on the current runtime
    pub fn spawn(device: Arc<dyn InsertionDevice>, limits: IdLimits) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (busy_tx, busy_rx) = watch::channel(false);
        let observers = ObserverList::new();

        let actor = SequencerActor {
            device: device.clone(),
            limits,
            observers: observers.clone(),
            busy_tx,
            done_tx,
            active: None,
        };
        tokio::spawn(actor.run(commands_rx, done_rx).in_current_span());

        Self {
            commands: commands_tx,
            busy: busy_rx,
            device,
            observers,
            limits,
        }
    }

    /// Request a move to `target`.
    ///
    /// Returns once the plan is computed and its first step issued; the move
    /// then continues in the background.
    ///
    /// # Errors
    ///
    /// Checked in this order:
    /// - `DeviceDisabled` if the device does not accept moves
    /// - `ModeMismatch` unless the device is in gap-and-phase control
    /// - `InvalidTarget` for an unclassifiable or out-of-range target
    /// - `Busy` while a previous move is still executing
    /// - `ReadFailure` if the current position cannot be read
    /// - `StepIssuanceFailed` if the first step cannot be issued
    pub async fn move_to(&self, target: AxisPosition) -> AppResult<MoveAccepted> {
        let (command, rx) = SequencerCommand::move_to(target);
        self.commands
            .send(command)
            .await
            .map_err(|_| IdError::ActorUnavailable(ACTOR_NAME))?;
        rx.await.map_err(|_| IdError::ActorUnavailable(ACTOR_NAME))?
    }

    /// Request the canonical position of `mode` at `gap` with phase offset `phase`
    pub async fn move_to_mode(
        &self,
        mode: PolarisationMode,
        gap: f64,
        phase: f64,
    ) -> AppResult<MoveAccepted> {
        let target = self.limits.target_for(mode, gap, phase)?;
        self.move_to(target).await
    }

    /// True while an accepted move has unfinished steps
    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    /// Wait until no move is executing; false if `timeout` elapsed first
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        let mut busy = self.busy.clone();
        let idle = matches!(
            tokio::time::timeout(timeout, busy.wait_for(|busy| !*busy)).await,
            Ok(Ok(_))
        );
        idle
    }

    /// Current device position
    pub async fn position(&self) -> AppResult<AxisPosition> {
        read_position(self.device.as_ref()).await
    }

    /// Polarisation mode of the current device position
    pub async fn mode(&self) -> AppResult<PolarisationMode> {
        Ok(self.limits.classify(&self.position().await?))
    }

    /// Limits used for validation and planning
    pub fn limits(&self) -> &IdLimits {
        &self.limits
    }

    /// Register an observer for every [`MoveEvent`]
    pub fn subscribe(&self, observer: impl Fn(&MoveEvent) + Send + Sync + 'static) -> ObserverId {
        self.observers.subscribe(observer)
    }

    /// Remove an observer; false if it was not registered
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }
}
