//! Move progress notifications.

use super::position::AxisPosition;
use crate::error::IdError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// Progress of one accepted move request.
#[derive(Debug, Clone)]
pub enum MoveEvent {
    /// A step was handed to the device
    StepIssued {
        /// Move this step belongs to
        move_id: Uuid,
        /// Zero-based step index
        step: usize,
        /// Steps in the plan
        total: usize,
        /// Position this step drives to
        target: AxisPosition,
        /// When the step was issued
        at: DateTime<Utc>,
    },
    /// Every step completed; the device is at `target`
    Completed {
        /// Move that finished
        move_id: Uuid,
        /// Final position
        target: AxisPosition,
        /// When the last step completed
        at: DateTime<Utc>,
    },
    /// The move stopped early and the sequencer is idle again
    Failed {
        /// Move that was abandoned
        move_id: Uuid,
        /// Why the move stopped
        error: IdError,
        /// When the failure was seen
        at: DateTime<Utc>,
    },
}

impl MoveEvent {
    /// Identifier of the move this event belongs to
    pub fn move_id(&self) -> Uuid {
        match self {
            MoveEvent::StepIssued { move_id, .. }
            | MoveEvent::Completed { move_id, .. }
            | MoveEvent::Failed { move_id, .. } => *move_id,
        }
    }

    /// True for `Completed` and `Failed`
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MoveEvent::StepIssued { .. })
    }
}

/// Token returned by `subscribe`, used to unsubscribe.
pub type ObserverId = u64;

type Observer = Arc<dyn Fn(&MoveEvent) + Send + Sync>;

#[derive(Default)]
struct Observers {
    next_id: ObserverId,
    entries: Vec<(ObserverId, Observer)>,
}

/// Shared list of move observers.
///
/// Observers are called synchronously on the sequencer task, outside the
/// list lock, so they may subscribe or unsubscribe from inside a callback.
#[derive(Clone, Default)]
pub struct ObserverList {
    inner: Arc<Mutex<Observers>>,
}

impl ObserverList {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer; it sees every later event
    pub fn subscribe(&self, observer: impl Fn(&MoveEvent) + Send + Sync + 'static) -> ObserverId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.entries.push((id, Arc::new(observer)));
        id
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|(entry, _)| *entry != id);
        inner.entries.len() != before
    }

    /// Number of subscribed observers
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True when nobody is subscribed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every observer with `event`, in subscription order
    pub fn notify(&self, event: &MoveEvent) {
        let observers: Vec<Observer> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer(event);
        }
    }
}
