//! Fan-out Combinators
//!
//! A step may split its work into concurrently running sub-operations:
//!
//! - [`Next::parallel`](super::Next::parallel) hands out one [`Callback`]
//!   per sub-operation. Their results are spread positionally into the next
//!   step's arguments.
//! - [`Next::group`](super::Next::group) occupies a single parallel slot and
//!   collects its own sub-operations into one array argument.
//!
//! Results land in spawn order. Completion order only decides when a batch
//! closes. The first error seen wins; later ones are dropped.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, warn};
use serde_json::Value;

use crate::error::StepError;

use super::Args;

/// Sub-callback handed out by the fan-out spawners.
///
/// Invoke it with `(error, values)` exactly once, like a continuation.
#[derive(Clone)]
pub struct Callback {
    f: Rc<dyn Fn(Option<StepError>, Args)>,
}

impl Callback {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: Fn(Option<StepError>, Args) + 'static,
    {
        Self { f: Rc::new(f) }
    }

    pub fn call(&self, error: Option<StepError>, args: Args) {
        (*self.f)(error, args)
    }

    /// Completes successfully with `args`.
    pub fn ok(&self, args: Args) {
        self.call(None, args)
    }

    /// Completes with `error`. The first error of a batch wins.
    pub fn fail(&self, error: StepError) {
        self.call(Some(error), Vec::new())
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Callback")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BatchKind {
    Parallel,
    Group,
}

#[derive(Default)]
struct BatchState {
    total: usize,
    received: usize,
    error: Option<StepError>,
    values: Vec<Value>,
}

/// Positional result buffer shared by the sub-callbacks of one fan-out.
pub(crate) struct Batch {
    kind: BatchKind,
    state: RefCell<BatchState>,
}

impl Batch {
    pub(crate) fn new(kind: BatchKind) -> Self {
        Self {
            kind,
            state: RefCell::new(BatchState::default()),
        }
    }

    /// Reserves the next slot index and raises the expected count.
    pub(crate) fn spawn(&self) -> usize {
        let mut state = self.state.borrow_mut();
        let index = state.total;
        state.total += 1;
        index
    }

    pub(crate) fn expected(&self) -> usize {
        self.state.borrow().total
    }

    /// Records one sub-completion.
    ///
    /// Returns the assembled error and values once the received count
    /// reaches the expected count, and again on every call past it.
    pub(crate) fn complete(
        &self,
        index: usize,
        slots: usize,
        error: Option<StepError>,
        args: Args,
    ) -> Option<(Option<StepError>, Args)> {
        let mut state = self.state.borrow_mut();

        if error.is_some() && state.error.is_none() {
            state.error = error;
        }

        let base = index * slots;
        if state.values.len() < base + slots {
            state.values.resize(base + slots, Value::Null);
        }
        let mut values = args.into_iter();
        for slot in 0..slots {
            state.values[base + slot] = values.next().unwrap_or(Value::Null);
        }

        state.received += 1;
        if state.received < state.total {
            return None;
        }

        if state.received > state.total {
            let expected = state.total;
            warn!(
                "{:?} callback fired {} times, expected {}",
                self.kind, state.received, expected
            );
            if state.error.is_none() {
                state.error = Some(match self.kind {
                    BatchKind::Parallel => StepError::ParallelOverflow { expected },
                    BatchKind::Group => StepError::GroupOverflow { expected },
                });
            }
        } else {
            debug!("{:?} batch of {} closed", self.kind, state.total);
        }

        Some((state.error.clone(), state.values.clone()))
    }

    /// Current error and values, used to resolve a group nobody spawned into.
    fn assembled(&self) -> (Option<StepError>, Args) {
        let state = self.state.borrow();
        (state.error.clone(), state.values.clone())
    }
}

struct GroupState {
    slot: Callback,
    slots: usize,
    batch: Batch,
}

/// Spawner returned by [`Next::group`](super::Next::group).
///
/// Every [`spawn`](Group::spawn) adds one sub-callback. The group's
/// results reach the next step as a single array argument holding `slots`
/// values per sub-callback, in spawn order.
#[derive(Clone)]
pub struct Group {
    state: Rc<GroupState>,
}

impl Group {
    /// Wraps the parallel slot this group reports into.
    pub(crate) fn new(slot: Callback, slots: usize) -> Self {
        Self {
            state: Rc::new(GroupState {
                slot,
                slots,
                batch: Batch::new(BatchKind::Group),
            }),
        }
    }

    /// Creates the next sub-callback of this group.
    pub fn spawn(&self) -> Callback {
        let index = self.state.batch.spawn();
        let state = Rc::clone(&self.state);
        Callback::new(move |error, args| {
            let closed = state.batch.complete(index, state.slots, error, args);
            if let Some((error, values)) = closed {
                state.slot.call(error, vec![Value::Array(values)]);
            }
        })
    }

    /// Number of sub-callbacks spawned so far.
    pub fn len(&self) -> usize {
        self.state.batch.expected()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves the group to an empty array if nothing was spawned into it.
    pub(crate) fn resolve_if_unused(&self) {
        if self.is_empty() {
            debug!("Unused group resolved to an empty array");
            let (error, values) = self.state.batch.assembled();
            self.state.slot.call(error, vec![Value::Array(values)]);
        }
    }
}
