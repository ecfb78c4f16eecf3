//! Continuations
//!
//! Every step receives a fresh [`Next`] bound to its position in the run.
//! Calling it advances the run to the following step, fans results in from
//! `parallel`/`group` sub-callbacks, or terminates the run with an error.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use log::{debug, warn};
use serde_json::Value;

use crate::error::StepError;
use crate::scheduler::Scheduler;

use super::events::Outcome;
use super::fanout::{Batch, BatchKind, Callback, Group};
use super::run::RunState;
use super::store::Store;
use super::Args;

struct NextState {
    run: Rc<RunState>,
    /// Index of the step this continuation advances into.
    position: usize,
    calls: Cell<usize>,
    max_calls: Cell<Option<usize>>,
    error_raised: Cell<bool>,
    batch: RefCell<Option<Rc<Batch>>>,
}

/// The continuation handed to each step.
///
/// Cloning is cheap and every clone drives the same continuation, so a step
/// may move a clone into a timer and return.
#[derive(Clone)]
pub struct Next {
    inner: Rc<NextState>,
}

impl Next {
    pub(crate) fn new(run: Rc<RunState>, position: usize) -> Self {
        let max_calls = run.default_max_calls;
        Self {
            inner: Rc::new(NextState {
                run,
                position,
                calls: Cell::new(0),
                max_calls: Cell::new(max_calls),
                error_raised: Cell::new(false),
                batch: RefCell::new(None),
            }),
        }
    }

    /// Completes this step with an optional error and forwarded values.
    ///
    /// Calls beyond the configured limit turn into
    /// [`StepError::TooManyCalls`] whatever was passed. Only the first
    /// error-carrying call emits "done"; every error reaches the error
    /// channel.
    pub fn call(&self, error: Option<StepError>, args: Args) {
        let state = &self.inner;
        let calls = state.calls.get() + 1;
        state.calls.set(calls);

        let mut error = error;
        if let Some(limit) = state.max_calls.get() {
            if calls > limit {
                warn!(
                    "Continuation of step {} called {} times (limit {})",
                    state.position, calls, limit
                );
                error = Some(StepError::TooManyCalls { limit });
            }
        }

        if let Some(error) = error {
            state.run.raise(error.clone());
            if !state.error_raised.replace(true) {
                state.run.finish(Outcome::failure(error, args));
            }
            return;
        }

        if state.error_raised.get() {
            debug!(
                "Ignoring completion of step {} after an error",
                state.position
            );
            return;
        }

        self.advance(args);
    }

    /// Completes successfully, forwarding `args` to the next step.
    pub fn ok(&self, args: Args) {
        self.call(None, args)
    }

    /// Completes successfully without forwarding anything.
    pub fn done(&self) {
        self.call(None, Vec::new())
    }

    /// Completes with `error`, skipping the remaining steps.
    pub fn fail(&self, error: StepError) {
        self.call(Some(error), Vec::new())
    }

    /// Sets how many times this continuation may be called
    /// (`None` = unlimited).
    pub fn limit_calls(&self, limit: Option<usize>) -> &Self {
        self.inner.max_calls.set(limit);
        self
    }

    /// Number of times this continuation has been called.
    pub fn calls(&self) -> usize {
        self.inner.calls.get()
    }

    /// Index of the step this continuation advances into.
    pub fn position(&self) -> usize {
        self.inner.position
    }

    /// Spawns a parallel sub-callback carrying one value.
    pub fn parallel(&self) -> Callback {
        self.parallel_slots(1)
    }

    /// Spawns a parallel sub-callback whose first `slots` values are
    /// forwarded to the next step.
    ///
    /// When every spawned sub-callback has fired, this continuation is
    /// called once with the first error seen and all values in spawn order.
    /// A step that never spawns is never advanced by this mechanism.
    pub fn parallel_slots(&self, slots: usize) -> Callback {
        let slots = slots.max(1);
        let batch = self.batch();
        let index = batch.spawn();
        let next = self.clone();

        Callback::new(move |error, args| {
            if let Some((error, values)) = batch.complete(index, slots, error, args) {
                next.call(error, values);
            }
        })
    }

    /// Creates a group collecting one value per sub-callback.
    pub fn group(&self) -> Group {
        self.group_slots(1)
    }

    /// Creates a group collecting `slots` values per sub-callback into a
    /// single array argument.
    ///
    /// A group nobody spawns into resolves to an empty array on the next
    /// tick.
    pub fn group_slots(&self, slots: usize) -> Group {
        let group = Group::new(self.parallel(), slots.max(1));

        let pending = group.clone();
        self.inner.run.scheduler.next_tick(move || {
            pending.resolve_if_unused();
            Ok(())
        });

        group
    }

    /// The run's shared store.
    pub fn store(&self) -> Store {
        self.inner.run.store.clone()
    }

    /// The scheduler driving this run, for deferring work onto timers.
    pub fn scheduler(&self) -> Scheduler {
        self.inner.run.scheduler.clone()
    }

    fn batch(&self) -> Rc<Batch> {
        let mut slot = self.inner.batch.borrow_mut();
        Rc::clone(slot.get_or_insert_with(|| Rc::new(Batch::new(BatchKind::Parallel))))
    }

    /// Invokes the step at this continuation's position, or finishes the run
    /// when there is none.
    fn advance(&self, args: Args) {
        let run = &self.inner.run;
        let position = self.inner.position;

        let Some(step) = run.steps.get(position).cloned() else {
            debug!("Run completed after {} steps", run.steps.len());
            run.finish(Outcome::success(args));
            return;
        };

        debug!("Advancing to step {} of {}", position + 1, run.steps.len());
        let next = Next::new(Rc::clone(run), position + 1);

        match panic::catch_unwind(AssertUnwindSafe(|| (*step)(&next, args))) {
            Ok(Ok(None)) => {}
            Ok(Ok(Some(value))) => next.call(None, vec![value]),
            Ok(Err(error)) => next.call(Some(error), Vec::new()),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!("Step {} panicked: {}", position, message);
                next.call(Some(StepError::Panicked(message)), Vec::new());
            }
        }
    }
}

impl From<Next> for Callback {
    fn from(next: Next) -> Self {
        Callback::new(move |error, args| next.call(error, args))
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("position", &self.inner.position)
            .field("calls", &self.inner.calls.get())
            .field("max_calls", &self.inner.max_calls.get())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Shorthand for building an argument list from anything convertible into
/// a JSON value.
pub fn args<I, V>(values: I) -> Args
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    values.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_args_helper() {
        assert_eq!(args(["a", "b"]), vec![json!("a"), json!("b")]);
        assert!(args(Vec::<Value>::new()).is_empty());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
