//! Run Controller
//!
//! Builds a run from a list of [`Role`]s, wires handlers to the run's event
//! channels and schedules the first step on the next tick. Subscriptions made
//! on the returned [`RunHandle`] right after [`run`] are therefore in place
//! before anything can fire.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use stride::{run, Role, Scheduler};
//!
//! let scheduler = Scheduler::new();
//! let handle = run(
//!     &scheduler,
//!     vec![
//!         Role::step(|_next, _args| Ok(Some(json!("hello")))),
//!         Role::step(|next, args| {
//!             next.ok(vec![json!(format!("{} world", args[0].as_str().unwrap_or("")))]);
//!             Ok(None)
//!         }),
//!     ],
//! );
//! handle.on_done(|outcome| assert_eq!(outcome.args, vec![json!("hello world")]));
//!
//! scheduler.run().unwrap();
//! assert!(handle.is_finished());
//! ```

use std::cell::Cell;
use std::rc::Rc;

use log::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, StepError};
use crate::scheduler::Scheduler;

use super::events::{Listener, Listeners, Outcome};
use super::next::Next;
use super::store::Store;
use super::{Args, StepFn, StepResult};

/// One entry in the list handed to [`run`].
pub enum Role {
    /// An ordinary sequential step.
    Step(StepFn),
    /// Error handler invoked for the first error only.
    OnError(Box<dyn FnOnce(&StepError)>),
    /// Error handler invoked for every error.
    OnErrorAll(Box<dyn FnMut(&StepError)>),
    /// Invoked once with the first "done" emission. A returned error
    /// escalates to the scheduler as [`EngineError::Finalizer`].
    Finally(Box<dyn FnOnce(&Outcome) -> Result<(), StepError>>),
}

impl Role {
    /// Wraps a step function.
    ///
    /// A panic inside the step is caught and routed to its continuation as
    /// [`StepError::Panicked`]. The process panic hook still runs first, so
    /// the default hook prints the panic message to stderr.
    pub fn step<F>(f: F) -> Self
    where
        F: Fn(&Next, Args) -> StepResult + 'static,
    {
        Self::Step(Rc::new(f))
    }

    pub fn on_error<F>(f: F) -> Self
    where
        F: FnOnce(&StepError) + 'static,
    {
        Self::OnError(Box::new(f))
    }

    pub fn on_error_all<F>(f: F) -> Self
    where
        F: FnMut(&StepError) + 'static,
    {
        Self::OnErrorAll(Box::new(f))
    }

    pub fn finally<F>(f: F) -> Self
    where
        F: FnOnce(&Outcome) -> Result<(), StepError> + 'static,
    {
        Self::Finally(Box::new(f))
    }
}

/// State shared by every continuation of one run.
pub(crate) struct RunState {
    pub(crate) steps: Vec<StepFn>,
    pub(crate) store: Store,
    pub(crate) scheduler: Scheduler,
    pub(crate) default_max_calls: Option<usize>,
    errors: Listeners<StepError>,
    done: Listeners<Outcome>,
    finished: Cell<bool>,
}

impl RunState {
    /// Routes an error raised by a continuation.
    ///
    /// Listener counts are sampled now; delivery happens on the next tick.
    /// With neither "error" nor "done" listeners the error escalates and
    /// stops the scheduler. So does an error that finds no listener left at
    /// delivery, e.g. after a one-shot handler was consumed.
    pub(crate) fn raise(self: &Rc<Self>, err: StepError) {
        if self.errors.count() > 0 {
            warn!("Step error: {}", err);
            let run = Rc::clone(self);
            self.scheduler.next_tick(move || {
                let delivered = run.errors.emit(&err).map_err(EngineError::Finalizer)?;
                if delivered == 0 {
                    error!("No error listener left for: {}", err);
                    return Err(EngineError::Unhandled(err));
                }
                Ok(())
            });
        } else if self.done.count() == 0 {
            error!("Unhandled step error: {}", err);
            self.scheduler
                .next_tick(move || Err(EngineError::Unhandled(err)));
        }
    }

    /// Terminates a path of the run by emitting "done" on the next tick.
    pub(crate) fn finish(self: &Rc<Self>, outcome: Outcome) {
        self.finished.set(true);
        if self.done.count() == 0 {
            debug!("Run finished with no done listener");
            return;
        }

        let run = Rc::clone(self);
        self.scheduler.next_tick(move || {
            run.done.emit(&outcome).map_err(EngineError::Finalizer)?;
            Ok(())
        });
    }
}

/// Handle returned by [`run`] for subscribing to the run's events.
///
/// Every subscription method returns the handle so calls can be chained.
pub struct RunHandle {
    state: Rc<RunState>,
}

impl RunHandle {
    /// Subscribes to every error raised in the run.
    pub fn on_error<F>(&self, f: F) -> &Self
    where
        F: FnMut(&StepError) + 'static,
    {
        self.state.errors.add(Listener::Every(Box::new(f)));
        self
    }

    /// Subscribes to the next error raised in the run.
    pub fn once_error<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&StepError) + 'static,
    {
        self.state.errors.add(Listener::Once(Box::new(f)));
        self
    }

    /// Subscribes to every "done" emission.
    pub fn on_done<F>(&self, f: F) -> &Self
    where
        F: FnMut(&Outcome) + 'static,
    {
        self.state.done.add(Listener::Every(Box::new(f)));
        self
    }

    /// Subscribes to the next "done" emission.
    pub fn once_done<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&Outcome) + 'static,
    {
        self.state.done.add(Listener::Once(Box::new(f)));
        self
    }

    /// Subscribes a fallible finalizer to the next "done" emission.
    pub fn finally<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&Outcome) -> Result<(), StepError> + 'static,
    {
        self.state.done.add(Listener::Finally(Box::new(f)));
        self
    }

    /// Returns true once the run has emitted (or scheduled) "done".
    pub fn is_finished(&self) -> bool {
        self.state.finished.get()
    }

    /// The run's shared store.
    pub fn store(&self) -> Store {
        self.state.store.clone()
    }
}

/// Starts a run on `scheduler` using the process-wide configuration.
pub fn run<I>(scheduler: &Scheduler, roles: I) -> RunHandle
where
    I: IntoIterator<Item = Role>,
{
    run_with_config(scheduler, &EngineConfig::default(), roles)
}

/// Starts a run on `scheduler` with an explicit configuration.
///
/// Handler roles are subscribed before the first step is scheduled; the
/// remaining steps keep their relative order.
pub fn run_with_config<I>(scheduler: &Scheduler, config: &EngineConfig, roles: I) -> RunHandle
where
    I: IntoIterator<Item = Role>,
{
    let errors = Listeners::new();
    let done = Listeners::new();
    let mut steps = Vec::new();

    for role in roles {
        match role {
            Role::Step(step) => steps.push(step),
            Role::OnError(f) => errors.add(Listener::Once(f)),
            Role::OnErrorAll(f) => errors.add(Listener::Every(f)),
            Role::Finally(f) => done.add(Listener::Finally(f)),
        }
    }

    info!(
        "Starting run: {} steps, call limit {:?}",
        steps.len(),
        config.default_max_calls
    );

    let state = Rc::new(RunState {
        steps,
        store: Store::new(),
        scheduler: scheduler.clone(),
        default_max_calls: config.default_max_calls,
        errors,
        done,
        finished: Cell::new(false),
    });

    let first = Rc::clone(&state);
    scheduler.next_tick(move || {
        Next::new(first, 0).done();
        Ok(())
    });

    RunHandle { state }
}
