//! Continuation Sequencing Engine
//!
//! Runs an ordered list of steps one after another. Each step is handed a
//! [`Next`] continuation and signals completion by calling it, optionally
//! fanning out into concurrent sub-operations first.
//!
//! # Architecture
//!
//! - [`run`]: run controller, role registration and the [`RunHandle`]
//! - [`next`]: the per-step continuation
//! - [`fanout`]: `parallel` and `group` combinators
//! - [`store`]: key/value map shared by the steps of one run
//! - [`events`]: "error" and "done" channels

pub mod events;
pub mod fanout;
pub mod next;
pub mod run;
pub mod store;

use std::rc::Rc;

use serde_json::Value;

use crate::error::StepError;

pub use events::Outcome;
pub use fanout::{Callback, Group};
pub use next::{args, Next};
pub use run::{run, run_with_config, Role, RunHandle};
pub use store::Store;

/// Positional values forwarded between steps.
pub type Args = Vec<Value>;

/// What a step body returns.
///
/// - `Ok(None)`: the step suspended and will call its continuation later
/// - `Ok(Some(value))`: the step completed synchronously with `value`
/// - `Err(error)`: the step failed
pub type StepResult = Result<Option<Value>, StepError>;

/// A step body, invoked with its continuation and the forwarded values.
pub type StepFn = Rc<dyn Fn(&Next, Args) -> StepResult>;
