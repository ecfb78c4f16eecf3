//! Stride - Continuation Sequencing Engine
//!
//! Runs an ordered list of steps one after another on a single-threaded
//! cooperative scheduler. Each step receives a continuation and signals
//! completion by calling it, optionally fanning out into concurrent
//! sub-operations whose results are reassembled in spawn order.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`engine`]: run controller, continuations, fan-out combinators, store
//! - [`scheduler`]: the event loop providing "next tick" and timers
//! - [`config`]: call-limit defaults and clock selection
//! - [`error`]: step and engine error types
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use serde_json::json;
//! use stride::{run, Role, Scheduler};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scheduler = Scheduler::new();
//!
//!     let handle = run(
//!         &scheduler,
//!         vec![
//!             Role::step(|next, _args| {
//!                 // Two sub-operations completing out of order
//!                 let (a, b) = (next.parallel(), next.parallel());
//!                 let timers = next.scheduler();
//!                 timers.set_timeout(Duration::from_millis(20), move || a.ok(vec![json!("a")]));
//!                 timers.set_timeout(Duration::from_millis(10), move || b.ok(vec![json!("b")]));
//!                 Ok(None)
//!             }),
//!             Role::step(|_next, args| Ok(Some(json!(args)))),
//!         ],
//!     );
//!     handle.on_done(|outcome| assert_eq!(outcome.args, vec![json!(["a", "b"])]));
//!
//!     scheduler.run()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod scheduler;

// Re-export commonly used types
pub use config::{default_max_calls, set_default_max_calls, ClockMode, EngineConfig};
pub use engine::{
    args, run, run_with_config, Args, Callback, Group, Next, Outcome, Role, RunHandle, StepFn,
    StepResult, Store,
};
pub use error::{EngineError, StepError};
pub use scheduler::Scheduler;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Stride";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "Stride");
    }

    #[test]
    fn test_module_exports_run() {
        let scheduler = Scheduler::new();
        let handle = run(&scheduler, vec![Role::step(|_, _| Ok(Some(json!(1))))]);
        scheduler.run().unwrap();
        assert!(handle.is_finished());
    }

    #[test]
    fn test_default_config_uses_process_limit() {
        let config = EngineConfig::default();
        assert_eq!(config.default_max_calls, default_max_calls());
        assert_eq!(config.clock, ClockMode::Virtual);
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
