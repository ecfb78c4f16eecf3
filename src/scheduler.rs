//! Cooperative Host Scheduler
//!
//! A single-threaded event loop with two queues:
//!
//! - the tick queue, drained completely before anything else runs
//! - a timer heap ordered by deadline, then by registration order
//!
//! Runs never execute in parallel. A step suspends by handing its
//! continuation to a timer (or any other deferred callback) and returning.
//!
//! The clock is virtual by default so that timer-driven runs are fully
//! deterministic; [`Scheduler::realtime`] sleeps until each deadline instead.

use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use log::trace;

use crate::config::ClockMode;
use crate::error::EngineError;

/// A unit of deferred work. Returning an error stops the loop.
pub type Task = Box<dyn FnOnce() -> Result<(), EngineError>>;

struct Timer {
    deadline: Duration,
    seq: u64,
    task: Task,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

struct Inner {
    mode: ClockMode,
    ticks: RefCell<VecDeque<Task>>,
    timers: RefCell<BinaryHeap<Reverse<Timer>>>,
    now: Cell<Duration>,
    started: Instant,
    seq: Cell<u64>,
}

/// Handle to the event loop. Cloning yields another handle to the same loop.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Creates a loop driven by a virtual clock.
    pub fn new() -> Self {
        Self::with_clock(ClockMode::Virtual)
    }

    /// Creates a loop whose timers wait on the wall clock.
    pub fn realtime() -> Self {
        Self::with_clock(ClockMode::Realtime)
    }

    pub fn with_clock(mode: ClockMode) -> Self {
        Self {
            inner: Rc::new(Inner {
                mode,
                ticks: RefCell::new(VecDeque::new()),
                timers: RefCell::new(BinaryHeap::new()),
                now: Cell::new(Duration::ZERO),
                started: Instant::now(),
                seq: Cell::new(0),
            }),
        }
    }

    /// Returns the clock mode this loop was built with.
    pub fn clock(&self) -> ClockMode {
        self.inner.mode
    }

    /// Time elapsed on this loop's clock.
    pub fn now(&self) -> Duration {
        match self.inner.mode {
            ClockMode::Virtual => self.inner.now.get(),
            ClockMode::Realtime => self.inner.started.elapsed(),
        }
    }

    /// Queues a task for the next tick.
    pub fn next_tick<F>(&self, task: F)
    where
        F: FnOnce() -> Result<(), EngineError> + 'static,
    {
        self.inner.ticks.borrow_mut().push_back(Box::new(task));
        trace!("Tick queued ({} pending)", self.inner.ticks.borrow().len());
    }

    /// Registers a callback to fire once `delay` has elapsed.
    pub fn set_timeout<F>(&self, delay: Duration, callback: F)
    where
        F: FnOnce() + 'static,
    {
        let seq = self.inner.seq.get();
        self.inner.seq.set(seq + 1);

        let deadline = self.now() + delay;
        trace!("Timer #{} set for {:?}", seq, deadline);

        self.inner.timers.borrow_mut().push(Reverse(Timer {
            deadline,
            seq,
            task: Box::new(move || {
                callback();
                Ok(())
            }),
        }));
    }

    /// Returns true when neither ticks nor timers are pending.
    pub fn is_idle(&self) -> bool {
        self.inner.ticks.borrow().is_empty() && self.inner.timers.borrow().is_empty()
    }

    /// Number of queued ticks plus pending timers.
    pub fn pending(&self) -> usize {
        self.inner.ticks.borrow().len() + self.inner.timers.borrow().len()
    }

    /// Drives the loop until no work remains.
    ///
    /// The tick queue is drained after every timer. The first task that
    /// fails stops the loop; its error is returned and any remaining work
    /// stays queued.
    pub fn run(&self) -> Result<(), EngineError> {
        loop {
            self.drain_ticks()?;

            let timer = self.inner.timers.borrow_mut().pop();
            let Some(Reverse(timer)) = timer else {
                trace!("Scheduler idle");
                return Ok(());
            };

            self.wait_until(timer.deadline);
            trace!("Timer #{} fired at {:?}", timer.seq, timer.deadline);
            (timer.task)()?;
        }
    }

    fn drain_ticks(&self) -> Result<(), EngineError> {
        loop {
            let task = self.inner.ticks.borrow_mut().pop_front();
            match task {
                Some(task) => task()?,
                None => return Ok(()),
            }
        }
    }

    fn wait_until(&self, deadline: Duration) {
        match self.inner.mode {
            ClockMode::Virtual => {
                if deadline > self.inner.now.get() {
                    self.inner.now.set(deadline);
                }
            }
            ClockMode::Realtime => {
                let elapsed = self.inner.started.elapsed();
                if deadline > elapsed {
                    thread::sleep(deadline - elapsed);
                }
            }
        }
    }
}
