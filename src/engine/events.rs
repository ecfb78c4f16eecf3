//! Run Event Channels
//!
//! Listener lists behind a run's "error" and "done" events. Listeners are
//! taken out of the list while an emission runs, so a listener may subscribe
//! further listeners without tripping a `RefCell` borrow. Taken-out
//! listeners still count as subscribed until a one-shot one fires.

use std::cell::{Cell, RefCell};

use crate::error::StepError;

use super::Args;

/// Payload of a "done" emission: the error slot followed by the forwarded
/// arguments of the final continuation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub error: Option<StepError>,
    pub args: Args,
}

impl Outcome {
    pub fn success(args: Args) -> Self {
        Self { error: None, args }
    }

    pub fn failure(error: StepError, args: Args) -> Self {
        Self {
            error: Some(error),
            args,
        }
    }

    /// Returns true if the run finished without an error.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub(crate) enum Listener<T> {
    Every(Box<dyn FnMut(&T)>),
    Once(Box<dyn FnOnce(&T)>),
    /// One-shot listener whose failure escalates to the host scheduler.
    Finally(Box<dyn FnOnce(&T) -> Result<(), StepError>>),
}

pub(crate) struct Listeners<T> {
    slots: RefCell<Vec<Listener<T>>>,
    /// Listeners taken out by a running emission and still subscribed.
    in_flight: Cell<usize>,
}

impl<T> Listeners<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: RefCell::new(Vec::new()),
            in_flight: Cell::new(0),
        }
    }

    pub(crate) fn add(&self, listener: Listener<T>) {
        self.slots.borrow_mut().push(listener);
    }

    pub(crate) fn count(&self) -> usize {
        self.slots.borrow().len() + self.in_flight.get()
    }

    /// Delivers `payload` to every listener in subscription order.
    ///
    /// Returns how many listeners saw the payload. A failing finalizer stops
    /// delivery; listeners it did not reach stay subscribed.
    pub(crate) fn emit(&self, payload: &T) -> Result<usize, StepError> {
        let current = std::mem::take(&mut *self.slots.borrow_mut());
        let outer = self.in_flight.replace(self.in_flight.get() + current.len());
        let mut kept = Vec::with_capacity(current.len());
        let mut delivered = 0;
        let mut failure = None;

        let mut pending = current.into_iter();
        for listener in pending.by_ref() {
            delivered += 1;
            match listener {
                Listener::Every(mut f) => {
                    f(payload);
                    kept.push(Listener::Every(f));
                }
                Listener::Once(f) => {
                    self.unsubscribe_in_flight();
                    f(payload)
                }
                Listener::Finally(f) => {
                    self.unsubscribe_in_flight();
                    if let Err(e) = f(payload) {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }
        kept.extend(pending);
        self.in_flight.set(outer);

        let mut slots = self.slots.borrow_mut();
        let added = std::mem::replace(&mut *slots, kept);
        slots.extend(added);

        match failure {
            Some(e) => Err(e),
            None => Ok(delivered),
        }
    }

    /// A one-shot listener is unsubscribed before it runs.
    fn unsubscribe_in_flight(&self) {
        self.in_flight.set(self.in_flight.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_once_listener_fires_once() {
        let listeners: Listeners<u32> = Listeners::new();
        let hits = Rc::new(Cell::new(0));

        let counter = Rc::clone(&hits);
        listeners.add(Listener::Once(Box::new(move |v| counter.set(counter.get() + v))));

        assert_eq!(listeners.emit(&5).unwrap(), 1);
        assert_eq!(listeners.emit(&5).unwrap(), 0);
        assert_eq!(hits.get(), 5);
        assert_eq!(listeners.count(), 0);
    }

    #[test]
    fn test_every_listener_is_kept() {
        let listeners: Listeners<u32> = Listeners::new();
        let hits = Rc::new(Cell::new(0));

        let counter = Rc::clone(&hits);
        listeners.add(Listener::Every(Box::new(move |_| counter.set(counter.get() + 1))));

        listeners.emit(&1).unwrap();
        listeners.emit(&1).unwrap();
        assert_eq!(hits.get(), 2);
        assert_eq!(listeners.count(), 1);
    }

    #[test]
    fn test_failing_finalizer_stops_delivery() {
        let listeners: Listeners<u32> = Listeners::new();
        let reached = Rc::new(Cell::new(false));

        listeners.add(Listener::Finally(Box::new(|_| Err(StepError::failed("Oops!")))));
        let flag = Rc::clone(&reached);
        listeners.add(Listener::Once(Box::new(move |_| flag.set(true))));

        let result = listeners.emit(&0);
        assert_eq!(result, Err(StepError::failed("Oops!")));
        assert!(!reached.get());
        assert_eq!(listeners.count(), 1);
    }

    #[test]
    fn test_count_during_emission() {
        let listeners: Rc<Listeners<u32>> = Rc::new(Listeners::new());
        let seen = Rc::new(RefCell::new(Vec::new()));

        let (list, out) = (Rc::clone(&listeners), Rc::clone(&seen));
        listeners.add(Listener::Once(Box::new(move |_| out.borrow_mut().push(list.count()))));
        let (list, out) = (Rc::clone(&listeners), Rc::clone(&seen));
        listeners.add(Listener::Every(Box::new(move |_| out.borrow_mut().push(list.count()))));

        assert_eq!(listeners.emit(&0).unwrap(), 2);
        // The one-shot listener is gone by the time it runs; the every-time
        // listener keeps counting itself.
        assert_eq!(*seen.borrow(), vec![1, 1]);
        assert_eq!(listeners.count(), 1);
    }

    #[test]
    fn test_outcome_helpers() {
        assert!(Outcome::success(Vec::new()).is_ok());
        assert!(!Outcome::failure(StepError::failed("x"), Vec::new()).is_ok());
    }
}
