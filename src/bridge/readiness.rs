use std::cell::{Cell, RefCell};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::Bridge;

type ReadyObserver = Box<dyn FnOnce(&Bridge)>;

/// `Loading` until the engine reports the current load finished.
#[derive(Default)]
pub(crate) struct Readiness {
    ready: Cell<bool>,
    observers: RefCell<Vec<ReadyObserver>>,
}

impl Readiness {
    pub(crate) fn is_ready(&self) -> bool {
        self.ready.get()
    }

    pub(crate) fn reset(&self) {
        self.ready.set(false);
    }

    /// Flip to ready and hand back the observers waiting for it. Returns
    /// nothing when already ready, so each load notifies once.
    pub(crate) fn mark_ready(&self) -> Vec<ReadyObserver> {
        if self.ready.replace(true) {
            return Vec::new();
        }
        std::mem::take(&mut *self.observers.borrow_mut())
    }

    pub(crate) fn observe(&self, observer: ReadyObserver) {
        self.observers.borrow_mut().push(observer);
    }
}

impl Bridge {
    /// Whether the current content has finished loading.
    pub fn is_ready(&self) -> bool {
        self.inner.readiness.is_ready()
    }

    /// Drive the main loop until the content is ready or `timeout` elapses
    /// (`None` waits forever). Returns the readiness at that point.
    ///
    /// The loop parks between iterations until a timer is due or another
    /// thread wakes it; there is no fixed poll interval. Calling this from a
    /// callback the loop is already dispatching would stall that loop, so
    /// such calls return the current state without waiting.
    pub fn wait_ready(&self, timeout: Option<Duration>) -> bool {
        if self.is_ready() {
            return true;
        }

        let main_loop = &self.inner.main_loop;
        if main_loop.is_dispatching() {
            warn!(
                target: "pagebridge",
                bridge = %self.name(),
                "wait_ready called from inside a main loop callback; not waiting"
            );
            return self.is_ready();
        }

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!(target: "pagebridge", bridge = %self.name(), "wait_ready timed out");
                        return self.is_ready();
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            main_loop.iterate_for(remaining);
            if self.is_ready() {
                return true;
            }
        }
    }

    /// Run `observer` once the current content is ready: on the next loop
    /// iteration if it already is, otherwise when the load finishes.
    pub fn on_ready(&self, observer: impl FnOnce(&Bridge) + 'static) {
        if self.is_ready() {
            let bridge = self.clone();
            self.inner.main_loop.invoke(move || observer(&bridge));
        } else {
            self.inner.readiness.observe(Box::new(observer));
        }
    }

    pub(crate) fn set_loading(&self) {
        self.inner.readiness.reset();
    }

    pub(crate) fn set_ready(&self) {
        let observers = self.inner.readiness.mark_ready();
        debug!(target: "pagebridge", bridge = %self.name(), "content ready");
        for observer in observers {
            observer(self);
        }
    }
}
