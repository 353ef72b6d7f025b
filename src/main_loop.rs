use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

use crate::error::Result;

type LocalTask = Box<dyn FnOnce()>;
type RemoteTask = Box<dyn FnOnce() + Send>;
type TimeoutCallback = Rc<RefCell<Box<dyn FnMut() -> bool>>>;

/// Result of polling a [`LoopSource`] once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Idle,
    Busy,
    /// The source is gone and should be removed from the loop.
    Detached,
}

/// Something the loop polls on every iteration.
pub trait LoopSource {
    fn dispatch(&self) -> SourceStatus;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutId(u32);

struct TimeoutEntry {
    id: u32,
    deadline: Instant,
    interval: Duration,
    callback: TimeoutCallback,
}

/// Single-threaded cooperative scheduler that drives all bridge activity.
///
/// Work enters the loop in four ways: local tasks queued with [`MainLoop::invoke`],
/// tasks marshaled from other threads through a [`LoopHandle`], timeouts, and
/// attached [`LoopSource`]s (one per bridge). The loop is `!Send`; everything
/// it dispatches runs on the thread that created it.
#[derive(Clone)]
pub struct MainLoop {
    inner: Rc<LoopInner>,
}

struct LoopInner {
    runtime: Runtime,
    local: RefCell<VecDeque<LocalTask>>,
    remote_tx: UnboundedSender<RemoteTask>,
    remote_rx: RefCell<UnboundedReceiver<RemoteTask>>,
    sources: RefCell<Vec<Rc<dyn LoopSource>>>,
    timeouts: RefCell<Vec<TimeoutEntry>>,
    next_timeout_id: Cell<u32>,
    quit: Arc<AtomicBool>,
    running: Cell<bool>,
    depth: Cell<usize>,
}

impl MainLoop {
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_time().build()?;
        let (remote_tx, remote_rx) = unbounded_channel();
        Ok(Self {
            inner: Rc::new(LoopInner {
                runtime,
                local: RefCell::new(VecDeque::new()),
                remote_tx,
                remote_rx: RefCell::new(remote_rx),
                sources: RefCell::new(Vec::new()),
                timeouts: RefCell::new(Vec::new()),
                next_timeout_id: Cell::new(1),
                quit: Arc::new(AtomicBool::new(false)),
                running: Cell::new(false),
                depth: Cell::new(0),
            }),
        })
    }

    /// A `Send` handle other threads use to schedule work onto this loop.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            tx: self.inner.remote_tx.clone(),
            quit: Arc::clone(&self.inner.quit),
        }
    }

    /// Queue `task` to run on the next iteration.
    pub fn invoke(&self, task: impl FnOnce() + 'static) {
        self.inner.local.borrow_mut().push_back(Box::new(task));
    }

    pub fn add_source(&self, source: Rc<dyn LoopSource>) {
        self.inner.sources.borrow_mut().push(source);
    }

    /// Call `callback` every `interval` until it returns `false`.
    pub fn add_timeout(
        &self,
        interval: Duration,
        callback: impl FnMut() -> bool + 'static,
    ) -> TimeoutId {
        let id = self.inner.next_timeout_id.get();
        self.inner
            .next_timeout_id
            .set(id.wrapping_add(1).max(1));
        self.inner.timeouts.borrow_mut().push(TimeoutEntry {
            id,
            deadline: Instant::now() + interval,
            interval,
            callback: Rc::new(RefCell::new(Box::new(callback))),
        });
        TimeoutId(id)
    }

    pub fn remove_timeout(&self, id: TimeoutId) -> bool {
        let mut timeouts = self.inner.timeouts.borrow_mut();
        let before = timeouts.len();
        timeouts.retain(|entry| entry.id != id.0);
        timeouts.len() != before
    }

    /// Receive values from any thread and handle them on this loop.
    pub fn channel<T, F>(&self, handler: F) -> LoopSender<T>
    where
        T: Send + 'static,
        F: FnMut(T) + 'static,
    {
        let (tx, rx) = unbounded_channel();
        self.add_source(Rc::new(ChannelSource {
            rx: RefCell::new(rx),
            handler: RefCell::new(Box::new(handler)),
        }));
        LoopSender {
            tx,
            wake: self.handle(),
        }
    }

    /// Run one iteration. With `may_block` the call parks until a timeout is
    /// due or another thread schedules work, if nothing was ready.
    pub fn iterate(&self, may_block: bool) -> bool {
        if may_block {
            self.iterate_for(None)
        } else {
            self.dispatch_ready()
        }
    }

    /// Run one iteration, blocking at most `max_block` (forever for `None`)
    /// when nothing was ready.
    pub fn iterate_for(&self, max_block: Option<Duration>) -> bool {
        if self.dispatch_ready() {
            return true;
        }

        let limit = match (max_block, self.until_next_timeout()) {
            (Some(requested), Some(timer)) => Some(requested.min(timer)),
            (Some(requested), None) => Some(requested),
            (None, timer) => timer,
        };

        let mut did_work = false;
        if let Some(task) = self.wait_remote(limit) {
            self.guarded(task);
            did_work = true;
        }
        self.dispatch_ready() || did_work
    }

    /// Iterate until [`MainLoop::quit`] or [`LoopHandle::quit`] is called.
    /// Quits requested while the loop was not running are discarded.
    pub fn run(&self) {
        info!(target: "main_loop", "starting main loop");
        self.inner.quit.store(false, Ordering::SeqCst);
        self.inner.running.set(true);
        while !self.inner.quit.load(Ordering::SeqCst) {
            self.iterate(true);
        }
        self.inner.quit.store(false, Ordering::SeqCst);
        self.inner.running.set(false);
        info!(target: "main_loop", "main loop stopped");
    }

    pub fn quit(&self) {
        if !self.inner.running.get() {
            debug!(target: "main_loop", "quit ignored, loop not running");
            return;
        }
        debug!(target: "main_loop", "quit requested");
        self.inner.quit.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// True while the loop is executing a task, timeout or source dispatch.
    pub fn is_dispatching(&self) -> bool {
        self.inner.depth.get() > 0
    }

    fn dispatch_ready(&self) -> bool {
        let mut did_work = false;

        loop {
            let task = self.inner.remote_rx.borrow_mut().try_recv().ok();
            let Some(task) = task else {
                break;
            };
            self.guarded(task);
            did_work = true;
        }

        let batch: Vec<LocalTask> = self.inner.local.borrow_mut().drain(..).collect();
        for task in batch {
            self.guarded(task);
            did_work = true;
        }

        if self.dispatch_timeouts() {
            did_work = true;
        }

        let sources: Vec<Rc<dyn LoopSource>> = self.inner.sources.borrow().clone();
        let mut detached = Vec::new();
        for source in &sources {
            match self.guarded(|| source.dispatch()) {
                SourceStatus::Busy => did_work = true,
                SourceStatus::Detached => detached.push(Rc::clone(source)),
                SourceStatus::Idle => {}
            }
        }
        if !detached.is_empty() {
            self.inner
                .sources
                .borrow_mut()
                .retain(|source| !detached.iter().any(|gone| Rc::ptr_eq(gone, source)));
        }

        did_work
    }

    fn dispatch_timeouts(&self) -> bool {
        let now = Instant::now();
        let due: Vec<(u32, TimeoutCallback)> = self
            .inner
            .timeouts
            .borrow()
            .iter()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| (entry.id, Rc::clone(&entry.callback)))
            .collect();

        let ran = !due.is_empty();
        for (id, callback) in due {
            let keep = match callback.try_borrow_mut() {
                Ok(mut callback) => self.guarded(&mut **callback),
                // re-entered from inside its own callback
                Err(_) => true,
            };
            let mut timeouts = self.inner.timeouts.borrow_mut();
            if keep {
                if let Some(entry) = timeouts.iter_mut().find(|entry| entry.id == id) {
                    entry.deadline = Instant::now() + entry.interval;
                }
            } else {
                timeouts.retain(|entry| entry.id != id);
            }
        }
        ran
    }

    fn until_next_timeout(&self) -> Option<Duration> {
        let now = Instant::now();
        self.inner
            .timeouts
            .borrow()
            .iter()
            .map(|entry| entry.deadline.saturating_duration_since(now))
            .min()
    }

    fn wait_remote(&self, limit: Option<Duration>) -> Option<RemoteTask> {
        let mut rx = self.inner.remote_rx.borrow_mut();
        match limit {
            Some(limit) if limit.is_zero() => None,
            Some(limit) => self.inner.runtime.block_on(async {
                tokio::time::timeout(limit, rx.recv())
                    .await
                    .ok()
                    .flatten()
            }),
            None => self.inner.runtime.block_on(rx.recv()),
        }
    }

    fn guarded<T>(&self, work: impl FnOnce() -> T) -> T {
        let _depth = DepthGuard::enter(&self.inner.depth);
        work()
    }
}

struct DepthGuard<'a> {
    depth: &'a Cell<usize>,
}

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

/// Thread-safe handle for marshaling work onto a [`MainLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    tx: UnboundedSender<RemoteTask>,
    quit: Arc<AtomicBool>,
}

impl LoopHandle {
    /// Schedule `task` on the loop thread. Returns `false` if the loop is gone.
    pub fn invoke(&self, task: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(task)).is_ok()
    }

    /// Ask the loop to stop. Delivered as a task, so it applies to the
    /// `run` that is active when the loop picks it up.
    pub fn quit(&self) {
        let quit = Arc::clone(&self.quit);
        let _ = self.tx.send(Box::new(move || quit.store(true, Ordering::SeqCst)));
    }
}

/// Sending half of [`MainLoop::channel`].
pub struct LoopSender<T> {
    tx: UnboundedSender<T>,
    wake: LoopHandle,
}

impl<T> Clone for LoopSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            wake: self.wake.clone(),
        }
    }
}

impl<T: Send + 'static> LoopSender<T> {
    /// Returns the value back if the receiving loop is gone.
    pub fn send(&self, value: T) -> std::result::Result<(), T> {
        self.tx.send(value).map_err(|err| err.0)?;
        self.wake.invoke(|| {});
        Ok(())
    }
}

struct ChannelSource<T> {
    rx: RefCell<UnboundedReceiver<T>>,
    handler: RefCell<Box<dyn FnMut(T)>>,
}

impl<T> LoopSource for ChannelSource<T> {
    fn dispatch(&self) -> SourceStatus {
        let Ok(mut handler) = self.handler.try_borrow_mut() else {
            return SourceStatus::Idle;
        };
        let mut status = SourceStatus::Idle;
        loop {
            let next = self.rx.borrow_mut().try_recv();
            match next {
                Ok(value) => {
                    (&mut **handler)(value);
                    status = SourceStatus::Busy;
                }
                Err(TryRecvError::Empty) => return status,
                Err(TryRecvError::Disconnected) => return SourceStatus::Detached,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn invoke_runs_on_next_iteration() {
        let main_loop = MainLoop::new().unwrap();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        main_loop.invoke(move || counter.set(counter.get() + 1));

        assert_eq!(hits.get(), 0);
        assert!(main_loop.iterate(false));
        assert_eq!(hits.get(), 1);
        assert!(!main_loop.iterate(false));
    }

    #[test]
    fn repeating_timeout_stops_when_callback_declines() {
        let main_loop = MainLoop::new().unwrap();
        let ticks = Rc::new(Cell::new(0));
        let counter = Rc::clone(&ticks);
        main_loop.add_timeout(Duration::from_millis(5), move || {
            counter.set(counter.get() + 1);
            counter.get() < 3
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        while ticks.get() < 3 && Instant::now() < deadline {
            main_loop.iterate_for(Some(Duration::from_millis(50)));
        }
        assert_eq!(ticks.get(), 3);
        assert!(main_loop.until_next_timeout().is_none());
    }

    #[test]
    fn removed_timeout_never_fires() {
        let main_loop = MainLoop::new().unwrap();
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        let id = main_loop.add_timeout(Duration::from_millis(1), move || {
            flag.set(true);
            false
        });
        assert!(main_loop.remove_timeout(id));
        assert!(!main_loop.remove_timeout(id));
        thread::sleep(Duration::from_millis(5));
        main_loop.iterate(false);
        assert!(!fired.get());
    }

    #[test]
    fn handle_wakes_blocking_iteration_from_other_thread() {
        let main_loop = MainLoop::new().unwrap();
        let handle = main_loop.handle();
        let flag = Arc::new(AtomicBool::new(false));
        let remote_flag = Arc::clone(&flag);

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.invoke(move || remote_flag.store(true, Ordering::SeqCst))
        });

        let did_work = main_loop.iterate_for(Some(Duration::from_secs(5)));
        assert!(worker.join().unwrap());
        assert!(did_work);
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn bounded_iteration_returns_after_limit() {
        let main_loop = MainLoop::new().unwrap();
        let started = Instant::now();
        assert!(!main_loop.iterate_for(Some(Duration::from_millis(30))));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn run_exits_on_remote_quit() {
        let main_loop = MainLoop::new().unwrap();
        let handle = main_loop.handle();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.quit();
        });
        main_loop.run();
        worker.join().unwrap();
        assert!(!main_loop.is_running());
    }

    #[test]
    fn quit_before_run_is_discarded() {
        let main_loop = MainLoop::new().unwrap();
        main_loop.quit();
        assert!(!main_loop.is_running());

        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let inner = main_loop.clone();
        main_loop.invoke(move || {
            flag.set(true);
            inner.quit();
        });
        main_loop.run();
        assert!(ran.get());
    }

    #[test]
    fn remote_quit_consumed_outside_run_is_discarded() {
        let main_loop = MainLoop::new().unwrap();
        main_loop.handle().quit();
        // picked up by a plain iteration, not by run
        main_loop.iterate(false);

        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let inner = main_loop.clone();
        main_loop.invoke(move || {
            flag.set(true);
            inner.quit();
        });
        main_loop.run();
        assert!(ran.get());
    }

    #[test]
    fn channel_delivers_values_in_order() {
        let main_loop = MainLoop::new().unwrap();
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&received);
        let sender = main_loop.channel(move |value: u32| sink.borrow_mut().push(value));

        let worker = thread::spawn(move || {
            for value in 0..5 {
                sender.send(value).unwrap();
            }
        });
        worker.join().unwrap();

        main_loop.iterate(false);
        assert_eq!(*received.borrow(), vec![0, 1, 2, 3, 4]);
        // all senders dropped: the source detaches on the next poll
        main_loop.iterate(false);
        assert!(main_loop.inner.sources.borrow().is_empty());
    }

    #[test]
    fn reports_dispatch_depth() {
        let main_loop = MainLoop::new().unwrap();
        let observed = Rc::new(Cell::new(false));
        let probe = main_loop.clone();
        let flag = Rc::clone(&observed);
        main_loop.invoke(move || flag.set(probe.is_dispatching()));

        assert!(!main_loop.is_dispatching());
        main_loop.iterate(false);
        assert!(observed.get());
        assert!(!main_loop.is_dispatching());
    }
}
