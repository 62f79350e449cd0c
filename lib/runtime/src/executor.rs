use core::pin::Pin;
use std::cell::{Cell, UnsafeCell};
use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::marker::PhantomPinned;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll, Wake, Waker};

use crate::{Cycles, Deadline, Tick};

/// Future returned by [`Executor::resolve_at`], ready once the simulated clock reaches the deadline.
pub struct ResolveAt(Timer);

impl Future for ResolveAt {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        unsafe { self.map_unchecked_mut(|x| &mut x.0) }.poll(cx)
    }
}

struct Timer {
    executor: Executor,
    resolve_at: Tick,
    waker: Option<Waker>,
    _phantom: PhantomPinned,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self, other)
    }
}

impl Eq for Timer {}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        // Timers firing on the same edge are told apart by address so all of them stay in the set.
        self.resolve_at
            .cmp(&other.resolve_at)
            .then((self as *const Self).cmp(&(other as _)))
    }
}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let mut executor = self.executor.0.lock().unwrap();
        executor.timers.remove(self);
    }
}

impl Future for Timer {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = unsafe { self.get_unchecked_mut() };
        let lifetime_extended: &'static mut Timer = unsafe { std::mem::transmute(&mut *this) };

        let mut executor = this.executor.0.lock().unwrap();

        if executor.now >= this.resolve_at {
            // A timer may only ever be resolved on its own edge.
            assert_eq!(executor.now, this.resolve_at);
            return Poll::Ready(());
        }

        if this.waker.is_none() {
            executor.timers.insert(lifetime_extended);
        }

        this.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

/// A simulated hardware process.
struct Task {
    executor: Weak<Mutex<ExecutorInner>>,

    // May only be accessed by the `executor`.
    task: UnsafeCell<Option<Box<dyn Future<Output = ()> + Send>>>,
}

unsafe impl Send for Task {}
unsafe impl Sync for Task {}

impl Wake for Task {
    fn wake(self: Arc<Self>) {
        let Some(executor) = self.executor.upgrade() else {
            return;
        };
        let mut executor = executor.lock().unwrap();
        executor.ready_tasks.push_back(self.clone());
    }
}

struct ExecutorInner {
    now: Tick,
    ready_tasks: VecDeque<Arc<Task>>,
    timers: BTreeSet<&'static mut Timer>,
    /// Every spawned task, for teardown.
    tasks: Vec<Weak<Task>>,
    polls: u64,
}

/// Counters describing how much work the executor has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub now: Cycles,
    pub polls: u64,
}

/// A cycle-driven executor for discrete-event simulation of the accelerator.
///
/// All components run as tasks on one thread; simulated time only advances when every ready task
/// is blocked on a timer or a handshake.
#[derive(Clone)]
pub struct Executor(Arc<Mutex<ExecutorInner>>);

thread_local! {
    static EXECUTOR: Cell<Option<Executor>> = const { Cell::new(None) };
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(ExecutorInner {
            now: Tick::INIT,
            ready_tasks: VecDeque::new(),
            timers: BTreeSet::new(),
            tasks: Vec::new(),
            polls: 0,
        })))
    }

    /// Obtain the executor currently polling a task on this thread.
    ///
    /// Panics when called outside a simulated task.
    pub fn current() -> Self {
        EXECUTOR.with(|x| {
            let v = x.take();
            x.set(v.clone());
            v.expect("not running inside a simulation task")
        })
    }

    /// The clock edge this executor is at.
    pub fn now(&self) -> Tick {
        self.0.lock().unwrap().now
    }

    pub fn stats(&self) -> ExecutorStats {
        let inner = self.0.lock().unwrap();
        ExecutorStats {
            now: inner.now.since_reset(),
            polls: inner.polls,
        }
    }

    /// Create a timer that is resolved at a later edge.
    pub fn resolve_at(&self, fire_at: impl Deadline) -> ResolveAt {
        let tick = fire_at.to_tick(self.now());
        ResolveAt(Timer {
            executor: self.clone(),
            resolve_at: tick,
            waker: None,
            _phantom: PhantomPinned,
        })
    }

    /// Run a task starting at the current edge.
    pub fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        let mut inner = self.0.lock().unwrap();
        let task = Arc::new(Task {
            executor: Arc::downgrade(&self.0),
            task: UnsafeCell::new(Some(Box::new(task))),
        });
        if inner.tasks.len() == inner.tasks.capacity() {
            inner.tasks.retain(|task| task.strong_count() > 0);
        }
        inner.tasks.push(Arc::downgrade(&task));
        inner.ready_tasks.push_back(task);
    }

    /// Spawn `task`, simulate until quiescent or until `timeout`, and return its output.
    ///
    /// Returns `None` if the task had not finished when the simulation stopped; every task still
    /// pending is then dropped.
    pub async fn run<T: Send + 'static>(
        &self,
        task: impl Future<Output = T> + Send + 'static,
        timeout: Tick,
    ) -> Option<T> {
        let slot = Arc::new(Mutex::new(None));
        let out = slot.clone();
        self.spawn(async move {
            let value = task.await;
            *out.lock().unwrap() = Some(value);
        });
        self.enter(timeout).await;
        let value = slot.lock().unwrap().take();
        if value.is_none() {
            self.abandon();
        }
        value
    }

    /// Drop every unfinished task together with its pending timers.
    ///
    /// Must not be called while [`Executor::enter`] is running.
    pub fn abandon(&self) {
        let tasks = {
            let mut inner = self.0.lock().unwrap();
            inner.timers.clear();
            inner.ready_tasks.clear();
            std::mem::take(&mut inner.tasks)
        };
        // Timers unregister themselves on drop, so no lock may be held here.
        for task in tasks.iter().filter_map(Weak::upgrade) {
            let fut = unsafe { (*task.task.get()).take() };
            drop(fut);
        }
        // Dropped futures may have woken their peers.
        let woken = std::mem::take(&mut self.0.lock().unwrap().ready_tasks);
        drop(woken);
    }

    /// Start running simulation.
    ///
    /// The future completes once no more events are scheduled, or after the `timeout` edge has been
    /// simulated.
    pub async fn enter(&self, timeout: Tick) {
        let mut guard = self.0.lock().unwrap();

        loop {
            // Poll ready tasks until every one of them is blocked.
            while let Some(task) = guard.ready_tasks.pop_front() {
                guard.polls += 1;
                let waker = task.clone().into();
                let mut cx = Context::from_waker(&waker);

                drop(guard);

                if let Some(fut) = unsafe { (*task.task.get()).as_deref_mut() } {
                    let poll = tokio::task::unconstrained(std::future::poll_fn(|_| {
                        EXECUTOR.with(|x| {
                            assert!(x.replace(Some(self.clone())).is_none());
                            let ret = unsafe { Pin::new_unchecked(&mut *fut) }.poll(&mut cx);
                            x.set(None);
                            Poll::Ready(ret)
                        })
                    }))
                    .await;

                    // Drop the future once it's ready so it's not polled again.
                    if poll.is_ready() {
                        unsafe {
                            *task.task.get() = None;
                        }
                    }
                }

                guard = self.0.lock().unwrap();
            }

            let Some(timer) = guard.timers.pop_first() else {
                // Quiescent: nothing left to advance the clock for.
                return;
            };

            // Events on the timeout edge itself still happen.
            if timer.resolve_at > timeout || timer.resolve_at == Tick::ETERNITY {
                guard.timers.insert(timer);
                return;
            }

            // Simulated time never goes backwards.
            assert!(timer.resolve_at >= guard.now);
            guard.now = timer.resolve_at;

            drop(guard);
            if let Some(waker) = timer.waker.as_ref() {
                waker.wake_by_ref();
            }
            guard = self.0.lock().unwrap();

            // Fire every timer sharing this edge before polling.
            loop {
                let due = match guard.timers.first() {
                    Some(timer) => timer.resolve_at <= guard.now,
                    None => false,
                };
                if !due {
                    break;
                }
                let Some(timer) = guard.timers.pop_first() else {
                    break;
                };
                assert_eq!(timer.resolve_at, guard.now);
                drop(guard);
                if let Some(waker) = timer.waker.as_ref() {
                    waker.wake_by_ref();
                }
                guard = self.0.lock().unwrap();
            }
        }
    }
}

/// Suspend the calling task for `cycles` clock cycles.
pub fn delay(cycles: impl Into<Cycles>) -> ResolveAt {
    Executor::current().resolve_at(cycles.into())
}
