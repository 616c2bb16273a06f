//! Single-consumer execution context.
//!
//! An [`ExecutionContext`] is a dedicated OS thread draining a FIFO job queue.
//! All mutable session state lives on that thread: work submitted from any
//! other thread is queued, work submitted from the context thread itself runs
//! inline. Because only one job runs at a time, state confined to the context
//! never needs a lock.
//!
//! [`ContextLocal`] is the confinement cell. The handle is `Send + Sync` and
//! can be stored anywhere, but the value behind it lives in the context
//! thread's slot table and is only reachable from jobs running there.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error};

use crate::errors::Abandoned;
use crate::result::AsyncResult;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Command {
    Run(Job),
    Stop,
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(1);

type Slot = Rc<RefCell<Box<dyn Any>>>;

thread_local! {
    static CURRENT: Cell<Option<u64>> = const { Cell::new(None) };
    static SLOTS: RefCell<HashMap<u64, Slot>> = RefCell::new(HashMap::new());
}

struct Shared {
    id: u64,
    name: String,
    tx: mpsc::UnboundedSender<Command>,
    closed: Arc<watch::Sender<bool>>,
}

/// Handle to a single-consumer execution context.
///
/// Cloning is cheap; all clones refer to the same thread. The thread runs
/// until [`shutdown`](Self::shutdown) is called or every handle is dropped.
#[derive(Clone)]
pub struct ExecutionContext {
    shared: Arc<Shared>,
}

impl ExecutionContext {
    /// Start a new context on a thread named `name`.
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);

        let thread_closed = Arc::clone(&closed);
        let thread_name = name.clone();
        let _ = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(id, &thread_name, rx, &thread_closed))?;

        Ok(Self {
            shared: Arc::new(Shared {
                id,
                name,
                tx,
                closed,
            }),
        })
    }

    /// Thread name of this context.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Whether the caller is running on this context.
    pub fn is_current(&self) -> bool {
        CURRENT.with(|c| c.get() == Some(self.shared.id))
    }

    /// Panic unless the caller is running on this context.
    #[track_caller]
    pub fn assert_current(&self) {
        assert!(
            self.is_current(),
            "must be called on execution context '{}'",
            self.shared.name
        );
    }

    /// Whether the context thread has exited.
    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Queue `job` behind everything already submitted.
    ///
    /// Returns `false` if the context has shut down; the job is dropped.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.shared.tx.send(Command::Run(Box::new(job))).is_ok()
    }

    /// Run `job` inline when on this context, otherwise queue it.
    pub fn run(&self, job: impl FnOnce() + Send + 'static) -> bool {
        if self.is_current() {
            job();
            true
        } else {
            self.post(job)
        }
    }

    /// Run `f` on this context and return its result.
    ///
    /// On-context the call is inline and the returned result is `f`'s own.
    /// Off-context the returned result is pending and adopts `f`'s outcome
    /// once the job runs. If the context has shut down it resolves with
    /// `E::from(Abandoned)`.
    pub fn run_returning<T, E, F>(&self, f: F) -> AsyncResult<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + From<Abandoned> + 'static,
        F: FnOnce() -> AsyncResult<T, E> + Send + 'static,
    {
        if self.is_current() {
            return f();
        }
        let target = AsyncResult::pending(self);
        let out = target.clone();
        if !self.post(move || f().forward_to(out)) {
            target.resolve_err(E::from(Abandoned));
        }
        target
    }

    /// Run `f` on this context and await its return value from async code.
    pub async fn call<R, F>(&self, f: F) -> Result<R, Abandoned>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }
        let (tx, rx) = oneshot::channel();
        let _ = self.post(move || {
            let _ = tx.send(f());
        });
        rx.await.map_err(|_| Abandoned)
    }

    /// Resolves once the context thread has exited.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Stop the loop after the jobs already queued. Later jobs are dropped.
    pub fn shutdown(&self) {
        let _ = self.shared.tx.send(Command::Stop);
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .finish()
    }
}

fn run_loop(
    id: u64,
    name: &str,
    mut rx: mpsc::UnboundedReceiver<Command>,
    closed: &watch::Sender<bool>,
) {
    CURRENT.with(|c| c.set(Some(id)));
    debug!(context = name, "execution context started");

    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Run(job) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    error!(
                        context = name,
                        panic = panic_message(payload.as_ref()),
                        "job panicked"
                    );
                }
            }
            Command::Stop => break,
        }
    }

    // Unrun jobs drop here, releasing anything they captured.
    drop(rx);
    let slots = SLOTS.with(|s| std::mem::take(&mut *s.borrow_mut()));
    drop(slots);
    CURRENT.with(|c| c.set(None));
    let _ = closed.send_replace(true);
    debug!(context = name, "execution context stopped");
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ContextLocal
// ─────────────────────────────────────────────────────────────────────────────

/// A value confined to one [`ExecutionContext`].
///
/// The value is moved onto the context thread at construction and dropped
/// there when the handle is dropped. [`with`](Self::with) must be called
/// from a job running on the context.
pub struct ContextLocal<T: 'static> {
    ctx: ExecutionContext,
    key: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> ContextLocal<T> {
    /// Move `value` onto `ctx`.
    pub fn new(ctx: &ExecutionContext, value: T) -> Self {
        let key = NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed);
        let _ = ctx.run(move || {
            let slot: Slot = Rc::new(RefCell::new(Box::new(value)));
            SLOTS.with(|s| s.borrow_mut().insert(key, slot));
        });
        Self {
            ctx: ctx.clone(),
            key,
            _marker: PhantomData,
        }
    }
}

impl<T: 'static> ContextLocal<T> {
    /// The owning context.
    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Borrow the value mutably for the duration of `f`.
    ///
    /// Panics when called off-context or re-entrantly on the same cell.
    #[track_caller]
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.ctx.assert_current();
        let Some(slot) = SLOTS.with(|s| s.borrow().get(&self.key).cloned()) else {
            panic!("context-local value missing from '{}'", self.ctx.name());
        };
        let mut guard = slot.borrow_mut();
        let Some(value) = guard.downcast_mut::<T>() else {
            panic!("context-local slot holds a different type");
        };
        f(value)
    }
}

impl<T: 'static> Drop for ContextLocal<T> {
    fn drop(&mut self) {
        let key = self.key;
        let _ = self.ctx.run(move || {
            let slot = SLOTS.with(|s| s.borrow_mut().remove(&key));
            drop(slot);
        });
    }
}

impl<T: 'static> fmt::Debug for ContextLocal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextLocal")
            .field("context", &self.ctx.name())
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
