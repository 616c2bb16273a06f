//! Single-resolution asynchronous result bound to an execution context.
//!
//! An [`AsyncResult`] starts pending and settles exactly once, either `Ok(T)`
//! or `Err(E)`. Settling may happen from any thread. Callbacks never run at
//! the point of settlement: each one is queued on the owning
//! [`ExecutionContext`] in registration order, so a callback registered after
//! settlement still runs later, on the context, exactly once.
//!
//! Derived results (`map`, `map_err`, `chain`, `map_to_result`) are bound to
//! the same context and settle one queue hop after their source.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::errors::Abandoned;

type Callback<T, E> = Box<dyn FnOnce(&Result<T, E>) + Send + 'static>;

enum Observer<T, E> {
    OnContext(Callback<T, E>),
    Waiter(oneshot::Sender<Result<T, E>>),
}

enum State<T, E> {
    Pending(Vec<Observer<T, E>>),
    Done(Result<T, E>),
}

/// A pending-then-terminal result with callbacks delivered on a context.
pub struct AsyncResult<T, E> {
    ctx: ExecutionContext,
    state: Arc<Mutex<State<T, E>>>,
}

impl<T, E> Clone for AsyncResult<T, E> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T, E> AsyncResult<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// A pending result bound to `ctx`.
    pub fn pending(ctx: &ExecutionContext) -> Self {
        Self {
            ctx: ctx.clone(),
            state: Arc::new(Mutex::new(State::Pending(Vec::new()))),
        }
    }

    /// An already-settled result.
    pub fn resolved(ctx: &ExecutionContext, result: Result<T, E>) -> Self {
        Self {
            ctx: ctx.clone(),
            state: Arc::new(Mutex::new(State::Done(result))),
        }
    }

    /// An already-successful result.
    pub fn resolved_ok(ctx: &ExecutionContext, value: T) -> Self {
        Self::resolved(ctx, Ok(value))
    }

    /// An already-failed result.
    pub fn resolved_err(ctx: &ExecutionContext, error: E) -> Self {
        Self::resolved(ctx, Err(error))
    }

    /// The context callbacks are delivered on.
    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Settle with `result`.
    ///
    /// Returns `false` and changes nothing if already settled.
    pub fn resolve(&self, result: Result<T, E>) -> bool {
        let mut state = self.state.lock();
        let State::Pending(observers) = &mut *state else {
            return false;
        };
        let observers = std::mem::take(observers);
        // Observers are notified under the lock so a concurrent registration
        // cannot overtake them in the queue.
        for observer in observers {
            notify(&self.ctx, observer, &result);
        }
        *state = State::Done(result);
        true
    }

    /// Settle successfully.
    pub fn resolve_ok(&self, value: T) -> bool {
        self.resolve(Ok(value))
    }

    /// Settle with an error.
    pub fn resolve_err(&self, error: E) -> bool {
        self.resolve(Err(error))
    }

    /// Whether the result has settled.
    pub fn is_resolved(&self) -> bool {
        matches!(*self.state.lock(), State::Done(_))
    }

    /// The settled value, if any.
    pub fn peek(&self) -> Option<Result<T, E>> {
        match &*self.state.lock() {
            State::Done(result) => Some(result.clone()),
            State::Pending(_) => None,
        }
    }

    /// Observe the outcome on the context, once.
    pub fn with_callback(self, f: impl FnOnce(&Result<T, E>) + Send + 'static) -> Self {
        self.observe(Box::new(f));
        self
    }

    /// Observe a successful outcome on the context, once.
    pub fn with_ok_callback(self, f: impl FnOnce(&T) + Send + 'static) -> Self {
        self.with_callback(move |r| {
            if let Ok(v) = r {
                f(v);
            }
        })
    }

    /// Observe a failed outcome on the context, once.
    pub fn with_error_callback(self, f: impl FnOnce(&E) + Send + 'static) -> Self {
        self.with_callback(move |r| {
            if let Err(e) = r {
                f(e);
            }
        })
    }

    /// Transform the success value; errors pass through unchanged.
    pub fn map<U>(&self, f: impl FnOnce(T) -> U + Send + 'static) -> AsyncResult<U, E>
    where
        U: Clone + Send + 'static,
    {
        let derived = AsyncResult::pending(&self.ctx);
        let out = derived.clone();
        self.observe(Box::new(move |r| {
            out.resolve(r.clone().map(f));
        }));
        derived
    }

    /// Transform the error; successes pass through unchanged.
    pub fn map_err<F2>(&self, f: impl FnOnce(E) -> F2 + Send + 'static) -> AsyncResult<T, F2>
    where
        F2: Clone + Send + 'static,
    {
        let derived = AsyncResult::pending(&self.ctx);
        let out = derived.clone();
        self.observe(Box::new(move |r| {
            out.resolve(r.clone().map_err(f));
        }));
        derived
    }

    /// Transform the success value through a fallible step.
    pub fn map_to_result<U>(
        &self,
        f: impl FnOnce(T) -> Result<U, E> + Send + 'static,
    ) -> AsyncResult<U, E>
    where
        U: Clone + Send + 'static,
    {
        let derived = AsyncResult::pending(&self.ctx);
        let out = derived.clone();
        self.observe(Box::new(move |r| {
            out.resolve(r.clone().and_then(f));
        }));
        derived
    }

    /// Continue with another asynchronous step on success.
    ///
    /// `f` runs at most once, and only if this result succeeds. On failure
    /// the derived result carries the original error and `f` is dropped.
    pub fn chain<U>(
        &self,
        f: impl FnOnce(T) -> AsyncResult<U, E> + Send + 'static,
    ) -> AsyncResult<U, E>
    where
        U: Clone + Send + 'static,
    {
        let derived = AsyncResult::pending(&self.ctx);
        let out = derived.clone();
        self.observe(Box::new(move |r| match r {
            Ok(v) => f(v.clone()).forward_to(out),
            Err(e) => {
                out.resolve_err(e.clone());
            }
        }));
        derived
    }

    /// Settle `target` with this result's outcome.
    pub(crate) fn forward_to(&self, target: AsyncResult<T, E>) {
        self.observe(Box::new(move |r| {
            target.resolve(r.clone());
        }));
    }

    /// Await the outcome from async code.
    ///
    /// The waiter is woken directly at settlement rather than through the
    /// context queue. Yields `E::from(Abandoned)` if the context shuts down
    /// first.
    pub async fn wait(&self) -> Result<T, E>
    where
        E: From<Abandoned>,
    {
        let rx = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Done(result) => return result.clone(),
                State::Pending(observers) => {
                    let (tx, rx) = oneshot::channel();
                    observers.push(Observer::Waiter(tx));
                    rx
                }
            }
        };
        tokio::select! {
            biased;
            result = rx => result.unwrap_or_else(|_| Err(E::from(Abandoned))),
            () = self.ctx.closed() => self.peek().unwrap_or_else(|| Err(E::from(Abandoned))),
        }
    }

    fn observe(&self, callback: Callback<T, E>) {
        let mut state = self.state.lock();
        match &mut *state {
            State::Pending(observers) => observers.push(Observer::OnContext(callback)),
            State::Done(result) => notify(&self.ctx, Observer::OnContext(callback), result),
        }
    }
}

fn notify<T, E>(ctx: &ExecutionContext, observer: Observer<T, E>, result: &Result<T, E>)
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    match observer {
        Observer::OnContext(callback) => {
            let result = result.clone();
            if !ctx.post(move || callback(&result)) {
                debug!(context = ctx.name(), "callback dropped: context closed");
            }
        }
        Observer::Waiter(tx) => {
            let _ = tx.send(result.clone());
        }
    }
}

impl<T, E> fmt::Debug for AsyncResult<T, E>
where
    T: fmt::Debug,
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("AsyncResult");
        s.field("context", &self.ctx.name());
        match &*self.state.lock() {
            State::Pending(observers) => s.field("pending_observers", &observers.len()),
            State::Done(result) => s.field("result", result),
        };
        s.finish()
    }
}
