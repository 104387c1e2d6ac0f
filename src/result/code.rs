//! Settle-once asynchronous operation outcome.

use std::fmt;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use super::dispatch::CallbackDispatcher;

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Pending,
    Succeeded,
    Failed,
}

struct State {
    outcome: Outcome,
    callbacks: Vec<Callback>,
}

struct Inner {
    state: Mutex<State>,
    /// Wakes threads blocked in `join`
    settled: Condvar,
    /// Wakes tasks awaiting `completed`
    notify: Notify,
    dispatcher: Arc<CallbackDispatcher>,
}

/// The outcome of an asynchronous operation, observable by any number of waiters.
///
/// A code starts pending and settles exactly once, as either succeeded or
/// failed. Clones share the same state.
///
/// # Observing
///
/// | Method | Behaviour |
/// |--------|-----------|
/// | `when_complete(f)` | queue `f` to run on a callback worker after settlement |
/// | `join(timeout)` | block the calling thread until settled or timed out |
/// | `completed().await` | async wait for settlement |
///
/// Timing out a `join` abandons only the wait. The operation may still settle
/// later, so re-check [`is_done`](Self::is_done) afterwards.
///
/// # Example
///
/// ```ignore
/// let code = CompletableResultCode::new();
/// code.when_complete({
///     let code = code.clone();
///     move || println!("export ok: {}", code.is_success())
/// });
/// code.succeed();
/// ```
#[derive(Clone)]
pub struct CompletableResultCode {
    inner: Arc<Inner>,
}

impl Default for CompletableResultCode {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletableResultCode {
    /// A pending code whose callbacks run on the fallback dispatcher.
    pub fn new() -> Self {
        Self::with_dispatcher(CallbackDispatcher::shared())
    }

    /// A pending code whose callbacks run on `dispatcher`.
    pub fn with_dispatcher(dispatcher: Arc<CallbackDispatcher>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    outcome: Outcome::Pending,
                    callbacks: Vec::new(),
                }),
                settled: Condvar::new(),
                notify: Notify::new(),
                dispatcher,
            }),
        }
    }

    /// An already settled code whose callbacks run on `dispatcher`.
    pub fn settled_with(dispatcher: Arc<CallbackDispatcher>, success: bool) -> Self {
        let code = Self::with_dispatcher(dispatcher);
        code.settle(if success {
            Outcome::Succeeded
        } else {
            Outcome::Failed
        });
        code
    }

    /// The dispatcher running this code's callbacks.
    pub fn dispatcher(&self) -> &Arc<CallbackDispatcher> {
        &self.inner.dispatcher
    }

    /// An already succeeded code.
    pub fn of_success() -> Self {
        let code = Self::new();
        code.succeed();
        code
    }

    /// An already failed code.
    pub fn of_failure() -> Self {
        let code = Self::new();
        code.fail();
        code
    }

    /// Settle as succeeded. No-op if already settled.
    pub fn succeed(&self) -> &Self {
        self.settle(Outcome::Succeeded)
    }

    /// Settle as failed. No-op if already settled.
    pub fn fail(&self) -> &Self {
        self.settle(Outcome::Failed)
    }

    fn settle(&self, outcome: Outcome) -> &Self {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.outcome != Outcome::Pending {
                return self;
            }
            state.outcome = outcome;
            std::mem::take(&mut state.callbacks)
        };

        self.inner.settled.notify_all();
        self.inner.notify.notify_waiters();
        for callback in callbacks {
            self.inner.dispatcher.dispatch(callback);
        }
        self
    }

    /// Run `callback` once this code settles.
    ///
    /// Pending codes queue the callback; it is dispatched in registration order
    /// right after settlement. Settled codes dispatch it immediately. Either way
    /// it runs on a callback worker, never on the caller's stack.
    pub fn when_complete<F>(&self, callback: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.inner.state.lock();
            if state.outcome == Outcome::Pending {
                state.callbacks.push(Box::new(callback));
                return self;
            }
        }
        self.inner.dispatcher.dispatch(callback);
        self
    }

    /// Whether the code has settled.
    pub fn is_done(&self) -> bool {
        self.outcome().is_some()
    }

    /// Whether the code settled as succeeded. `false` while pending.
    pub fn is_success(&self) -> bool {
        self.outcome() == Some(true)
    }

    /// `Some(success)` once settled.
    pub fn outcome(&self) -> Option<bool> {
        match self.inner.state.lock().outcome {
            Outcome::Pending => None,
            Outcome::Succeeded => Some(true),
            Outcome::Failed => Some(false),
        }
    }

    /// Block the calling thread until settled or `timeout` elapses.
    pub fn join(&self, timeout: Duration) -> &Self {
        let mut state = self.inner.state.lock();
        if state.outcome == Outcome::Pending {
            self.inner.settled.wait_while_for(
                &mut state,
                |s| s.outcome == Outcome::Pending,
                timeout,
            );
        }
        self
    }

    /// Wait asynchronously for settlement, returning whether it succeeded.
    pub async fn completed(&self) -> bool {
        loop {
            let mut notified = pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            if let Some(success) = self.outcome() {
                return success;
            }
            notified.await;
        }
    }

    /// Settle `target` with this code's outcome once this code settles.
    pub fn propagate_to(&self, target: CompletableResultCode) -> &Self {
        let source = self.clone();
        self.when_complete(move || {
            if source.is_success() {
                target.succeed();
            } else {
                target.fail();
            }
        })
    }

    /// A code that settles once every input has settled.
    ///
    /// It succeeds only if all inputs succeeded. An empty input succeeds
    /// immediately, as does an input made only of already-succeeded codes.
    pub fn of_all<I>(codes: I) -> Self
    where
        I: IntoIterator<Item = CompletableResultCode>,
    {
        Self::of_all_with(CallbackDispatcher::shared(), codes)
    }

    /// [`of_all`](Self::of_all) with the combined code's callbacks on `dispatcher`.
    pub fn of_all_with<I>(dispatcher: Arc<CallbackDispatcher>, codes: I) -> Self
    where
        I: IntoIterator<Item = CompletableResultCode>,
    {
        let codes: Vec<_> = codes.into_iter().collect();
        let result = Self::with_dispatcher(dispatcher);
        if codes.is_empty() {
            result.succeed();
            return result;
        }

        let pending = Arc::new(AtomicUsize::new(codes.len()));
        let failed = Arc::new(AtomicBool::new(false));

        let settle_one = {
            let pending = pending.clone();
            let failed = failed.clone();
            let result = result.clone();
            move |success: bool| {
                if !success {
                    failed.store(true, Ordering::Release);
                }
                if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                    if failed.load(Ordering::Acquire) {
                        result.fail();
                    } else {
                        result.succeed();
                    }
                }
            }
        };

        for code in codes {
            match code.outcome() {
                Some(success) => settle_one(success),
                None => {
                    let settle_one = settle_one.clone();
                    let observed = code.clone();
                    code.when_complete(move || settle_one(observed.is_success()));
                }
            }
        }
        result
    }
}

impl fmt::Debug for CompletableResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("CompletableResultCode")
            .field("outcome", &state.outcome)
            .field("pending_callbacks", &state.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_settles_once() {
        let code = CompletableResultCode::new();
        assert!(!code.is_done());

        assert!(code.succeed().fail().is_success());
        assert!(code.is_done());

        let failed = CompletableResultCode::new();
        failed.fail().succeed();
        assert_eq!(failed.outcome(), Some(false));
    }

    #[test]
    fn test_callbacks_run_once_in_registration_order() {
        let dispatcher = Arc::new(CallbackDispatcher::new("order", 1).unwrap());
        let code = CompletableResultCode::with_dispatcher(dispatcher);
        let (tx, rx) = mpsc::channel();

        for i in 0..5 {
            let tx = tx.clone();
            let observed = code.clone();
            code.when_complete(move || tx.send((i, observed.is_done())).unwrap());
        }
        code.succeed();
        code.succeed();

        let seen: Vec<_> = (0..5).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(seen, (0..5).map(|i| (i, true)).collect::<Vec<_>>());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_callback_on_settled_code_runs_off_caller_stack() {
        let code = CompletableResultCode::of_success();
        let caller = std::thread::current().id();
        let (tx, rx) = mpsc::channel();

        code.when_complete(move || tx.send(std::thread::current().id()).unwrap());
        assert_ne!(rx.recv_timeout(WAIT).unwrap(), caller);
    }

    #[test]
    fn test_join_times_out_without_settling() {
        let code = CompletableResultCode::new();
        let start = Instant::now();
        code.join(Duration::from_millis(50));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(!code.is_done());

        code.fail();
        assert_eq!(code.outcome(), Some(false));
    }

    #[test]
    fn test_join_wakes_on_settle() {
        let code = CompletableResultCode::new();
        let settler = code.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            settler.succeed();
        });

        assert!(code.join(WAIT).is_success());
        handle.join().unwrap();
    }

    #[test]
    fn test_completed_future() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let code = CompletableResultCode::new();
        let settler = code.clone();

        let success = rt.block_on(async move {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                settler.fail();
            });
            code.completed().await
        });
        assert!(!success);
    }

    #[test]
    fn test_of_all_with_runs_callbacks_on_given_dispatcher() {
        let dispatcher = Arc::new(CallbackDispatcher::new("scoped", 1).unwrap());
        let input = CompletableResultCode::with_dispatcher(dispatcher.clone());
        let all = CompletableResultCode::of_all_with(dispatcher.clone(), [input.clone()]);
        assert!(Arc::ptr_eq(all.dispatcher(), &dispatcher));

        let (tx, rx) = mpsc::channel();
        all.when_complete(move || {
            let name = std::thread::current().name().map(str::to_owned);
            tx.send(name).unwrap();
        });
        input.succeed();

        let name = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(name.as_deref(), Some("scoped-callback-0000"));
        assert!(all.join(WAIT).is_success());
    }

    #[test]
    fn test_settled_with() {
        let dispatcher = Arc::new(CallbackDispatcher::new("settled", 1).unwrap());
        let failed = CompletableResultCode::settled_with(dispatcher.clone(), false);
        assert_eq!(failed.outcome(), Some(false));
        assert!(Arc::ptr_eq(failed.dispatcher(), &dispatcher));
        assert!(CompletableResultCode::settled_with(dispatcher, true).is_success());
    }

    #[test]
    fn test_of_all_empty_succeeds() {
        assert!(CompletableResultCode::of_all(Vec::new()).is_success());
    }

    #[test]
    fn test_of_all_already_succeeded_is_immediate() {
        let codes: Vec<_> = (0..4).map(|_| CompletableResultCode::of_success()).collect();
        let all = CompletableResultCode::of_all(codes);
        assert!(all.is_success());
    }

    #[test]
    fn test_of_all_waits_for_every_input() {
        let codes: Vec<_> = (0..3).map(|_| CompletableResultCode::new()).collect();
        let all = CompletableResultCode::of_all(codes.clone());

        codes[1].fail();
        codes[0].succeed();
        all.join(Duration::from_millis(50));
        assert!(!all.is_done(), "must wait for the last input");

        codes[2].succeed();
        assert_eq!(all.join(WAIT).outcome(), Some(false));
    }

    #[test]
    fn test_of_all_concurrent_settlement() {
        for _ in 0..20 {
            let codes: Vec<_> = (0..16).map(|_| CompletableResultCode::new()).collect();
            let all = CompletableResultCode::of_all(codes.clone());

            let threads: Vec<_> = codes
                .into_iter()
                .map(|code| std::thread::spawn(move || code.succeed().is_success()))
                .collect();
            for t in threads {
                assert!(t.join().unwrap());
            }
            assert!(all.join(WAIT).is_success());
        }
    }
}
