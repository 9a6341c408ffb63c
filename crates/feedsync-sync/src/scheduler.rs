//! Periodic, non-overlapping polling of one source.
//!
//! A [`PollingScheduler`] owns a single interval timer. Each tick, and each
//! [`PollingScheduler::trigger_now`], starts the fetch function unless a
//! previous fetch is still running; in that case the request is dropped
//! rather than queued, so at most one fetch per scheduler is ever in flight.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

type FetchFn = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// What happened to a request to run the fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new fetch was started.
    Started,
    /// A fetch was already in flight; its result satisfies this request.
    Coalesced,
    /// The scheduler has been stopped.
    Stopped,
}

/// Counters for one scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Fetches started.
    pub invocations: u64,
    /// Ticks and triggers dropped because a fetch was in flight.
    pub coalesced: u64,
}

/// Handle to a running poll loop. Dropping it stops the loop.
pub struct PollingScheduler {
    shared: Arc<Shared>,
    ticker: JoinHandle<()>,
}

struct Shared {
    name: String,
    fetch: FetchFn,
    state: Mutex<PollState>,
    invocations: AtomicU64,
    coalesced: AtomicU64,
}

#[derive(Default)]
struct PollState {
    stopped: bool,
    in_flight: Option<JoinHandle<()>>,
}

/// Clears the in-flight slot when the fetch task ends, including by panic or abort.
struct InFlightGuard(Arc<Shared>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.lock().in_flight = None;
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PollState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(self: &Arc<Self>, reason: &'static str) -> TriggerOutcome {
        let mut state = self.lock();
        if state.stopped {
            return TriggerOutcome::Stopped;
        }
        if state.in_flight.is_some() {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            debug!(poller = %self.name, reason, "fetch in flight, coalescing");
            return TriggerOutcome::Coalesced;
        }

        let fetch = (self.fetch)();
        self.invocations.fetch_add(1, Ordering::Relaxed);
        trace!(poller = %self.name, reason, "starting fetch");

        let guard = InFlightGuard(Arc::clone(self));
        // The spawned task cannot clear the slot before it is filled: it
        // needs this lock first.
        state.in_flight = Some(tokio::spawn(async move {
            let _guard = guard;
            fetch.await;
        }));
        TriggerOutcome::Started
    }
}

impl PollingScheduler {
    /// Start polling: `fetch` runs immediately, then every `interval`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<F, Fut>(name: impl Into<String>, interval: Duration, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            name: name.into(),
            fetch: Box::new(move || fetch().boxed()),
            state: Mutex::new(PollState::default()),
            invocations: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        });

        debug!(
            poller = %shared.name,
            interval_ms = interval.as_millis() as u64,
            "poller started"
        );
        let ticker_shared = Arc::clone(&shared);
        let ticker = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                if ticker_shared.fire("tick") == TriggerOutcome::Stopped {
                    break;
                }
            }
        });

        Self { shared, ticker }
    }

    /// Run the fetch now, unless one is already in flight.
    pub fn trigger_now(&self) -> TriggerOutcome {
        self.shared.fire("trigger")
    }

    /// Stop polling.
    ///
    /// Once this returns the fetch function is never invoked again. An
    /// in-flight fetch is aborted at its next suspension point.
    pub fn stop(&self) {
        let in_flight = {
            let mut state = self.shared.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.in_flight.take()
        };
        if let Some(task) = in_flight {
            task.abort();
        }
        self.ticker.abort();
        debug!(poller = %self.shared.name, "poller stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.lock().stopped
    }

    pub fn is_in_flight(&self) -> bool {
        self.shared.lock().in_flight.is_some()
    }

    pub fn stats(&self) -> PollStats {
        PollStats {
            invocations: self.shared.invocations.load(Ordering::Relaxed),
            coalesced: self.shared.coalesced.load(Ordering::Relaxed),
        }
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(delay: Duration) -> (Arc<AtomicUsize>, impl Fn() -> BoxFuture<'static, ()>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetch = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(delay).await;
            }
            .boxed()
        };
        (calls, fetch)
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_on_every_tick_when_fast() {
        let (calls, fetch) = counting(Duration::ZERO);
        let poller = PollingScheduler::start("fast", Duration::from_millis(100), fetch);

        tokio::time::sleep(Duration::from_millis(950)).await;
        // Ticks at 0, 100, ..., 900.
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(poller.stats().coalesced, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn skips_ticks_while_fetch_in_flight() {
        let (calls, fetch) = counting(Duration::from_millis(250));
        let poller = PollingScheduler::start("slow", Duration::from_millis(100), fetch);

        tokio::time::sleep(Duration::from_millis(950)).await;
        // Fetches start at 0, 300, 600, 900; the six ticks in between are dropped.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            poller.stats(),
            PollStats {
                invocations: 4,
                coalesced: 6
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_during_fetch_is_coalesced() {
        let (calls, fetch) = counting(Duration::from_millis(500));
        let poller = PollingScheduler::start("coalesce", Duration::from_secs(60), fetch);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(poller.is_in_flight());
        assert_eq!(poller.trigger_now(), TriggerOutcome::Coalesced);
        assert_eq!(poller.trigger_now(), TriggerOutcome::Coalesced);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!poller.is_in_flight());
        assert_eq!(poller.trigger_now(), TriggerOutcome::Started);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_fetches() {
        let (calls, fetch) = counting(Duration::from_millis(5));
        let poller = PollingScheduler::start("stop", Duration::from_millis(100), fetch);

        tokio::time::sleep(Duration::from_millis(250)).await;
        poller.stop();
        let seen = calls.load(Ordering::SeqCst);
        assert_eq!(seen, 3);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
        assert_eq!(poller.trigger_now(), TriggerOutcome::Stopped);
        assert!(poller.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_in_flight_fetch() {
        let finished = Arc::new(AtomicUsize::new(0));
        let done = Arc::clone(&finished);
        let poller = PollingScheduler::start("abort", Duration::from_secs(60), move || {
            let done = Arc::clone(&done);
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        poller.stop();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_fetch_does_not_wedge_poller() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let poller = PollingScheduler::start("panic", Duration::from_millis(100), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    panic!("first fetch fails hard");
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        drop(poller);
    }
}
