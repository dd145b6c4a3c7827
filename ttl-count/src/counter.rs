use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use chrono::Utc;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use crate::AdmissionGate;
use crate::AdmissionList;
use crate::CountError;
use crate::Instant;
use crate::sweeper::SweepReport;
use crate::sweeper::Sweeper;

/// Shortest wait the sweeper will schedule when the head is already overdue.
pub(crate) const MIN_WAIT: Duration = Duration::from_millis(1);

/// Resolved counter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterConfig {
    ttl: Duration,
    ttl_delta: TimeDelta,
    capacity: NonZeroUsize,
}

impl CounterConfig {
    /// Validate a ttl and capacity pair.
    ///
    /// # Errors
    ///
    /// Returns [`CountError::Config`] if the ttl is zero or too large to be
    /// added to a wall clock timestamp.
    pub fn new(ttl: Duration, capacity: NonZeroUsize) -> Result<Self, CountError> {
        if ttl.is_zero() {
            return Err(CountError::Config("ttl must be greater than zero".into()));
        }
        let ttl_delta = TimeDelta::from_std(ttl)
            .ok()
            .filter(|delta| Utc::now().checked_add_signed(*delta).is_some())
            .ok_or_else(|| CountError::Config(format!("ttl {ttl:?} is out of range")))?;
        Ok(Self {
            ttl,
            ttl_delta,
            capacity,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }
}

#[derive(Debug)]
struct State {
    list: AdmissionList,
    gate: AdmissionGate,
}

#[derive(Clone, Debug)]
struct CounterMetrics {
    admitted: Counter<u64>,
    rejected: Counter<u64>,
    evicted: Counter<u64>,
}

#[derive(Debug)]
struct Shared {
    config: CounterConfig,
    state: Mutex<State>,
    released: Notify,
    instruments: CounterMetrics,
}

/// A capacity bounded count of admissions that each expire `ttl` after they
/// were granted.
///
/// Cloning is cheap and every clone observes the same state. Expired
/// admissions are only removed while a sweeper (see
/// [`RequestCounter::spawn_sweeper`]) is running.
#[derive(Clone, Debug)]
pub struct RequestCounter {
    shared: Arc<Shared>,
}

impl RequestCounter {
    /// Create a counter, restoring any admissions in `seed` that have not yet
    /// expired.
    pub fn new<I>(config: CounterConfig, seed: I) -> Self
    where
        I: IntoIterator<Item = Instant>,
    {
        let list = AdmissionList::seed(seed, Utc::now());
        if list.len() > config.capacity.get() {
            warn!(
                restored = list.len(),
                capacity = config.capacity.get(),
                "restored more admissions than capacity; new admissions wait until they expire"
            );
        }
        let gate = AdmissionGate::with_outstanding(config.capacity, list.len());

        let meter = global::meter("ttl_count");
        let instruments = CounterMetrics {
            admitted: meter.u64_counter("admitted").build(),
            rejected: meter.u64_counter("rejected").build(),
            evicted: meter.u64_counter("evicted").build(),
        };

        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State { list, gate }),
                released: Notify::new(),
                instruments,
            }),
        }
    }

    /// Admit one request and return the live count including it.
    ///
    /// Waits, without limit, for a slot to be released by the sweeper when
    /// the counter is at capacity.
    pub async fn admit_and_count(&self) -> usize {
        loop {
            // Register interest before checking so a release between the
            // check and the await is not missed.
            let released = self.shared.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Ok(count) = self.admit_now() {
                return count;
            }
            released.await;
        }
    }

    /// Admit one request if a slot is free right now.
    ///
    /// # Errors
    ///
    /// Returns [`CountError::Saturated`] when the counter is at capacity.
    pub fn try_admit_and_count(&self) -> Result<usize, CountError> {
        self.admit_now().map_err(|retry_after| {
            self.shared.instruments.rejected.add(1, &[]);
            CountError::Saturated {
                capacity: self.shared.config.capacity.get(),
                retry_after,
            }
        })
    }

    /// Admit one request, waiting at most `max_wait` for a slot.
    ///
    /// # Errors
    ///
    /// Returns [`CountError::Timeout`] if no slot was released in time.
    pub async fn admit_and_count_timeout(&self, max_wait: Duration) -> Result<usize, CountError> {
        tokio::time::timeout(max_wait, self.admit_and_count())
            .await
            .map_err(|_| {
                self.shared.instruments.rejected.add(1, &[]);
                CountError::Timeout { waited: max_wait }
            })
    }

    /// Number of live admissions.
    pub fn count(&self) -> usize {
        self.shared.state.lock().list.len()
    }

    /// Expiration instants of the live admissions, earliest first.
    pub fn snapshot(&self) -> Vec<Instant> {
        self.shared.state.lock().list.snapshot()
    }

    pub fn ttl(&self) -> Duration {
        self.shared.config.ttl
    }

    pub fn capacity(&self) -> usize {
        self.shared.config.capacity.get()
    }

    /// Number of slots that could be granted right now.
    pub fn available(&self) -> usize {
        self.shared.state.lock().gate.available()
    }

    /// Run the eviction sweeper on the current runtime until `shutdown`
    /// becomes `true` or its sender is dropped.
    pub fn spawn_sweeper(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<SweepReport> {
        tokio::spawn(self.sweeper(shutdown).run())
    }

    /// Run the eviction sweeper inline; resolves once it stops.
    pub async fn run_sweeper(&self, shutdown: watch::Receiver<bool>) -> SweepReport {
        self.sweeper(shutdown).run().await
    }

    /// Build a sweeper without spawning it.
    pub fn sweeper(&self, shutdown: watch::Receiver<bool>) -> Sweeper {
        Sweeper::new(self.clone(), shutdown)
    }

    /// Take a slot and record its expiry, or report how long until the
    /// earliest live admission expires.
    fn admit_now(&self) -> Result<usize, Duration> {
        let count = {
            let mut state = self.shared.state.lock();
            let now = Utc::now();
            if !state.gate.try_acquire() {
                let retry_after = state
                    .list
                    .peek_earliest()
                    .and_then(|head| (head - now).to_std().ok())
                    .unwrap_or(Duration::ZERO);
                return Err(retry_after);
            }
            let expires = now
                .checked_add_signed(self.shared.config.ttl_delta)
                .unwrap_or(Instant::MAX_UTC);
            state.list.append(expires);
            state.list.len()
        };
        self.shared.instruments.admitted.add(1, &[]);
        Ok(count)
    }

    /// How long the sweeper should sleep before its next check.
    pub(crate) fn next_wait(&self) -> Duration {
        let head = self.shared.state.lock().list.peek_earliest();
        match head {
            None => self.shared.config.ttl,
            Some(expires) => (expires - Utc::now())
                .to_std()
                .ok()
                .filter(|wait| !wait.is_zero())
                .unwrap_or(MIN_WAIT),
        }
    }

    /// Remove every expired admission and release its slot.
    pub(crate) fn evict_expired(&self) -> usize {
        let evicted = {
            let mut state = self.shared.state.lock();
            let evicted = state.list.pop_expired(Utc::now());
            state.gate.release(evicted);
            debug_assert_eq!(state.gate.outstanding(), state.list.len());
            evicted
        };
        if evicted > 0 {
            for _ in 0..evicted {
                self.shared.released.notify_one();
            }
            self.shared.instruments.evicted.add(evicted as u64, &[]);
            debug!(evicted, "evicted expired admissions");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;

    use more_asserts::assert_le;
    use tokio::task::JoinSet;

    use super::*;

    fn counter(ttl: Duration, capacity: usize) -> RequestCounter {
        let config = CounterConfig::new(ttl, NonZeroUsize::new(capacity).unwrap()).unwrap();
        RequestCounter::new(config, [])
    }

    #[test]
    fn it_rejects_unusable_ttls() {
        let one = NonZeroUsize::new(1).unwrap();
        for ttl in [Duration::ZERO, Duration::MAX, Duration::from_secs(u64::MAX / 1_000)] {
            let err = CounterConfig::new(ttl, one).unwrap_err();
            assert!(matches!(err, CountError::Config(_)), "{ttl:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn it_counts_concurrent_admissions() {
        let n = 50;
        let rc = counter(Duration::from_secs(60), n);

        let mut tasks = JoinSet::new();
        for _ in 0..n {
            let rc = rc.clone();
            tasks.spawn(async move { rc.admit_and_count().await });
        }
        let mut seen = Vec::with_capacity(n);
        while let Some(count) = tasks.join_next().await {
            seen.push(count.expect("task panicked"));
        }

        assert_eq!(rc.count(), n);
        // Every admission observed a distinct count
        seen.sort_unstable();
        assert_eq!(seen, (1..=n).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn it_fails_fast_when_saturated() {
        let rc = counter(Duration::from_secs(60), 2);

        assert_eq!(rc.try_admit_and_count(), Ok(1));
        assert_eq!(rc.try_admit_and_count(), Ok(2));
        match rc.try_admit_and_count() {
            Err(CountError::Saturated {
                capacity,
                retry_after,
            }) => {
                assert_eq!(capacity, 2);
                assert_le!(retry_after, Duration::from_secs(60));
                assert!(retry_after > Duration::from_secs(59));
            }
            other => panic!("expected saturation, got {other:?}"),
        }
        assert_eq!(rc.count(), 2);
        assert_eq!(rc.available(), 0);
    }

    #[tokio::test]
    async fn it_times_out_when_nothing_expires() {
        let rc = counter(Duration::from_secs(60), 1);
        rc.admit_and_count().await;

        let waited = Duration::from_millis(20);
        assert_eq!(
            rc.admit_and_count_timeout(waited).await,
            Err(CountError::Timeout { waited })
        );
        assert_eq!(rc.count(), 1);
    }

    #[tokio::test]
    async fn it_blocks_until_the_sweeper_frees_a_slot() {
        let ttl = Duration::from_millis(50);
        let rc = counter(ttl, 1);
        let (tx, rx) = watch::channel(false);
        let sweeper = rc.spawn_sweeper(rx);

        assert_eq!(rc.admit_and_count().await, 1);

        let unblocked = Arc::new(AtomicBool::new(false));
        let waiter = {
            let rc = rc.clone();
            let unblocked = unblocked.clone();
            tokio::spawn(async move {
                let count = rc.admit_and_count().await;
                unblocked.store(true, Ordering::SeqCst);
                count
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!unblocked.load(Ordering::SeqCst), "should wait for a slot");

        let count = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should be released once the first admission expires")
            .expect("task panicked");
        assert_eq!(count, 1);

        tx.send(true).unwrap();
        let report = sweeper.await.unwrap();
        assert_le!(1, report.evicted);
    }

    #[tokio::test]
    async fn it_restores_only_live_admissions() {
        let now = Utc::now();
        let config =
            CounterConfig::new(Duration::from_millis(1), NonZeroUsize::new(5).unwrap()).unwrap();
        let rc = RequestCounter::new(
            config,
            [
                now - TimeDelta::milliseconds(10),
                now + TimeDelta::minutes(1),
            ],
        );

        assert_eq!(rc.count(), 1);
        assert_eq!(rc.available(), 4);
    }

    #[tokio::test]
    async fn it_holds_slots_for_oversubscribed_seeds() {
        let now = Utc::now();
        let config =
            CounterConfig::new(Duration::from_secs(60), NonZeroUsize::new(2).unwrap()).unwrap();
        let seed = (1..=3).map(|i| now + TimeDelta::minutes(i));
        let rc = RequestCounter::new(config, seed);

        assert_eq!(rc.count(), 3);
        assert!(rc.try_admit_and_count().is_err());
    }

    #[tokio::test]
    async fn it_survives_a_restart_from_snapshot() {
        let ttl = Duration::from_secs(60);
        let rc = counter(ttl, 5);
        let (tx, rx) = watch::channel(false);
        let sweeper = rc.spawn_sweeper(rx);

        for _ in 0..3 {
            rc.admit_and_count().await;
        }

        tx.send(true).unwrap();
        sweeper.await.unwrap();
        let snapshot = rc.snapshot();

        let config = CounterConfig::new(ttl, NonZeroUsize::new(5).unwrap()).unwrap();
        let restarted = RequestCounter::new(config, snapshot.clone());

        assert_eq!(restarted.count(), rc.count());
        assert_eq!(restarted.snapshot(), snapshot);
        assert_eq!(restarted.available(), 2);
    }

    #[test]
    fn it_waits_a_full_ttl_when_empty() {
        let ttl = Duration::from_secs(7);
        let rc = counter(ttl, 1);
        assert_eq!(rc.next_wait(), ttl);
    }

    #[test]
    fn it_waits_the_minimum_when_overdue() {
        let config =
            CounterConfig::new(Duration::from_secs(1), NonZeroUsize::new(1).unwrap()).unwrap();
        let rc = RequestCounter::new(config, [Utc::now() + TimeDelta::milliseconds(20)]);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(rc.next_wait(), MIN_WAIT);
        assert_eq!(rc.evict_expired(), 1);
        assert_eq!(rc.count(), 0);
        assert_eq!(rc.available(), 1);
    }

    #[tokio::test]
    async fn it_runs_the_sweeper_inline() {
        let rc = counter(Duration::from_millis(10), 2);
        rc.try_admit_and_count().unwrap();
        rc.try_admit_and_count().unwrap();

        let (tx, rx) = watch::channel(false);
        let stop = async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            tx.send(true).unwrap();
        };
        let (report, ()) = tokio::join!(rc.run_sweeper(rx), stop);

        assert_eq!(report.evicted, 2);
        assert_eq!(rc.count(), 0);
    }
}
