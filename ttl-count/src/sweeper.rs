use tokio::sync::watch;
use tokio::time::sleep;
use tracing::debug;
use tracing::info;

use crate::RequestCounter;

/// Totals gathered by a [`Sweeper`] over its lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Admissions removed because they expired.
    pub evicted: usize,
    /// Number of times the sweeper woke to check for expired admissions.
    pub wakeups: usize,
}

/// Background eviction loop for a [`RequestCounter`].
///
/// Rather than polling on a fixed interval the sweeper sleeps until the
/// earliest admission is due, removes everything that has expired by then and
/// schedules itself again. With nothing to expire it sleeps a full ttl, which
/// is never later than the expiry of an admission granted meanwhile.
#[derive(Debug)]
pub struct Sweeper {
    counter: RequestCounter,
    shutdown: watch::Receiver<bool>,
}

impl Sweeper {
    pub(crate) fn new(counter: RequestCounter, shutdown: watch::Receiver<bool>) -> Self {
        Self { counter, shutdown }
    }

    /// Evict until `true` is sent on the shutdown channel or every sender is
    /// dropped.
    pub async fn run(mut self) -> SweepReport {
        let mut report = SweepReport::default();

        loop {
            if *self.shutdown.borrow_and_update() {
                break;
            }

            let wait = self.counter.next_wait();
            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        debug!("shutdown sender dropped");
                        break;
                    }
                }
                _ = sleep(wait) => {
                    report.wakeups += 1;
                    report.evicted += self.counter.evict_expired();
                }
            }
        }

        info!(
            evicted = report.evicted,
            wakeups = report.wakeups,
            live = self.counter.count(),
            "sweeper stopped"
        );
        report
    }
}
