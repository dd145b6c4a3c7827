//! # ttl-count
//!
//! `ttl-count` counts admitted requests over a sliding ttl and bounds how
//! many may be live at once.
//!
//! ## Core Philosophy
//!
//! Each admission records the instant it stops counting (`now + ttl`) and
//! holds one of `capacity` slots until then. Admissions are interchangeable;
//! there is no refill rate and no identity.
//!
//! ## Key Concepts
//!
//! * **Single Lock**: The ordered list of expiration instants and the slot
//!   pool share one lock, so a slot is released exactly when its admission is
//!   removed.
//! * **Backpressure**: [`RequestCounter::admit_and_count`] waits for a slot.
//!   [`RequestCounter::try_admit_and_count`] and
//!   [`RequestCounter::admit_and_count_timeout`] fail instead.
//! * **Self Scheduling Sweeper**: The [`Sweeper`] sleeps until the earliest
//!   admission is due rather than polling.
//!
//! ## Example
//!
//! ```rust
//! use std::num::NonZeroUsize;
//! use std::time::Duration;
//!
//! use ttl_count::CounterConfig;
//! use ttl_count::RequestCounter;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = CounterConfig::new(Duration::from_secs(60), NonZeroUsize::new(5).unwrap()).unwrap();
//! let counter = RequestCounter::new(config, []);
//! let (shutdown, rx) = tokio::sync::watch::channel(false);
//! let sweeper = counter.spawn_sweeper(rx);
//!
//! assert_eq!(counter.admit_and_count().await, 1);
//!
//! shutdown.send(true).unwrap();
//! sweeper.await.unwrap();
//! # }
//! ```

mod counter;
mod error;
mod gate;
mod list;
pub mod persist;
mod sweeper;

pub use counter::CounterConfig;
pub use counter::RequestCounter;
pub use error::CountError;
pub use error::PersistError;
pub use gate::AdmissionGate;
pub use list::AdmissionList;
pub use sweeper::SweepReport;
pub use sweeper::Sweeper;

/// The wall clock instant at which an admission stops being counted.
pub type Instant = chrono::DateTime<chrono::Utc>;
