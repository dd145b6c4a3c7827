use std::fmt::Display;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use clap::ValueEnum;
use tracing::info;
use tracing::warn;
use ttl_count::CountError;
use ttl_count::CounterConfig;

use crate::layer::AdmissionPolicy;

pub const DEFAULT_TTL_SEC: u64 = 60;
pub const DEFAULT_CAPACITY: usize = 5;
pub const DEFAULT_REQ_PROCESS_TIME_SEC: u64 = 2;
pub const DEFAULT_PORT: u16 = 8080;

// A century keeps `now + ttl` well inside chrono's representable range
const MAX_TTL_SEC: u64 = 100 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyKind {
    /// Wait for a slot to free up
    Block,
    /// Respond 429 immediately when saturated
    Reject,
    /// Wait up to --admission-timeout-ms, then respond 503
    Timeout,
}

/// Command line options.
///
/// The counter knobs (`TTL_SEC`, `CAPACITY`, `REQ_PROCESS_TIME_SEC`, `PORT`)
/// are read from the environment by [`Settings`] instead, so that a bad value
/// falls back to its default rather than aborting startup.
#[derive(Debug, Clone, Parser)]
#[command(name = "ttl-count-server", version, about = "Count requests admitted within a ttl")]
pub struct Cli {
    /// Where live admissions are saved on shutdown and restored from on start
    #[arg(long, env = "STATE_FILE", default_value = "requests.csv")]
    pub state_file: PathBuf,

    /// Address to listen on
    #[arg(long, env = "BIND_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// How to treat requests that arrive while every slot is live
    #[arg(long, env = "ADMISSION_POLICY", value_enum, default_value_t = PolicyKind::Block)]
    pub admission: PolicyKind,

    /// Maximum wait for the `timeout` admission policy
    #[arg(long, env = "ADMISSION_TIMEOUT_MS", default_value_t = 1_000)]
    pub admission_timeout_ms: u64,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn admission_policy(&self) -> AdmissionPolicy {
        match self.admission {
            PolicyKind::Block => AdmissionPolicy::Block,
            PolicyKind::Reject => AdmissionPolicy::Reject,
            PolicyKind::Timeout => {
                AdmissionPolicy::Timeout(Duration::from_millis(self.admission_timeout_ms))
            }
        }
    }
}

/// Counter and endpoint settings resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub ttl: Duration,
    pub capacity: NonZeroUsize,
    pub processing_delay: Duration,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_SEC),
            capacity: NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            processing_delay: Duration::from_secs(DEFAULT_REQ_PROCESS_TIME_SEC),
            port: DEFAULT_PORT,
        }
    }
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Self {
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Resolve settings through `lookup`, falling back to defaults for
    /// anything missing or invalid.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let ttl_sec = setting(&lookup, "TTL_SEC", DEFAULT_TTL_SEC, |secs| {
            (1..=MAX_TTL_SEC).contains(secs)
        });
        let capacity = setting(&lookup, "CAPACITY", defaults.capacity, |_| true);
        let delay_sec = setting(
            &lookup,
            "REQ_PROCESS_TIME_SEC",
            DEFAULT_REQ_PROCESS_TIME_SEC,
            |_| true,
        );
        let port = setting(&lookup, "PORT", DEFAULT_PORT, |_| true);

        Self {
            ttl: Duration::from_secs(ttl_sec),
            capacity,
            processing_delay: Duration::from_secs(delay_sec),
            port,
        }
    }

    pub fn counter_config(&self) -> Result<CounterConfig, CountError> {
        CounterConfig::new(self.ttl, self.capacity)
    }
}

fn setting<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        info!(key, %default, "not set, using default");
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        Ok(value) => {
            warn!(key, %value, %default, "out of range, using default");
            default
        }
        Err(e) => {
            warn!(key, value = %raw, error = %e, %default, "failed to parse, using default");
            default
        }
    }
}
