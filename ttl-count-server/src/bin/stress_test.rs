use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use axum::Router;
use axum::body::Body;
use clap::Parser;
use hdrhistogram::Histogram;
use http::Request;
use http::StatusCode;
use tokio::sync::Barrier;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tower::BoxError;
use tower::ServiceExt;
use ttl_count::CounterConfig;
use ttl_count::RequestCounter;
use ttl_count_server::AdmissionPolicy;
use ttl_count_server::api;
use ttl_count_server::config::PolicyKind;

/// Drive the counting endpoint in-process and report latency per policy.
#[derive(Debug, Parser)]
struct Args {
    #[arg(long, default_value_t = 2_000)]
    requests: usize,

    #[arg(long, default_value_t = 100)]
    capacity: usize,

    #[arg(long, default_value = "100ms", value_parser = humantime::parse_duration)]
    ttl: Duration,

    /// Bound used by the timeout policy
    #[arg(long, default_value = "250ms", value_parser = humantime::parse_duration)]
    max_wait: Duration,

    /// Policies to run; all of them if omitted
    #[arg(long, value_enum)]
    policy: Vec<PolicyKind>,
}

#[derive(Default)]
struct Outcomes {
    ok: usize,
    rejected: usize,
    timed_out: usize,
    other: usize,
}

async fn run_load_test(name: &str, app: Router, total_reqs: usize) -> Result<(), BoxError> {
    let mut hist = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3)?;
    let mut tasks = JoinSet::new();
    let mut outcomes = Outcomes::default();

    let start = Instant::now();
    let barrier = Arc::new(Barrier::new(total_reqs));

    for _ in 0..total_reqs {
        let app = app.clone();
        let bar = barrier.clone();
        tasks.spawn(async move {
            bar.wait().await;
            let req_start = Instant::now();
            let res = app.oneshot(Request::get("/").body(Body::empty())?).await?;
            Ok::<_, BoxError>((res.status(), req_start.elapsed()))
        });
    }

    while let Some(task) = tasks.join_next().await {
        let (status, elapsed) = task??;
        match status {
            StatusCode::OK => {
                outcomes.ok += 1;
                hist.record(elapsed.as_micros() as u64)?;
            }
            StatusCode::TOO_MANY_REQUESTS => outcomes.rejected += 1,
            StatusCode::SERVICE_UNAVAILABLE => outcomes.timed_out += 1,
            _ => outcomes.other += 1,
        }
    }

    let total_duration = start.elapsed();
    let goodput = outcomes.ok as f64 / total_duration.as_secs_f64();

    println!("--- {} ---", name);
    println!("Total Duration:  {:.2?}", total_duration);
    println!("Success/Total:   {}/{}", outcomes.ok, total_reqs);
    println!("Success Rate:    {:.2} req/sec (Goodput)", goodput);
    if outcomes.ok > 0 {
        println!("P50 (Elapsed):   {}µs", hist.value_at_quantile(0.5));
        println!("P99 (Elapsed):   {}µs", hist.value_at_quantile(0.99));
    }
    let errors = outcomes.rejected + outcomes.timed_out + outcomes.other;
    println!("Errors:          {}", errors);
    if errors > 0 {
        println!("  └─ Rejected:   {}", outcomes.rejected);
        println!("  └─ Timeouts:   {}", outcomes.timed_out);
        if outcomes.other > 0 {
            println!("  └─ Other:      {}", outcomes.other);
        }
    }
    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();
    let capacity = NonZeroUsize::new(args.capacity).ok_or("capacity must be non-zero")?;
    let config = CounterConfig::new(args.ttl, capacity)?;

    let policies = if args.policy.is_empty() {
        vec![PolicyKind::Block, PolicyKind::Reject, PolicyKind::Timeout]
    } else {
        args.policy.clone()
    };

    for kind in policies {
        let (name, policy) = match kind {
            PolicyKind::Block => ("Blocking", AdmissionPolicy::Block),
            PolicyKind::Reject => ("Rejecting", AdmissionPolicy::Reject),
            PolicyKind::Timeout => ("Bounded Wait", AdmissionPolicy::Timeout(args.max_wait)),
        };

        // A fresh counter per run so runs don't share live admissions
        let counter = RequestCounter::new(config, []);
        let (shutdown, rx) = watch::channel(false);
        let sweeper = counter.spawn_sweeper(rx);

        let app = api::router(counter, policy, Duration::ZERO);
        run_load_test(name, app, args.requests).await?;

        let _ = shutdown.send(true);
        sweeper.await?;
    }

    Ok(())
}
