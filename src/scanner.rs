use crate::aggregate;
use crate::types::{PortOutcome, PortRecord, ScanSpec, ScanSummary};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Receives `(completed, total)` after every finished attempt.
///
/// Calls are serialized by the engine, so `completed` is observed as `1, 2, ..., total`.
pub type ProgressSink = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("scan cancelled after {completed} of {total} ports")]
    Cancelled { completed: usize, total: usize },
}

/// Scan every port of `spec` and return the open ones in ascending order,
/// along with the wall-clock time from first dispatch to the last finished attempt.
///
/// - Limits in-flight TCP connects to `spec.max_concurrent()` using a `Semaphore`.
/// - Uses `tokio::time::timeout` to bound each connect.
/// - Any failure (refused, timed out, unresolvable) counts as not open.
pub async fn scan(spec: &ScanSpec, progress: Option<ProgressSink>) -> (Vec<PortRecord>, Duration) {
    let sweep = sweep(spec, progress, &CancellationToken::new()).await;
    (aggregate::open_records(&sweep.outcomes), sweep.elapsed)
}

/// Variant of [`scan`] that stops dispatching new attempts once `cancel` fires.
pub async fn scan_with_cancel(
    spec: &ScanSpec,
    progress: Option<ProgressSink>,
    cancel: CancellationToken,
) -> Result<(Vec<PortRecord>, Duration), ScanError> {
    let sweep = sweep(spec, progress, &cancel).await.finished(spec)?;
    Ok((aggregate::open_records(&sweep.outcomes), sweep.elapsed))
}

/// Scan and aggregate in one call.
pub async fn run_scan(spec: &ScanSpec, progress: Option<ProgressSink>) -> ScanSummary {
    let sweep = sweep(spec, progress, &CancellationToken::new()).await;
    aggregate::aggregate(spec, sweep.outcomes, sweep.elapsed)
}

pub async fn run_scan_with_cancel(
    spec: &ScanSpec,
    progress: Option<ProgressSink>,
    cancel: CancellationToken,
) -> Result<ScanSummary, ScanError> {
    let sweep = sweep(spec, progress, &cancel).await.finished(spec)?;
    Ok(aggregate::aggregate(spec, sweep.outcomes, sweep.elapsed))
}

struct Sweep {
    outcomes: Vec<PortOutcome>,
    elapsed: Duration,
    cancelled: bool,
    /// Highest number of connect attempts observed running at once.
    peak_in_flight: usize,
}

impl Sweep {
    fn finished(self, spec: &ScanSpec) -> Result<Self, ScanError> {
        if self.cancelled {
            return Err(ScanError::Cancelled {
                completed: self.outcomes.len(),
                total: spec.total_ports(),
            });
        }
        Ok(self)
    }
}

/// Counts finished attempts and forwards them to the sink under one lock.
struct Progress {
    total: usize,
    completed: Mutex<usize>,
    sink: Option<ProgressSink>,
}

/// Tracks attempts currently holding a permit.
#[derive(Default)]
struct InFlight {
    now: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.now.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.now.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Progress {
    async fn record(&self) {
        let mut done = self.completed.lock().await;
        *done += 1;
        if let Some(sink) = &self.sink {
            sink(*done, self.total);
        }
    }
}

async fn sweep(spec: &ScanSpec, progress: Option<ProgressSink>, cancel: &CancellationToken) -> Sweep {
    sweep_with(spec, progress, cancel, |host: Arc<str>, port, timeout| async move {
        try_connect(&host, port, timeout).await
    })
    .await
}

/// Drive `connect` over every port of `spec`, at most `max_concurrent` at a time.
async fn sweep_with<C, F>(
    spec: &ScanSpec,
    progress: Option<ProgressSink>,
    cancel: &CancellationToken,
    connect: C,
) -> Sweep
where
    C: Fn(Arc<str>, u16, Duration) -> F,
    F: Future<Output = bool> + Send + 'static,
{
    let total = spec.total_ports();
    let permits = spec
        .max_concurrent()
        .clamp(1, total.min(Semaphore::MAX_PERMITS));
    let sem = Arc::new(Semaphore::new(permits));
    let progress = Arc::new(Progress {
        total,
        completed: Mutex::new(0),
        sink: progress,
    });
    let in_flight = Arc::new(InFlight::default());
    let host: Arc<str> = Arc::from(spec.host());
    let timeout = spec.timeout();
    let mut set = JoinSet::new();
    let mut cancelled = false;

    info!(
        host = %host,
        start = spec.start_port(),
        end = spec.end_port(),
        concurrency = permits,
        timeout_ms = timeout.as_millis() as u64,
        "starting scan"
    );
    let started = Instant::now();

    for port in spec.ports() {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            permit = sem.clone().acquire_owned() => match permit {
                Ok(p) => p,
                // only happens if the semaphore is closed, which this function never does
                Err(_) => break,
            },
        };
        let attempt = connect(host.clone(), port, timeout);
        let progress = progress.clone();
        let in_flight = in_flight.clone();

        set.spawn(async move {
            in_flight.enter();
            let reachable = attempt.await;
            in_flight.leave();
            drop(permit);
            progress.record().await;
            PortOutcome { port, reachable }
        });
    }

    let mut outcomes = Vec::with_capacity(total);
    while let Some(res) = set.join_next().await {
        match res {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => warn!(error = %e, "connect task did not complete"),
        }
    }
    let elapsed = started.elapsed();

    if cancelled {
        warn!(
            host = %host,
            completed = outcomes.len(),
            total,
            "scan cancelled"
        );
    } else {
        info!(
            host = %host,
            open = outcomes.iter().filter(|o| o.reachable).count(),
            total,
            elapsed_ms = elapsed.as_millis() as u64,
            "scan complete"
        );
    }

    let sweep = Sweep {
        outcomes,
        elapsed,
        cancelled,
        peak_in_flight: in_flight.peak(),
    };
    debug!(peak_in_flight = sweep.peak_in_flight, limit = permits, "attempts in flight");
    sweep
}

/// One connect attempt. The stream is dropped as soon as the handshake succeeds.
async fn try_connect(host: &str, port: u16, timeout: Duration) -> bool {
    match time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => {
            debug!(port, "open");
            true
        }
        Ok(Err(e)) => {
            trace!(port, error = %e, "connect failed");
            false
        }
        Err(_) => {
            trace!(port, "connect timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn single_open_port_sequential() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let spec = ScanSpec::new("127.0.0.1", port, port, 1, Duration::from_millis(500)).unwrap();

        let (open, elapsed) = scan(&spec, None).await;
        assert_eq!(open, vec![PortRecord::open(port)]);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn pre_cancelled_sweep_dispatches_nothing() {
        let spec = ScanSpec::new("127.0.0.1", 1, 100, 10, Duration::from_millis(100)).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let sweep = sweep(&spec, None, &token).await;
        assert!(sweep.cancelled);
        assert!(sweep.outcomes.is_empty());
        assert_eq!(
            sweep.finished(&spec).err(),
            Some(ScanError::Cancelled {
                completed: 0,
                total: 100
            })
        );
    }

    #[tokio::test]
    async fn progress_counts_every_attempt_in_order() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink: ProgressSink = {
            let seen = seen.clone();
            Arc::new(move |done: usize, total: usize| seen.lock().unwrap().push((done, total)))
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let start = port.saturating_sub(5).max(1);
        let spec = ScanSpec::new("127.0.0.1", start, port, 4, Duration::from_millis(300)).unwrap();

        let summary = run_scan(&spec, Some(sink)).await;
        let seen = seen.lock().unwrap();
        let total = spec.total_ports();
        assert_eq!(seen.len(), total);
        assert!(seen.iter().enumerate().all(|(i, &(d, t))| d == i + 1 && t == total));
        assert!(summary.open_ports.iter().any(|r| r.port == port));
    }

    #[tokio::test]
    async fn refused_connection_is_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!try_connect("127.0.0.1", port, Duration::from_millis(500)).await);
    }

    type Attempt = Pin<Box<dyn Future<Output = bool> + Send>>;

    /// Stand-in connect that holds its slot for `hold` and reports only `open` as reachable.
    fn slow_connect(hold: Duration, open: u16) -> impl Fn(Arc<str>, u16, Duration) -> Attempt {
        move |_host: Arc<str>, port: u16, _timeout: Duration| -> Attempt {
            Box::pin(async move {
                time::sleep(hold).await;
                port == open
            })
        }
    }

    #[tokio::test]
    async fn in_flight_never_exceeds_max_concurrent() {
        for c in [1, 3] {
            let spec = ScanSpec::new("192.0.2.1", 1, 24, c, Duration::from_millis(50)).unwrap();
            let sweep = sweep_with(
                &spec,
                None,
                &CancellationToken::new(),
                slow_connect(Duration::from_millis(10), 7),
            )
            .await;

            assert_eq!(sweep.outcomes.len(), 24, "max_concurrent = {c}");
            assert!(sweep.peak_in_flight <= c, "peak {} over {c}", sweep.peak_in_flight);
            assert_eq!(sweep.peak_in_flight, c, "limit of {c} never reached");
        }
    }

    #[tokio::test]
    async fn sequential_sweep_runs_attempts_back_to_back() {
        let hold = Duration::from_millis(10);
        let spec = ScanSpec::new("192.0.2.1", 1, 24, 1, Duration::from_millis(50)).unwrap();
        let sweep = sweep_with(&spec, None, &CancellationToken::new(), slow_connect(hold, 7)).await;

        assert_eq!(sweep.peak_in_flight, 1);
        assert!(sweep.elapsed >= hold * 24, "elapsed {:?}", sweep.elapsed);
        let summary = aggregate::aggregate(&spec, sweep.outcomes, sweep.elapsed);
        assert_eq!(summary.open_ports, vec![PortRecord::open(7)]);
    }

    #[tokio::test]
    async fn real_connects_respect_the_limit() {
        // TEST-NET-1: every attempt is refused, unreachable or timed out
        for c in [1, 3] {
            let spec = ScanSpec::new("192.0.2.1", 1, 24, c, Duration::from_millis(20)).unwrap();
            let sweep = sweep(&spec, None, &CancellationToken::new()).await;
            assert_eq!(sweep.outcomes.len(), 24);
            assert!((1..=c).contains(&sweep.peak_in_flight), "peak {}", sweep.peak_in_flight);
        }
    }
}
