//! Bounded background dispatch.
//!
//! The request path hands finished transactions to a [`TelemetryDispatcher`]
//! and returns immediately. A single worker, owned by the
//! [`DispatchSupervisor`], completes each record with its response and ships
//! it through a [`CollectorTransport`], running at most `max_in_flight`
//! deliveries at once.
//!
//! ```text
//! request path ──try_send──▶ [bounded queue] ──▶ worker ──▶ JoinSet of deliveries
//!                  │                                          (semaphore-limited)
//!                  └─ full: drop + warn
//! ```
//!
//! [`DispatchSupervisor::shutdown`] closes intake, drains everything already
//! queued and waits for in-flight deliveries, bounded by a grace period.

use crate::error::{DispatchError, TransportError};
use crate::transport::CollectorTransport;
use apitap_core::{attach_response_telemetry, BufferedResponse, TapConfig, TelemetryRecord};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Queue sizing.
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    /// Jobs that may wait for the worker before new ones are dropped.
    pub queue_capacity: usize,
    /// Concurrent deliveries.
    pub max_in_flight: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_in_flight: 16,
        }
    }
}

/// A transaction whose response still needs to be captured and shipped.
#[derive(Debug)]
pub struct PendingTelemetry {
    pub record: TelemetryRecord,
    pub response: BufferedResponse,
}

impl PendingTelemetry {
    pub fn new(record: TelemetryRecord, response: BufferedResponse) -> Self {
        Self { record, response }
    }
}

/// Counters reported at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Accepted into the queue.
    pub submitted: u64,
    /// Delivered with a 2xx answer.
    pub sent: u64,
    /// Response capture or delivery failed.
    pub failed: u64,
    /// Rejected because the queue was full or closed.
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable handle used on the request path.
#[derive(Clone, Debug)]
pub struct TelemetryDispatcher {
    sender: mpsc::Sender<PendingTelemetry>,
    counters: Arc<Counters>,
}

impl TelemetryDispatcher {
    /// Start the worker and return the handle together with its supervisor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        transport: Arc<dyn CollectorTransport>,
        config: Arc<TapConfig>,
        dispatch: DispatchConfig,
    ) -> (Self, DispatchSupervisor) {
        let (sender, receiver) = mpsc::channel(dispatch.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            receiver,
            transport,
            config,
            permits: Arc::new(Semaphore::new(dispatch.max_in_flight.max(1))),
            counters: counters.clone(),
        };
        let handle = tokio::spawn(worker.run(shutdown_rx));

        (
            Self {
                sender,
                counters: counters.clone(),
            },
            DispatchSupervisor {
                worker: handle,
                shutdown_tx: Some(shutdown_tx),
                counters,
            },
        )
    }

    /// Queue a transaction without waiting.
    ///
    /// A full or closed queue drops the job; the caller's request is never
    /// held up by telemetry.
    pub fn submit(&self, job: PendingTelemetry) -> Result<(), DispatchError> {
        match self.sender.try_send(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(request_id = %job.record.request_id, "telemetry queue full, dropping record");
                Err(DispatchError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(request_id = %job.record.request_id, "telemetry dispatcher closed, dropping record");
                Err(DispatchError::Closed)
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }
}

/// Owns the worker task. Dropping it without calling
/// [`shutdown`](Self::shutdown) also closes intake, but nothing waits for
/// the queued deliveries to finish.
#[derive(Debug)]
pub struct DispatchSupervisor {
    worker: JoinHandle<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    counters: Arc<Counters>,
}

impl DispatchSupervisor {
    /// Stop intake, drain queued work and wait for in-flight deliveries.
    ///
    /// Anything still running after `grace` is aborted.
    pub async fn shutdown(mut self, grace: Duration) -> DispatchStats {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        match tokio::time::timeout(grace, &mut self.worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "telemetry worker panicked"),
            Err(_) => {
                warn!(grace_secs = grace.as_secs(), "telemetry drain timed out, aborting deliveries");
                self.worker.abort();
            }
        }

        let stats = self.counters.snapshot();
        info!(
            submitted = stats.submitted,
            sent = stats.sent,
            failed = stats.failed,
            dropped = stats.dropped,
            "telemetry dispatcher stopped"
        );
        stats
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }
}

struct Worker {
    receiver: mpsc::Receiver<PendingTelemetry>,
    transport: Arc<dyn CollectorTransport>,
    config: Arc<TapConfig>,
    permits: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl Worker {
    async fn run(mut self, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut in_flight = JoinSet::new();
        let mut closing = false;

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown_rx, if !closing => {
                    // buffered jobs are still delivered by recv() below
                    self.receiver.close();
                    closing = true;
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                job = self.receiver.recv() => {
                    let Some(job) = job else { break };
                    let Ok(permit) = self.permits.clone().acquire_owned().await else {
                        break;
                    };
                    let transport = self.transport.clone();
                    let config = self.config.clone();
                    let counters = self.counters.clone();
                    in_flight.spawn(async move {
                        deliver(job, transport.as_ref(), &config, &counters).await;
                        drop(permit);
                    });
                }
            }
        }

        while in_flight.join_next().await.is_some() {}
        debug!("telemetry worker drained");
    }
}

async fn deliver(
    job: PendingTelemetry,
    transport: &dyn CollectorTransport,
    config: &TapConfig,
    counters: &Counters,
) {
    let PendingTelemetry {
        mut record,
        response,
    } = job;

    if let Err(e) = attach_response_telemetry(&mut record, &response, config).await {
        counters.failed.fetch_add(1, Ordering::Relaxed);
        warn!(request_id = %record.request_id, error = %e, "response capture failed, skipping telemetry");
        return;
    }
    if !record.is_complete() {
        counters.failed.fetch_add(1, Ordering::Relaxed);
        return;
    }

    match transport.send(&record).await {
        Ok(()) => {
            counters.sent.fetch_add(1, Ordering::Relaxed);
        }
        Err(TransportError::Status { status, body }) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(request_id = %record.request_id, status, body = %body, "telemetry POST failed");
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(request_id = %record.request_id, error = %e, "exception while sending telemetry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apitap_core::build_request_telemetry;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        delivered: Mutex<Vec<TelemetryRecord>>,
        fail_with: Option<u16>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl CollectorTransport for RecordingTransport {
        async fn send(&self, record: &TelemetryRecord) -> Result<(), TransportError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(status) = self.fail_with {
                return Err(TransportError::Status {
                    status,
                    body: "nope".to_string(),
                });
            }
            self.delivered.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    async fn job(id: &str) -> PendingTelemetry {
        let request = http::Request::builder()
            .uri("https://api.example.com/api/v1/items")
            .header("x-request-id", id)
            .body(Bytes::new())
            .unwrap();
        let record = build_request_telemetry(&request, &TapConfig::new())
            .await
            .unwrap();
        let response = http::Response::builder()
            .status(200)
            .header("content-type", "application/json")
            .body(Bytes::from_static(b"[]"))
            .unwrap();
        PendingTelemetry::new(record, response)
    }

    #[tokio::test]
    async fn test_delivers_completed_records() {
        let transport = Arc::new(RecordingTransport::default());
        let (dispatcher, supervisor) = TelemetryDispatcher::spawn(
            transport.clone(),
            Arc::new(TapConfig::new()),
            DispatchConfig::default(),
        );

        dispatcher.submit(job("a").await).unwrap();
        dispatcher.submit(job("b").await).unwrap();

        let stats = supervisor.shutdown(Duration::from_secs(5)).await;
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.failed, 0);

        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 2);
        assert!(delivered.iter().all(|r| r.is_complete()));
        assert_eq!(
            delivered[0].response.as_ref().unwrap().status_code,
            "200"
        );
    }

    #[tokio::test]
    async fn test_failed_delivery_is_counted_not_retried() {
        let transport = Arc::new(RecordingTransport {
            fail_with: Some(500),
            ..Default::default()
        });
        let (dispatcher, supervisor) = TelemetryDispatcher::spawn(
            transport,
            Arc::new(TapConfig::new()),
            DispatchConfig::default(),
        );

        dispatcher.submit(job("x").await).unwrap();

        let stats = supervisor.shutdown(Duration::from_secs(5)).await;
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let transport = Arc::new(RecordingTransport {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let (dispatcher, supervisor) = TelemetryDispatcher::spawn(
            transport,
            Arc::new(TapConfig::new()),
            DispatchConfig {
                queue_capacity: 1,
                max_in_flight: 1,
            },
        );

        let mut results = Vec::new();
        for i in 0..8 {
            results.push(dispatcher.submit(job(&i.to_string()).await));
        }
        assert!(results.contains(&Err(DispatchError::QueueFull)));

        let stats = supervisor.shutdown(Duration::from_secs(10)).await;
        assert!(stats.dropped >= 1);
        assert_eq!(stats.submitted + stats.dropped, 8);
        assert_eq!(stats.sent, stats.submitted);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_closed() {
        let transport = Arc::new(RecordingTransport::default());
        let (dispatcher, supervisor) = TelemetryDispatcher::spawn(
            transport,
            Arc::new(TapConfig::new()),
            DispatchConfig::default(),
        );

        supervisor.shutdown(Duration::from_secs(1)).await;
        assert_eq!(dispatcher.submit(job("late").await), Err(DispatchError::Closed));
        assert_eq!(dispatcher.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_grace_period_aborts_slow_deliveries() {
        let transport = Arc::new(RecordingTransport {
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let (dispatcher, supervisor) = TelemetryDispatcher::spawn(
            transport.clone(),
            Arc::new(TapConfig::new()),
            DispatchConfig::default(),
        );

        dispatcher.submit(job("slow").await).unwrap();
        let stats = supervisor.shutdown(Duration::from_millis(100)).await;

        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.sent, 0);
        assert!(transport.delivered.lock().unwrap().is_empty());
    }
}
