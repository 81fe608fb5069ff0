//! The agent pipeline: poll task, report task, sender pool.

use std::sync::Arc;
use std::time::Duration;

use pulse_model::{HostCollector, Metric};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::AgentConfig;
use crate::transport::Transport;

/// Snapshot batch moving through the pipeline.
type Snapshot = Vec<Metric>;

/// Runs the collection loops against one transport.
pub struct Agent {
    transport: Arc<dyn Transport>,
    poll_interval: Duration,
    report_interval: Duration,
    rate_limit: u32,
    max_retry: u32,
}

impl Agent {
    pub fn new(config: &AgentConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            poll_interval: config.poll_interval,
            report_interval: config.report_interval,
            rate_limit: config.rate_limit.max(1),
            max_retry: config.max_retry,
        }
    }

    /// Run until `cancel` fires. Spawns one poll task, one report task and
    /// `rate_limit` senders, then waits for all of them.
    pub async fn run(self, cancel: CancellationToken) {
        // Poll → report: the poll side offers without blocking and drops
        // when the report side has not caught up.
        let (latest_tx, latest_rx) = mpsc::channel::<Snapshot>(1);
        // Report → senders: sending blocks until a worker is free, so at
        // most one batch is in flight per worker.
        let (work_tx, work_rx) = mpsc::channel::<Snapshot>(1);
        let work_rx = Arc::new(Mutex::new(work_rx));

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(run_poll(
            self.poll_interval,
            latest_tx,
            cancel.clone(),
        )));
        tasks.push(tokio::spawn(run_report(
            self.report_interval,
            latest_rx,
            work_tx,
            cancel.clone(),
        )));
        for worker in 0..self.rate_limit {
            tasks.push(tokio::spawn(run_sender(
                worker,
                Arc::clone(&self.transport),
                Arc::clone(&work_rx),
                self.max_retry,
                cancel.clone(),
            )));
        }

        info!(workers = self.rate_limit, "agent pipeline running");
        for task in tasks {
            let _ = task.await;
        }
        info!("agent pipeline stopped");
    }
}

/// Sample on every poll tick and offer the snapshot to the report task.
async fn run_poll(period: Duration, latest_tx: mpsc::Sender<Snapshot>, cancel: CancellationToken) {
    let mut collector = HostCollector::new();
    let mut dropped: u64 = 0;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("poll task stopping");
                return;
            }
            _ = ticker.tick() => {
                let mut snapshot = collector.collect();
                match collector.collect_os() {
                    Ok(os) => snapshot.extend(os),
                    Err(e) => {
                        warn!(error = %e, "os sampling failed, reporting runtime set only");
                    }
                }

                match latest_tx.try_send(snapshot) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        dropped += 1;
                        trace!(dropped, "report side busy, snapshot dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                }
            }
        }
    }
}

/// On every report tick, take the freshest pending snapshot and push it
/// into the work channel.
async fn run_report(
    period: Duration,
    mut latest_rx: mpsc::Receiver<Snapshot>,
    work_tx: mpsc::Sender<Snapshot>,
    cancel: CancellationToken,
) {
    let start = tokio::time::Instant::now() + period;
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("report task stopping");
                return;
            }
            _ = ticker.tick() => {
                // Drain to the newest snapshot; older ones are stale.
                let mut snapshot = None;
                while let Ok(s) = latest_rx.try_recv() {
                    snapshot = Some(s);
                }
                let Some(snapshot) = snapshot else {
                    debug!("nothing collected since last report");
                    continue;
                };

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = work_tx.send(snapshot) => {
                        if result.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Consume batches from the shared work channel and send each with retry.
async fn run_sender(
    worker: u32,
    transport: Arc<dyn Transport>,
    work_rx: Arc<Mutex<mpsc::Receiver<Snapshot>>>,
    max_retry: u32,
    cancel: CancellationToken,
) {
    loop {
        let batch = {
            let mut rx = work_rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(worker, "sender stopping");
                    return;
                }
                batch = rx.recv() => match batch {
                    Some(b) => b,
                    None => return,
                },
            }
        };

        send_with_retry(worker, &*transport, &batch, max_retry, &cancel).await;
    }
}

/// One delivery: initial attempt plus up to `max_retry` retries with an
/// arithmetic backoff (1s, 3s, 5s, …). The backoff sleep races the
/// cancellation token so shutdown is never delayed by a pending retry.
async fn send_with_retry(
    worker: u32,
    transport: &dyn Transport,
    batch: &[Metric],
    max_retry: u32,
    cancel: &CancellationToken,
) {
    match transport.send(batch).await {
        Ok(()) => {
            debug!(worker, count = batch.len(), "batch sent");
            return;
        }
        Err(e) => {
            error!(worker, error = %e, "send failed, will retry");
        }
    }

    for attempt in 0..max_retry {
        let delay = Duration::from_secs(u64::from(attempt) * 2 + 1);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        match transport.send(batch).await {
            Ok(()) => {
                debug!(worker, attempt = attempt + 1, "batch sent after retry");
                return;
            }
            Err(e) => {
                error!(worker, attempt = attempt + 1, error = %e, "retry failed");
            }
        }
    }

    error!(worker, retries = max_retry, "giving up on batch");
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
