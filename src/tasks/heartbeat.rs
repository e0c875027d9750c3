use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::broadcast::{BroadcastEvent, BroadcastFabric, FabricError, PublishReport};
use crate::metrics::{BroadcastMetrics, ErrorKind, ErrorMetrics, HeartbeatMetrics};

/// Pause after a failed publish before the next attempt
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Default bound on waiting for the loop to finish in `stop`
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Background loop publishing a heartbeat to the default group
pub struct HeartbeatTask {
    fabric: Arc<dyn BroadcastFabric>,
    group: String,
    interval: Duration,
    retry_delay: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        fabric: Arc<dyn BroadcastFabric>,
        group: impl Into<String>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            fabric,
            group: group.into(),
            interval,
            retry_delay: RETRY_DELAY,
            shutdown,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Publish, sleep, repeat until told to stop
    pub async fn run(mut self) {
        tracing::info!(
            group = %self.group,
            interval_ms = self.interval.as_millis() as u64,
            "Heartbeat task started"
        );

        loop {
            let pause = match self.beat().await {
                Ok(_) => self.interval,
                Err(_) => self.retry_delay,
            };

            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    async fn beat(&self) -> Result<PublishReport, FabricError> {
        let start = Instant::now();
        let event = BroadcastEvent::heartbeat();
        let ts = match &event {
            BroadcastEvent::Heartbeat { message } => message.ts.clone(),
            BroadcastEvent::Shutdown => String::new(),
        };

        match self.fabric.publish(&self.group, event).await {
            Ok(report) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                HeartbeatMetrics::record_duration_ms(elapsed_ms);
                BroadcastMetrics::record_published("heartbeat");

                tracing::debug!(
                    ts = %ts,
                    delivered = report.delivered,
                    failed = report.failed,
                    elapsed_ms,
                    "Heartbeat sent"
                );

                if elapsed_ms > self.interval.as_millis() as u64 / 2 {
                    tracing::warn!(
                        elapsed_ms,
                        interval_ms = self.interval.as_millis() as u64,
                        "Heartbeat round took more than 50% of interval"
                    );
                }
                Ok(report)
            }
            Err(e) => {
                ErrorMetrics::record(ErrorKind::Fabric);
                tracing::error!(
                    group = %self.group,
                    error = %e,
                    retry_in_ms = self.retry_delay.as_millis() as u64,
                    "Heartbeat publish failed"
                );
                Err(e)
            }
        }
    }
}

/// Owns the single heartbeat loop of the process
pub struct HeartbeatService {
    fabric: Arc<dyn BroadcastFabric>,
    group: String,
    interval: Duration,
    retry_delay: Duration,
    started: AtomicBool,
    stop_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatService {
    pub fn new(fabric: Arc<dyn BroadcastFabric>, group: impl Into<String>, interval: Duration) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        Self {
            fabric,
            group: group.into(),
            interval,
            retry_delay: RETRY_DELAY,
            started: AtomicBool::new(false),
            stop_tx,
            handle: Mutex::new(None),
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Spawn the loop. Returns false if it was already started.
    pub async fn start(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Heartbeat already started, ignoring");
            return false;
        }

        let task = HeartbeatTask::new(
            self.fabric.clone(),
            self.group.clone(),
            self.interval,
            self.stop_tx.subscribe(),
        )
        .with_retry_delay(self.retry_delay);

        *self.handle.lock().await = Some(tokio::spawn(task.run()));
        true
    }

    pub async fn is_running(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Signal the loop and wait up to `timeout` for it to finish.
    ///
    /// Returns whether it finished in time; a loop that never started counts
    /// as finished.
    pub async fn stop(&self, timeout: Duration) -> bool {
        let Some(mut handle) = self.handle.lock().await.take() else {
            return true;
        };

        let _ = self.stop_tx.send(());

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Heartbeat task did not stop in time, aborting"
                );
                handle.abort();
                false
            }
        }
    }
}
