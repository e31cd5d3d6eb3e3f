use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::app::{Result, RssqError};
use crate::clock::Clock;
use crate::config::duration::format_duration;
use crate::domain::StatusEvent;
use crate::scheduler::{PassReport, RefreshTarget, Scheduler};

/// Message type for the background service
#[derive(Debug)]
pub enum ServiceMessage {
    /// Run a forced pass and report back
    Refresh {
        target: RefreshTarget,
        reply: oneshot::Sender<Result<PassReport>>,
    },
    /// Stop the loop
    Shutdown,
}

/// Handle to talk to a running [`SchedulerService`]
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<ServiceMessage>,
    scheduler: Arc<Scheduler>,
}

impl SchedulerHandle {
    /// Runs a forced pass and waits for its report.
    pub async fn refresh(&self, target: RefreshTarget) -> Result<PassReport> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ServiceMessage::Refresh { target, reply })
            .await
            .map_err(|_| RssqError::Other("scheduler service is not running".into()))?;

        rx.await
            .map_err(|_| RssqError::Other("scheduler service stopped before replying".into()))?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.scheduler.subscribe()
    }

    /// Cancels the running pass, if any, and stops the loop.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown();
        let _ = self.tx.send(ServiceMessage::Shutdown).await;
    }
}

/// Periodically runs the scheduler and serves forced refreshes.
pub struct SchedulerService {
    scheduler: Arc<Scheduler>,
    clock: Arc<dyn Clock>,
    check_interval: Duration,
    rx: mpsc::Receiver<ServiceMessage>,
}

impl SchedulerService {
    pub fn new(scheduler: Arc<Scheduler>, clock: Arc<dyn Clock>) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::channel(16);
        let handle = SchedulerHandle {
            tx,
            scheduler: Arc::clone(&scheduler),
        };
        let service = Self {
            check_interval: scheduler.config().check_interval,
            scheduler,
            clock,
            rx,
        };
        (service, handle)
    }

    /// Run the service loop. The first pass starts right away.
    pub async fn run(mut self) {
        info!(
            "Scheduler service started (check interval: {})",
            format_duration(self.check_interval)
        );

        let mut timer = interval(self.check_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if self.scheduler.is_shut_down() {
                        break;
                    }
                    let report = self.scheduler.run(self.clock.now()).await;
                    debug!("Scheduled pass attempted {} feeds", report.attempted());
                }
                message = self.rx.recv() => match message {
                    Some(ServiceMessage::Refresh { target, reply }) => {
                        let result = self.scheduler.force_refresh(target).await;
                        if let Err(e) = &result {
                            warn!("Forced refresh failed: {}", e);
                        }
                        let _ = reply.send(result);
                    }
                    Some(ServiceMessage::Shutdown) | None => break,
                },
            }
        }

        info!("Scheduler service stopped");
    }
}

/// Spawn the service as a tokio task
pub fn spawn(scheduler: Arc<Scheduler>, clock: Arc<dyn Clock>) -> (SchedulerHandle, JoinHandle<()>) {
    let (service, handle) = SchedulerService::new(scheduler, clock);
    let task = tokio::spawn(service.run());
    (handle, task)
}
