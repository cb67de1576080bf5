use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

use crate::{
    context::ConversationContext, directory::Directory, error::SyncError, reconciler::Reconciler,
    ClientEvent,
};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

struct RunningPoller {
    _stop: DropGuard,
    task: JoinHandle<()>,
}

/// Drives the periodic refresh of the active conversation and the roster.
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    directory: Arc<Directory>,
    interval: Duration,
    events: broadcast::Sender<ClientEvent>,
    running: Mutex<Option<RunningPoller>>,
}

impl Scheduler {
    pub fn new(
        reconciler: Arc<Reconciler>,
        directory: Arc<Directory>,
        interval: Duration,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            reconciler,
            directory,
            interval: interval.max(MIN_POLL_INTERVAL),
            events,
            running: Mutex::new(None),
        }
    }

    /// Replaces any running poller with one bound to `context`. The first cycle runs immediately.
    pub async fn start(&self, context: ConversationContext) {
        let mut running = self.running.lock().await;
        if running.take().is_some() {
            debug!("replacing running poller");
        }
        self.reconciler.set_context(context.clone()).await;
        *running = Some(self.spawn_poller(context, Instant::now()));
    }

    /// Polls the reconciler's current context without resetting it, first cycle one interval out.
    ///
    /// Used after a caller has already fetched the context itself.
    pub async fn resume(&self) -> bool {
        let mut running = self.running.lock().await;
        running.take();
        let Some(context) = self.reconciler.active_context().await else {
            return false;
        };
        *running = Some(self.spawn_poller(context, Instant::now() + self.interval));
        true
    }

    fn spawn_poller(&self, context: ConversationContext, first_tick: Instant) -> RunningPoller {
        let stop = CancellationToken::new();
        let stop_child = stop.child_token();
        let reconciler = Arc::clone(&self.reconciler);
        let directory = Arc::clone(&self.directory);
        let events = self.events.clone();
        let period = self.interval;
        let task = tokio::spawn(async move {
            info!(%context, interval_ms = period.as_millis() as u64, "poller started");
            let mut ticker = time::interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut failing = false;
            loop {
                tokio::select! {
                    biased;
                    _ = stop_child.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match poll_once(&reconciler, &directory).await {
                    Ok(()) => failing = false,
                    Err(err) if !failing => {
                        failing = true;
                        let _ = events.send(ClientEvent::Error(err.to_string()));
                    }
                    Err(_) => {}
                }
            }
            debug!(%context, "poller stopped");
        });

        RunningPoller {
            _stop: stop.drop_guard(),
            task,
        }
    }

    /// Cancels future cycles. A cycle already in flight finishes on its own.
    pub async fn stop(&self) {
        if self.running.lock().await.take().is_some() {
            debug!("poller stop requested");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|poller| !poller.task.is_finished())
    }
}

/// One polling cycle: the active timeline, then the roster. Failures keep the previous view.
///
/// Returns the timeline error, if any; the roster is refreshed either way.
pub async fn poll_once(reconciler: &Reconciler, directory: &Directory) -> Result<(), SyncError> {
    let timeline = match reconciler.active_context().await {
        Some(context) => reconciler.refresh(&context).await.map(|_| ()).map_err(|err| {
            debug!(%context, "timeline poll failed: {err}");
            err
        }),
        None => Ok(()),
    };
    if let Err(err) = directory.refresh().await {
        debug!("roster poll failed: {err}");
    }
    timeline
}

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod tests;
