//! Periodic sweep that evicts users whose connection died silently.
//!
//! Disconnect events are the normal way users leave, but a transport can
//! lose a socket without ever reporting it. Every period the reconciler
//! checks each joined user against the transport and retires the ones
//! that are gone, with the same broadcasts a normal disconnect produces.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::lifecycle::{RetireReason, SessionController};
use crate::registry::UserRecord;

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

pub struct Reconciler {
    controller: Arc<SessionController>,
    period: Duration,
}

impl Reconciler {
    pub fn new(controller: Arc<SessionController>, period: Duration) -> Self {
        Self { controller, period }
    }

    /// One pass: evict every joined user whose connection is gone.
    /// Returns the evicted users.
    pub fn sweep(&self) -> Vec<UserRecord> {
        let mut evicted = Vec::new();
        for conn in self.controller.registry().connection_ids() {
            if self.controller.is_live(conn) {
                continue;
            }
            // A disconnect may have raced us here; retire is a no-op then.
            if let Some(user) = self.controller.retire(conn, RetireReason::Evicted) {
                evicted.push(user);
            }
        }
        let pruned = self.controller.prune_sessions();

        if !evicted.is_empty() || pruned > 0 {
            tracing::info!(
                evicted = evicted.len(),
                pruned,
                online = self.controller.registry().len(),
                "Reconciler sweep"
            );
        }
        evicted
    }

    /// Run [`sweep`](Self::sweep) every period until the handle is shut
    /// down or dropped. The first sweep happens one full period after start.
    pub fn spawn(self) -> ReconcilerHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await; // skip first immediate tick
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.sweep();
                    }
                    _ = &mut stop_rx => break,
                }
            }
            tracing::debug!("Reconciler stopped");
        });
        ReconcilerHandle {
            stop: Some(stop_tx),
            task,
        }
    }
}

/// Owns the background sweep task.
pub struct ReconcilerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Stop the sweep loop and wait for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!("Reconciler task ended abnormally: {e}");
        }
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}
