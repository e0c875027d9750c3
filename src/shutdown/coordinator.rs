use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::broadcast::{BroadcastEvent, BroadcastFabric, PublishReport};
use crate::metrics::{BroadcastMetrics, ErrorKind, ErrorMetrics};

/// Publishes the shutdown event to the default group, once.
///
/// Draining is left to each connection; `trigger` returns as soon as the
/// event has been handed to the fabric.
pub struct ShutdownCoordinator {
    fabric: Arc<dyn BroadcastFabric>,
    group: String,
    fired: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(fabric: Arc<dyn BroadcastFabric>, group: impl Into<String>) -> Self {
        Self {
            fabric,
            group: group.into(),
            fired: AtomicBool::new(false),
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Returns the publish report, or `None` when already triggered or the
    /// publish failed.
    pub async fn trigger(&self) -> Option<PublishReport> {
        if self.fired.swap(true, Ordering::SeqCst) {
            tracing::warn!("Shutdown already triggered, ignoring");
            return None;
        }

        tracing::info!(
            group = %self.group,
            members = self.fabric.member_count(&self.group),
            "Broadcasting shutdown to connections"
        );

        match self.fabric.publish(&self.group, BroadcastEvent::Shutdown).await {
            Ok(report) => {
                BroadcastMetrics::record_published("shutdown");
                tracing::info!(
                    delivered = report.delivered,
                    failed = report.failed,
                    "Shutdown broadcast sent"
                );
                Some(report)
            }
            Err(e) => {
                ErrorMetrics::record(ErrorKind::Shutdown);
                tracing::error!(group = %self.group, error = %e, "Failed to broadcast shutdown");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{GroupMember, LocalBroadcast, NoopBroadcast};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_trigger_publishes_once() {
        let fabric = Arc::new(LocalBroadcast::new());
        let (member, mut rx) = GroupMember::channel(Uuid::new_v4(), 4);
        fabric.join("chat_all", member).await.unwrap();
        let coordinator = ShutdownCoordinator::new(fabric, "chat_all");

        let report = coordinator.trigger().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(coordinator.trigger().await.is_none());

        assert_eq!(rx.try_recv().unwrap(), BroadcastEvent::Shutdown);
        assert!(rx.try_recv().is_err());
        assert!(coordinator.has_fired());
    }

    #[tokio::test]
    async fn test_trigger_without_fabric_does_not_fail() {
        let coordinator = ShutdownCoordinator::new(Arc::new(NoopBroadcast::new()), "chat_all");

        let report = coordinator.trigger().await.unwrap();

        assert_eq!(report, PublishReport::default());
    }
}
