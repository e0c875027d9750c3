//! In-process broadcast groups

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::time::timeout;
use uuid::Uuid;

use super::traits::BroadcastFabric;
use super::types::{BroadcastEvent, FabricBackend, FabricError, GroupMember, PublishReport};

/// Default timeout for a single member delivery
const DEFAULT_SEND_TIMEOUT_MS: u64 = 5000;

/// Broadcast groups held in process memory.
///
/// `publish` takes a snapshot of the group before sending, so membership
/// changes racing with a publish only affect later publishes.
pub struct LocalBroadcast {
    /// group name -> member id -> member
    groups: DashMap<String, HashMap<Uuid, GroupMember>>,
    send_timeout: Duration,
}

impl LocalBroadcast {
    pub fn new() -> Self {
        Self::with_send_timeout(Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS))
    }

    pub fn with_send_timeout(send_timeout: Duration) -> Self {
        Self {
            groups: DashMap::new(),
            send_timeout,
        }
    }

    /// Number of groups with at least one member
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    fn snapshot(&self, group: &str) -> Vec<GroupMember> {
        self.groups
            .get(group)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    fn prune_closed(&self, group: &str) {
        if let Some(mut members) = self.groups.get_mut(group) {
            members.retain(|_, member| !member.is_closed());
        }
        self.groups.remove_if(group, |_, members| members.is_empty());
    }
}

impl Default for LocalBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BroadcastFabric for LocalBroadcast {
    fn backend_type(&self) -> FabricBackend {
        FabricBackend::Memory
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn join(&self, group: &str, member: GroupMember) -> Result<(), FabricError> {
        let member_id = member.id;
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(member_id, member);

        tracing::debug!(group = %group, member_id = %member_id, "Joined broadcast group");
        Ok(())
    }

    async fn leave(&self, group: &str, member_id: Uuid) -> Result<(), FabricError> {
        if let Some(mut members) = self.groups.get_mut(group) {
            members.remove(&member_id);
        }
        self.groups.remove_if(group, |_, members| members.is_empty());

        tracing::debug!(group = %group, member_id = %member_id, "Left broadcast group");
        Ok(())
    }

    async fn publish(
        &self,
        group: &str,
        event: BroadcastEvent,
    ) -> Result<PublishReport, FabricError> {
        let members = self.snapshot(group);
        if members.is_empty() {
            return Ok(PublishReport::default());
        }

        let send_timeout = self.send_timeout;
        let results = join_all(members.iter().map(|member| {
            let event = event.clone();
            async move {
                match timeout(send_timeout, member.deliver(event)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(_)) => {
                        tracing::debug!(
                            member_id = %member.id,
                            "Member event channel closed"
                        );
                        false
                    }
                    Err(_) => {
                        tracing::debug!(
                            member_id = %member.id,
                            timeout_ms = send_timeout.as_millis() as u64,
                            "Event delivery timed out"
                        );
                        false
                    }
                }
            }
        }))
        .await;

        let delivered = results.iter().filter(|ok| **ok).count();
        let report = PublishReport {
            delivered,
            failed: results.len() - delivered,
        };

        if report.failed > 0 {
            self.prune_closed(group);
        }

        Ok(report)
    }

    fn member_count(&self, group: &str) -> usize {
        self.groups.get(group).map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP: &str = "chat_all";

    #[tokio::test]
    async fn test_publish_reaches_all_members() {
        let fabric = LocalBroadcast::new();
        let (a, mut rx_a) = GroupMember::channel(Uuid::new_v4(), 4);
        let (b, mut rx_b) = GroupMember::channel(Uuid::new_v4(), 4);
        fabric.join(GROUP, a).await.unwrap();
        fabric.join(GROUP, b).await.unwrap();

        let report = fabric.publish(GROUP, BroadcastEvent::Shutdown).await.unwrap();

        assert_eq!(report, PublishReport { delivered: 2, failed: 0 });
        assert_eq!(rx_a.recv().await, Some(BroadcastEvent::Shutdown));
        assert_eq!(rx_b.recv().await, Some(BroadcastEvent::Shutdown));
    }

    #[tokio::test]
    async fn test_late_joiner_misses_earlier_event() {
        let fabric = LocalBroadcast::new();
        fabric.publish(GROUP, BroadcastEvent::heartbeat()).await.unwrap();

        let (member, mut rx) = GroupMember::channel(Uuid::new_v4(), 4);
        fabric.join(GROUP, member).await.unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_left_member_receives_nothing() {
        let fabric = LocalBroadcast::new();
        let id = Uuid::new_v4();
        let (member, mut rx) = GroupMember::channel(id, 4);
        fabric.join(GROUP, member).await.unwrap();
        fabric.leave(GROUP, id).await.unwrap();

        let report = fabric.publish(GROUP, BroadcastEvent::Shutdown).await.unwrap();

        assert_eq!(report.delivered, 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(fabric.member_count(GROUP), 0);
        assert_eq!(fabric.group_count(), 0);
    }

    #[tokio::test]
    async fn test_groups_are_isolated() {
        let fabric = LocalBroadcast::new();
        let (member, mut rx) = GroupMember::channel(Uuid::new_v4(), 4);
        fabric.join("other", member).await.unwrap();

        fabric.publish(GROUP, BroadcastEvent::Shutdown).await.unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_member_is_pruned() {
        let fabric = LocalBroadcast::new();
        let (member, rx) = GroupMember::channel(Uuid::new_v4(), 4);
        fabric.join(GROUP, member).await.unwrap();
        drop(rx);

        let report = fabric.publish(GROUP, BroadcastEvent::Shutdown).await.unwrap();

        assert_eq!(report, PublishReport { delivered: 0, failed: 1 });
        assert_eq!(fabric.member_count(GROUP), 0);
    }

    #[tokio::test]
    async fn test_stalled_member_times_out() {
        let fabric = LocalBroadcast::with_send_timeout(Duration::from_millis(20));
        let (stalled, _rx_stalled) = GroupMember::channel(Uuid::new_v4(), 1);
        let (healthy, mut rx_healthy) = GroupMember::channel(Uuid::new_v4(), 4);
        fabric.join(GROUP, stalled).await.unwrap();
        fabric.join(GROUP, healthy).await.unwrap();

        // Fill the stalled member's only slot
        fabric.publish(GROUP, BroadcastEvent::heartbeat()).await.unwrap();
        let report = fabric.publish(GROUP, BroadcastEvent::Shutdown).await.unwrap();

        assert_eq!(report, PublishReport { delivered: 1, failed: 1 });
        assert!(matches!(rx_healthy.recv().await, Some(BroadcastEvent::Heartbeat { .. })));
        assert_eq!(rx_healthy.recv().await, Some(BroadcastEvent::Shutdown));
        // Still open, so it stays a member
        assert_eq!(fabric.member_count(GROUP), 2);
    }
}
