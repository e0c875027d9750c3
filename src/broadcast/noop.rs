//! Absent broadcast fabric

use async_trait::async_trait;
use uuid::Uuid;

use super::traits::BroadcastFabric;
use super::types::{BroadcastEvent, FabricBackend, FabricError, GroupMember, PublishReport};

/// Stand-in used when no fabric is configured.
///
/// Every operation succeeds and delivers nothing, so connections still count
/// messages but receive no heartbeats or shutdown events.
pub struct NoopBroadcast;

impl NoopBroadcast {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoopBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BroadcastFabric for NoopBroadcast {
    fn backend_type(&self) -> FabricBackend {
        FabricBackend::Disabled
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn join(&self, group: &str, member: GroupMember) -> Result<(), FabricError> {
        tracing::debug!(group = %group, member_id = %member.id, "Broadcast fabric disabled, join ignored");
        Ok(())
    }

    async fn leave(&self, group: &str, member_id: Uuid) -> Result<(), FabricError> {
        tracing::debug!(group = %group, member_id = %member_id, "Broadcast fabric disabled, leave ignored");
        Ok(())
    }

    async fn publish(
        &self,
        group: &str,
        event: BroadcastEvent,
    ) -> Result<PublishReport, FabricError> {
        tracing::warn!(
            group = %group,
            kind = event.kind(),
            "Broadcast fabric disabled, event not delivered"
        );
        Ok(PublishReport::default())
    }

    fn member_count(&self, _group: &str) -> usize {
        0
    }
}
