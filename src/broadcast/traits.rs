//! Broadcast fabric trait definition

use async_trait::async_trait;
use uuid::Uuid;

use super::types::{BroadcastEvent, FabricBackend, FabricError, GroupMember, PublishReport};

/// Named-group publish/subscribe.
///
/// `publish` delivers at least once to every handle that is a member at the
/// moment of publication. A handle that joins later never sees that event,
/// and a handle whose `leave` has returned sees nothing published afterwards.
/// All operations are safe to call concurrently.
#[async_trait]
pub trait BroadcastFabric: Send + Sync {
    /// Get the backend type
    fn backend_type(&self) -> FabricBackend;

    /// Whether fan-out is actually performed
    fn is_available(&self) -> bool;

    /// Whether the backing transport is currently reachable
    fn is_connected(&self) -> bool {
        self.is_available()
    }

    /// Add a member to a group
    async fn join(&self, group: &str, member: GroupMember) -> Result<(), FabricError>;

    /// Remove a member from a group
    async fn leave(&self, group: &str, member_id: Uuid) -> Result<(), FabricError>;

    /// Fan an event out to the current members of a group
    async fn publish(
        &self,
        group: &str,
        event: BroadcastEvent,
    ) -> Result<PublishReport, FabricError>;

    /// Members of a group on this node
    fn member_count(&self, group: &str) -> usize;
}
