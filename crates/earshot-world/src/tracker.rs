//! The live session → position map.

use dashmap::DashMap;
use earshot_protocol::SessionId;

use crate::Position;

/// Concurrent map of current positions.
///
/// Each write replaces the whole position for its key (last write wins),
/// so a reader never sees half an update.
#[derive(Debug, Default)]
pub struct PositionTracker {
    positions: DashMap<SessionId, Position>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `id`'s position.
    pub fn upsert(&self, id: SessionId, position: Position) {
        tracing::trace!(%id, x = position.x, y = position.y, z = position.z, world = %position.world_id, "position updated");
        self.positions.insert(id, position);
    }

    /// Forgets `id`'s position. Returns the last known one.
    pub fn remove(&self, id: SessionId) -> Option<Position> {
        self.positions.remove(&id).map(|(_, p)| p)
    }

    pub fn get(&self, id: SessionId) -> Option<Position> {
        self.positions.get(&id).map(|p| p.clone())
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.positions.contains_key(&id)
    }

    /// Copies out every position. Later updates don't affect the result.
    pub fn snapshot(&self) -> Vec<(SessionId, Position)> {
        self.positions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Forgets everything.
    pub fn clear(&self) {
        self.positions.clear();
    }
}
