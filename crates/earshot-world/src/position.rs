use tokio::time::Instant;

/// A participant's place in the game world.
///
/// `world_id` partitions space: positions in different worlds are never
/// near each other, whatever their coordinates say.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub world_id: String,
    /// Orientation, for clients that render directional audio.
    pub yaw: Option<f32>,
    pub pitch: Option<f32>,
    pub last_updated: Instant,
}

impl Position {
    /// A position stamped with the current time, no orientation.
    pub fn new(x: f64, y: f64, z: f64, world_id: impl Into<String>) -> Self {
        Self {
            x,
            y,
            z,
            world_id: world_id.into(),
            yaw: None,
            pitch: None,
            last_updated: Instant::now(),
        }
    }

    pub fn with_orientation(mut self, yaw: Option<f32>, pitch: Option<f32>) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }

    /// Euclidean distance, or `f64::INFINITY` across worlds.
    pub fn distance_to(&self, other: &Position) -> f64 {
        if self.world_id != other.world_id {
            return f64::INFINITY;
        }
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// `true` when `other` is in the same world and at most `range` away.
    /// The boundary counts.
    pub fn within_range(&self, other: &Position, range: f64) -> bool {
        self.world_id == other.world_id && self.distance_to(other) <= range
    }
}
