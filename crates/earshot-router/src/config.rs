use serde::{Deserialize, Serialize};

/// How recipients of a frame are chosen. One mode per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Everyone in the same world within `proximity_distance`.
    #[default]
    Proximity,
    /// The sender's group peers, wherever they are.
    Group,
}

/// What happens to audio when a position is unknown (proximity mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoPositionPolicy {
    /// A sender without a position is dropped; a recipient without one
    /// is skipped.
    #[default]
    Drop,
    /// Degraded mode for integrations without a position feed: an
    /// unknown position on either side counts as in range.
    Broadcast,
}

/// Router settings.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum distance at which a recipient still hears the sender.
    /// Inclusive.
    pub proximity_distance: f64,
    /// Frames the bridge queue holds before new ones are dropped.
    pub queue_capacity: usize,
    pub mode: RoutingMode,
    pub no_position: NoPositionPolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            proximity_distance: 30.0,
            queue_capacity: 1000,
            mode: RoutingMode::default(),
            no_position: NoPositionPolicy::default(),
        }
    }
}
