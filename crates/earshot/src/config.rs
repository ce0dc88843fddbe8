//! Server configuration.
//!
//! Everything has a default, so an empty TOML file (or no file) is a
//! working config:
//!
//! ```toml
//! voice_port = 24454
//! signaling_port = 24455
//! proximity_distance = 30.0
//! routing_mode = "proximity"     # or "group"
//! no_position_policy = "drop"    # or "broadcast"
//!
//! [packet_kinds]
//! authenticate = 1
//! authenticate_ack = 2
//! audio = 0
//! ```

use std::path::Path;
use std::time::Duration;

use earshot_group::GroupConfig;
use earshot_protocol::PacketKinds;
use earshot_router::{NoPositionPolicy, RouterConfig, RoutingMode};
use earshot_session::SessionConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::EarshotError;

/// Settings for one voice server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Interface both listeners bind to.
    pub bind_host: String,
    /// UDP port for native clients.
    pub voice_port: u16,
    /// WebSocket port for browser signaling.
    pub signaling_port: u16,
    /// Hearing range in world units. Clamped to `[1, max_voice_distance]`.
    pub proximity_distance: f64,
    pub max_voice_distance: f64,
    /// How long a native client waits for its handshake ack. Announced
    /// here so client and server configs can share one file.
    pub auth_timeout_ms: u64,
    pub resume_window_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Longest group name. Clamped to `[3, 32]`.
    pub group_name_max_len: usize,
    /// Routing queue size; frames beyond it are dropped.
    pub routing_queue_capacity: usize,
    /// Outbound frames buffered per browser connection.
    pub browser_queue_capacity: usize,
    pub routing_mode: RoutingMode,
    pub no_position_policy: NoPositionPolicy,
    /// Silence after which a native session is dropped.
    pub native_idle_timeout_ms: u64,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub packet_kinds: PacketKinds,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            voice_port: 24454,
            signaling_port: 24455,
            proximity_distance: 30.0,
            max_voice_distance: 100.0,
            auth_timeout_ms: 5_000,
            resume_window_ms: 30_000,
            heartbeat_interval_ms: 5_000,
            group_name_max_len: 32,
            routing_queue_capacity: 1_000,
            browser_queue_capacity: 256,
            routing_mode: RoutingMode::default(),
            no_position_policy: NoPositionPolicy::default(),
            native_idle_timeout_ms: 30_000,
            log_filter: "info".to_string(),
            packet_kinds: PacketKinds::default(),
        }
    }
}

impl VoiceConfig {
    /// Smallest hearing range, in world units.
    pub const MIN_PROXIMITY_DISTANCE: f64 = 1.0;

    /// Reads and validates a TOML file.
    ///
    /// # Errors
    /// [`EarshotError::Io`] if the file can't be read,
    /// [`EarshotError::Config`] if it doesn't parse or packet kinds collide.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EarshotError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, EarshotError> {
        let config: Self = toml::from_str(text).map_err(|e| EarshotError::Config(e.to_string()))?;
        config.checked()
    }

    /// [`validated`](Self::validated), plus the checks that can't be
    /// fixed by clamping.
    ///
    /// # Errors
    /// [`EarshotError::Config`] when two packet kinds share a byte.
    pub fn checked(self) -> Result<Self, EarshotError> {
        self.packet_kinds
            .validate()
            .map_err(|e| EarshotError::Config(e.to_string()))?;
        Ok(self.validated())
    }

    /// Clamps out-of-range values, warning about each one.
    pub fn validated(mut self) -> Self {
        if !self.max_voice_distance.is_finite() || self.max_voice_distance < Self::MIN_PROXIMITY_DISTANCE {
            warn!(
                max = self.max_voice_distance,
                "max_voice_distance not a finite distance above minimum, using default"
            );
            self.max_voice_distance = Self::default().max_voice_distance;
        }
        let clamped = if self.proximity_distance.is_nan() {
            Self::default().proximity_distance.min(self.max_voice_distance)
        } else {
            self.proximity_distance
                .clamp(Self::MIN_PROXIMITY_DISTANCE, self.max_voice_distance)
        };
        if clamped != self.proximity_distance {
            warn!(
                distance = self.proximity_distance,
                clamped, "proximity_distance out of range, clamping"
            );
            self.proximity_distance = clamped;
        }

        let max_len = self.group_name_max_len.clamp(3, 32);
        if max_len != self.group_name_max_len {
            warn!(
                len = self.group_name_max_len,
                max_len, "group_name_max_len out of range, clamping"
            );
            self.group_name_max_len = max_len;
        }

        if self.routing_queue_capacity == 0 {
            warn!("routing_queue_capacity is zero, using 1");
            self.routing_queue_capacity = 1;
        }
        if self.browser_queue_capacity == 0 {
            warn!("browser_queue_capacity is zero, using 1");
            self.browser_queue_capacity = 1;
        }
        if self.heartbeat_interval_ms == 0 {
            warn!("heartbeat_interval_ms is zero, using default");
            self.heartbeat_interval_ms = Self::default().heartbeat_interval_ms;
        }
        self
    }

    pub fn voice_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.voice_port)
    }

    pub fn signaling_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.signaling_port)
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            proximity_distance: self.proximity_distance,
            queue_capacity: self.routing_queue_capacity,
            mode: self.routing_mode,
            no_position: self.no_position_policy,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            resume_window: Duration::from_millis(self.resume_window_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
        }
    }

    pub fn group_config(&self) -> GroupConfig {
        GroupConfig {
            max_name_len: self.group_name_max_len,
        }
    }

    /// Browser reads give up after three missed heartbeats.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.saturating_mul(3))
    }

    pub fn native_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.native_idle_timeout_ms)
    }
}
