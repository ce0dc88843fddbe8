//! # Earshot
//!
//! Proximity voice chat for game servers.
//!
//! Players talk; Earshot decides who hears them. Two kinds of client
//! connect to one server process:
//!
//! - **Native clients** speak a compact binary protocol over UDP
//!   (see [`earshot_protocol::NativeCodec`]).
//! - **Browser clients** speak JSON signaling over a WebSocket and can
//!   resume a dropped connection without re-authenticating.
//!
//! The host game reports where every player stands through
//! [`VoiceCore`]; audio from one player reaches everyone within
//! `proximity_distance` in the same world, or everyone in the same group
//! when group routing is configured.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use earshot::prelude::*;
//!
//! # async fn run() -> Result<(), EarshotError> {
//! let config = VoiceConfig::load("earshot.toml")?;
//! let server = VoiceServerBuilder::new()
//!     .config(config)
//!     .build(OpenAuthenticator)
//!     .await?;
//!
//! let core = server.core();
//! // Feed it from the game:
//! // core.on_player_join(id, "Steve", 0.0, 64.0, 0.0, "overworld");
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod native;
mod server;
mod voice;

pub use crate::config::VoiceConfig;
pub use crate::voice::VoiceCore;
pub use crate::error::EarshotError;
pub use crate::server::{VoiceServer, VoiceServerBuilder};

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` when it is unset or unparsable.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Common imports for embedding a voice server.
pub mod prelude {
    pub use crate::{EarshotError, VoiceConfig, VoiceCore, VoiceServer, VoiceServerBuilder};
    pub use earshot_protocol::{GroupId, GroupInfo, PacketKinds, SessionId, SignalMessage};
    pub use earshot_router::{NoPositionPolicy, RouterStatsSnapshot, RoutingMode};
    pub use earshot_session::{Authenticator, OpenAuthenticator, SessionError};
}
