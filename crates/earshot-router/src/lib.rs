//! Audio routing for Earshot: the transport bridge.
//!
//! Every inbound audio frame, whichever transport it came from, is
//! submitted to one [`TransportBridge`]. A single worker drains the
//! bridge's bounded queue and decides, per frame, who hears it:
//!
//! ```text
//!  native recv loop ──┐                         ┌──→ native peer (re-encoded datagram)
//!                     ├─ try_send ─→ [queue] ─→ worker ──→ browser peer (raw payload)
//!  browser handlers ──┘    (drop when full)     └──→ ... skipped if closed/backpressured
//! ```
//!
//! Recipients are picked by distance ([`RoutingMode::Proximity`]) or by
//! group membership ([`RoutingMode::Group`]), never both.

mod bridge;
mod config;
mod select;
mod stats;

pub use bridge::{AudioFrame, BridgeWorker, TransportBridge};
pub use config::{NoPositionPolicy, RouterConfig, RoutingMode};
pub use select::hears;
pub use stats::{RouterStats, RouterStatsSnapshot};
