//! World positions for Earshot.
//!
//! Two pieces:
//!
//! - [`Position`]: where a participant is, and the distance rules
//!   (different worlds are infinitely far apart)
//! - [`PositionTracker`]: the live map from session to position, fed by
//!   the host game's join/move/quit events and by web clients
//!
//! No spatial index: the router scans a snapshot linearly, which is fine
//! for a few hundred participants.

mod position;
mod tracker;

pub use position::Position;
pub use tracker::PositionTracker;
