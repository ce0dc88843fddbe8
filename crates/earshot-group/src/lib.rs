//! Explicit voice groups for Earshot.
//!
//! A group is a named channel that ignores distance: members hear each
//! other wherever they stand. Each session is in at most one group.
//!
//! # Key types
//!
//! - [`GroupManager`]: create, join, leave, list; all operations atomic
//! - [`GroupConfig`]: name length bound
//! - [`JoinOutcome`] / [`LeftGroup`]: what changed, so callers can notify
//!   the affected members

mod config;
mod error;
mod manager;

pub use config::GroupConfig;
pub use error::GroupError;
pub use manager::{GroupManager, JoinOutcome, LeftGroup};
