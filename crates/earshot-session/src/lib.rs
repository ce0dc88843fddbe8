//! Voice session management for Earshot.
//!
//! This crate handles the lifecycle of voice participants, whichever
//! transport they arrive on:
//!
//! 1. **Authentication**: deciding who a participant is ([`Authenticator`])
//! 2. **Session tracking**: who is live and where their audio goes
//!    ([`SessionRegistry`])
//! 3. **Resume**: letting browser clients recover after a dropped
//!    connection without re-authenticating ([`ResumeManager`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Router / Server (above)  ← snapshots live sessions, drives handshakes
//!     ↕
//! Session Layer (this crate)  ← identity, transport handle, lifecycle
//!     ↕
//! Protocol + Transport (below)  ← SessionId, PeerTransport
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod registry;
mod resume;
mod session;

pub use auth::{Authenticator, OpenAuthenticator};
pub use error::SessionError;
pub use registry::{Admission, SessionRegistry};
pub use resume::{ResumeManager, ResumeRecord};
pub use session::{ClientSession, SessionConfig, SessionState};
