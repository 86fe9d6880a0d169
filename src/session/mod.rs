//! Session lifecycle management
//!
//! Owns the two endpoints and drives start/stop/recreate for the push and
//! pull roles independently.

pub mod lifecycle;

pub use lifecycle::{RoleState, SessionManager};
