//! Connection endpoints
//!
//! One [`Endpoint`] wraps one side of the in-process peer session: the
//! sending side that captures and offers, or the receiving side that
//! answers and renders.

pub mod connection;

pub use connection::{ConnectivityState, Endpoint, Role};
