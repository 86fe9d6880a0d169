//! Negotiation between the two resident endpoints
//!
//! There is no signaling server: offers, answers, and trickled candidates
//! are handed straight from one endpoint to the other inside the process.
//! A production system would push the same payloads through a transport and
//! keep the rest of the sequence unchanged.

pub mod coordinator;

pub use coordinator::{complete_pull, establish_push, wire_candidate_relay};
