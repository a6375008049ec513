//! Session State Machine
//!
//! Serializes control messages into phase transitions and owns the
//! lifecycle of the acquisition loop.

pub mod no_network;
pub mod state_machine;

pub use no_network::{run_no_network, NoNetworkPlan};
pub use state_machine::{SessionOutcome, SessionStateMachine};
