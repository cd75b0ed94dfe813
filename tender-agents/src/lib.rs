//! TENDER Agents - Worker Fleet Model
//!
//! Provides the agent side of allocation:
//! - Static role capability table and per-agent profiles
//! - Lock-free lifecycle state machine
//! - Registry with one-assignment-per-agent binding

pub mod capability;
pub mod registry;
pub mod state_machine;

pub use capability::{CapabilityModel, CapabilityProfile, BASELINE_EFFICIENCY, MAX_EFFICIENCY};
pub use registry::{AgentRecord, AgentRegistry, AgentSnapshot};
pub use state_machine::{AgentStateMachine, StateNotifier, StateTransition};
