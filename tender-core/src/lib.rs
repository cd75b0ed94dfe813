//! TENDER Core - Allocation Types
//!
//! Pure data structures shared by the agent and allocation crates: identity
//! aliases, closed enums, entities, protocol messages, outbound events,
//! errors and configuration. No scheduling or negotiation logic lives here.

mod config;
mod entities;
mod enums;
mod error;
mod events;
mod identity;
mod message;

pub use config::*;
pub use entities::*;
pub use enums::*;
pub use error::*;
pub use events::*;
pub use identity::*;
pub use message::*;
