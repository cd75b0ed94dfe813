//! TENDER Alloc - Contract-Net Task Allocation
//!
//! Turns plans into agent assignments: tasks are announced, capable idle
//! agents bid, the best bid wins and the winner must acknowledge and report
//! progress. When negotiation produces no winner a round-robin fallback
//! takes over, and tasks nobody can perform wait in a bounded backlog.
//!
//! All timers live in a deadline queue advanced by
//! [`PlanCoordinator::tick`]; the `jobs` module runs it in the background.

pub mod contract_net;
pub mod coordinator;
pub mod fallback;
pub mod jobs;
pub mod metrics;
pub mod scheduler;
pub mod scoring;
pub mod sink;
pub mod tracker;

// Re-export commonly used types
pub use contract_net::{ContractNetEngine, TickReport};
pub use coordinator::{MessageOutcome, PlanCoordinator};
pub use fallback::FallbackAllocator;
pub use jobs::allocation_tick_task;
pub use metrics::{AllocationMetrics, AllocationMetricsSnapshot};
pub use scheduler::{DeadlineKind, DeadlineQueue};
pub use scoring::{rank_bids, score_bid, ScoredBid};
pub use sink::{BroadcastEventSink, FanoutSink, MessageBroadcastSink};
pub use tracker::{AuditEntry, AuditEvent, NewAssignment, TaskAssignmentTracker, TaskView};
