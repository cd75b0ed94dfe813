//! Error types for TENDER operations

use crate::{
    ActionType, AgentId, AgentState, AnnouncementId, AssignmentId, AssignmentState, PlanId,
    TaskId, TaskOutcome, Timestamp,
};
use thiserror::Error;

/// Task and plan validation errors, raised before anything is announced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Action {action} requires parameter '{parameter}'")]
    MissingParameter {
        action: ActionType,
        parameter: String,
    },

    #[error("Invalid value for parameter '{parameter}': {reason}")]
    InvalidParameter { parameter: String, reason: String },

    #[error("Unresolvable required capability: {name}")]
    UnresolvableCapability { name: String },

    #[error("Plan {plan_id} contains no tasks")]
    EmptyPlan { plan_id: PlanId },

    #[error("Task {task_id} appears more than once")]
    DuplicateTask { task_id: TaskId },
}

/// Bid submission errors. A rejected bid never changes announcement state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BidError {
    #[error("Announcement not found: {announcement_id}")]
    AnnouncementNotFound { announcement_id: AnnouncementId },

    #[error("Announcement {announcement_id} is closed")]
    AnnouncementClosed { announcement_id: AnnouncementId },

    #[error("Late bid for announcement {announcement_id}: deadline was {deadline}")]
    LateBid {
        announcement_id: AnnouncementId,
        deadline: Timestamp,
    },

    #[error("Agent {agent_id} already bid on announcement {announcement_id}")]
    DuplicateBid {
        announcement_id: AnnouncementId,
        agent_id: AgentId,
    },

    #[error("Bid value out of range for {field}: {value}")]
    OutOfRange { field: String, value: String },

    #[error("Unknown bidder: {agent_id}")]
    UnknownAgent { agent_id: AgentId },

    #[error("Agent {agent_id} cannot bid while {state}")]
    AgentNotIdle { agent_id: AgentId, state: AgentState },

    #[error("Agent {agent_id} cannot perform {action}")]
    AgentNotCapable { agent_id: AgentId, action: ActionType },
}

/// Agent registry and lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("Agent not registered: {agent_id}")]
    NotRegistered { agent_id: AgentId },

    #[error("Agent already registered: {agent_id}")]
    AlreadyRegistered { agent_id: AgentId },

    #[error("Invalid state transition for agent {agent_id}: {from} -> {to}")]
    InvalidTransition {
        agent_id: AgentId,
        from: AgentState,
        to: AgentState,
    },

    #[error("Agent {agent_id} already holds assignment {assignment_id}")]
    AlreadyBound {
        agent_id: AgentId,
        assignment_id: AssignmentId,
    },
}

/// Assignment tracking errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssignmentError {
    #[error("Assignment not found: {assignment_id}")]
    NotFound { assignment_id: AssignmentId },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: TaskId },

    #[error("Plan not found: {plan_id}")]
    PlanNotFound { plan_id: PlanId },

    #[error("Plan already submitted: {plan_id}")]
    DuplicatePlan { plan_id: PlanId },

    #[error("Task {task_id} already finished as {outcome}")]
    TaskClosed {
        task_id: TaskId,
        outcome: TaskOutcome,
    },

    #[error("Plan {plan_id} is cancelled")]
    PlanCancelled { plan_id: PlanId },

    #[error("Illegal transition for assignment {assignment_id}: {from} -> {to}")]
    IllegalTransition {
        assignment_id: AssignmentId,
        from: AssignmentState,
        to: AssignmentState,
    },

    #[error("Double assignment attempt for task {task_id} to agent {agent_id}: {existing} is still active")]
    DoubleAssignmentAttempt {
        task_id: TaskId,
        agent_id: AgentId,
        existing: AssignmentId,
    },

    #[error("Acknowledgement window for assignment {assignment_id} closed at {deadline}")]
    AckWindowExpired {
        assignment_id: AssignmentId,
        deadline: Timestamp,
    },

    #[error("Assignment {assignment_id} does not belong to agent {agent_id}")]
    WrongAgent {
        assignment_id: AssignmentId,
        agent_id: AgentId,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    ParseFailed { reason: String },

    #[error("Deadline from {field} falls outside the representable time range")]
    DeadlineOutOfRange { field: String },
}

/// Master error type for all TENDER errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TenderError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Bid error: {0}")]
    Bid(#[from] BidError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Assignment error: {0}")]
    Assignment(#[from] AssignmentError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid message {message_type}: {reason}")]
    InvalidMessage {
        message_type: String,
        reason: String,
    },

    #[error("Lock poisoned: {resource}")]
    LockPoisoned { resource: String },
}

impl TenderError {
    pub fn lock_poisoned(resource: &str) -> Self {
        TenderError::LockPoisoned {
            resource: resource.to_string(),
        }
    }
}

/// Result type alias for TENDER operations.
pub type TenderResult<T> = Result<T, TenderError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_validation_error_display_missing_parameter() {
        let err = ValidationError::MissingParameter {
            action: ActionType::Mine,
            parameter: "block".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("mine"));
        assert!(msg.contains("block"));
    }

    #[test]
    fn test_bid_error_display_duplicate() {
        let err = BidError::DuplicateBid {
            announcement_id: Uuid::nil(),
            agent_id: Uuid::nil(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("already bid"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_agent_error_display_invalid_transition() {
        let err = AgentError::InvalidTransition {
            agent_id: Uuid::nil(),
            from: AgentState::Idle,
            to: AgentState::Executing,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Idle -> Executing"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "ack_grace".to_string(),
            value: "0s".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("ack_grace"));
        assert!(msg.contains("0s"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_tender_error_from_conversions() {
        let err: TenderError = BidError::UnknownAgent {
            agent_id: Uuid::nil(),
        }
        .into();
        assert!(matches!(err, TenderError::Bid(BidError::UnknownAgent { .. })));

        let err: TenderError = AssignmentError::PlanNotFound {
            plan_id: Uuid::nil(),
        }
        .into();
        assert!(format!("{}", err).starts_with("Assignment error"));
    }

    #[test]
    fn test_lock_poisoned_names_resource() {
        let err = TenderError::lock_poisoned("deadline queue");
        assert_eq!(format!("{}", err), "Lock poisoned: deadline queue");
    }
}
