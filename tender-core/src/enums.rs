//! Closed enums shared across the allocation engine.
//!
//! Every enum that crosses a message boundary round-trips through
//! `as_db_str` / `from_db_str`, so payload maps can carry them as strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ACTION TYPE
// ============================================================================

/// Kind of work a task asks an agent to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionType {
    Pathfind,
    Mine,
    Place,
    Craft,
    Attack,
    Follow,
    Gather,
    Build,
}

impl ActionType {
    /// All action types, in declaration order.
    pub const ALL: [ActionType; 8] = [
        ActionType::Pathfind,
        ActionType::Mine,
        ActionType::Place,
        ActionType::Craft,
        ActionType::Attack,
        ActionType::Follow,
        ActionType::Gather,
        ActionType::Build,
    ];

    pub fn as_db_str(&self) -> &'static str {
        match self {
            ActionType::Pathfind => "pathfind",
            ActionType::Mine => "mine",
            ActionType::Place => "place",
            ActionType::Craft => "craft",
            ActionType::Attack => "attack",
            ActionType::Follow => "follow",
            ActionType::Gather => "gather",
            ActionType::Build => "build",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, ActionTypeParseError> {
        match s.trim().to_lowercase().as_str() {
            "pathfind" | "path" | "move" => Ok(ActionType::Pathfind),
            "mine" | "mining" => Ok(ActionType::Mine),
            "place" | "placing" => Ok(ActionType::Place),
            "craft" | "crafting" => Ok(ActionType::Craft),
            "attack" | "combat" => Ok(ActionType::Attack),
            "follow" => Ok(ActionType::Follow),
            "gather" | "gathering" => Ok(ActionType::Gather),
            "build" | "building" => Ok(ActionType::Build),
            _ => Err(ActionTypeParseError(s.to_string())),
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ActionType {
    type Err = ActionTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid action type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTypeParseError(pub String);

impl fmt::Display for ActionTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid action type: {}", self.0)
    }
}

impl std::error::Error for ActionTypeParseError {}

// ============================================================================
// AGENT ROLE
// ============================================================================

/// Specialisation of a worker agent.
///
/// `Generalist` can perform every action at baseline efficiency and acts as
/// the universal fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentRole {
    Generalist,
    Miner,
    Builder,
    Crafter,
    Guard,
    Scout,
}

impl AgentRole {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AgentRole::Generalist => "Generalist",
            AgentRole::Miner => "Miner",
            AgentRole::Builder => "Builder",
            AgentRole::Crafter => "Crafter",
            AgentRole::Guard => "Guard",
            AgentRole::Scout => "Scout",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, AgentRoleParseError> {
        match s.trim().to_lowercase().as_str() {
            "generalist" | "worker" => Ok(AgentRole::Generalist),
            "miner" => Ok(AgentRole::Miner),
            "builder" => Ok(AgentRole::Builder),
            "crafter" => Ok(AgentRole::Crafter),
            "guard" => Ok(AgentRole::Guard),
            "scout" => Ok(AgentRole::Scout),
            _ => Err(AgentRoleParseError(s.to_string())),
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for AgentRole {
    type Err = AgentRoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid agent role string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRoleParseError(pub String);

impl fmt::Display for AgentRoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid agent role: {}", self.0)
    }
}

impl std::error::Error for AgentRoleParseError {}

// ============================================================================
// AGENT STATE
// ============================================================================

/// Lifecycle state of a worker agent.
///
/// ```text
/// Idle ──award──→ Planning ──accept──→ Executing ──success──→ Idle
///                    │                     │
///                    └──decline/timeout──→ Idle
///                                          └──failure──→ Error ──ack──→ Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentState {
    /// Available for work; the only state that may bid or receive an award
    Idle,
    /// Holding an award that has not been acknowledged yet
    Planning,
    /// Executing an accepted assignment
    Executing,
    /// Execution failed and has not been acknowledged
    Error,
}

impl AgentState {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "Idle",
            AgentState::Planning => "Planning",
            AgentState::Executing => "Executing",
            AgentState::Error => "Error",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, AgentStateParseError> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(AgentState::Idle),
            "planning" => Ok(AgentState::Planning),
            "executing" => Ok(AgentState::Executing),
            "error" | "failed" => Ok(AgentState::Error),
            _ => Err(AgentStateParseError(s.to_string())),
        }
    }

    /// Check whether the lifecycle permits moving from `self` to `to`.
    pub fn can_transition_to(&self, to: AgentState) -> bool {
        matches!(
            (self, to),
            (AgentState::Idle, AgentState::Planning)
                | (AgentState::Planning, AgentState::Executing)
                | (AgentState::Planning, AgentState::Idle)
                | (AgentState::Executing, AgentState::Idle)
                | (AgentState::Executing, AgentState::Error)
                | (AgentState::Error, AgentState::Idle)
        )
    }

    /// Only idle agents may bid on announcements or receive awards.
    pub fn can_accept_work(&self) -> bool {
        matches!(self, AgentState::Idle)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for AgentState {
    type Err = AgentStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid agent state string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStateParseError(pub String);

impl fmt::Display for AgentStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid agent state: {}", self.0)
    }
}

impl std::error::Error for AgentStateParseError {}

// ============================================================================
// ASSIGNMENT STATE
// ============================================================================

/// Lifecycle state of an assignment.
///
/// ```text
/// Pending → Awarded ──┬── accept ──→ Accepted → InProgress ──┬── Completed
///                     └── reject ──→ Rejected (terminal)     └── Failed
///
/// Any non-terminal state may move to Cancelled.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignmentState {
    Pending,
    Awarded,
    Accepted,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Rejected,
}

impl AssignmentState {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AssignmentState::Pending => "Pending",
            AssignmentState::Awarded => "Awarded",
            AssignmentState::Accepted => "Accepted",
            AssignmentState::InProgress => "InProgress",
            AssignmentState::Completed => "Completed",
            AssignmentState::Failed => "Failed",
            AssignmentState::Cancelled => "Cancelled",
            AssignmentState::Rejected => "Rejected",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, AssignmentStateParseError> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(AssignmentState::Pending),
            "awarded" => Ok(AssignmentState::Awarded),
            "accepted" => Ok(AssignmentState::Accepted),
            "inprogress" | "in_progress" | "in-progress" => Ok(AssignmentState::InProgress),
            "completed" | "complete" => Ok(AssignmentState::Completed),
            "failed" | "failure" => Ok(AssignmentState::Failed),
            "cancelled" | "canceled" => Ok(AssignmentState::Cancelled),
            "rejected" => Ok(AssignmentState::Rejected),
            _ => Err(AssignmentStateParseError(s.to_string())),
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AssignmentState::Completed
                | AssignmentState::Failed
                | AssignmentState::Cancelled
                | AssignmentState::Rejected
        )
    }

    pub fn can_transition_to(&self, to: AssignmentState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if to == AssignmentState::Cancelled {
            return true;
        }
        matches!(
            (self, to),
            (AssignmentState::Pending, AssignmentState::Awarded)
                | (AssignmentState::Awarded, AssignmentState::Accepted)
                | (AssignmentState::Awarded, AssignmentState::Rejected)
                | (AssignmentState::Accepted, AssignmentState::InProgress)
                | (AssignmentState::Accepted, AssignmentState::Failed)
                | (AssignmentState::InProgress, AssignmentState::Completed)
                | (AssignmentState::InProgress, AssignmentState::Failed)
        )
    }
}

impl fmt::Display for AssignmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for AssignmentState {
    type Err = AssignmentStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid assignment state string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentStateParseError(pub String);

impl fmt::Display for AssignmentStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid assignment state: {}", self.0)
    }
}

impl std::error::Error for AssignmentStateParseError {}

// ============================================================================
// ANNOUNCEMENT STATUS
// ============================================================================

/// Status of a task announcement.
///
/// `Evaluating` is held only inside the per-announcement critical section; an
/// announcement never leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnnouncementStatus {
    Open,
    Evaluating,
    Closed,
}

impl AnnouncementStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AnnouncementStatus::Open => "Open",
            AnnouncementStatus::Evaluating => "Evaluating",
            AnnouncementStatus::Closed => "Closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AnnouncementStatus::Closed)
    }
}

impl fmt::Display for AnnouncementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// Why an announcement was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseReason {
    /// A winner was selected from the submitted bids
    Awarded,
    /// Deadline passed without a usable bid; handed to the fallback allocator
    NoUsableBid,
    /// The owning plan was cancelled
    Cancelled,
    /// A usable bid existed but no bidder could legally take the award
    AwardFailed,
}

impl CloseReason {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            CloseReason::Awarded => "Awarded",
            CloseReason::NoUsableBid => "NoUsableBid",
            CloseReason::Cancelled => "Cancelled",
            CloseReason::AwardFailed => "AwardFailed",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

// ============================================================================
// TASK OUTCOME
// ============================================================================

/// Per-task progress as seen by the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskOutcome {
    /// Registered, not announced yet
    Pending,
    /// An announcement is open for bids
    Announced,
    /// Waiting in the fallback backlog for an eligible agent
    Parked,
    /// An assignment has been awarded but not acknowledged
    Awarded,
    /// The winning agent is executing
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskOutcome {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TaskOutcome::Pending => "Pending",
            TaskOutcome::Announced => "Announced",
            TaskOutcome::Parked => "Parked",
            TaskOutcome::Awarded => "Awarded",
            TaskOutcome::InProgress => "InProgress",
            TaskOutcome::Completed => "Completed",
            TaskOutcome::Failed => "Failed",
            TaskOutcome::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskOutcome::Completed | TaskOutcome::Failed | TaskOutcome::Cancelled
        )
    }

    /// True once the task has ever had an assignment or a final outcome.
    pub fn has_started(&self) -> bool {
        matches!(
            self,
            TaskOutcome::Awarded
                | TaskOutcome::InProgress
                | TaskOutcome::Completed
                | TaskOutcome::Failed
        )
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

// ============================================================================
// PLAN STATUS
// ============================================================================

/// Aggregate status of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanStatus {
    Pending,
    InProgress,
    Complete,
    PartiallyFailed,
    Cancelled,
}

impl PlanStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            PlanStatus::Pending => "Pending",
            PlanStatus::InProgress => "InProgress",
            PlanStatus::Complete => "Complete",
            PlanStatus::PartiallyFailed => "PartiallyFailed",
            PlanStatus::Cancelled => "Cancelled",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, PlanStatusParseError> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(PlanStatus::Pending),
            "inprogress" | "in_progress" | "in-progress" => Ok(PlanStatus::InProgress),
            "complete" | "completed" => Ok(PlanStatus::Complete),
            "partiallyfailed" | "partially_failed" | "partially-failed" => {
                Ok(PlanStatus::PartiallyFailed)
            }
            "cancelled" | "canceled" => Ok(PlanStatus::Cancelled),
            _ => Err(PlanStatusParseError(s.to_string())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanStatus::Complete | PlanStatus::Cancelled)
    }

    /// Derive the plan status from the outcomes of its tasks.
    ///
    /// `PartiallyFailed` is reported as soon as one task has failed, even while
    /// siblings are still running.
    pub fn from_outcomes<'a, I>(outcomes: I, cancelled: bool) -> Self
    where
        I: IntoIterator<Item = &'a TaskOutcome>,
    {
        if cancelled {
            return PlanStatus::Cancelled;
        }

        let mut total = 0usize;
        let mut completed = 0usize;
        let mut any_failed = false;
        let mut any_started = false;

        for outcome in outcomes {
            total += 1;
            match outcome {
                TaskOutcome::Completed => completed += 1,
                TaskOutcome::Failed => any_failed = true,
                _ => {}
            }
            if outcome.has_started() {
                any_started = true;
            }
        }

        if any_failed {
            PlanStatus::PartiallyFailed
        } else if total > 0 && completed == total {
            PlanStatus::Complete
        } else if any_started {
            PlanStatus::InProgress
        } else {
            PlanStatus::Pending
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for PlanStatus {
    type Err = PlanStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid plan status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStatusParseError(pub String);

impl fmt::Display for PlanStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid plan status: {}", self.0)
    }
}

impl std::error::Error for PlanStatusParseError {}

// ============================================================================
// FAILURE CAUSE
// ============================================================================

/// Why an assignment or task ended unsuccessfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCause {
    /// The winner did not acknowledge within the grace period
    AwardAckTimeout,
    /// The winner declined the award
    AwardDeclined,
    /// No progress signal within the watchdog interval
    WatchdogTimeout,
    /// The agent reported an unsuccessful completion
    ExecutionFailed,
    /// The agent was deregistered or missed its heartbeat
    AgentLost,
    /// Every award cycle was used up
    RetryBudgetExhausted,
    /// No eligible agent appeared within the maximum backlog wait
    BacklogWaitExceeded,
}

impl FailureCause {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            FailureCause::AwardAckTimeout => "AwardAckTimeout",
            FailureCause::AwardDeclined => "AwardDeclined",
            FailureCause::WatchdogTimeout => "WatchdogTimeout",
            FailureCause::ExecutionFailed => "ExecutionFailed",
            FailureCause::AgentLost => "AgentLost",
            FailureCause::RetryBudgetExhausted => "RetryBudgetExhausted",
            FailureCause::BacklogWaitExceeded => "BacklogWaitExceeded",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_round_trip_and_aliases() {
        for action in ActionType::ALL {
            assert_eq!(ActionType::from_db_str(action.as_db_str()), Ok(action));
        }
        assert_eq!("Mining".parse::<ActionType>(), Ok(ActionType::Mine));
        assert!(ActionType::from_db_str("teleport").is_err());
    }

    #[test]
    fn test_agent_state_transition_table() {
        use AgentState::*;
        assert!(Idle.can_transition_to(Planning));
        assert!(Planning.can_transition_to(Executing));
        assert!(Planning.can_transition_to(Idle));
        assert!(Executing.can_transition_to(Idle));
        assert!(Executing.can_transition_to(Error));
        assert!(Error.can_transition_to(Idle));

        assert!(!Idle.can_transition_to(Executing));
        assert!(!Idle.can_transition_to(Error));
        assert!(!Error.can_transition_to(Planning));
        assert!(!Planning.can_transition_to(Error));
    }

    #[test]
    fn test_assignment_terminal_states_never_leave() {
        use AssignmentState::*;
        for terminal in [Completed, Failed, Cancelled, Rejected] {
            assert!(terminal.is_terminal());
            for to in [
                Pending, Awarded, Accepted, InProgress, Completed, Failed, Cancelled, Rejected,
            ] {
                assert!(!terminal.can_transition_to(to));
            }
        }
    }

    #[test]
    fn test_assignment_rejection_only_from_awarded() {
        use AssignmentState::*;
        assert!(Awarded.can_transition_to(Rejected));
        assert!(!InProgress.can_transition_to(Rejected));
        assert!(!Pending.can_transition_to(Accepted));
    }

    #[test]
    fn test_plan_status_derivation() {
        use TaskOutcome::*;
        assert_eq!(PlanStatus::from_outcomes(&[Pending, Announced], false), PlanStatus::Pending);
        assert_eq!(
            PlanStatus::from_outcomes(&[Awarded, Announced], false),
            PlanStatus::InProgress
        );
        assert_eq!(
            PlanStatus::from_outcomes(&[Completed, Completed], false),
            PlanStatus::Complete
        );
        assert_eq!(
            PlanStatus::from_outcomes(&[Completed, Failed], false),
            PlanStatus::PartiallyFailed
        );
        assert_eq!(
            PlanStatus::from_outcomes(&[Completed, Completed], true),
            PlanStatus::Cancelled
        );
    }

    #[test]
    fn test_plan_status_parse_error_display() {
        let err = PlanStatus::from_db_str("bogus").unwrap_err();
        assert_eq!(err.to_string(), "Invalid plan status: bogus");
    }
}
