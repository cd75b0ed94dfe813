//! Allocation entities: tasks, plans, announcements, bids and assignments.

use crate::{
    ActionType, AgentId, AnnouncementId, AnnouncementStatus, AssignmentError, AssignmentId,
    AssignmentState, BidError, CloseReason, FailureCause, PlanId, TaskId, Timestamp,
    ValidationError,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Parameter carrying extra required capabilities, comma separated.
pub const REQUIRES_PARAMETER: &str = "requires";

/// Optional positive quantity parameter shared by every action.
pub const QUANTITY_PARAMETER: &str = "quantity";

// ============================================================================
// TASK
// ============================================================================

/// A unit of work produced by plan decomposition. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub action: ActionType,
    pub parameters: BTreeMap<String, String>,
    pub priority: i32,
    pub created_at: Timestamp,
}

impl Task {
    pub fn new(task_id: TaskId, action: ActionType, created_at: Timestamp) -> Self {
        Self {
            task_id,
            action,
            parameters: BTreeMap::new(),
            priority: 0,
            created_at,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Parameters an action cannot run without.
    pub fn required_parameters(action: ActionType) -> &'static [&'static str] {
        match action {
            ActionType::Pathfind => &["x", "y", "z"],
            ActionType::Mine | ActionType::Place => &["block"],
            ActionType::Craft => &["item"],
            ActionType::Attack => &["target"],
            ActionType::Follow => &["player"],
            ActionType::Gather => &["resource"],
            ActionType::Build => &["structure"],
        }
    }

    /// Check the task is well formed.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.required_capabilities().map(|_| ())
    }

    /// Derive the set of actions an agent must be able to perform to take
    /// this task, validating parameters along the way.
    pub fn required_capabilities(&self) -> Result<BTreeSet<ActionType>, ValidationError> {
        for parameter in Self::required_parameters(self.action) {
            match self.parameters.get(*parameter) {
                None => {
                    return Err(ValidationError::MissingParameter {
                        action: self.action,
                        parameter: (*parameter).to_string(),
                    })
                }
                Some(value) if value.trim().is_empty() => {
                    return Err(ValidationError::InvalidParameter {
                        parameter: (*parameter).to_string(),
                        reason: "value must not be empty".to_string(),
                    })
                }
                Some(_) => {}
            }
        }

        if self.action == ActionType::Pathfind {
            for axis in ["x", "y", "z"] {
                let value = self.parameters.get(axis).map(String::as_str).unwrap_or("");
                if value.trim().parse::<i64>().is_err() {
                    return Err(ValidationError::InvalidParameter {
                        parameter: axis.to_string(),
                        reason: format!("'{}' is not an integer coordinate", value),
                    });
                }
            }
        }

        if let Some(quantity) = self.parameters.get(QUANTITY_PARAMETER) {
            match quantity.trim().parse::<u32>() {
                Ok(n) if n > 0 => {}
                _ => {
                    return Err(ValidationError::InvalidParameter {
                        parameter: QUANTITY_PARAMETER.to_string(),
                        reason: format!("'{}' is not a positive integer", quantity),
                    })
                }
            }
        }

        let mut required = BTreeSet::new();
        required.insert(self.action);
        if self.action == ActionType::Build {
            required.insert(ActionType::Place);
        }

        if let Some(extra) = self.parameters.get(REQUIRES_PARAMETER) {
            for name in extra.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let action = ActionType::from_db_str(name).map_err(|_| {
                    ValidationError::UnresolvableCapability {
                        name: name.to_string(),
                    }
                })?;
                required.insert(action);
            }
        }

        Ok(required)
    }
}

// ============================================================================
// PLAN
// ============================================================================

/// An ordered set of tasks submitted together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: PlanId,
    pub task_ids: Vec<TaskId>,
    /// Opaque reference to the request the plan was decomposed from
    pub request_ref: Option<String>,
    pub submitted_at: Timestamp,
}

// ============================================================================
// ANNOUNCEMENT
// ============================================================================

/// A call for bids on one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub announcement_id: AnnouncementId,
    pub task_id: TaskId,
    pub plan_id: PlanId,
    pub action: ActionType,
    pub required_capabilities: BTreeSet<ActionType>,
    pub priority: i32,
    pub created_at: Timestamp,
    pub deadline: Timestamp,
    pub status: AnnouncementStatus,
    /// Award cycle this announcement belongs to, starting at 1
    pub attempt: u32,
    pub closed_at: Option<Timestamp>,
    pub close_reason: Option<CloseReason>,
    pub awarded_assignment: Option<AssignmentId>,
}

impl Announcement {
    /// Open and still inside the bidding window.
    pub fn accepts_bids_at(&self, now: Timestamp) -> bool {
        self.status == AnnouncementStatus::Open && now < self.deadline
    }
}

// ============================================================================
// BID
// ============================================================================

/// Bid values as submitted by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidRequest {
    pub agent_id: AgentId,
    pub announcement_id: AnnouncementId,
    /// Self-assessed capability, 0..=1
    pub capability_score: f64,
    /// Estimated completion time in seconds
    pub estimated_time: f64,
    /// Self-assessed confidence, 0..=1
    pub confidence: f64,
    /// Distance to the work site in world units
    pub distance: Option<f64>,
}

impl BidRequest {
    pub fn new(
        agent_id: AgentId,
        announcement_id: AnnouncementId,
        capability_score: f64,
        estimated_time: f64,
        confidence: f64,
    ) -> Self {
        Self {
            agent_id,
            announcement_id,
            capability_score,
            estimated_time,
            confidence,
            distance: None,
        }
    }

    pub fn with_distance(mut self, distance: f64) -> Self {
        self.distance = Some(distance);
        self
    }

    /// Range-check every value.
    pub fn validate(&self) -> Result<(), BidError> {
        let unit = |field: &str, value: f64| {
            if value.is_finite() && (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(BidError::OutOfRange {
                    field: field.to_string(),
                    value: value.to_string(),
                })
            }
        };
        unit("capability_score", self.capability_score)?;
        unit("confidence", self.confidence)?;

        if !self.estimated_time.is_finite() || self.estimated_time <= 0.0 {
            return Err(BidError::OutOfRange {
                field: "estimated_time".to_string(),
                value: self.estimated_time.to_string(),
            });
        }

        if let Some(distance) = self.distance {
            if !distance.is_finite() || distance < 0.0 {
                return Err(BidError::OutOfRange {
                    field: "distance".to_string(),
                    value: distance.to_string(),
                });
            }
        }

        Ok(())
    }
}

/// A bid recorded against an open announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub agent_id: AgentId,
    pub announcement_id: AnnouncementId,
    pub capability_score: f64,
    pub estimated_time: f64,
    pub confidence: f64,
    pub distance: Option<f64>,
    pub submitted_at: Timestamp,
    /// Arrival order within the announcement
    pub sequence: u64,
}

impl Bid {
    pub fn from_request(request: BidRequest, submitted_at: Timestamp, sequence: u64) -> Self {
        Self {
            agent_id: request.agent_id,
            announcement_id: request.announcement_id,
            capability_score: request.capability_score,
            estimated_time: request.estimated_time,
            confidence: request.confidence,
            distance: request.distance,
            submitted_at,
            sequence,
        }
    }
}

// ============================================================================
// ASSIGNMENT
// ============================================================================

/// Binding of a task to an agent, retained for audit after it terminates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub assignment_id: AssignmentId,
    pub task_id: TaskId,
    pub plan_id: PlanId,
    pub agent_id: AgentId,
    pub announcement_id: Option<AnnouncementId>,
    pub state: AssignmentState,
    pub score: f64,
    pub via_fallback: bool,
    pub attempt: u32,
    pub progress_percent: u8,
    pub last_progress_at: Option<Timestamp>,
    pub failure: Option<FailureCause>,
    pub detail: Option<String>,
    pub history: Vec<(AssignmentState, Timestamp)>,
}

impl Assignment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        assignment_id: AssignmentId,
        task_id: TaskId,
        plan_id: PlanId,
        agent_id: AgentId,
        announcement_id: Option<AnnouncementId>,
        score: f64,
        via_fallback: bool,
        attempt: u32,
        now: Timestamp,
    ) -> Self {
        Self {
            assignment_id,
            task_id,
            plan_id,
            agent_id,
            announcement_id,
            state: AssignmentState::Pending,
            score,
            via_fallback,
            attempt,
            progress_percent: 0,
            last_progress_at: None,
            failure: None,
            detail: None,
            history: vec![(AssignmentState::Pending, now)],
        }
    }

    /// Move to `to` if the lifecycle allows it, timestamping the change.
    pub fn transition(&mut self, to: AssignmentState, now: Timestamp) -> Result<(), AssignmentError> {
        if !self.state.can_transition_to(to) {
            return Err(AssignmentError::IllegalTransition {
                assignment_id: self.assignment_id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.history.push((to, now));
        if to == AssignmentState::InProgress {
            self.last_progress_at = Some(now);
        }
        Ok(())
    }

    /// When the assignment entered `state`, if it ever did.
    pub fn entered_at(&self, state: AssignmentState) -> Option<Timestamp> {
        self.history
            .iter()
            .find(|(s, _)| *s == state)
            .map(|(_, at)| *at)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_entity_id;
    use chrono::Utc;

    fn mine_task() -> Task {
        Task::new(new_entity_id(), ActionType::Mine, Utc::now()).with_parameter("block", "iron_ore")
    }

    #[test]
    fn test_task_requires_action_parameters() {
        let task = Task::new(new_entity_id(), ActionType::Mine, Utc::now());
        assert_eq!(
            task.validate(),
            Err(ValidationError::MissingParameter {
                action: ActionType::Mine,
                parameter: "block".to_string(),
            })
        );
        assert!(mine_task().validate().is_ok());
    }

    #[test]
    fn test_task_rejects_bad_quantity() {
        let task = mine_task().with_parameter(QUANTITY_PARAMETER, "0");
        assert!(matches!(
            task.validate(),
            Err(ValidationError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_pathfind_requires_integer_coordinates() {
        let task = Task::new(new_entity_id(), ActionType::Pathfind, Utc::now())
            .with_parameter("x", "10")
            .with_parameter("y", "64")
            .with_parameter("z", "north");
        assert!(matches!(
            task.validate(),
            Err(ValidationError::InvalidParameter { parameter, .. }) if parameter == "z"
        ));
    }

    #[test]
    fn test_build_requires_place_capability() -> Result<(), ValidationError> {
        let task = Task::new(new_entity_id(), ActionType::Build, Utc::now())
            .with_parameter("structure", "house");
        let required = task.required_capabilities()?;
        assert!(required.contains(&ActionType::Build));
        assert!(required.contains(&ActionType::Place));
        Ok(())
    }

    #[test]
    fn test_unknown_required_capability_is_unresolvable() {
        let task = mine_task().with_parameter(REQUIRES_PARAMETER, "gather, enchant");
        assert_eq!(
            task.required_capabilities(),
            Err(ValidationError::UnresolvableCapability {
                name: "enchant".to_string()
            })
        );
    }

    #[test]
    fn test_bid_request_range_checks() {
        let id = new_entity_id();
        assert!(BidRequest::new(id, id, 0.9, 100.0, 0.8).validate().is_ok());
        assert!(BidRequest::new(id, id, 1.2, 100.0, 0.8).validate().is_err());
        assert!(BidRequest::new(id, id, 0.9, 0.0, 0.8).validate().is_err());
        assert!(BidRequest::new(id, id, 0.9, 10.0, f64::NAN).validate().is_err());
        assert!(BidRequest::new(id, id, 0.9, 10.0, 0.5)
            .with_distance(-1.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_assignment_transitions_are_timestamped() -> Result<(), AssignmentError> {
        let now = Utc::now();
        let mut assignment = Assignment::new(
            new_entity_id(),
            new_entity_id(),
            new_entity_id(),
            new_entity_id(),
            None,
            12.5,
            false,
            1,
            now,
        );
        assignment.transition(AssignmentState::Awarded, now)?;
        assignment.transition(AssignmentState::Accepted, now)?;
        assignment.transition(AssignmentState::InProgress, now)?;
        assignment.transition(AssignmentState::Completed, now)?;

        assert_eq!(assignment.history.len(), 5);
        assert_eq!(assignment.entered_at(AssignmentState::Completed), Some(now));
        assert!(assignment
            .transition(AssignmentState::Failed, now)
            .is_err());
        assert_eq!(assignment.state, AssignmentState::Completed);
        Ok(())
    }
}
