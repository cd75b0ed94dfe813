//! Outbound allocation events and the sink trait that receives them.

use crate::{
    keys, AgentId, AgentMessage, Announcement, AnnouncementId, Assignment, AssignmentId, MessageType,
    PlanId, PlanStatus, Recipient, TaskId, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Something the orchestrator tells the outside world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AllocationEvent {
    /// A task is open for bids
    Announced(Announcement),
    /// An agent won a task and must acknowledge
    Awarded {
        assignment_id: AssignmentId,
        agent_id: AgentId,
        task_id: TaskId,
        plan_id: PlanId,
        announcement_id: Option<AnnouncementId>,
        score: f64,
    },
    /// A bidder lost an announcement
    Rejected {
        announcement_id: AnnouncementId,
        agent_id: AgentId,
    },
    /// A plan's aggregate status changed
    PlanStatusChanged { plan_id: PlanId, status: PlanStatus },
}

impl AllocationEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            AllocationEvent::Announced(_) => "Announced",
            AllocationEvent::Awarded { .. } => "Awarded",
            AllocationEvent::Rejected { .. } => "Rejected",
            AllocationEvent::PlanStatusChanged { .. } => "PlanStatusChanged",
        }
    }

    /// Render the event as a protocol message sent by `orchestrator_id`.
    ///
    /// Plan status changes are reported to the plan's requester, not to
    /// agents, so they have no message form.
    pub fn to_message(&self, orchestrator_id: AgentId, now: Timestamp) -> Option<AgentMessage> {
        match self {
            AllocationEvent::Announced(announcement) => {
                let capabilities = announcement
                    .required_capabilities
                    .iter()
                    .map(|a| a.as_db_str())
                    .collect::<Vec<_>>()
                    .join(",");
                Some(
                    AgentMessage::new(
                        MessageType::Announce,
                        orchestrator_id,
                        Recipient::Broadcast,
                        now,
                    )
                    .with_payload(keys::ANNOUNCEMENT_ID, announcement.announcement_id)
                    .with_payload(keys::TASK_ID, announcement.task_id)
                    .with_payload(keys::PLAN_ID, announcement.plan_id)
                    .with_payload(keys::ACTION, announcement.action)
                    .with_payload(keys::REQUIRED_CAPABILITIES, capabilities)
                    .with_payload(keys::DEADLINE, announcement.deadline.to_rfc3339()),
                )
            }
            AllocationEvent::Awarded {
                assignment_id,
                agent_id,
                task_id,
                plan_id,
                announcement_id,
                score,
            } => {
                let mut message = AgentMessage::new(
                    MessageType::Award,
                    orchestrator_id,
                    Recipient::Agent(*agent_id),
                    now,
                )
                .with_payload(keys::ASSIGNMENT_ID, assignment_id)
                .with_payload(keys::TASK_ID, task_id)
                .with_payload(keys::PLAN_ID, plan_id)
                .with_payload(keys::SCORE, score);
                if let Some(announcement_id) = announcement_id {
                    message = message.with_payload(keys::ANNOUNCEMENT_ID, announcement_id);
                }
                Some(message)
            }
            AllocationEvent::Rejected {
                announcement_id,
                agent_id,
            } => Some(
                AgentMessage::new(
                    MessageType::Reject,
                    orchestrator_id,
                    Recipient::Agent(*agent_id),
                    now,
                )
                .with_payload(keys::ANNOUNCEMENT_ID, announcement_id),
            ),
            AllocationEvent::PlanStatusChanged { .. } => None,
        }
    }
}

/// Receiver of allocation events.
///
/// Implementations are called synchronously from the engine and must not
/// call back into it.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &AllocationEvent);

    fn on_announcement(&self, announcement: &Announcement) {
        self.emit(&AllocationEvent::Announced(announcement.clone()));
    }

    fn on_award(&self, assignment: &Assignment) {
        self.emit(&AllocationEvent::Awarded {
            assignment_id: assignment.assignment_id,
            agent_id: assignment.agent_id,
            task_id: assignment.task_id,
            plan_id: assignment.plan_id,
            announcement_id: assignment.announcement_id,
            score: assignment.score,
        });
    }

    fn on_rejection(&self, announcement_id: AnnouncementId, agent_id: AgentId) {
        self.emit(&AllocationEvent::Rejected {
            announcement_id,
            agent_id,
        });
    }

    fn on_plan_status(&self, plan_id: PlanId, status: PlanStatus) {
        self.emit(&AllocationEvent::PlanStatusChanged { plan_id, status });
    }
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &AllocationEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{new_entity_id, ActionType, AnnouncementStatus};
    use chrono::Utc;
    use std::collections::BTreeSet;

    #[test]
    fn test_announcement_renders_as_broadcast() {
        let now = Utc::now();
        let announcement = Announcement {
            announcement_id: new_entity_id(),
            task_id: new_entity_id(),
            plan_id: new_entity_id(),
            action: ActionType::Build,
            required_capabilities: BTreeSet::from([ActionType::Build, ActionType::Place]),
            priority: 0,
            created_at: now,
            deadline: now,
            status: AnnouncementStatus::Open,
            attempt: 1,
            closed_at: None,
            close_reason: None,
            awarded_assignment: None,
        };
        let message = AllocationEvent::Announced(announcement)
            .to_message(new_entity_id(), now);
        let message = match message {
            Some(m) => m,
            None => panic!("announcement should render"),
        };
        assert_eq!(message.recipient, Recipient::Broadcast);
        assert_eq!(message.message_type, MessageType::Announce);
        assert_eq!(
            message.payload.get(keys::REQUIRED_CAPABILITIES).map(String::as_str),
            Some("place,build")
        );
    }

    #[test]
    fn test_plan_status_has_no_agent_message() {
        let event = AllocationEvent::PlanStatusChanged {
            plan_id: new_entity_id(),
            status: PlanStatus::Complete,
        };
        assert!(event.to_message(new_entity_id(), Utc::now()).is_none());
    }

    #[test]
    fn test_rejection_is_addressed_to_bidder() {
        let agent = new_entity_id();
        let event = AllocationEvent::Rejected {
            announcement_id: new_entity_id(),
            agent_id: agent,
        };
        let message = event.to_message(new_entity_id(), Utc::now());
        assert_eq!(message.map(|m| m.recipient), Some(Recipient::Agent(agent)));
    }
}
