//! TENDER Test Utilities
//!
//! Shared test infrastructure for the TENDER workspace:
//! - Proptest generators for entities and bid values
//! - Fixtures for tasks, agent fleets and a fixed clock
//! - A recording event sink
//! - Custom assertions for allocation errors

pub use tender_agents::{AgentRegistry, CapabilityProfile};
pub use tender_core::{
    ActionType, AgentId, AgentRole, AllocationConfig, AllocationEvent, Assignment,
    AssignmentState, BidRequest, EventSink, PlanId, PlanStatus, Task, TaskId, TenderError,
    TenderResult, Timestamp,
};

use chrono::Utc;
use std::sync::Mutex;
use uuid::Uuid;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for TENDER types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a Timestamp within 2020-2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_action_type() -> impl Strategy<Value = ActionType> {
        prop::sample::select(ActionType::ALL.to_vec())
    }

    pub fn arb_agent_role() -> impl Strategy<Value = AgentRole> {
        prop_oneof![
            Just(AgentRole::Generalist),
            Just(AgentRole::Miner),
            Just(AgentRole::Builder),
            Just(AgentRole::Crafter),
            Just(AgentRole::Guard),
            Just(AgentRole::Scout),
        ]
    }

    /// Generate a task with every parameter its action requires.
    pub fn arb_valid_task() -> impl Strategy<Value = Task> {
        (arb_uuid(), arb_action_type(), arb_timestamp(), -5i32..5)
            .prop_map(|(id, action, at, priority)| fixtures::task(id, action, at).with_priority(priority))
    }

    /// Generate in-range bid values: (capability, estimated_time, confidence).
    pub fn arb_bid_values() -> impl Strategy<Value = (f64, f64, f64)> {
        (0.0f64..=1.0, 0.1f64..1000.0, 0.0f64..=1.0)
    }

    /// Generate a bid for the given agent and announcement.
    pub fn arb_bid_request(agent_id: AgentId, announcement_id: Uuid) -> impl Strategy<Value = BidRequest> {
        (arb_bid_values(), prop::option::of(0.0f64..500.0)).prop_map(
            move |((capability, time, confidence), distance)| {
                let request = BidRequest::new(agent_id, announcement_id, capability, time, confidence);
                match distance {
                    Some(d) => request.with_distance(d),
                    None => request,
                }
            },
        )
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made tasks, fleets and clocks.

    use super::*;
    use chrono::{Duration, TimeZone};

    /// A fixed starting instant so scenario timings are reproducible.
    pub fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// `t0()` plus whole seconds.
    pub fn at(secs: i64) -> Timestamp {
        t0() + Duration::seconds(secs)
    }

    /// `t0()` plus milliseconds.
    pub fn at_millis(millis: i64) -> Timestamp {
        t0() + Duration::milliseconds(millis)
    }

    /// A task with plausible values for every required parameter.
    pub fn task(task_id: TaskId, action: ActionType, created_at: Timestamp) -> Task {
        let base = Task::new(task_id, action, created_at);
        match action {
            ActionType::Pathfind => base
                .with_parameter("x", "10")
                .with_parameter("y", "64")
                .with_parameter("z", "-20"),
            ActionType::Mine => base.with_parameter("block", "iron_ore"),
            ActionType::Place => base.with_parameter("block", "cobblestone"),
            ActionType::Craft => base.with_parameter("item", "iron_pickaxe"),
            ActionType::Attack => base.with_parameter("target", "zombie"),
            ActionType::Follow => base.with_parameter("player", "steve"),
            ActionType::Gather => base.with_parameter("resource", "oak_log"),
            ActionType::Build => base.with_parameter("structure", "watchtower"),
        }
    }

    pub fn mining_task() -> Task {
        task(Uuid::now_v7(), ActionType::Mine, t0())
    }

    pub fn crafting_task() -> Task {
        task(Uuid::now_v7(), ActionType::Craft, t0())
    }

    pub fn gathering_task() -> Task {
        task(Uuid::now_v7(), ActionType::Gather, t0())
    }

    /// Register one agent per role, in order, returning their ids.
    pub fn register_fleet(
        registry: &AgentRegistry,
        roles: &[AgentRole],
        now: Timestamp,
    ) -> TenderResult<Vec<AgentId>> {
        let mut ids = Vec::with_capacity(roles.len());
        for role in roles {
            let id = Uuid::now_v7();
            registry.register(id, *role, CapabilityProfile::for_role(*role), now)?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Default timings, with heartbeat expiry pushed out of the way so
    /// scenarios need not send heartbeats.
    pub fn scenario_config() -> AllocationConfig {
        AllocationConfig {
            heartbeat_timeout: std::time::Duration::from_secs(3600),
            ..AllocationConfig::default()
        }
    }
}

// ============================================================================
// RECORDING SINK
// ============================================================================

/// Event sink that keeps every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AllocationEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AllocationEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn announcements(&self) -> usize {
        self.count(|e| matches!(e, AllocationEvent::Announced(_)))
    }

    pub fn awards(&self) -> Vec<(AgentId, TaskId)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AllocationEvent::Awarded {
                    agent_id, task_id, ..
                } => Some((agent_id, task_id)),
                _ => None,
            })
            .collect()
    }

    pub fn rejections_for(&self, agent_id: AgentId) -> usize {
        self.count(|e| matches!(e, AllocationEvent::Rejected { agent_id: a, .. } if *a == agent_id))
    }

    /// Every plan status reported for `plan_id`, in order.
    pub fn plan_statuses(&self, plan_id: PlanId) -> Vec<PlanStatus> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AllocationEvent::PlanStatusChanged { plan_id: p, status } if p == plan_id => {
                    Some(status)
                }
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    fn count<F: Fn(&AllocationEvent) -> bool>(&self, predicate: F) -> usize {
        self.events
            .lock()
            .map(|e| e.iter().filter(|ev| predicate(ev)).count())
            .unwrap_or(0)
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &AllocationEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for allocation results.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &TenderResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_bid_error<T: std::fmt::Debug>(result: &TenderResult<T>) {
        match result {
            Err(TenderError::Bid(_)) => {}
            other => panic!("Expected Bid error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &TenderResult<T>) {
        match result {
            Err(TenderError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_assignment_error<T: std::fmt::Debug>(result: &TenderResult<T>) {
        match result {
            Err(TenderError::Assignment(_)) => {}
            other => panic!("Expected Assignment error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_assignment_state(assignment: &Assignment, expected: AssignmentState) {
        assert_eq!(
            assignment.state, expected,
            "Assignment state mismatch: expected {:?}, got {:?}",
            expected, assignment.state
        );
    }
}
