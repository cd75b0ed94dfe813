//! End-to-end allocation scenarios driven by explicit timestamps.

mod common;

use common::Harness;
use tender_core::{
    AgentRole, AgentState, AllocationEvent, AnnouncementStatus, AssignmentState, BidRequest,
    CloseReason, FailureCause, PlanStatus, TaskOutcome, TenderResult,
};
use tender_test_utils::fixtures::{self, at};

#[test]
fn test_scenario_mining_best_bid_wins_and_plan_completes() -> TenderResult<()> {
    let h = Harness::scenario()?;
    let agent1 = h.agent(AgentRole::Miner)?;
    let agent2 = h.agent(AgentRole::Miner)?;
    let task = fixtures::mining_task();
    let task_id = task.task_id;
    let plan_id = h.plan(vec![task])?;

    let ann = h.current_announcement(task_id).expect("task announced");
    assert_eq!(ann.status, AnnouncementStatus::Open);
    assert_eq!(ann.deadline, at(30));

    h.coordinator
        .submit_bid(BidRequest::new(agent1, ann.announcement_id, 0.9, 100.0, 0.5), at(1))?;
    h.coordinator
        .submit_bid(BidRequest::new(agent2, ann.announcement_id, 0.5, 50.0, 0.5), at(2))?;

    h.coordinator.tick(at(30))?;

    let assignment = h.active_assignment(task_id)?;
    assert_eq!(assignment.agent_id, agent1);
    assert_eq!(assignment.state, AssignmentState::Awarded);
    assert!((assignment.score - 140.0).abs() < 1e-9);
    assert_eq!(h.sink.awards(), vec![(agent1, task_id)]);
    assert_eq!(h.sink.rejections_for(agent2), 1);
    assert_eq!(h.sink.rejections_for(agent1), 0);

    let closed = h
        .coordinator
        .engine()
        .announcement(ann.announcement_id)
        .expect("retained");
    assert_eq!(closed.status, AnnouncementStatus::Closed);
    assert_eq!(closed.close_reason, Some(CloseReason::Awarded));
    assert_eq!(closed.awarded_assignment, Some(assignment.assignment_id));

    h.coordinator
        .accept_award(agent1, assignment.assignment_id, at(31))?;
    assert_eq!(h.coordinator.registry().state(agent1), Some(AgentState::Executing));
    h.coordinator
        .report_progress(assignment.assignment_id, 50, at(40))?;
    let done = h.coordinator.report_completion(
        assignment.assignment_id,
        true,
        Some("mined 12 iron_ore".to_string()),
        at(50),
    )?;

    assert_eq!(done.state, AssignmentState::Completed);
    assert_eq!(h.coordinator.registry().state(agent1), Some(AgentState::Idle));
    assert_eq!(h.coordinator.plan_status(plan_id)?, PlanStatus::Complete);
    assert_eq!(h.coordinator.plan_progress(plan_id)?, 100.0);
    assert_eq!(
        h.sink.plan_statuses(plan_id),
        vec![PlanStatus::InProgress, PlanStatus::Complete]
    );
    Ok(())
}

#[test]
fn test_scenario_uncraftable_task_parks_then_fails_plan_partially() -> TenderResult<()> {
    let h = Harness::scenario()?;
    let miner = h.agent(AgentRole::Miner)?;
    let craft = fixtures::crafting_task();
    let gather = fixtures::gathering_task();
    let (craft_id, gather_id) = (craft.task_id, gather.task_id);
    let plan_id = h.plan(vec![craft, gather])?;

    let gather_ann = h.current_announcement(gather_id).expect("announced");
    let craft_ann = h.current_announcement(craft_id).expect("announced");
    let err = h
        .coordinator
        .submit_bid(BidRequest::new(miner, craft_ann.announcement_id, 0.9, 10.0, 0.9), at(1));
    assert!(err.is_err());
    h.coordinator
        .submit_bid(BidRequest::new(miner, gather_ann.announcement_id, 0.8, 30.0, 0.8), at(1))?;

    h.coordinator.tick(at(30))?;

    let parked = h.coordinator.tracker().task(craft_id).expect("tracked");
    assert_eq!(parked.outcome, TaskOutcome::Parked);
    assert_eq!(parked.parked_since, Some(at(30)));
    assert!(h.coordinator.tracker().assignments_for_task(craft_id).is_empty());

    let gather_assignment = h.active_assignment(gather_id)?;
    assert_eq!(gather_assignment.agent_id, miner);
    h.coordinator
        .accept_award(miner, gather_assignment.assignment_id, at(31))?;
    h.coordinator
        .report_completion(gather_assignment.assignment_id, true, None, at(32))?;

    for secs in 33..=89 {
        h.coordinator.tick(at(secs))?;
    }
    assert_eq!(
        h.coordinator.tracker().task(craft_id).map(|v| v.outcome),
        Some(TaskOutcome::Parked)
    );
    assert_eq!(h.coordinator.plan_status(plan_id)?, PlanStatus::InProgress);

    for secs in 90..=95 {
        h.coordinator.tick(at(secs))?;
    }
    let failed = h.coordinator.tracker().task(craft_id).expect("tracked");
    assert_eq!(failed.outcome, TaskOutcome::Failed);
    assert_eq!(failed.failure, Some(FailureCause::BacklogWaitExceeded));
    assert_eq!(
        h.coordinator.tracker().task(gather_id).map(|v| v.outcome),
        Some(TaskOutcome::Completed)
    );
    assert_eq!(h.coordinator.plan_status(plan_id)?, PlanStatus::PartiallyFailed);
    assert_eq!(
        h.sink.plan_statuses(plan_id).last(),
        Some(&PlanStatus::PartiallyFailed)
    );
    Ok(())
}

#[test]
fn test_scenario_silent_winner_exhausts_retry_budget() -> TenderResult<()> {
    let h = Harness::scenario()?;
    let silent = h.agent(AgentRole::Miner)?;
    let guard = h.agent(AgentRole::Guard)?;
    let mine = fixtures::mining_task();
    let attack = fixtures::task(uuid::Uuid::now_v7(), tender_core::ActionType::Attack, fixtures::t0());
    let (mine_id, attack_id) = (mine.task_id, attack.task_id);
    let plan_id = h.plan(vec![mine, attack])?;

    let attack_ann = h.current_announcement(attack_id).expect("announced");
    h.coordinator
        .submit_bid(BidRequest::new(guard, attack_ann.announcement_id, 0.9, 20.0, 0.9), at(1))?;

    // three award cycles: bid, award at the deadline, no ack within grace
    let cycles = [(0, 30, 40), (40, 70, 80), (80, 110, 120)];
    for (i, (opened, deadline, expiry)) in cycles.iter().enumerate() {
        let ann = h.current_announcement(mine_id).expect("announced");
        assert_eq!(ann.attempt, i as u32 + 1);
        assert_eq!(ann.created_at, at(*opened));
        h.coordinator
            .submit_bid(BidRequest::new(silent, ann.announcement_id, 0.9, 40.0, 0.9), at(opened + 1))?;

        h.coordinator.tick(at(*deadline))?;
        let awarded = h.active_assignment(mine_id)?;
        assert_eq!(awarded.agent_id, silent);

        if i == 0 {
            let attack_assignment = h.active_assignment(attack_id)?;
            h.coordinator
                .accept_award(guard, attack_assignment.assignment_id, at(31))?;
            h.coordinator
                .report_completion(attack_assignment.assignment_id, true, None, at(35))?;
        }

        h.coordinator.tick(at(*expiry))?;
        let expired = h
            .coordinator
            .tracker()
            .assignment(awarded.assignment_id)
            .expect("tracked");
        assert_eq!(expired.state, AssignmentState::Rejected);
        assert_eq!(expired.failure, Some(FailureCause::AwardAckTimeout));
        assert_eq!(h.coordinator.registry().state(silent), Some(AgentState::Idle));
    }

    let mine_view = h.coordinator.tracker().task(mine_id).expect("tracked");
    assert_eq!(mine_view.outcome, TaskOutcome::Failed);
    assert_eq!(mine_view.failure, Some(FailureCause::RetryBudgetExhausted));
    assert_eq!(mine_view.failed_attempts, 3);
    assert_eq!(h.coordinator.engine().announcements_for_task(mine_id).len(), 3);
    assert_eq!(
        h.coordinator.tracker().task(attack_id).map(|v| v.outcome),
        Some(TaskOutcome::Completed)
    );
    assert_eq!(h.coordinator.plan_status(plan_id)?, PlanStatus::PartiallyFailed);

    let snapshot = h.coordinator.metrics().snapshot();
    assert_eq!(snapshot.ack_timeouts, 3);
    assert_eq!(snapshot.tasks_failed, 1);
    Ok(())
}

#[test]
fn test_scenario_cancel_while_open_discards_bids() -> TenderResult<()> {
    let h = Harness::scenario()?;
    let a = h.agent(AgentRole::Miner)?;
    let b = h.agent(AgentRole::Miner)?;
    let task = fixtures::mining_task();
    let task_id = task.task_id;
    let plan_id = h.plan(vec![task])?;
    let ann = h.current_announcement(task_id).expect("announced");

    h.coordinator
        .submit_bid(BidRequest::new(a, ann.announcement_id, 0.9, 10.0, 0.9), at(1))?;
    h.coordinator
        .submit_bid(BidRequest::new(b, ann.announcement_id, 0.7, 10.0, 0.9), at(2))?;
    assert_eq!(h.coordinator.engine().bids(ann.announcement_id).len(), 2);

    assert!(h.coordinator.cancel(plan_id, at(10))?);
    assert!(!h.coordinator.cancel(plan_id, at(11))?);

    let closed = h
        .coordinator
        .engine()
        .announcement(ann.announcement_id)
        .expect("retained");
    assert_eq!(closed.status, AnnouncementStatus::Closed);
    assert_eq!(closed.close_reason, Some(CloseReason::Cancelled));
    assert!(h.coordinator.engine().bids(ann.announcement_id).is_empty());

    h.coordinator.tick(at(30))?;
    h.coordinator.tick(at(45))?;

    assert!(h.coordinator.tracker().assignments_for_task(task_id).is_empty());
    assert!(h.sink.awards().is_empty());
    assert_eq!(h.sink.rejections_for(a) + h.sink.rejections_for(b), 0);
    assert_eq!(
        h.coordinator.tracker().task(task_id).map(|v| v.outcome),
        Some(TaskOutcome::Cancelled)
    );
    assert_eq!(h.coordinator.plan_status(plan_id)?, PlanStatus::Cancelled);
    assert_eq!(h.sink.plan_statuses(plan_id), vec![PlanStatus::Cancelled]);

    let late = h
        .coordinator
        .submit_bid(BidRequest::new(a, ann.announcement_id, 0.9, 10.0, 0.9), at(12));
    assert!(late.is_err());
    Ok(())
}

#[test]
fn test_cancel_after_award_releases_agent() -> TenderResult<()> {
    let h = Harness::scenario()?;
    let miner = h.agent(AgentRole::Miner)?;
    let task = fixtures::mining_task();
    let task_id = task.task_id;
    let plan_id = h.plan(vec![task])?;
    let ann = h.current_announcement(task_id).expect("announced");
    h.coordinator
        .submit_bid(BidRequest::new(miner, ann.announcement_id, 0.9, 10.0, 0.9), at(1))?;
    h.coordinator.tick(at(30))?;
    let assignment = h.active_assignment(task_id)?;
    h.coordinator
        .accept_award(miner, assignment.assignment_id, at(31))?;

    h.coordinator.cancel(plan_id, at(35))?;

    let cancelled = h
        .coordinator
        .tracker()
        .assignment(assignment.assignment_id)
        .expect("tracked");
    assert_eq!(cancelled.state, AssignmentState::Cancelled);
    assert_eq!(h.coordinator.registry().state(miner), Some(AgentState::Idle));
    assert_eq!(h.coordinator.registry().current_assignment(miner), None);
    assert!(h
        .coordinator
        .report_completion(assignment.assignment_id, true, None, at(36))
        .is_err());
    Ok(())
}

#[test]
fn test_cancel_after_completion_is_refused() -> TenderResult<()> {
    let h = Harness::scenario()?;
    let miner = h.agent(AgentRole::Miner)?;
    let task = fixtures::mining_task();
    let task_id = task.task_id;
    let plan_id = h.plan(vec![task])?;
    let ann = h.current_announcement(task_id).expect("announced").announcement_id;
    h.bid(miner, ann, 10.0, 0.9, at(1))?;
    h.coordinator.tick(at(30))?;
    let assignment = h.active_assignment(task_id)?;
    h.coordinator
        .accept_award(miner, assignment.assignment_id, at(31))?;
    h.coordinator
        .report_completion(assignment.assignment_id, true, None, at(40))?;
    assert_eq!(h.coordinator.plan_status(plan_id)?, PlanStatus::Complete);

    assert!(!h.coordinator.cancel(plan_id, at(41))?);
    assert_eq!(h.coordinator.plan_status(plan_id)?, PlanStatus::Complete);
    assert!(!h.coordinator.tracker().is_plan_cancelled(plan_id));
    assert!(!h.sink.plan_statuses(plan_id).contains(&PlanStatus::Cancelled));
    Ok(())
}

#[test]
fn test_broadcast_events_are_ordered_per_task() -> TenderResult<()> {
    let h = Harness::scenario()?;
    let miner = h.agent(AgentRole::Miner)?;
    let task = fixtures::mining_task();
    let task_id = task.task_id;
    h.plan(vec![task])?;
    let ann = h.current_announcement(task_id).expect("announced");
    h.coordinator
        .submit_bid(BidRequest::new(miner, ann.announcement_id, 0.9, 10.0, 0.9), at(1))?;
    h.coordinator.tick(at(30))?;

    let names: Vec<&str> = h.sink.events().iter().map(AllocationEvent::event_name).collect();
    assert_eq!(names, vec!["Announced", "Awarded", "PlanStatusChanged"]);
    Ok(())
}
