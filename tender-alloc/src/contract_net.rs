//! Contract-net negotiation engine.
//!
//! ```text
//! announce ──→ Open ──bids──→ Evaluating ──→ Closed ──award──→ Awarded
//!                                              │                 │
//!                                              └──no usable bid──┴──→ fallback / backlog
//! ```
//!
//! Each announcement has its own mutex; evaluation flips the status from
//! `Open` to `Evaluating` under it, so exactly one caller can award. All
//! timers go through the deadline queue and fire on [`ContractNetEngine::tick`].
//!
//! Lock order: announcement entry → registry shard → tracker → deadline
//! queue. Sinks are called after the announcement lock is released.

use crate::fallback::FallbackAllocator;
use crate::metrics::AllocationMetrics;
use crate::scheduler::{DeadlineKind, DeadlineQueue};
use crate::scoring::rank_bids;
use crate::tracker::{NewAssignment, TaskAssignmentTracker};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tender_agents::{AgentRegistry, CapabilityModel};
use tender_core::{
    checked_deadline, new_entity_id, to_time_delta, ActionType, AgentError, AgentId, AgentState,
    AllocationConfig, Announcement, AnnouncementId, AnnouncementStatus, Assignment,
    AssignmentError, AssignmentId, AssignmentState, Bid, BidError, BidRequest, CloseReason,
    ConfigError, EventSink, FailureCause, PlanId, TaskId, TaskOutcome, TenderError, TenderResult,
    Timestamp,
};

// ============================================================================
// ANNOUNCEMENT ENTRY
// ============================================================================

#[derive(Debug)]
struct AnnouncementEntry {
    announcement: Announcement,
    bids: Vec<Bid>,
    bidders: HashSet<AgentId>,
    /// Agents that were idle and capable when the task was announced
    expected: HashSet<AgentId>,
    next_seq: u64,
}

impl AnnouncementEntry {
    fn all_expected_have_bid(&self) -> bool {
        !self.expected.is_empty() && self.expected.iter().all(|a| self.bidders.contains(a))
    }

    fn close(&mut self, reason: CloseReason, assignment: Option<AssignmentId>, now: Timestamp) {
        self.announcement.status = AnnouncementStatus::Closed;
        self.announcement.closed_at = Some(now);
        self.announcement.close_reason = Some(reason);
        self.announcement.awarded_assignment = assignment;
        self.bids.clear();
    }
}

fn lock_entry(entry: &Mutex<AnnouncementEntry>) -> TenderResult<MutexGuard<'_, AnnouncementEntry>> {
    entry
        .lock()
        .map_err(|_| TenderError::lock_poisoned("announcement"))
}

/// How an agent leaves an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgentRelease {
    /// Award declined, timed out or rolled back
    Declined,
    Succeeded,
    Failed,
    Cancelled,
}

/// What one call to [`ContractNetEngine::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub deadlines_fired: usize,
    pub agents_expired: usize,
    pub announcements_pruned: usize,
    pub plans_archived: usize,
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct ContractNetEngine {
    config: AllocationConfig,
    registry: Arc<AgentRegistry>,
    tracker: Arc<TaskAssignmentTracker>,
    sink: Arc<dyn EventSink>,
    fallback: FallbackAllocator,
    announcements: DashMap<AnnouncementId, Arc<Mutex<AnnouncementEntry>>>,
    deadlines: Mutex<DeadlineQueue>,
    metrics: Arc<AllocationMetrics>,
}

impl ContractNetEngine {
    pub fn new(
        config: AllocationConfig,
        registry: Arc<AgentRegistry>,
        tracker: Arc<TaskAssignmentTracker>,
        sink: Arc<dyn EventSink>,
    ) -> TenderResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry,
            tracker,
            sink,
            fallback: FallbackAllocator::new(),
            announcements: DashMap::new(),
            deadlines: Mutex::new(DeadlineQueue::new()),
            metrics: Arc::new(AllocationMetrics::new()),
        })
    }

    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<AllocationMetrics> {
        Arc::clone(&self.metrics)
    }

    // ------------------------------------------------------------------------
    // Announcements
    // ------------------------------------------------------------------------

    /// Open a call for bids on a tracked task.
    ///
    /// The task is validated first; a malformed task produces a
    /// `ValidationError` and no announcement.
    pub fn announce(&self, task_id: TaskId, now: Timestamp) -> TenderResult<Announcement> {
        let view = self
            .tracker
            .task(task_id)
            .ok_or(AssignmentError::TaskNotFound { task_id })?;
        if self.tracker.is_plan_cancelled(view.plan_id) {
            return Err(AssignmentError::PlanCancelled {
                plan_id: view.plan_id,
            }
            .into());
        }
        if view.outcome.is_terminal() {
            return Err(AssignmentError::TaskClosed {
                task_id,
                outcome: view.outcome,
            }
            .into());
        }

        let required = view.task.required_capabilities().map_err(|e| {
            tracing::warn!(task_id = %task_id, error = %e, "Task failed validation");
            e
        })?;
        let deadline = self.deadline_after(now, "bidding_window", self.config.bidding_window)?;
        let required_list: Vec<ActionType> = required.iter().copied().collect();
        let expected = self
            .registry
            .eligible_in_order(&required_list)
            .into_iter()
            .map(|s| s.agent_id())
            .collect();

        let announcement = Announcement {
            announcement_id: new_entity_id(),
            task_id,
            plan_id: view.plan_id,
            action: view.task.action,
            required_capabilities: required,
            priority: view.task.priority,
            created_at: now,
            deadline,
            status: AnnouncementStatus::Open,
            attempt: view.failed_attempts + 1,
            closed_at: None,
            close_reason: None,
            awarded_assignment: None,
        };
        let announcement_id = announcement.announcement_id;

        self.announcements.insert(
            announcement_id,
            Arc::new(Mutex::new(AnnouncementEntry {
                announcement: announcement.clone(),
                bids: Vec::new(),
                bidders: HashSet::new(),
                expected,
                next_seq: 0,
            })),
        );

        if !self.tracker.mark_announced(task_id, announcement_id, now)? {
            self.announcements.remove(&announcement_id);
            let outcome = self
                .tracker
                .task(task_id)
                .map(|v| v.outcome)
                .unwrap_or(TaskOutcome::Cancelled);
            return Err(AssignmentError::TaskClosed { task_id, outcome }.into());
        }

        self.schedule(
            announcement.deadline,
            DeadlineKind::BiddingClosed(announcement_id),
        )?;
        AllocationMetrics::incr(&self.metrics.announcements);
        tracing::info!(
            announcement_id = %announcement_id,
            task_id = %task_id,
            action = %announcement.action,
            attempt = announcement.attempt,
            deadline = %announcement.deadline,
            "Task announced"
        );
        self.sink.on_announcement(&announcement);
        Ok(announcement)
    }

    pub fn announcement(&self, announcement_id: AnnouncementId) -> Option<Announcement> {
        let entry = self.entry(announcement_id).ok()?;
        let guard = lock_entry(&entry).ok()?;
        Some(guard.announcement.clone())
    }

    /// Bids currently held by an open announcement.
    pub fn bids(&self, announcement_id: AnnouncementId) -> Vec<Bid> {
        let Ok(entry) = self.entry(announcement_id) else {
            return Vec::new();
        };
        let bids = match lock_entry(&entry) {
            Ok(guard) => guard.bids.clone(),
            Err(_) => Vec::new(),
        };
        bids
    }

    /// Every retained announcement for a task, oldest first.
    pub fn announcements_for_task(&self, task_id: TaskId) -> Vec<Announcement> {
        let mut found = Vec::new();
        for entry in self.announcements.iter() {
            if let Ok(guard) = lock_entry(entry.value()) {
                if guard.announcement.task_id == task_id {
                    found.push(guard.announcement.clone());
                }
            }
        }
        found.sort_by_key(|a| (a.attempt, a.created_at));
        found
    }

    fn entry(&self, announcement_id: AnnouncementId) -> TenderResult<Arc<Mutex<AnnouncementEntry>>> {
        self.announcements
            .get(&announcement_id)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| BidError::AnnouncementNotFound { announcement_id }.into())
    }

    // ------------------------------------------------------------------------
    // Bidding
    // ------------------------------------------------------------------------

    /// Record a bid. Rejected bids are logged and leave the announcement as it was.
    pub fn submit_bid(&self, request: BidRequest, now: Timestamp) -> TenderResult<Bid> {
        let agent_id = request.agent_id;
        let announcement_id = request.announcement_id;
        match self.record_bid(request, now) {
            Ok((bid, evaluate_now)) => {
                AllocationMetrics::incr(&self.metrics.bids_accepted);
                tracing::debug!(
                    announcement_id = %announcement_id,
                    agent_id = %agent_id,
                    sequence = bid.sequence,
                    "Bid recorded"
                );
                if evaluate_now {
                    if let Err(e) = self.evaluate(announcement_id, now) {
                        tracing::warn!(
                            announcement_id = %announcement_id,
                            error = %e,
                            "Early evaluation failed"
                        );
                    }
                }
                Ok(bid)
            }
            Err(e) => {
                AllocationMetrics::incr(&self.metrics.bids_rejected);
                tracing::warn!(
                    announcement_id = %announcement_id,
                    agent_id = %agent_id,
                    error = %e,
                    "Bid rejected"
                );
                Err(e)
            }
        }
    }

    fn record_bid(&self, request: BidRequest, now: Timestamp) -> TenderResult<(Bid, bool)> {
        request.validate()?;
        let agent_id = request.agent_id;
        let announcement_id = request.announcement_id;
        let entry = self.entry(announcement_id)?;

        let agent = self
            .registry
            .get(agent_id)
            .ok_or(BidError::UnknownAgent { agent_id })?;
        if agent.state != AgentState::Idle {
            return Err(BidError::AgentNotIdle {
                agent_id,
                state: agent.state,
            }
            .into());
        }

        let mut guard = lock_entry(&entry)?;
        if guard.announcement.status != AnnouncementStatus::Open {
            return Err(BidError::AnnouncementClosed { announcement_id }.into());
        }
        if now >= guard.announcement.deadline {
            return Err(BidError::LateBid {
                announcement_id,
                deadline: guard.announcement.deadline,
            }
            .into());
        }
        if let Some(missing) = guard
            .announcement
            .required_capabilities
            .iter()
            .find(|a| !CapabilityModel::can_perform(agent.record.role, **a))
        {
            return Err(BidError::AgentNotCapable {
                agent_id,
                action: *missing,
            }
            .into());
        }
        if !guard.bidders.insert(agent_id) {
            return Err(BidError::DuplicateBid {
                announcement_id,
                agent_id,
            }
            .into());
        }

        let sequence = guard.next_seq;
        guard.next_seq += 1;
        let bid = Bid::from_request(request, now, sequence);
        guard.bids.push(bid.clone());

        let evaluate_now = self.config.evaluate_when_all_bid && guard.all_expected_have_bid();
        Ok((bid, evaluate_now))
    }

    // ------------------------------------------------------------------------
    // Evaluation & award
    // ------------------------------------------------------------------------

    /// Close the announcement and award it to the best legal bidder, or hand
    /// the task to the fallback allocator.
    ///
    /// Runs at most once per announcement; later calls return `Ok(None)`.
    pub fn evaluate(
        &self,
        announcement_id: AnnouncementId,
        now: Timestamp,
    ) -> TenderResult<Option<Assignment>> {
        let entry = self.entry(announcement_id)?;
        let mut guard = lock_entry(&entry)?;
        if guard.announcement.status != AnnouncementStatus::Open {
            return Ok(None);
        }
        guard.announcement.status = AnnouncementStatus::Evaluating;

        let task_id = guard.announcement.task_id;
        let plan_id = guard.announcement.plan_id;
        let bidders: Vec<AgentId> = guard.bids.iter().map(|b| b.agent_id).collect();

        if self.tracker.is_plan_cancelled(plan_id) {
            guard.close(CloseReason::Cancelled, None, now);
            return Ok(None);
        }

        let ranked = rank_bids(
            &self.config.scoring,
            self.config.min_capability_score,
            &guard.bids,
            |bid| {
                self.registry.state(bid.agent_id) != Some(AgentState::Idle)
                    || self.registry.current_assignment(bid.agent_id).is_some()
                    || self.tracker.agent_load(bid.agent_id) > 0
            },
        );

        let mut awarded = None;
        let mut failure = None;
        for candidate in &ranked {
            match self.commit_award(
                task_id,
                candidate.bid.agent_id,
                candidate.score,
                Some(announcement_id),
                false,
                now,
            ) {
                Ok(Some(assignment)) => {
                    awarded = Some(assignment);
                    break;
                }
                Ok(None) => continue,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            if matches!(
                e,
                TenderError::Assignment(AssignmentError::PlanCancelled { .. })
            ) {
                guard.close(CloseReason::Cancelled, None, now);
                return Ok(None);
            }
            guard.close(CloseReason::AwardFailed, None, now);
            drop(guard);
            for agent_id in bidders {
                self.sink.on_rejection(announcement_id, agent_id);
            }
            return Err(e);
        }

        let reason = match (&awarded, ranked.is_empty()) {
            (Some(_), _) => CloseReason::Awarded,
            (None, true) => CloseReason::NoUsableBid,
            (None, false) => CloseReason::AwardFailed,
        };
        guard.close(reason, awarded.as_ref().map(|a| a.assignment_id), now);
        drop(guard);

        let winner = awarded.as_ref().map(|a| a.agent_id);
        if let Some(assignment) = &awarded {
            tracing::info!(
                announcement_id = %announcement_id,
                task_id = %task_id,
                agent_id = %assignment.agent_id,
                score = assignment.score,
                bids = bidders.len(),
                "Task awarded"
            );
            self.publish_award(assignment, now)?;
        }
        for agent_id in bidders.into_iter().filter(|a| Some(*a) != winner) {
            self.sink.on_rejection(announcement_id, agent_id);
        }

        match awarded {
            Some(assignment) => Ok(Some(assignment)),
            None => {
                tracing::info!(
                    announcement_id = %announcement_id,
                    task_id = %task_id,
                    reason = %reason,
                    "No usable bid, using fallback allocator"
                );
                self.allocate_fallback(task_id, now)
            }
        }
    }

    /// Bind `agent_id` to the task.
    ///
    /// `Ok(None)` means this agent cannot legally take the award and the
    /// caller should try the next candidate.
    fn commit_award(
        &self,
        task_id: TaskId,
        agent_id: AgentId,
        score: f64,
        announcement_id: Option<AnnouncementId>,
        via_fallback: bool,
        now: Timestamp,
    ) -> TenderResult<Option<Assignment>> {
        let view = self
            .tracker
            .task(task_id)
            .ok_or(AssignmentError::TaskNotFound { task_id })?;
        if self.tracker.is_plan_cancelled(view.plan_id) {
            return Err(AssignmentError::PlanCancelled {
                plan_id: view.plan_id,
            }
            .into());
        }

        let new = NewAssignment {
            assignment_id: new_entity_id(),
            task_id,
            agent_id,
            announcement_id,
            score,
            via_fallback,
        };

        if let Err(e) = self.registry.reserve(agent_id, new.assignment_id) {
            tracing::debug!(
                task_id = %task_id,
                agent_id = %agent_id,
                error = %e,
                "Candidate cannot take award"
            );
            return Ok(None);
        }

        match self.tracker.create_assignment(new.clone(), now) {
            Ok(assignment) => {
                AllocationMetrics::incr(&self.metrics.awards);
                if via_fallback {
                    AllocationMetrics::incr(&self.metrics.fallback_awards);
                }
                Ok(Some(assignment))
            }
            Err(e) => {
                self.release_agent(agent_id, new.assignment_id, AgentRelease::Declined);
                Err(e)
            }
        }
    }

    fn publish_award(&self, assignment: &Assignment, now: Timestamp) -> TenderResult<()> {
        self.sink.on_award(assignment);
        self.schedule(
            self.deadline_after(now, "ack_grace", self.config.ack_grace)?,
            DeadlineKind::AwardAck(assignment.assignment_id),
        )?;
        self.publish_plan_status(assignment.plan_id);
        Ok(())
    }

    /// Award the task round-robin to an eligible idle agent, or park it.
    pub fn allocate_fallback(&self, task_id: TaskId, now: Timestamp) -> TenderResult<Option<Assignment>> {
        let view = self
            .tracker
            .task(task_id)
            .ok_or(AssignmentError::TaskNotFound { task_id })?;
        if view.outcome.is_terminal() || self.tracker.is_plan_cancelled(view.plan_id) {
            return Ok(None);
        }

        let required: Vec<ActionType> = view.required_capabilities.iter().copied().collect();
        for candidate in self.fallback.candidates(&self.registry, &required) {
            match self.commit_award(task_id, candidate.agent_id(), 0.0, None, true, now) {
                Ok(Some(assignment)) => {
                    self.fallback.advance_past(&candidate);
                    tracing::info!(
                        task_id = %task_id,
                        agent_id = %assignment.agent_id,
                        "Task awarded by fallback allocator"
                    );
                    self.publish_award(&assignment, now)?;
                    return Ok(Some(assignment));
                }
                Ok(None) => continue,
                Err(TenderError::Assignment(AssignmentError::PlanCancelled { .. })) => {
                    return Ok(None)
                }
                Err(e) => return Err(e),
            }
        }

        if self.tracker.mark_parked(task_id, now)? {
            tracing::info!(
                task_id = %task_id,
                required = ?required,
                "No eligible agent, task parked in backlog"
            );
            self.schedule(
                self.deadline_after(now, "backlog_retry_interval", self.config.backlog_retry_interval)?,
                DeadlineKind::BacklogRetry(task_id),
            )?;
            self.publish_plan_status(view.plan_id);
        }
        Ok(None)
    }

    // ------------------------------------------------------------------------
    // Acknowledgement & execution
    // ------------------------------------------------------------------------

    fn owned_assignment(&self, agent_id: AgentId, assignment_id: AssignmentId) -> TenderResult<Assignment> {
        let assignment = self
            .tracker
            .assignment(assignment_id)
            .ok_or(AssignmentError::NotFound { assignment_id })?;
        if assignment.agent_id != agent_id {
            return Err(AssignmentError::WrongAgent {
                assignment_id,
                agent_id,
            }
            .into());
        }
        Ok(assignment)
    }

    /// Winner acknowledges its award and starts executing.
    pub fn accept_award(
        &self,
        agent_id: AgentId,
        assignment_id: AssignmentId,
        now: Timestamp,
    ) -> TenderResult<Assignment> {
        let assignment = self.owned_assignment(agent_id, assignment_id)?;
        if assignment.state == AssignmentState::Awarded {
            let awarded_at = assignment
                .entered_at(AssignmentState::Awarded)
                .unwrap_or(now);
            let deadline = self.deadline_after(awarded_at, "ack_grace", self.config.ack_grace)?;
            if now >= deadline {
                self.expire_award(assignment_id, now)?;
                return Err(AssignmentError::AckWindowExpired {
                    assignment_id,
                    deadline,
                }
                .into());
            }
        }

        self.tracker
            .transition(assignment_id, AssignmentState::Accepted, now)?;

        let started = match self.registry.state_machine(agent_id) {
            Some(machine) => machine
                .transition_from(AgentState::Planning, AgentState::Executing, "award accepted")
                .map_err(TenderError::from),
            None => Err(AgentError::NotRegistered { agent_id }.into()),
        };
        if let Err(e) = started {
            let failed = self.tracker.transition_with(
                assignment_id,
                AssignmentState::Failed,
                Some(FailureCause::AgentLost),
                Some(e.to_string()),
                now,
            )?;
            self.release_agent(agent_id, assignment_id, AgentRelease::Declined);
            self.after_failed_cycle(&failed, now);
            return Err(e);
        }

        let assignment = self
            .tracker
            .transition(assignment_id, AssignmentState::InProgress, now)?;
        self.schedule(
            self.deadline_after(now, "watchdog_interval", self.config.watchdog_interval)?,
            DeadlineKind::Watchdog(assignment_id),
        )?;
        tracing::info!(
            assignment_id = %assignment_id,
            agent_id = %agent_id,
            task_id = %assignment.task_id,
            "Award accepted, execution started"
        );
        self.publish_plan_status(assignment.plan_id);
        Ok(assignment)
    }

    /// Winner turns its award down; the task goes back through the retry path.
    pub fn decline_award(
        &self,
        agent_id: AgentId,
        assignment_id: AssignmentId,
        now: Timestamp,
    ) -> TenderResult<Assignment> {
        self.owned_assignment(agent_id, assignment_id)?;
        let assignment = self.tracker.transition_with(
            assignment_id,
            AssignmentState::Rejected,
            Some(FailureCause::AwardDeclined),
            None,
            now,
        )?;
        tracing::info!(
            assignment_id = %assignment_id,
            agent_id = %agent_id,
            "Award declined"
        );
        self.release_agent(agent_id, assignment_id, AgentRelease::Declined);
        self.after_failed_cycle(&assignment, now);
        Ok(assignment)
    }

    pub fn report_progress(
        &self,
        assignment_id: AssignmentId,
        percent: u8,
        now: Timestamp,
    ) -> TenderResult<Assignment> {
        let assignment = self.tracker.record_progress(assignment_id, percent, now)?;
        tracing::debug!(
            assignment_id = %assignment_id,
            percent = assignment.progress_percent,
            "Progress reported"
        );
        Ok(assignment)
    }

    pub fn report_completion(
        &self,
        assignment_id: AssignmentId,
        success: bool,
        detail: Option<String>,
        now: Timestamp,
    ) -> TenderResult<Assignment> {
        if success {
            let assignment = self.tracker.transition_with(
                assignment_id,
                AssignmentState::Completed,
                None,
                detail,
                now,
            )?;
            AllocationMetrics::incr(&self.metrics.tasks_completed);
            tracing::info!(
                assignment_id = %assignment_id,
                task_id = %assignment.task_id,
                agent_id = %assignment.agent_id,
                "Task completed"
            );
            self.release_agent(assignment.agent_id, assignment_id, AgentRelease::Succeeded);
            self.publish_plan_status(assignment.plan_id);
            Ok(assignment)
        } else {
            let assignment = self.tracker.transition_with(
                assignment_id,
                AssignmentState::Failed,
                Some(FailureCause::ExecutionFailed),
                detail,
                now,
            )?;
            tracing::warn!(
                assignment_id = %assignment_id,
                task_id = %assignment.task_id,
                agent_id = %assignment.agent_id,
                detail = ?assignment.detail,
                "Task execution failed"
            );
            self.release_agent(assignment.agent_id, assignment_id, AgentRelease::Failed);
            self.after_failed_cycle(&assignment, now);
            Ok(assignment)
        }
    }

    // ------------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------------

    fn release_agent(&self, agent_id: AgentId, assignment_id: AssignmentId, release: AgentRelease) {
        if let Some(machine) = self.registry.state_machine(agent_id) {
            let result = match release {
                AgentRelease::Declined => machine.transition_from(
                    AgentState::Planning,
                    AgentState::Idle,
                    "award not taken",
                ),
                AgentRelease::Succeeded => machine.transition_from(
                    AgentState::Executing,
                    AgentState::Idle,
                    "execution succeeded",
                ),
                AgentRelease::Failed => machine
                    .transition_from(AgentState::Executing, AgentState::Error, "execution failed")
                    .and_then(|_| {
                        machine.transition_from(
                            AgentState::Error,
                            AgentState::Idle,
                            "failure acknowledged",
                        )
                    }),
                AgentRelease::Cancelled => match machine.state() {
                    AgentState::Idle => Ok(AgentState::Idle),
                    current => machine.transition_from(current, AgentState::Idle, "plan cancelled"),
                },
            };
            if let Err(e) = result {
                tracing::warn!(
                    agent_id = %agent_id,
                    assignment_id = %assignment_id,
                    error = %e,
                    "Agent could not be returned to idle"
                );
            }
        }
        self.registry.release(agent_id, assignment_id);
    }

    /// Re-announce a task whose award cycle failed, or fail it once the
    /// retry budget is spent.
    fn after_failed_cycle(&self, assignment: &Assignment, now: Timestamp) {
        let task_id = assignment.task_id;
        let Some(view) = self.tracker.task(task_id) else {
            return;
        };
        if view.outcome.is_terminal() || self.tracker.is_plan_cancelled(view.plan_id) {
            self.publish_plan_status(view.plan_id);
            return;
        }

        if view.failed_attempts >= self.config.max_attempts {
            match self
                .tracker
                .fail_task(task_id, FailureCause::RetryBudgetExhausted, now)
            {
                Ok(true) => {
                    AllocationMetrics::incr(&self.metrics.tasks_failed);
                    tracing::warn!(
                        task_id = %task_id,
                        attempts = view.failed_attempts,
                        "Retry budget exhausted, task failed"
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(task_id = %task_id, error = %e, "Failed to mark task failed")
                }
            }
            self.publish_plan_status(view.plan_id);
            return;
        }

        tracing::info!(
            task_id = %task_id,
            attempt = view.failed_attempts + 1,
            cause = ?assignment.failure,
            "Re-announcing task"
        );
        if let Err(e) = self.announce(task_id, now) {
            tracing::warn!(task_id = %task_id, error = %e, "Failed to re-announce task");
        }
        self.publish_plan_status(view.plan_id);
    }

    fn expire_award(&self, assignment_id: AssignmentId, now: Timestamp) -> TenderResult<bool> {
        match self.tracker.transition_with(
            assignment_id,
            AssignmentState::Rejected,
            Some(FailureCause::AwardAckTimeout),
            None,
            now,
        ) {
            Ok(assignment) => {
                AllocationMetrics::incr(&self.metrics.ack_timeouts);
                tracing::warn!(
                    assignment_id = %assignment_id,
                    agent_id = %assignment.agent_id,
                    task_id = %assignment.task_id,
                    "Award not acknowledged in time"
                );
                self.release_agent(assignment.agent_id, assignment_id, AgentRelease::Declined);
                self.after_failed_cycle(&assignment, now);
                Ok(true)
            }
            Err(TenderError::Assignment(AssignmentError::IllegalTransition { .. })) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn handle_ack_deadline(&self, assignment_id: AssignmentId, now: Timestamp) -> TenderResult<()> {
        match self.tracker.assignment(assignment_id) {
            Some(a) if a.state == AssignmentState::Awarded => {
                self.expire_award(assignment_id, now)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn handle_watchdog(&self, assignment_id: AssignmentId, now: Timestamp) -> TenderResult<()> {
        let Some(assignment) = self.tracker.assignment(assignment_id) else {
            return Ok(());
        };
        if assignment.state != AssignmentState::InProgress {
            return Ok(());
        }

        // progress reports and heartbeats both count as signs of life
        let interval = to_time_delta(self.config.watchdog_interval);
        let progress = assignment
            .last_progress_at
            .or_else(|| assignment.entered_at(AssignmentState::InProgress))
            .unwrap_or(now);
        let heartbeat = self
            .registry
            .get(assignment.agent_id)
            .map(|s| s.record.last_heartbeat);
        let last = heartbeat.map_or(progress, |hb| hb.max(progress));
        if now - last < interval {
            let next = self.deadline_after(last, "watchdog_interval", self.config.watchdog_interval)?;
            return self.schedule(next, DeadlineKind::Watchdog(assignment_id));
        }

        match self.tracker.transition_with(
            assignment_id,
            AssignmentState::Failed,
            Some(FailureCause::WatchdogTimeout),
            Some("no progress or heartbeat within watchdog interval".to_string()),
            now,
        ) {
            Ok(failed) => {
                AllocationMetrics::incr(&self.metrics.watchdog_timeouts);
                tracing::warn!(
                    assignment_id = %assignment_id,
                    agent_id = %failed.agent_id,
                    last_signal = %last,
                    "Execution watchdog fired"
                );
                self.release_agent(failed.agent_id, assignment_id, AgentRelease::Failed);
                self.after_failed_cycle(&failed, now);
                Ok(())
            }
            Err(TenderError::Assignment(AssignmentError::IllegalTransition { .. })) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn handle_backlog_retry(&self, task_id: TaskId, now: Timestamp) -> TenderResult<()> {
        let Some(view) = self.tracker.task(task_id) else {
            return Ok(());
        };
        if view.outcome != TaskOutcome::Parked {
            return Ok(());
        }

        let parked_since = view.parked_since.unwrap_or(now);
        if now - parked_since >= to_time_delta(self.config.max_backlog_wait) {
            if self
                .tracker
                .fail_task(task_id, FailureCause::BacklogWaitExceeded, now)?
            {
                AllocationMetrics::incr(&self.metrics.tasks_failed);
                tracing::warn!(
                    task_id = %task_id,
                    parked_since = %parked_since,
                    "No eligible agent within maximum backlog wait, task failed"
                );
            }
            self.publish_plan_status(view.plan_id);
            return Ok(());
        }

        self.allocate_fallback(task_id, now).map(|_| ())
    }

    /// Remove an agent and push its in-flight work back through the retry path.
    pub fn remove_agent(&self, agent_id: AgentId, now: Timestamp) -> TenderResult<()> {
        let snapshot = self.registry.deregister(agent_id)?;
        let Some(assignment_id) = snapshot.current_assignment else {
            return Ok(());
        };
        let Some(assignment) = self.tracker.assignment(assignment_id) else {
            return Ok(());
        };

        let to = match assignment.state {
            AssignmentState::Awarded => AssignmentState::Rejected,
            AssignmentState::Accepted | AssignmentState::InProgress => AssignmentState::Failed,
            _ => return Ok(()),
        };
        match self.tracker.transition_with(
            assignment_id,
            to,
            Some(FailureCause::AgentLost),
            None,
            now,
        ) {
            Ok(lost) => {
                tracing::warn!(
                    agent_id = %agent_id,
                    assignment_id = %assignment_id,
                    task_id = %lost.task_id,
                    "Reassigning work of departed agent"
                );
                self.after_failed_cycle(&lost, now);
            }
            Err(e) => {
                tracing::debug!(assignment_id = %assignment_id, error = %e, "Assignment already settled")
            }
        }
        Ok(())
    }

    fn sweep_stale_agents(&self, now: Timestamp) -> usize {
        let stale = self
            .registry
            .stale_agents(now, self.config.heartbeat_timeout);
        let mut removed = 0;
        for agent_id in stale {
            tracing::warn!(agent_id = %agent_id, "Agent heartbeat timed out");
            match self.remove_agent(agent_id, now) {
                Ok(()) => {
                    removed += 1;
                    AllocationMetrics::incr(&self.metrics.agents_expired);
                }
                Err(e) => tracing::debug!(agent_id = %agent_id, error = %e, "Agent already removed"),
            }
        }
        removed
    }

    /// Drop closed announcements older than the retention period.
    pub fn prune_closed(&self, now: Timestamp) -> usize {
        let retention = to_time_delta(self.config.announcement_retention);
        let before = self.announcements.len();
        self.announcements.retain(|_, entry| match entry.try_lock() {
            Ok(guard) => !(guard.announcement.status == AnnouncementStatus::Closed
                && guard
                    .announcement
                    .closed_at
                    .map(|at| now - at >= retention)
                    .unwrap_or(false)),
            Err(_) => true,
        });
        before.saturating_sub(self.announcements.len())
    }

    /// Archive plans that finished more than `plan_retention` ago.
    pub fn archive_finished_plans(&self, now: Timestamp) -> usize {
        let archived = self
            .tracker
            .archive_finished(now, to_time_delta(self.config.plan_retention));
        for plan in &archived {
            AllocationMetrics::incr(&self.metrics.plans_archived);
            tracing::info!(
                plan_id = %plan.plan.plan_id,
                status = %plan.status,
                finished_at = %plan.finished_at,
                tasks = plan.tasks.len(),
                assignments = plan.assignments.len(),
                "Plan archived"
            );
        }
        archived.len()
    }

    // ------------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------------

    /// Cancel every unfinished task of a plan. Returns false if the plan was
    /// already cancelled, has completed or has been archived.
    pub fn cancel_plan(&self, plan_id: PlanId, now: Timestamp) -> TenderResult<bool> {
        if !self.tracker.mark_plan_cancelled(plan_id)? {
            return Ok(false);
        }
        tracing::info!(plan_id = %plan_id, "Cancelling plan");

        for view in self.tracker.plan_tasks(plan_id)? {
            let task_id = view.task.task_id;
            if let Some(announcement_id) = view.current_announcement {
                if let Ok(entry) = self.entry(announcement_id) {
                    let mut guard = lock_entry(&entry)?;
                    if guard.announcement.status == AnnouncementStatus::Open {
                        let discarded = guard.bids.len();
                        guard.close(CloseReason::Cancelled, None, now);
                        tracing::info!(
                            announcement_id = %announcement_id,
                            discarded_bids = discarded,
                            "Announcement closed by cancellation"
                        );
                    }
                }
            }

            // Once the task is Cancelled no award path can create an assignment
            // for it, so the re-read below sees every award that got in first.
            self.tracker.cancel_task(task_id, now)?;
            if let Some(assignment_id) = self.tracker.task(task_id).and_then(|v| v.active_assignment) {
                match self
                    .tracker
                    .transition(assignment_id, AssignmentState::Cancelled, now)
                {
                    Ok(cancelled) => {
                        self.release_agent(cancelled.agent_id, assignment_id, AgentRelease::Cancelled)
                    }
                    Err(e) => tracing::debug!(
                        assignment_id = %assignment_id,
                        error = %e,
                        "Assignment already settled"
                    ),
                }
            }
        }

        self.publish_plan_status(plan_id);
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------------

    /// `now` plus a configured duration, refusing instants chrono cannot hold.
    fn deadline_after(
        &self,
        now: Timestamp,
        field: &str,
        duration: std::time::Duration,
    ) -> TenderResult<Timestamp> {
        checked_deadline(now, duration).ok_or_else(|| {
            tracing::error!(field = field, now = %now, "Deadline out of range");
            ConfigError::DeadlineOutOfRange {
                field: field.to_string(),
            }
            .into()
        })
    }

    fn schedule(&self, due: Timestamp, kind: DeadlineKind) -> TenderResult<()> {
        self.deadlines
            .lock()
            .map_err(|_| TenderError::lock_poisoned("deadline queue"))?
            .schedule(due, kind);
        Ok(())
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.deadlines.lock().ok().and_then(|q| q.next_due())
    }

    /// Fire every due deadline, expire silent agents, prune old announcements
    /// and archive finished plans. A failing handler is logged and does not
    /// stop the rest.
    pub fn tick(&self, now: Timestamp) -> TenderResult<TickReport> {
        let due = self
            .deadlines
            .lock()
            .map_err(|_| TenderError::lock_poisoned("deadline queue"))?
            .drain_due(now);
        let deadlines_fired = due.len();

        for kind in due {
            let result = match kind {
                DeadlineKind::BiddingClosed(id) => self.evaluate(id, now).map(|_| ()),
                DeadlineKind::AwardAck(id) => self.handle_ack_deadline(id, now),
                DeadlineKind::Watchdog(id) => self.handle_watchdog(id, now),
                DeadlineKind::BacklogRetry(id) => self.handle_backlog_retry(id, now),
            };
            if let Err(e) = result {
                tracing::warn!(deadline = ?kind, error = %e, "Deadline handler failed");
            }
        }

        let agents_expired = self.sweep_stale_agents(now);
        let announcements_pruned = self.prune_closed(now);
        let plans_archived = self.archive_finished_plans(now);
        AllocationMetrics::incr(&self.metrics.ticks);

        Ok(TickReport {
            deadlines_fired,
            agents_expired,
            announcements_pruned,
            plans_archived,
        })
    }

    fn publish_plan_status(&self, plan_id: PlanId) {
        match self.tracker.refresh_plan_status(plan_id) {
            Ok(Some(status)) => {
                tracing::info!(plan_id = %plan_id, status = %status, "Plan status changed");
                self.sink.on_plan_status(plan_id, status);
            }
            Ok(None) => {}
            Err(e) => tracing::error!(plan_id = %plan_id, error = %e, "Failed to refresh plan status"),
        }
    }
}

impl std::fmt::Debug for ContractNetEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractNetEngine")
            .field("config", &self.config)
            .field("announcements", &self.announcements.len())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeSet;
    use tender_agents::CapabilityProfile;
    use tender_core::{AgentRole, NoopEventSink, Plan, Task, ValidationError};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    struct Fixture {
        engine: ContractNetEngine,
        registry: Arc<AgentRegistry>,
        tracker: Arc<TaskAssignmentTracker>,
    }

    fn fixture() -> TenderResult<Fixture> {
        let registry = Arc::new(AgentRegistry::new());
        let tracker = Arc::new(TaskAssignmentTracker::new());
        let engine = ContractNetEngine::new(
            AllocationConfig::default(),
            Arc::clone(&registry),
            Arc::clone(&tracker),
            Arc::new(NoopEventSink),
        )?;
        Ok(Fixture {
            engine,
            registry,
            tracker,
        })
    }

    fn track(tracker: &TaskAssignmentTracker, task: Task) -> TenderResult<TaskId> {
        let task_id = task.task_id;
        let required = task
            .required_capabilities()
            .unwrap_or_else(|_| BTreeSet::from([task.action]));
        tracker.register_plan(
            Plan {
                plan_id: new_entity_id(),
                task_ids: vec![task_id],
                request_ref: None,
                submitted_at: t0(),
            },
            vec![(task, required)],
        )?;
        Ok(task_id)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = AllocationConfig {
            max_attempts: 0,
            ..AllocationConfig::default()
        };
        let result = ContractNetEngine::new(
            config,
            Arc::new(AgentRegistry::new()),
            Arc::new(TaskAssignmentTracker::new()),
            Arc::new(NoopEventSink),
        );
        assert!(matches!(result, Err(TenderError::Config(_))));
    }

    #[test]
    fn test_announce_schedules_bidding_deadline() -> TenderResult<()> {
        let f = fixture()?;
        let task_id = track(
            &f.tracker,
            Task::new(new_entity_id(), ActionType::Mine, t0()).with_parameter("block", "coal_ore"),
        )?;

        let ann = f.engine.announce(task_id, t0())?;
        assert_eq!(ann.status, AnnouncementStatus::Open);
        assert_eq!(ann.attempt, 1);
        assert_eq!(ann.deadline, t0() + Duration::seconds(30));
        assert_eq!(f.engine.next_deadline(), Some(ann.deadline));
        assert_eq!(
            f.tracker.task(task_id).map(|v| v.outcome),
            Some(TaskOutcome::Announced)
        );
        Ok(())
    }

    #[test]
    fn test_announce_invalid_task_creates_nothing() -> TenderResult<()> {
        let f = fixture()?;
        let task_id = track(&f.tracker, Task::new(new_entity_id(), ActionType::Place, t0()))?;

        let err = f.engine.announce(task_id, t0()).unwrap_err();
        assert!(matches!(
            err,
            TenderError::Validation(ValidationError::MissingParameter { .. })
        ));
        assert!(f.engine.announcements_for_task(task_id).is_empty());
        assert_eq!(f.engine.next_deadline(), None);
        Ok(())
    }

    #[test]
    fn test_announce_terminal_task_is_closed() -> TenderResult<()> {
        let f = fixture()?;
        let task_id = track(
            &f.tracker,
            Task::new(new_entity_id(), ActionType::Gather, t0()).with_parameter("resource", "sand"),
        )?;
        f.tracker
            .fail_task(task_id, FailureCause::RetryBudgetExhausted, t0())?;

        let err = f.engine.announce(task_id, t0()).unwrap_err();
        assert_eq!(
            err,
            AssignmentError::TaskClosed {
                task_id,
                outcome: TaskOutcome::Failed
            }
            .into()
        );
        Ok(())
    }

    #[test]
    fn test_announce_near_end_of_time_is_an_error() -> TenderResult<()> {
        let f = fixture()?;
        let task_id = track(
            &f.tracker,
            Task::new(new_entity_id(), ActionType::Mine, t0()).with_parameter("block", "stone"),
        )?;

        let err = f.engine.announce(task_id, Timestamp::MAX_UTC).unwrap_err();
        assert_eq!(
            err,
            ConfigError::DeadlineOutOfRange {
                field: "bidding_window".to_string()
            }
            .into()
        );
        assert!(f.engine.announcements_for_task(task_id).is_empty());
        assert_eq!(
            f.tracker.task(task_id).map(|v| v.outcome),
            Some(TaskOutcome::Pending)
        );
        Ok(())
    }

    #[test]
    fn test_evaluate_unknown_announcement() -> TenderResult<()> {
        let f = fixture()?;
        let id = new_entity_id();
        assert_eq!(
            f.engine.evaluate(id, t0()).unwrap_err(),
            BidError::AnnouncementNotFound {
                announcement_id: id
            }
            .into()
        );
        Ok(())
    }

    #[test]
    fn test_tick_reports_fired_deadlines() -> TenderResult<()> {
        let f = fixture()?;
        let miner = new_entity_id();
        f.registry.register(
            miner,
            AgentRole::Miner,
            CapabilityProfile::for_role(AgentRole::Miner),
            t0(),
        )?;
        let task_id = track(
            &f.tracker,
            Task::new(new_entity_id(), ActionType::Mine, t0()).with_parameter("block", "stone"),
        )?;
        f.engine.announce(task_id, t0())?;
        f.registry.heartbeat(miner, t0() + Duration::seconds(20))?;

        let quiet = f.engine.tick(t0() + Duration::seconds(10))?;
        assert_eq!(quiet, TickReport::default());

        let report = f.engine.tick(t0() + Duration::seconds(30))?;
        assert_eq!(report.deadlines_fired, 1);
        assert_eq!(report.agents_expired, 0);
        let assignment = f
            .tracker
            .task(task_id)
            .and_then(|v| v.active_assignment)
            .and_then(|id| f.tracker.assignment(id))
            .ok_or(AssignmentError::TaskNotFound { task_id })?;
        assert!(assignment.via_fallback);
        assert_eq!(f.engine.metrics().snapshot().ticks, 2);
        Ok(())
    }
}
