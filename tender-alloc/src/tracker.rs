//! Task and assignment bookkeeping.
//!
//! The tracker is the single source of truth for which task is held by which
//! agent and how each plan is doing. Every change goes through a guarded,
//! legality-checked method and lands in the audit log.
//!
//! Lock order: plan record → task shard → assignment shard → agent load →
//! audit log. No method holds a later lock while acquiring an earlier one.
//!
//! Finished plans stay in the live tables for a retention period and are then
//! archived; the audit trail outlives them.

use chrono::TimeDelta;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tender_core::{
    new_entity_id, ActionType, AgentId, AnnouncementId, Assignment, AssignmentError,
    AssignmentId, AssignmentState, FailureCause, Plan, PlanId, PlanStatus, Task, TaskId,
    TaskOutcome, TenderError, TenderResult, Timestamp,
};

// ============================================================================
// AUDIT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuditEvent {
    Assignment {
        assignment_id: AssignmentId,
        agent_id: AgentId,
        from: Option<AssignmentState>,
        to: AssignmentState,
    },
    Task {
        from: TaskOutcome,
        to: TaskOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: Timestamp,
    pub plan_id: PlanId,
    pub task_id: TaskId,
    pub event: AuditEvent,
}

// ============================================================================
// RECORDS
// ============================================================================

/// Point-in-time view of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskView {
    pub task: Task,
    pub plan_id: PlanId,
    pub required_capabilities: BTreeSet<ActionType>,
    pub outcome: TaskOutcome,
    /// Award cycles that ended without success
    pub failed_attempts: u32,
    pub active_assignment: Option<AssignmentId>,
    pub current_announcement: Option<AnnouncementId>,
    pub parked_since: Option<Timestamp>,
    pub failure: Option<FailureCause>,
    /// When the task reached its final outcome
    pub finished_at: Option<Timestamp>,
}

#[derive(Debug)]
struct TaskRecord {
    view: TaskView,
}

#[derive(Debug)]
struct PlanRecord {
    plan: Plan,
    cancelled: AtomicBool,
    reported: Mutex<PlanStatus>,
}

/// Parameters of a new assignment.
#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub assignment_id: AssignmentId,
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub announcement_id: Option<AnnouncementId>,
    pub score: f64,
    pub via_fallback: bool,
}

/// A finished plan moved out of the live tables.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedPlan {
    pub plan: Plan,
    pub status: PlanStatus,
    pub finished_at: Timestamp,
    pub tasks: Vec<TaskView>,
    pub assignments: Vec<Assignment>,
}

impl NewAssignment {
    pub fn new(task_id: TaskId, agent_id: AgentId, score: f64) -> Self {
        Self {
            assignment_id: new_entity_id(),
            task_id,
            agent_id,
            announcement_id: None,
            score,
            via_fallback: false,
        }
    }
}

// ============================================================================
// TRACKER
// ============================================================================

#[derive(Debug, Default)]
pub struct TaskAssignmentTracker {
    plans: DashMap<PlanId, Arc<PlanRecord>>,
    tasks: DashMap<TaskId, TaskRecord>,
    assignments: DashMap<AssignmentId, Assignment>,
    /// Non-terminal assignments per agent
    loads: DashMap<AgentId, usize>,
    /// Final status of archived plans
    archived: DashMap<PlanId, PlanStatus>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl TaskAssignmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Plans
    // ------------------------------------------------------------------------

    /// Register a plan and its already-validated tasks.
    pub fn register_plan(
        &self,
        plan: Plan,
        tasks: Vec<(Task, BTreeSet<ActionType>)>,
    ) -> TenderResult<()> {
        let plan_id = plan.plan_id;
        if self.plans.contains_key(&plan_id) || self.archived.contains_key(&plan_id) {
            return Err(AssignmentError::DuplicatePlan { plan_id }.into());
        }

        for (task, required) in tasks {
            self.tasks.insert(
                task.task_id,
                TaskRecord {
                    view: TaskView {
                        task,
                        plan_id,
                        required_capabilities: required,
                        outcome: TaskOutcome::Pending,
                        failed_attempts: 0,
                        active_assignment: None,
                        current_announcement: None,
                        parked_since: None,
                        failure: None,
                        finished_at: None,
                    },
                },
            );
        }

        self.plans.insert(
            plan_id,
            Arc::new(PlanRecord {
                plan,
                cancelled: AtomicBool::new(false),
                reported: Mutex::new(PlanStatus::Pending),
            }),
        );
        Ok(())
    }

    pub fn plan(&self, plan_id: PlanId) -> Option<Plan> {
        self.plans.get(&plan_id).map(|p| p.plan.clone())
    }

    fn plan_record(&self, plan_id: PlanId) -> TenderResult<Arc<PlanRecord>> {
        self.plans
            .get(&plan_id)
            .map(|p| Arc::clone(&p))
            .ok_or_else(|| AssignmentError::PlanNotFound { plan_id }.into())
    }

    pub fn is_plan_cancelled(&self, plan_id: PlanId) -> bool {
        self.plans
            .get(&plan_id)
            .map(|p| p.cancelled.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Flag the plan cancelled. Returns false if it already was, or if it
    /// has already completed or been archived.
    pub fn mark_plan_cancelled(&self, plan_id: PlanId) -> TenderResult<bool> {
        if self.archived.contains_key(&plan_id) {
            return Ok(false);
        }
        let record = self.plan_record(plan_id)?;
        if self.derive_status(&record) == PlanStatus::Complete {
            return Ok(false);
        }
        Ok(!record.cancelled.swap(true, Ordering::AcqRel))
    }

    pub fn is_archived(&self, plan_id: PlanId) -> bool {
        self.archived.contains_key(&plan_id)
    }

    pub fn plan_tasks(&self, plan_id: PlanId) -> TenderResult<Vec<TaskView>> {
        let record = self.plan_record(plan_id)?;
        Ok(record
            .plan
            .task_ids
            .iter()
            .filter_map(|id| self.task(*id))
            .collect())
    }

    pub fn plan_status(&self, plan_id: PlanId) -> TenderResult<PlanStatus> {
        if let Some(status) = self.archived.get(&plan_id) {
            return Ok(*status);
        }
        let record = self.plan_record(plan_id)?;
        Ok(self.derive_status(&record))
    }

    fn derive_status(&self, record: &PlanRecord) -> PlanStatus {
        let mut retried = false;
        let outcomes: Vec<TaskOutcome> = record
            .plan
            .task_ids
            .iter()
            .filter_map(|id| {
                self.tasks.get(id).map(|t| {
                    retried |= t.view.failed_attempts > 0;
                    t.view.outcome
                })
            })
            .collect();
        let status = PlanStatus::from_outcomes(&outcomes, record.cancelled.load(Ordering::Acquire));
        // a task being re-announced has already had an assignment
        if status == PlanStatus::Pending && retried {
            PlanStatus::InProgress
        } else {
            status
        }
    }

    /// Percentage of the plan's tasks that reached a final outcome.
    pub fn plan_progress(&self, plan_id: PlanId) -> TenderResult<f64> {
        if self.archived.contains_key(&plan_id) {
            return Ok(100.0);
        }
        let tasks = self.plan_tasks(plan_id)?;
        if tasks.is_empty() {
            return Ok(100.0);
        }
        let done = tasks.iter().filter(|t| t.outcome.is_terminal()).count();
        Ok(done as f64 * 100.0 / tasks.len() as f64)
    }

    /// Recompute the plan status; returns it only if it differs from the
    /// last one reported.
    pub fn refresh_plan_status(&self, plan_id: PlanId) -> TenderResult<Option<PlanStatus>> {
        let record = self.plan_record(plan_id)?;
        let mut reported = record
            .reported
            .lock()
            .map_err(|_| TenderError::lock_poisoned("plan status"))?;
        let status = self.derive_status(&record);
        if *reported == status || reported.is_terminal() {
            return Ok(None);
        }
        *reported = status;
        Ok(Some(status))
    }

    // ------------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------------

    pub fn task(&self, task_id: TaskId) -> Option<TaskView> {
        self.tasks.get(&task_id).map(|t| t.view.clone())
    }

    pub fn contains_task(&self, task_id: TaskId) -> bool {
        self.tasks.contains_key(&task_id)
    }

    /// Move a non-terminal task to `to`. Terminal tasks are left alone and
    /// `Ok(false)` is returned.
    fn set_outcome(
        &self,
        task_id: TaskId,
        to: TaskOutcome,
        now: Timestamp,
        update: impl FnOnce(&mut TaskView),
    ) -> TenderResult<bool> {
        let (plan_id, from) = {
            let mut record = self
                .tasks
                .get_mut(&task_id)
                .ok_or(AssignmentError::TaskNotFound { task_id })?;
            let from = record.view.outcome;
            if from.is_terminal() {
                return Ok(false);
            }
            record.view.outcome = to;
            if to.is_terminal() {
                record.view.finished_at = Some(now);
            }
            update(&mut record.view);
            (record.view.plan_id, from)
        };
        if from != to {
            self.audit(now, plan_id, task_id, AuditEvent::Task { from, to })?;
        }
        Ok(true)
    }

    pub fn mark_announced(
        &self,
        task_id: TaskId,
        announcement_id: AnnouncementId,
        now: Timestamp,
    ) -> TenderResult<bool> {
        self.set_outcome(task_id, TaskOutcome::Announced, now, |view| {
            view.current_announcement = Some(announcement_id);
            view.parked_since = None;
        })
    }

    /// Park the task in the backlog, keeping the original parking time on
    /// repeated calls.
    pub fn mark_parked(&self, task_id: TaskId, now: Timestamp) -> TenderResult<bool> {
        self.set_outcome(task_id, TaskOutcome::Parked, now, |view| {
            view.current_announcement = None;
            if view.parked_since.is_none() {
                view.parked_since = Some(now);
            }
        })
    }

    pub fn fail_task(&self, task_id: TaskId, cause: FailureCause, now: Timestamp) -> TenderResult<bool> {
        self.set_outcome(task_id, TaskOutcome::Failed, now, |view| {
            view.failure = Some(cause);
            view.current_announcement = None;
            view.parked_since = None;
        })
    }

    pub fn cancel_task(&self, task_id: TaskId, now: Timestamp) -> TenderResult<bool> {
        self.set_outcome(task_id, TaskOutcome::Cancelled, now, |view| {
            view.current_announcement = None;
            view.parked_since = None;
        })
    }

    // ------------------------------------------------------------------------
    // Assignments
    // ------------------------------------------------------------------------

    /// Create an assignment in `Awarded`.
    ///
    /// Rejects the attempt, leaving every record untouched, if the task
    /// already has a non-terminal assignment or its plan is cancelled.
    pub fn create_assignment(&self, new: NewAssignment, now: Timestamp) -> TenderResult<Assignment> {
        let task_id = new.task_id;
        let plan_id = self
            .tasks
            .get(&task_id)
            .map(|t| t.view.plan_id)
            .ok_or(AssignmentError::TaskNotFound { task_id })?;
        if self.is_plan_cancelled(plan_id) {
            return Err(AssignmentError::PlanCancelled { plan_id }.into());
        }

        let (assignment, from_outcome) = {
            let mut record = self
                .tasks
                .get_mut(&task_id)
                .ok_or(AssignmentError::TaskNotFound { task_id })?;

            if record.view.outcome == TaskOutcome::Cancelled {
                return Err(AssignmentError::PlanCancelled { plan_id }.into());
            }

            if let Some(existing) = record.view.active_assignment {
                let still_active = self
                    .assignments
                    .get(&existing)
                    .map(|a| !a.is_terminal())
                    .unwrap_or(false);
                if still_active {
                    tracing::error!(
                        task_id = %task_id,
                        agent_id = %new.agent_id,
                        existing = %existing,
                        "Double assignment attempt rejected"
                    );
                    return Err(AssignmentError::DoubleAssignmentAttempt {
                        task_id,
                        agent_id: new.agent_id,
                        existing,
                    }
                    .into());
                }
            }

            if record.view.outcome.is_terminal() {
                return Err(AssignmentError::IllegalTransition {
                    assignment_id: new.assignment_id,
                    from: AssignmentState::Pending,
                    to: AssignmentState::Awarded,
                }
                .into());
            }

            let mut assignment = Assignment::new(
                new.assignment_id,
                task_id,
                plan_id,
                new.agent_id,
                new.announcement_id,
                new.score,
                new.via_fallback,
                record.view.failed_attempts + 1,
                now,
            );
            assignment.transition(AssignmentState::Awarded, now)?;

            let from_outcome = record.view.outcome;
            record.view.active_assignment = Some(assignment.assignment_id);
            record.view.outcome = TaskOutcome::Awarded;
            record.view.current_announcement = None;
            record.view.parked_since = None;
            self.assignments
                .insert(assignment.assignment_id, assignment.clone());
            (assignment, from_outcome)
        };
        *self.loads.entry(assignment.agent_id).or_insert(0) += 1;

        self.audit(
            now,
            plan_id,
            task_id,
            AuditEvent::Assignment {
                assignment_id: assignment.assignment_id,
                agent_id: assignment.agent_id,
                from: None,
                to: AssignmentState::Awarded,
            },
        )?;
        self.audit(
            now,
            plan_id,
            task_id,
            AuditEvent::Task {
                from: from_outcome,
                to: TaskOutcome::Awarded,
            },
        )?;
        Ok(assignment)
    }

    pub fn transition(
        &self,
        assignment_id: AssignmentId,
        to: AssignmentState,
        now: Timestamp,
    ) -> TenderResult<Assignment> {
        self.transition_with(assignment_id, to, None, None, now)
    }

    /// Apply a legal assignment transition and mirror it onto the task.
    ///
    /// `Rejected` and `Failed` count as a used award cycle and free the
    /// task for another attempt; the caller decides whether to retry.
    pub fn transition_with(
        &self,
        assignment_id: AssignmentId,
        to: AssignmentState,
        cause: Option<FailureCause>,
        detail: Option<String>,
        now: Timestamp,
    ) -> TenderResult<Assignment> {
        let (updated, from) = {
            let mut assignment = self
                .assignments
                .get_mut(&assignment_id)
                .ok_or(AssignmentError::NotFound { assignment_id })?;
            let from = assignment.state;
            assignment.transition(to, now)?;
            if cause.is_some() {
                assignment.failure = cause;
            }
            if detail.is_some() {
                assignment.detail = detail;
            }
            (assignment.clone(), from)
        };
        if to.is_terminal() {
            self.loads.remove_if_mut(&updated.agent_id, |_, n| {
                *n = n.saturating_sub(1);
                *n == 0
            });
        }

        self.audit(
            now,
            updated.plan_id,
            updated.task_id,
            AuditEvent::Assignment {
                assignment_id,
                agent_id: updated.agent_id,
                from: Some(from),
                to,
            },
        )?;

        let task_id = updated.task_id;
        match to {
            AssignmentState::Accepted | AssignmentState::InProgress => {
                self.set_outcome(task_id, TaskOutcome::InProgress, now, |_| {})?;
            }
            AssignmentState::Completed => {
                self.set_outcome(task_id, TaskOutcome::Completed, now, |view| {
                    view.active_assignment = None;
                })?;
            }
            AssignmentState::Rejected | AssignmentState::Failed => {
                if let Some(mut record) = self.tasks.get_mut(&task_id) {
                    if record.view.active_assignment == Some(assignment_id) {
                        record.view.active_assignment = None;
                    }
                    record.view.failed_attempts += 1;
                }
            }
            AssignmentState::Cancelled => {
                if let Some(mut record) = self.tasks.get_mut(&task_id) {
                    if record.view.active_assignment == Some(assignment_id) {
                        record.view.active_assignment = None;
                    }
                }
            }
            AssignmentState::Pending | AssignmentState::Awarded => {}
        }

        Ok(updated)
    }

    /// Record a progress signal for an executing assignment.
    pub fn record_progress(
        &self,
        assignment_id: AssignmentId,
        percent: u8,
        now: Timestamp,
    ) -> TenderResult<Assignment> {
        let mut assignment = self
            .assignments
            .get_mut(&assignment_id)
            .ok_or(AssignmentError::NotFound { assignment_id })?;
        if assignment.state != AssignmentState::InProgress {
            return Err(AssignmentError::IllegalTransition {
                assignment_id,
                from: assignment.state,
                to: AssignmentState::InProgress,
            }
            .into());
        }
        assignment.progress_percent = percent.min(100).max(assignment.progress_percent);
        assignment.last_progress_at = Some(now);
        Ok(assignment.clone())
    }

    pub fn assignment(&self, assignment_id: AssignmentId) -> Option<Assignment> {
        self.assignments.get(&assignment_id).map(|a| a.clone())
    }

    pub fn assignments_for_task(&self, task_id: TaskId) -> Vec<Assignment> {
        let mut all: Vec<Assignment> = self
            .assignments
            .iter()
            .filter(|a| a.task_id == task_id)
            .map(|a| a.clone())
            .collect();
        all.sort_by_key(|a| a.attempt);
        all
    }

    /// Non-terminal assignments held by `agent_id`.
    pub fn agent_load(&self, agent_id: AgentId) -> usize {
        self.loads.get(&agent_id).map(|n| *n).unwrap_or(0)
    }

    // ------------------------------------------------------------------------
    // Archive
    // ------------------------------------------------------------------------

    /// When the last task of the plan settled, or `None` while any task is
    /// unfinished or still holds an assignment.
    fn finished_at(&self, record: &PlanRecord) -> Option<Timestamp> {
        let mut latest = None;
        for task_id in &record.plan.task_ids {
            let task = self.tasks.get(task_id)?;
            if !task.view.outcome.is_terminal() || task.view.active_assignment.is_some() {
                return None;
            }
            latest = latest.max(task.view.finished_at);
        }
        latest
    }

    /// Move plans that finished at least `retention` ago out of the live
    /// tables. Their final status stays queryable and the audit log is kept.
    pub fn archive_finished(&self, now: Timestamp, retention: TimeDelta) -> Vec<ArchivedPlan> {
        let records: Vec<Arc<PlanRecord>> = self.plans.iter().map(|p| Arc::clone(p.value())).collect();

        let mut archived = Vec::new();
        let mut archived_tasks = HashSet::new();
        for record in records {
            let Some(finished_at) = self.finished_at(&record) else {
                continue;
            };
            if now - finished_at < retention {
                continue;
            }

            let plan_id = record.plan.plan_id;
            let status = self.derive_status(&record);
            self.archived.insert(plan_id, status);
            self.plans.remove(&plan_id);
            let tasks: Vec<TaskView> = record
                .plan
                .task_ids
                .iter()
                .filter_map(|id| self.tasks.remove(id).map(|(_, t)| t.view))
                .collect();
            archived_tasks.extend(tasks.iter().map(|t| t.task.task_id));
            archived.push(ArchivedPlan {
                plan: record.plan.clone(),
                status,
                finished_at,
                tasks,
                assignments: Vec::new(),
            });
        }

        if !archived_tasks.is_empty() {
            let mut removed: Vec<Assignment> = Vec::new();
            self.assignments.retain(|_, a| {
                if archived_tasks.contains(&a.task_id) {
                    removed.push(a.clone());
                    false
                } else {
                    true
                }
            });
            removed.sort_by_key(|a| a.attempt);
            for entry in &mut archived {
                entry.assignments = removed
                    .iter()
                    .filter(|a| a.plan_id == entry.plan.plan_id)
                    .cloned()
                    .collect();
            }
        }
        archived
    }

    // ------------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------------

    fn audit(
        &self,
        at: Timestamp,
        plan_id: PlanId,
        task_id: TaskId,
        event: AuditEvent,
    ) -> TenderResult<()> {
        self.audit
            .lock()
            .map_err(|_| TenderError::lock_poisoned("audit log"))?
            .push(AuditEntry {
                at,
                plan_id,
                task_id,
                event,
            });
        Ok(())
    }

    pub fn audit_log(&self) -> TenderResult<Vec<AuditEntry>> {
        Ok(self
            .audit
            .lock()
            .map_err(|_| TenderError::lock_poisoned("audit log"))?
            .clone())
    }

    pub fn audit_for_task(&self, task_id: TaskId) -> TenderResult<Vec<AuditEntry>> {
        Ok(self
            .audit_log()?
            .into_iter()
            .filter(|e| e.task_id == task_id)
            .collect())
    }

    /// Export the audit trail of one plan as JSON lines.
    pub fn audit_json(&self, plan_id: PlanId) -> TenderResult<String> {
        let mut lines = Vec::new();
        for entry in self.audit_log()?.into_iter().filter(|e| e.plan_id == plan_id) {
            let line = serde_json::to_string(&entry).map_err(|e| TenderError::InvalidMessage {
                message_type: "audit".to_string(),
                reason: e.to_string(),
            })?;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }
}
