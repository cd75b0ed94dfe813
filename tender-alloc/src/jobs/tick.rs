//! Allocation tick background task.
//!
//! Every engine timer (bidding deadlines, award acknowledgement, execution
//! watchdog, backlog retry) sits in the deadline queue and only fires when
//! [`PlanCoordinator::tick`] runs. This task calls it on a fixed interval
//! with the wall clock.

use crate::contract_net::TickReport;
use crate::coordinator::PlanCoordinator;
use crate::metrics::AllocationMetrics;
use chrono::Utc;
use std::sync::Arc;
use tender_core::AllocationConfig;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Run ticks until the shutdown signal is received.
///
/// # Returns
///
/// The engine's metrics, after logging a final snapshot.
pub async fn allocation_tick_task(
    coordinator: Arc<PlanCoordinator>,
    config: AllocationConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<AllocationMetrics> {
    let metrics = coordinator.metrics();

    let mut tick_interval = interval(config.tick_interval);
    tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        tick_interval_ms = config.tick_interval.as_millis() as u64,
        "Allocation tick task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Allocation tick task shutting down");
                    break;
                }
            }

            _ = tick_interval.tick() => {
                match coordinator.tick(Utc::now()) {
                    Ok(report) if report != TickReport::default() => {
                        tracing::debug!(
                            deadlines_fired = report.deadlines_fired,
                            agents_expired = report.agents_expired,
                            announcements_pruned = report.announcements_pruned,
                            plans_archived = report.plans_archived,
                            "Tick processed"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Tick failed"),
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        ticks = snapshot.ticks,
        announcements = snapshot.announcements,
        awards = snapshot.awards,
        fallback_awards = snapshot.fallback_awards,
        ack_timeouts = snapshot.ack_timeouts,
        watchdog_timeouts = snapshot.watchdog_timeouts,
        tasks_failed = snapshot.tasks_failed,
        plans_archived = snapshot.plans_archived,
        "Allocation tick task completed"
    );

    metrics
}
