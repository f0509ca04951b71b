//! Driver loops for the reactivation scheduler and executor.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::funnel::executor::ReactivationExecutor;
use crate::funnel::scheduler::ReactivationScheduler;

/// Runs `scan_once` every `every` until `cancel` fires. A failed tick is
/// logged and the loop waits for the next one.
pub fn spawn_scan_loop(
    scheduler: ReactivationScheduler,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match scheduler.scan_once(Utc::now()).await {
                        Ok(report) if report.enqueued > 0 => {
                            info!(
                                stale = report.stale,
                                enqueued = report.enqueued,
                                exhausted = report.exhausted,
                                "reactivation scan enqueued follow-ups"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => error!(error = %err, "reactivation scan failed"),
                    }
                }
                _ = cancel.cancelled() => {
                    info!("reactivation scan loop shutting down");
                    break;
                }
            }
        }
    })
}

/// Runs `dispatch_once` every `every` until `cancel` fires.
pub fn spawn_dispatch_loop(
    executor: ReactivationExecutor,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match executor.dispatch_once(Utc::now()).await {
                        Ok(report) if report.due > 0 => {
                            info!(
                                due = report.due,
                                delivered = report.delivered,
                                unrecorded = report.unrecorded,
                                deferred = report.deferred,
                                superseded = report.superseded,
                                "reactivation dispatch finished"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => error!(error = %err, "reactivation dispatch failed"),
                    }
                }
                _ = cancel.cancelled() => {
                    info!("reactivation dispatch loop shutting down");
                    break;
                }
            }
        }
    })
}
