//! Context worker loop.
//!
//! Runs inside the dedicated thread's current-thread runtime: boots the
//! engine, reports readiness, then serves commands, job timers and stats
//! sampling until shutdown or termination.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::command::{ContextCommand, ExitReason};
use crate::engine::{Engine, EngineSetup, JobSpec};
use crate::error::RuntimeError;

const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

struct ScheduledJob {
    name: String,
    interval: Duration,
    next: Instant,
}

/// Interval jobs registered through `service.every`.
struct JobSchedule {
    jobs: Vec<ScheduledJob>,
}

impl JobSchedule {
    fn new(specs: Vec<JobSpec>, now: Instant) -> Self {
        let jobs = specs
            .into_iter()
            .map(|spec| ScheduledJob {
                interval: spec.interval(),
                next: now + spec.interval(),
                name: spec.name,
            })
            .collect();
        Self { jobs }
    }

    fn next_due(&self) -> Option<Instant> {
        self.jobs.iter().map(|job| job.next).min()
    }

    /// Names of every job due at `now`, rescheduled from `now`.
    fn take_due(&mut self, now: Instant) -> Vec<String> {
        let mut due = Vec::new();
        for job in self.jobs.iter_mut().filter(|job| job.next <= now) {
            due.push(job.name.clone());
            job.next = now + job.interval;
        }
        due
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

pub(crate) async fn run_context(
    setup: EngineSetup,
    mut cmd_rx: mpsc::Receiver<ContextCommand>,
    mut shutdown_rx: watch::Receiver<bool>,
    ready_tx: oneshot::Sender<Result<(), RuntimeError>>,
) -> ExitReason {
    let project_id = setup.project_id.clone();
    let sample_interval = setup.config.sample_interval.max(MIN_SAMPLE_INTERVAL);

    let (engine, jobs) = match Engine::boot(setup) {
        Ok(booted) => booted,
        Err(e) => {
            tracing::debug!(project = %project_id, error = %e, "context boot failed");
            let _ = ready_tx.send(Err(e));
            return ExitReason::BootFailed;
        }
    };

    if ready_tx.send(Ok(())).is_err() {
        // The start call went away while booting
        engine.run_hooks("shutdown").ok();
        return ExitReason::Abandoned;
    }

    let mut schedule = JobSchedule::new(jobs, Instant::now());
    let mut sampler = tokio::time::interval_at(Instant::now() + sample_interval, sample_interval);
    sampler.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::debug!(project = %project_id, "context serving");

    loop {
        if *shutdown_rx.borrow() {
            break ExitReason::Abandoned;
        }

        let next_job = schedule.next_due();

        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::debug!(project = %project_id, "context terminated");
                    break ExitReason::Abandoned;
                }
            }

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    tracing::debug!(project = %project_id, "command channel closed");
                    break ExitReason::Abandoned;
                };

                match cmd {
                    ContextCommand::Invoke { method, path, request, reply } => {
                        let _ = reply.send(engine.invoke(&method, &path, &request));
                    }
                    ContextCommand::UiResponse { request_id, outcome } => {
                        engine.resolve_ui(&request_id, outcome);
                    }
                    ContextCommand::Shutdown { reply } => {
                        let result = engine.run_hooks("shutdown").map_err(|message| RuntimeError::Hook {
                            hook: "shutdown".to_string(),
                            message,
                        });
                        let _ = reply.send(result);
                        break ExitReason::Shutdown;
                    }
                }
            }

            _ = sleep_until(next_job) => {
                for name in schedule.take_due(Instant::now()) {
                    engine.run_job(&name);
                }
            }

            _ = sampler.tick() => {
                engine.sample();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_fires_due_jobs_and_reschedules() {
        let start = Instant::now();
        let mut schedule = JobSchedule::new(
            vec![
                JobSpec {
                    name: "fast".to_string(),
                    interval_ms: 100,
                },
                JobSpec {
                    name: "slow".to_string(),
                    interval_ms: 1000,
                },
            ],
            start,
        );

        assert_eq!(schedule.next_due(), Some(start + Duration::from_millis(100)));
        assert!(schedule.take_due(start).is_empty());

        let at = start + Duration::from_millis(150);
        assert_eq!(schedule.take_due(at), vec!["fast".to_string()]);
        assert_eq!(schedule.next_due(), Some(at + Duration::from_millis(100)));

        let later = start + Duration::from_millis(1500);
        assert_eq!(schedule.take_due(later), vec!["fast".to_string(), "slow".to_string()]);
    }

    #[test]
    fn empty_schedule_has_no_deadline() {
        let schedule = JobSchedule::new(Vec::new(), Instant::now());
        assert!(schedule.next_due().is_none());
    }
}
