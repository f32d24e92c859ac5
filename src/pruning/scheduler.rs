use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::pruning::cron::CronSchedule;
use crate::pruning::errors::{PruningError, PruningResult};
use crate::pruning::job::{PruneReport, PruningJob};

/// Runs the pruning job on its cron schedule
pub struct PruningScheduler {
    job: Arc<PruningJob>,
    schedule: CronSchedule,
    shutdown_signal: Arc<Notify>,
}

impl PruningScheduler {
    /// Creates a scheduler for `job`, parsing its cron expression.
    pub fn new(job: Arc<PruningJob>) -> PruningResult<Self> {
        let schedule = job.config().cron.parse()?;
        Ok(Self {
            job,
            schedule,
            shutdown_signal: Arc::new(Notify::new()),
        })
    }

    /// Starts the scheduler in a background task
    pub fn start(&self) -> JoinHandle<()> {
        if !self.job.config().enabled {
            info!("Pruning scheduler is disabled");
            return tokio::spawn(async {});
        }

        info!(cron = %self.schedule, "Starting pruning scheduler");
        let job = Arc::clone(&self.job);
        let schedule = self.schedule.clone();
        let shutdown_signal = Arc::clone(&self.shutdown_signal);

        tokio::spawn(async move {
            Self::run_scheduler(job, schedule, shutdown_signal).await;
        })
    }

    /// Stops the scheduler after any run in progress
    pub fn stop(&self) {
        info!("Stopping pruning scheduler");
        self.shutdown_signal.notify_one();
    }

    async fn run_scheduler(
        job: Arc<PruningJob>,
        schedule: CronSchedule,
        shutdown_signal: Arc<Notify>,
    ) {
        loop {
            let now = Utc::now();
            let Some(next_run) = schedule.next_after(now) else {
                warn!(cron = %schedule, "Cron expression never fires, stopping scheduler");
                break;
            };
            info!("Next pruning run scheduled for: {next_run}");
            let wait = (next_run - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = shutdown_signal.notified() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    Self::perform_run(&job).await;
                }
            }
        }

        info!("Pruning scheduler stopped");
    }

    async fn perform_run(job: &PruningJob) {
        match job.run().await {
            Ok(report) => info!(
                certificates = report.certificates_deleted,
                requests = report.requests_deleted,
                failures = report.failures,
                "Scheduled pruning run completed"
            ),
            Err(PruningError::AlreadyRunning) => {
                info!("Previous pruning run still in progress, skipping this one")
            }
            Err(e) => error!("Scheduled pruning run failed: {e}"),
        }
    }

    /// Runs the job now, outside the schedule
    pub async fn trigger_immediate_run(&self) -> PruningResult<PruneReport> {
        info!("Triggering immediate pruning run");
        self.job
            .run()
            .await
            .inspect_err(|e| error!("Immediate pruning run failed: {e}"))
    }
}
