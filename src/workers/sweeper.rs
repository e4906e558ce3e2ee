use chrono::Utc;
use cron::Schedule;
use std::str::FromStr;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::settings::AppConfig;
use crate::modules::job::model::JobStatus;
use crate::modules::job::service::JobService;

pub const STUCK_JOB_MESSAGE: &str = "Processing timed out";

#[derive(Debug, Clone)]
pub struct SweepPolicy {
    pub stale_after: time::Duration,
    /// `None` leaves PROCESSING jobs alone.
    pub stuck_after: Option<time::Duration>,
    pub batch_size: i64,
}

impl SweepPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            stale_after: time::Duration::seconds(config.stale_job_seconds),
            stuck_after: (config.stuck_job_seconds > 0)
                .then(|| time::Duration::seconds(config.stuck_job_seconds)),
            batch_size: config.sweep_batch_size,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub redispatched: usize,
    /// Listed as stale but moved on before the claim.
    pub skipped: usize,
    pub failed_out: usize,
    pub errors: usize,
}

/// One pass over durable state. Per-job errors are counted, not propagated.
pub async fn sweep_once(jobs: &JobService, policy: &SweepPolicy, now: OffsetDateTime) -> SweepReport {
    let mut report = SweepReport::default();

    match jobs
        .stale_jobs(JobStatus::Queued, now - policy.stale_after, policy.batch_size)
        .await
    {
        Ok(stale) => {
            for job in stale {
                match jobs.republish(&job).await {
                    Ok(true) => report.redispatched += 1,
                    Ok(false) => report.skipped += 1,
                    Err(e) => {
                        warn!("Re-dispatch of stale job {} failed: {}", job.id, e);
                        report.errors += 1;
                    }
                }
            }
        }
        Err(e) => {
            error!("Listing stale QUEUED jobs failed: {}", e);
            report.errors += 1;
        }
    }

    if let Some(stuck_after) = policy.stuck_after {
        match jobs
            .stale_jobs(JobStatus::Processing, now - stuck_after, policy.batch_size)
            .await
        {
            Ok(stuck) => {
                for job in stuck {
                    match jobs.fail_job(job.id, STUCK_JOB_MESSAGE).await {
                        Ok(_) => report.failed_out += 1,
                        Err(e) => {
                            warn!("Failing stuck job {} failed: {}", job.id, e);
                            report.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                error!("Listing stuck PROCESSING jobs failed: {}", e);
                report.errors += 1;
            }
        }
    }

    report
}

/// Runs [`sweep_once`] on every tick of `schedule` until `shutdown` flips.
pub async fn start_sweeper(
    jobs: JobService,
    policy: SweepPolicy,
    expression: &str,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let schedule = Schedule::from_str(expression)?;
    info!("🧹 Sweeper started with schedule '{}'", expression);

    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            warn!("Sweep schedule has no upcoming runs");
            return Ok(());
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();

        tokio::select! {
            _ = shutdown.changed() => {
                info!("Sweeper shutting down");
                return Ok(());
            }
            _ = tokio::time::sleep(wait) => {}
        }

        let report = sweep_once(&jobs, &policy, OffsetDateTime::now_utc()).await;
        info!(
            "Sweep finished: {} re-dispatched, {} skipped, {} failed out, {} errors",
            report.redispatched, report.skipped, report.failed_out, report.errors
        );
    }
}
