use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::pruning::errors::{PruningError, PruningResult, RecordStoreError};
use crate::pruning::records::IdGenerator;
use crate::pruning::repository::{CertificateRepository, RequestRepository};
use crate::pruning::retention::Retention;

/// Configuration of the pruning job and its schedule
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PruningConfig {
    /// Whether the scheduler runs the job
    pub enabled: bool,
    /// Five field cron expression
    pub cron: String,
    #[serde(alias = "certRetentionTime")]
    pub cert_retention_time: u32,
    #[serde(alias = "certRetentionUnit")]
    pub cert_retention_unit: String,
    #[serde(alias = "requestRetentionTime")]
    pub request_retention_time: u32,
    #[serde(alias = "requestRetentionUnit")]
    pub request_retention_unit: String,
    /// Maximum certificates examined per run, 0 for no limit
    #[serde(alias = "certSearchSizeLimit")]
    pub cert_search_size_limit: usize,
    /// Maximum requests examined per run, 0 for no limit
    #[serde(alias = "requestSearchSizeLimit")]
    pub request_search_size_limit: usize,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cron: "0 0 * * *".to_string(),
            cert_retention_time: 30,
            cert_retention_unit: "day".to_string(),
            request_retention_time: 30,
            request_retention_unit: "day".to_string(),
            cert_search_size_limit: 1000,
            request_search_size_limit: 1000,
        }
    }
}

impl PruningConfig {
    pub fn cert_retention(&self) -> PruningResult<Retention> {
        Retention::from_config(self.cert_retention_time, &self.cert_retention_unit)
    }

    pub fn request_retention(&self) -> PruningResult<Retention> {
        Retention::from_config(self.request_retention_time, &self.request_retention_unit)
    }

    fn cert_limit(&self) -> Option<usize> {
        Some(self.cert_search_size_limit).filter(|limit| *limit > 0)
    }

    fn request_limit(&self) -> Option<usize> {
        Some(self.request_search_size_limit).filter(|limit| *limit > 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
}

/// Outcome of one pruning run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub certificates_deleted: usize,
    pub requests_deleted: usize,
    /// Records that matched but could not be deleted
    pub failures: usize,
}

/// Deletes certificate and request records older than their retention
/// window.
pub struct PruningJob {
    config: PruningConfig,
    certificates: Arc<dyn CertificateRepository>,
    requests: Arc<dyn RequestRepository>,
    running: AtomicBool,
}

/// Marks the job as running until dropped.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PruningJob {
    pub fn new(
        config: PruningConfig,
        certificates: Arc<dyn CertificateRepository>,
        requests: Arc<dyn RequestRepository>,
    ) -> Self {
        Self {
            config,
            certificates,
            requests,
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PruningConfig {
        &self.config
    }

    pub fn state(&self) -> JobState {
        if self.running.load(Ordering::Acquire) {
            JobState::Running
        } else {
            JobState::Idle
        }
    }

    pub async fn run(&self) -> PruningResult<PruneReport> {
        self.run_at(Utc::now()).await
    }

    /// Runs one pass with `now` as the reference time.
    pub async fn run_at(&self, now: DateTime<Utc>) -> PruningResult<PruneReport> {
        let _guard = self.begin()?;
        info!("Starting pruning run");

        check_id_generator("certificate", self.certificates.id_generator())?;
        check_id_generator("request", self.requests.id_generator())?;

        let cert_cutoff = self.config.cert_retention()?.cutoff(now)?;
        let request_cutoff = self.config.request_retention()?.cutoff(now)?;

        let mut report = PruneReport::default();
        self.prune_certificates(cert_cutoff, &mut report).await?;
        self.prune_requests(request_cutoff, &mut report).await?;

        info!(
            certificates = report.certificates_deleted,
            requests = report.requests_deleted,
            failures = report.failures,
            "Pruning run finished"
        );
        Ok(report)
    }

    fn begin(&self) -> PruningResult<RunningGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PruningError::AlreadyRunning)?;
        Ok(RunningGuard(&self.running))
    }

    async fn prune_certificates(
        &self,
        cutoff: DateTime<Utc>,
        report: &mut PruneReport,
    ) -> PruningResult<()> {
        let expired = self
            .certificates
            .certificates_expired_before(cutoff, self.config.cert_limit())
            .await
            .inspect_err(|e| error!(%cutoff, "Certificate query failed: {e}"))?;
        debug!(count = expired.len(), %cutoff, "Certificates past retention");

        for cert in expired {
            if let Err(e) = self.certificates.delete_certificate(&cert.serial).await {
                warn!(serial = %cert.serial, "Failed to delete certificate: {e}");
                report.failures += 1;
                continue;
            }
            report.certificates_deleted += 1;

            let Some(request_id) = cert.request_id else {
                continue;
            };
            match self.requests.delete_request(&request_id).await {
                Ok(()) => report.requests_deleted += 1,
                Err(RecordStoreError::NotFound(_)) => {
                    debug!(serial = %cert.serial, %request_id, "Linked request already gone")
                }
                Err(e) => {
                    warn!(serial = %cert.serial, %request_id, "Failed to delete linked request: {e}");
                    report.failures += 1;
                }
            }
        }
        Ok(())
    }

    async fn prune_requests(
        &self,
        cutoff: DateTime<Utc>,
        report: &mut PruneReport,
    ) -> PruningResult<()> {
        let stale = self
            .requests
            .requests_modified_before(cutoff, self.config.request_limit())
            .await
            .inspect_err(|e| error!(%cutoff, "Request query failed: {e}"))?;
        debug!(count = stale.len(), %cutoff, "Requests past retention");

        for request in stale {
            match self.requests.delete_request(&request.id).await {
                Ok(()) => report.requests_deleted += 1,
                Err(e) => {
                    warn!(request_id = %request.id, "Failed to delete request: {e}");
                    report.failures += 1;
                }
            }
        }
        Ok(())
    }
}

fn check_id_generator(repository: &'static str, generator: IdGenerator) -> PruningResult<()> {
    if generator == IdGenerator::Random {
        return Ok(());
    }
    error!(repository, %generator, "Pruning requires random ids");
    Err(PruningError::UnsupportedIdGenerator {
        repository,
        generator,
    })
}
