//! Run many solves concurrently and summarize them in a manifest.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::SolveConfiguration;
use crate::error::{Error, FailureKind, Result};
use crate::events::{ProtocolEvent, SolveStatus};
use crate::registry::DriverRegistry;
use crate::session::{SessionOptions, SolveInput, SolverSession};
use crate::settings::BatchSettings;

/// One solve to run.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub job_id: String,
    pub config: SolveConfiguration,
    pub input: SolveInput,
}

/// Outcome of one job, as stored in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJobRecord {
    pub job_id: String,
    pub solver: String,
    /// `ok` or `error`.
    pub status: String,
    pub final_status: Option<SolveStatus>,
    pub solutions: usize,
    pub exit_code: Option<i32>,
    pub failure: Option<FailureKind>,
    pub error: Option<String>,
    pub elapsed_ms: Option<u64>,
    /// Default section of the last solution.
    pub last_solution: Option<String>,
}

impl BatchJobRecord {
    fn new(job: &BatchJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            solver: job.config.solver.clone(),
            status: "error".into(),
            final_status: None,
            solutions: 0,
            exit_code: None,
            failure: None,
            error: None,
            elapsed_ms: None,
            last_solution: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    fn absorb(&mut self, events: &[ProtocolEvent]) {
        for event in events {
            match event {
                ProtocolEvent::SolutionOutput { sections, .. } => {
                    self.solutions += 1;
                    self.last_solution = sections.get("default").map(str::to_string);
                }
                ProtocolEvent::FinalStatus { status, .. } => self.final_status = Some(*status),
                ProtocolEvent::ErrorOutput(diag) if self.error.is_none() => {
                    self.error = Some(diag.message.clone());
                }
                ProtocolEvent::Finished { elapsed, exit_code } => {
                    self.status = "ok".into();
                    self.exit_code = *exit_code;
                    self.elapsed_ms = elapsed.map(|d| d.as_millis() as u64);
                }
                ProtocolEvent::Failure { exit_code, kind } => {
                    self.status = "error".into();
                    self.exit_code = *exit_code;
                    self.failure = Some(*kind);
                }
                _ => {}
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchManifest {
    pub created_at: DateTime<Utc>,
    pub num_jobs: usize,
    pub success: usize,
    pub failure: usize,
    pub jobs: Vec<BatchJobRecord>,
}

/// Records in job order plus counts.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub success: usize,
    pub failure: usize,
    pub jobs: Vec<BatchJobRecord>,
}

impl BatchSummary {
    pub fn manifest(&self) -> BatchManifest {
        BatchManifest {
            created_at: Utc::now(),
            num_jobs: self.jobs.len(),
            success: self.success,
            failure: self.failure,
            jobs: self.jobs.clone(),
        }
    }
}

/// Run `jobs` with at most `concurrency` sessions at once (0 = one per CPU).
pub async fn run_batch(
    registry: Arc<DriverRegistry>,
    jobs: Vec<BatchJob>,
    concurrency: usize,
) -> BatchSummary {
    run_batch_with(registry, jobs, concurrency, SessionOptions::default()).await
}

pub async fn run_batch_with(
    registry: Arc<DriverRegistry>,
    jobs: Vec<BatchJob>,
    concurrency: usize,
    options: SessionOptions,
) -> BatchSummary {
    let limit = BatchSettings { concurrency }.effective_concurrency();
    info!(jobs = jobs.len(), concurrency = limit, "starting batch");
    let permits = Arc::new(Semaphore::new(limit));

    let handles: Vec<_> = jobs
        .into_iter()
        .map(|job| {
            let registry = Arc::clone(&registry);
            let permits = Arc::clone(&permits);
            let fallback = BatchJobRecord::new(&job);
            let handle = tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                run_job(registry, job, options).await
            });
            (fallback, handle)
        })
        .collect();

    let mut records = Vec::with_capacity(handles.len());
    for (mut fallback, handle) in handles {
        let record = match handle.await {
            Ok(record) => record,
            Err(e) => {
                warn!(job = %fallback.job_id, error = %e, "batch job panicked");
                fallback.failure = Some(FailureKind::UnknownError);
                fallback.error = Some(e.to_string());
                fallback
            }
        };
        records.push(record);
    }

    let success = records.iter().filter(|r| r.is_ok()).count();
    let failure = records.len() - success;
    info!(success, failure, "batch finished");
    BatchSummary {
        success,
        failure,
        jobs: records,
    }
}

async fn run_job(registry: Arc<DriverRegistry>, job: BatchJob, options: SessionOptions) -> BatchJobRecord {
    let mut record = BatchJobRecord::new(&job);
    let session = SolverSession::with_options(registry, options);
    match session.start(&job.config, job.input).await {
        Ok(stream) => {
            let events = stream.collect().await;
            record.absorb(&events);
        }
        Err(e) => {
            warn!(job = %job.job_id, error = %e, "batch job failed to start");
            record.failure = Some(FailureKind::FailedToStart);
            record.error = Some(e.to_string());
        }
    }
    record
}

pub fn write_batch_manifest(path: &Path, manifest: &BatchManifest) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(manifest).map_err(std::io::Error::from)?;
    fs::write(path, json)?;
    Ok(())
}

pub fn load_batch_manifest(path: &Path) -> Result<BatchManifest> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| Error::Io(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::OutputSections;
    use crate::identity::SolverIdentity;
    use std::time::Duration;

    fn job(id: &str) -> BatchJob {
        let identity = SolverIdentity::from_json(&serde_json::json!({
            "id": "org.gecode.gecode",
            "version": "6.3.0"
        }))
        .unwrap();
        BatchJob {
            job_id: id.into(),
            config: SolveConfiguration::builtin(Arc::new(identity)),
            input: SolveInput::model_text("solve satisfy;"),
        }
    }

    #[test]
    fn record_absorbs_events() {
        let mut sections = OutputSections::new();
        sections.insert("default", "x = 3;\n");
        let mut record = BatchJobRecord::new(&job("j1"));
        record.absorb(&[
            ProtocolEvent::Started,
            ProtocolEvent::SolutionOutput {
                sections,
                elapsed: None,
            },
            ProtocolEvent::FinalStatus {
                status: SolveStatus::OptimalSolution,
                elapsed: None,
            },
            ProtocolEvent::Finished {
                elapsed: Some(Duration::from_millis(42)),
                exit_code: Some(0),
            },
        ]);
        assert!(record.is_ok());
        assert_eq!(record.solutions, 1);
        assert_eq!(record.last_solution.as_deref(), Some("x = 3;\n"));
        assert_eq!(record.final_status, Some(SolveStatus::OptimalSolution));
        assert_eq!(record.elapsed_ms, Some(42));
    }

    #[tokio::test]
    async fn unconfigured_registry_fails_to_start() {
        let summary = run_batch(DriverRegistry::shared(), vec![job("a"), job("b")], 1).await;
        assert_eq!(summary.success, 0);
        assert_eq!(summary.failure, 2);
        assert_eq!(summary.jobs[0].job_id, "a");
        assert_eq!(summary.jobs[1].failure, Some(FailureKind::FailedToStart));
    }

    #[test]
    fn manifest_writes_and_reads_back() {
        let mut record = BatchJobRecord::new(&job("j1"));
        record.status = "ok".into();
        let summary = BatchSummary {
            success: 1,
            failure: 0,
            jobs: vec![record.clone()],
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("batch_manifest.json");
        write_batch_manifest(&path, &summary.manifest()).unwrap();
        let parsed = load_batch_manifest(&path).unwrap();
        assert_eq!(parsed.num_jobs, 1);
        assert_eq!(parsed.jobs, vec![record]);
    }
}
