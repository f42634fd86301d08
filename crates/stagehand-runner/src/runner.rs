//! Pipeline orchestration.

use crate::cancel::Cancellation;
use crate::capture::OutputFormat;
use crate::lifecycle::{ContainerLifecycle, JobRun};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use stagehand_core::{
    ContainerRuntime, Error, Job, PipelineDescriptor, Result, ScriptMaterializer, ShellScript,
    Stage,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Configuration for pipeline execution.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How long a started container may take to report running.
    pub readiness_timeout: Duration,
    /// Deadline for each individual runtime call.
    pub operation_timeout: Duration,
    pub pull_timeout: Duration,
    /// Deadline for a job's script, output drain included. `None` waits forever.
    pub job_timeout: Option<Duration>,
    /// Jobs of one stage allowed to run at the same time.
    pub max_parallel_jobs: usize,
    pub output_format: OutputFormat,
    pub color: bool,
    /// Host directory mounted into every job container.
    pub workspace: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            readiness_timeout: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(60),
            pull_timeout: Duration::from_secs(600),
            job_timeout: None,
            max_parallel_jobs: 1,
            output_format: OutputFormat::Tagged,
            color: false,
            workspace: None,
        }
    }
}

/// Result of one successful job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub stage: String,
    pub job: String,
    pub container: String,
    pub image: String,
    pub exit_code: i64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub stdout_lines: u64,
    pub stderr_lines: u64,
    /// Set when the container could not be removed afterwards.
    pub cleanup_error: Option<String>,
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub jobs: Vec<JobReport>,
    pub duration_ms: u64,
}

impl PipelineReport {
    /// Jobs whose container was left behind.
    pub fn cleanup_failures(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs.iter().filter(|j| j.cleanup_error.is_some())
    }
}

/// Runs pipelines stage by stage, each job in its own container.
pub struct PipelineRunner {
    runtime: Arc<dyn ContainerRuntime>,
    materializer: Arc<dyn ScriptMaterializer>,
    config: RunnerConfig,
    cancel: Cancellation,
}

impl PipelineRunner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: RunnerConfig) -> Self {
        Self {
            runtime,
            materializer: Arc::new(ShellScript::default()),
            config,
            cancel: Cancellation::never(),
        }
    }

    pub fn with_materializer(mut self, materializer: Arc<dyn ScriptMaterializer>) -> Self {
        self.materializer = materializer;
        self
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn lifecycle(&self) -> ContainerLifecycle<'_> {
        ContainerLifecycle::new(
            &self.runtime,
            self.materializer.as_ref(),
            &self.config,
            &self.cancel,
        )
    }

    /// Run every stage in order, stopping at the first failing job.
    pub async fn run_pipeline<O, E>(
        &self,
        pipeline: &PipelineDescriptor,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<PipelineReport>
    where
        O: AsyncWrite + Unpin + Send,
        E: AsyncWrite + Unpin + Send,
    {
        let clock = Instant::now();
        let mut jobs = Vec::with_capacity(pipeline.job_count());

        for stage in pipeline.stages() {
            if self.cancel.is_cancelled() {
                warn!(stage = stage.name(), "Run cancelled before stage");
                return Err(Error::Cancelled);
            }
            if stage.is_empty() {
                debug!(stage = stage.name(), "Stage has no jobs");
                continue;
            }

            info!(stage = stage.name(), jobs = stage.jobs().len(), "Running stage");
            let reports = if self.config.max_parallel_jobs > 1 && stage.jobs().len() > 1 {
                self.run_stage_parallel(stage, stdout, stderr).await?
            } else {
                self.run_stage_sequential(stage, stdout, stderr).await?
            };
            jobs.extend(reports);
        }

        let duration_ms = clock.elapsed().as_millis() as u64;
        info!(jobs = jobs.len(), duration_ms, "Pipeline succeeded");
        Ok(PipelineReport { jobs, duration_ms })
    }

    /// Run a single job outside of any pipeline.
    pub async fn run_pipeline_job<O, E>(
        &self,
        job: &Job,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<JobReport>
    where
        O: AsyncWrite + Unpin + Send,
        E: AsyncWrite + Unpin + Send,
    {
        info!(stage = job.stage(), job = job.name(), image = job.image(), "Running job");
        let started_at = Utc::now();
        let clock = Instant::now();

        let JobRun {
            container,
            outcome,
            cleanup,
        } = self.lifecycle().execute(job, stdout, stderr).await;
        let cleanup_error = cleanup.map(|e| e.to_string());
        let duration_ms = clock.elapsed().as_millis() as u64;

        match outcome {
            Ok(summary) => {
                info!(job = job.name(), duration_ms, "Job succeeded");
                Ok(JobReport {
                    stage: job.stage().to_string(),
                    job: job.name().to_string(),
                    container: container.map(|c| c.name).unwrap_or_default(),
                    image: job.image().to_string(),
                    exit_code: summary.exit_code,
                    started_at,
                    duration_ms,
                    stdout_lines: summary.stats.stdout_lines,
                    stderr_lines: summary.stats.stderr_lines,
                    cleanup_error,
                })
            }
            Err(source) => {
                error!(job = job.name(), error = %source, duration_ms, "Job failed");
                Err(Error::Job {
                    stage: job.stage().to_string(),
                    job: job.name().to_string(),
                    source: Box::new(source),
                    cleanup_error,
                })
            }
        }
    }

    async fn run_stage_sequential<O, E>(
        &self,
        stage: &Stage,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<Vec<JobReport>>
    where
        O: AsyncWrite + Unpin + Send,
        E: AsyncWrite + Unpin + Send,
    {
        let mut reports = Vec::with_capacity(stage.jobs().len());
        for job in stage.jobs() {
            reports.push(self.run_pipeline_job(job, stdout, stderr).await?);
        }
        Ok(reports)
    }

    /// Run a stage's jobs concurrently into private buffers, then flush the
    /// buffers in declaration order. Jobs not yet started when one fails are skipped.
    async fn run_stage_parallel<O, E>(
        &self,
        stage: &Stage,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<Vec<JobReport>>
    where
        O: AsyncWrite + Unpin + Send,
        E: AsyncWrite + Unpin + Send,
    {
        let failed = AtomicBool::new(false);

        let results: Vec<(Vec<u8>, Vec<u8>, Option<Result<JobReport>>)> =
            stream::iter(stage.jobs())
                .map(|job| {
                    let failed = &failed;
                    async move {
                        let mut out = Vec::new();
                        let mut err = Vec::new();
                        if failed.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
                            debug!(job = job.name(), "Skipping job after stage failure");
                            return (out, err, None);
                        }

                        let result = self.run_pipeline_job(job, &mut out, &mut err).await;
                        if result.is_err() {
                            failed.store(true, Ordering::SeqCst);
                        }
                        (out, err, Some(result))
                    }
                })
                .buffered(self.config.max_parallel_jobs)
                .collect()
                .await;

        let mut reports = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (out, err, result) in results {
            stdout.write_all(&out).await.map_err(flush_error)?;
            stderr.write_all(&err).await.map_err(flush_error)?;

            match result {
                Some(Ok(report)) => reports.push(report),
                Some(Err(e)) if first_error.is_none() => first_error = Some(e),
                Some(Err(e)) => debug!(error = %e, "Additional job failure in stage"),
                None => {}
            }
        }
        stdout.flush().await.map_err(flush_error)?;
        stderr.flush().await.map_err(flush_error)?;

        match first_error {
            Some(e) => Err(e),
            None if self.cancel.is_cancelled() && reports.len() < stage.jobs().len() => {
                Err(Error::Cancelled)
            }
            None => Ok(reports),
        }
    }
}

fn flush_error(e: std::io::Error) -> Error {
    Error::OutputStream(format!("Failed to write job output: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.readiness_timeout, Duration::from_secs(30));
        assert_eq!(config.operation_timeout, Duration::from_secs(60));
        assert_eq!(config.max_parallel_jobs, 1);
        assert_eq!(config.output_format, OutputFormat::Tagged);
        assert!(config.job_timeout.is_none());
    }

    #[test]
    fn test_report_serializes() {
        let report = PipelineReport {
            jobs: vec![JobReport {
                stage: "build".to_string(),
                job: "compile".to_string(),
                container: "stagehand_compile_0123abcd".to_string(),
                image: "alpine:3.20".to_string(),
                exit_code: 0,
                started_at: Utc::now(),
                duration_ms: 12,
                stdout_lines: 1,
                stderr_lines: 0,
                cleanup_error: Some("gone".to_string()),
            }],
            duration_ms: 15,
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["jobs"][0]["job"], "compile");
        assert_eq!(report.cleanup_failures().count(), 1);
    }
}
