//! Per-job container lifecycle.
//!
//! Every job gets a fresh container: resolve the image, create, start, wait
//! until running, inject the script, exec it while capturing output, and
//! remove the container again. Removal runs on every path once a container
//! exists; if the job future is dropped halfway, a background task removes it.

use crate::cancel::Cancellation;
use crate::capture::{CaptureStats, LineFormatter, capture_output};
use crate::runner::RunnerConfig;
use futures::StreamExt;
use serde::Serialize;
use stagehand_core::{ContainerRuntime, ContainerSpec, Error, Job, Result, ScriptMaterializer};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::time::{Duration, sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Directory the script archive is extracted into.
pub const SCRIPT_DIR: &str = "/tmp";
pub const SCRIPT_NAME: &str = "stagehand-job.sh";
/// Where the host workspace is mounted when one is configured.
pub const WORKSPACE_MOUNT: &str = "/builds/workspace";

const CONTAINER_PREFIX: &str = "stagehand";
const READINESS_INITIAL_DELAY: Duration = Duration::from_millis(100);
const READINESS_MAX_DELAY: Duration = Duration::from_secs(2);
const EXEC_EXIT_POLL: Duration = Duration::from_millis(50);

/// A container created for exactly one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
    pub image: String,
}

/// Outcome of a successful exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecSummary {
    pub exit_code: i64,
    pub stats: CaptureStats,
}

/// Everything that happened to one job's container.
#[derive(Debug)]
pub struct JobRun {
    /// `None` when the job failed before a container was created.
    pub container: Option<ContainerHandle>,
    pub outcome: Result<ExecSummary>,
    /// Removal failure; never replaces `outcome`.
    pub cleanup: Option<Error>,
}

pub struct ContainerLifecycle<'a> {
    runtime: &'a Arc<dyn ContainerRuntime>,
    materializer: &'a dyn ScriptMaterializer,
    config: &'a RunnerConfig,
    cancel: &'a Cancellation,
}

impl<'a> ContainerLifecycle<'a> {
    pub fn new(
        runtime: &'a Arc<dyn ContainerRuntime>,
        materializer: &'a dyn ScriptMaterializer,
        config: &'a RunnerConfig,
        cancel: &'a Cancellation,
    ) -> Self {
        Self {
            runtime,
            materializer,
            config,
            cancel,
        }
    }

    /// Run one job in its own container, writing its output to the sinks.
    pub async fn execute<O, E>(&self, job: &Job, stdout: &mut O, stderr: &mut E) -> JobRun
    where
        O: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        if let Err(e) = self.ensure_image(job.image()).await {
            return JobRun {
                container: None,
                outcome: Err(e),
                cleanup: None,
            };
        }

        let handle = match self.create(job).await {
            Ok(handle) => handle,
            Err(e) => {
                return JobRun {
                    container: None,
                    outcome: Err(e),
                    cleanup: None,
                };
            }
        };

        let mut guard = RemovalGuard::new(
            Arc::clone(self.runtime),
            handle.id.clone(),
            self.config.operation_timeout,
        );

        let outcome = self.run_in(&handle, job, stdout, stderr).await;
        let cleanup = self.teardown(&handle).await;
        guard.disarm();

        JobRun {
            container: Some(handle),
            outcome,
            cleanup,
        }
    }

    async fn run_in<O, E>(
        &self,
        handle: &ContainerHandle,
        job: &Job,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<ExecSummary>
    where
        O: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        self.start(handle).await?;
        self.wait_until_running(handle).await?;
        let script_path = self.inject_script(handle, job).await?;

        let summary = self.exec(handle, job, &script_path, stdout, stderr).await?;
        if summary.exit_code != 0 {
            return Err(Error::ScriptFailed {
                exit_code: summary.exit_code,
            });
        }
        Ok(summary)
    }

    /// Make sure the image is available locally, pulling it when missing.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        let pull_error = |message: String| Error::ImagePull {
            image: image.to_string(),
            message,
        };

        let present = self
            .cancel
            .guard(
                "inspect image",
                Some(self.config.operation_timeout),
                self.runtime.image_exists(image),
            )
            .await
            .map_err(|e| classify(e, pull_error))?;

        if present {
            debug!(image, "Image present locally");
            return Ok(());
        }

        info!(image, "Pulling image");
        self.cancel
            .guard("pull image", Some(self.config.pull_timeout), async {
                let mut progress = self.runtime.pull_image(image).await?;
                while let Some(message) = progress.next().await {
                    let message = message?;
                    if !message.is_empty() {
                        debug!(image, "{}", message);
                    }
                }
                Ok(())
            })
            .await
            .map_err(|e| classify(e, pull_error))
    }

    async fn create(&self, job: &Job) -> Result<ContainerHandle> {
        let spec = self.container_spec(job);

        let id = self
            .cancel
            .guard(
                "create container",
                Some(self.config.operation_timeout),
                self.runtime.create_container(&spec),
            )
            .await
            .map_err(|e| classify(e, Error::ContainerCreate))?;

        debug!(container = %spec.name, id = %id, "Container created");
        Ok(ContainerHandle {
            id,
            name: spec.name,
            image: spec.image,
        })
    }

    fn container_spec(&self, job: &Job) -> ContainerSpec {
        let mut labels = HashMap::new();
        labels.insert("stagehand.stage".to_string(), job.stage().to_string());
        labels.insert("stagehand.job".to_string(), job.name().to_string());

        let (binds, working_dir) = match &self.config.workspace {
            Some(path) => (
                vec![format!("{}:{}", path.display(), WORKSPACE_MOUNT)],
                Some(WORKSPACE_MOUNT.to_string()),
            ),
            None => (Vec::new(), None),
        };

        ContainerSpec {
            name: container_name(job.name()),
            image: job.image().to_string(),
            command: vec!["tail".to_string(), "-f".to_string(), "/dev/null".to_string()],
            env: vec![
                "CI=true".to_string(),
                "STAGEHAND=true".to_string(),
                format!("CI_JOB_NAME={}", job.name()),
                format!("CI_JOB_STAGE={}", job.stage()),
            ],
            labels,
            working_dir,
            binds,
        }
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<()> {
        self.cancel
            .guard(
                "start container",
                Some(self.config.operation_timeout),
                self.runtime.start_container(&handle.id),
            )
            .await
            .map_err(|e| classify(e, Error::ContainerStart))
    }

    /// Poll with exponential backoff until the container reports running.
    async fn wait_until_running(&self, handle: &ContainerHandle) -> Result<()> {
        let poll = async {
            let mut delay = READINESS_INITIAL_DELAY;
            loop {
                let state = timeout(
                    self.config.operation_timeout,
                    self.runtime.inspect_container(&handle.id),
                )
                .await
                .map_err(|_| Error::Timeout {
                    operation: "inspect container".to_string(),
                    after: self.config.operation_timeout,
                })?
                .map_err(|e| classify(e, Error::ContainerStart))?;

                if state.running {
                    return Ok(());
                }
                if state.is_terminal() {
                    return Err(Error::ContainerStart(format!(
                        "container {} is {} (exit code {:?})",
                        handle.name, state.status, state.exit_code
                    )));
                }

                debug!(container = %handle.name, status = %state.status, ?delay, "Waiting for container");
                sleep(delay).await;
                delay = (delay * 2).min(READINESS_MAX_DELAY);
            }
        };

        let waited = self.config.readiness_timeout;
        match timeout(waited, self.cancel.guard("wait for container", None, poll)).await {
            Ok(result) => result,
            Err(_) => Err(Error::ReadinessTimeout {
                container: handle.name.clone(),
                waited,
            }),
        }
    }

    async fn inject_script(&self, handle: &ContainerHandle, job: &Job) -> Result<String> {
        let script = self
            .materializer
            .materialize(job.script())
            .map_err(|e| classify(e, Error::ScriptInjection))?;
        let archive = script_archive(SCRIPT_NAME, &script)?;

        self.cancel
            .guard(
                "copy script",
                Some(self.config.operation_timeout),
                self.runtime.copy_archive_into(&handle.id, SCRIPT_DIR, archive),
            )
            .await
            .map_err(|e| classify(e, Error::ScriptInjection))?;

        Ok(format!("{}/{}", SCRIPT_DIR, SCRIPT_NAME))
    }

    async fn exec<O, E>(
        &self,
        handle: &ContainerHandle,
        job: &Job,
        script_path: &str,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<ExecSummary>
    where
        O: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        let argv = vec!["sh".to_string(), "-c".to_string(), script_path.to_string()];
        let limit = Some(self.config.operation_timeout);

        let exec_id = self
            .cancel
            .guard("create exec", limit, self.runtime.create_exec(&handle.id, &argv))
            .await
            .map_err(|e| classify(e, Error::Exec))?;

        let output = self
            .cancel
            .guard("attach exec", limit, self.runtime.attach_exec(&exec_id))
            .await
            .map_err(|e| classify(e, Error::Exec))?;

        let formatter =
            LineFormatter::for_job(job, self.config.output_format, self.config.color);
        let stats = self
            .cancel
            .guard(
                "job script",
                self.config.job_timeout,
                capture_output(output, &formatter, stdout, stderr),
            )
            .await?;

        // The exec can still report running for a moment after its output closed.
        let exit_code = self
            .cancel
            .guard("inspect exec", limit, async {
                loop {
                    if let Some(code) = self.runtime.inspect_exec(&exec_id).await? {
                        return Ok(code);
                    }
                    sleep(EXEC_EXIT_POLL).await;
                }
            })
            .await
            .map_err(|e| classify(e, Error::Exec))?;

        debug!(
            container = %handle.name,
            exit_code,
            stdout_lines = stats.stdout_lines,
            stderr_lines = stats.stderr_lines,
            "Script finished"
        );
        Ok(ExecSummary { exit_code, stats })
    }

    /// Force-remove the container. Ignores cancellation, bounded by the operation timeout.
    async fn teardown(&self, handle: &ContainerHandle) -> Option<Error> {
        let limit = self.config.operation_timeout;
        let removed = timeout(limit, self.runtime.remove_container(&handle.id, true, true))
            .await
            .unwrap_or_else(|_| {
                Err(Error::Timeout {
                    operation: "remove container".to_string(),
                    after: limit,
                })
            });

        match removed {
            Ok(()) => {
                debug!(container = %handle.name, "Container removed");
                None
            }
            Err(e) => {
                warn!(container = %handle.name, error = %e, "Failed to remove container");
                Some(e)
            }
        }
    }
}

/// Removes the container in the background if the job future is dropped
/// before its teardown completed.
struct RemovalGuard {
    runtime: Arc<dyn ContainerRuntime>,
    id: Option<String>,
    limit: Duration,
}

impl RemovalGuard {
    fn new(runtime: Arc<dyn ContainerRuntime>, id: String, limit: Duration) -> Self {
        Self {
            runtime,
            id: Some(id),
            limit,
        }
    }

    fn disarm(&mut self) {
        self.id = None;
    }
}

impl Drop for RemovalGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };

        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            warn!(container = %id, "No async runtime left, container not removed");
            return;
        };

        let runtime = Arc::clone(&self.runtime);
        let limit = self.limit;
        rt.spawn(async move {
            match timeout(limit, runtime.remove_container(&id, true, true)).await {
                Ok(Ok(())) => debug!(container = %id, "Abandoned container removed"),
                Ok(Err(e)) => warn!(container = %id, error = %e, "Failed to remove abandoned container"),
                Err(_) => warn!(container = %id, "Timed out removing abandoned container"),
            }
        });
    }
}

/// Unique container name for a job: `stagehand_<job>_<8 hex chars>`.
pub fn container_name(job: &str) -> String {
    let sanitized: String = job
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let suffix = Uuid::new_v4().simple().to_string();

    format!("{}_{}_{}", CONTAINER_PREFIX, sanitized, &suffix[..8])
}

/// Wrap a script into a single-entry, executable tar archive.
pub fn script_archive(file_name: &str, script: &[u8]) -> Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(script.len() as u64);
    header.set_mode(0o755);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);

    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_data(&mut header, file_name, script)
        .map_err(|e| Error::ScriptInjection(format!("Failed to build script archive: {}", e)))?;

    builder
        .into_inner()
        .map_err(|e| Error::ScriptInjection(format!("Failed to finish script archive: {}", e)))
}

/// Attach a phase to an untyped runtime error. Typed errors pass through.
fn classify(err: Error, phase: impl FnOnce(String) -> Error) -> Error {
    match err {
        Error::Internal(message) => phase(message),
        Error::Io(e) => phase(e.to_string()),
        other => other,
    }
}
