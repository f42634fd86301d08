//! Port traits (hexagonal architecture).
//!
//! The execution engine consumes the container runtime through these
//! interfaces; adapters live in `stagehand-runner` and in the test crate.

use crate::Result;
use async_trait::async_trait;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;

/// Progress messages emitted while an image is pulled.
pub type PullStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Combined, framed output of one exec.
pub type ExecOutput = Pin<Box<dyn Stream<Item = Result<OutputChunk>> + Send>>;

/// One frame of an exec's combined output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// Everything needed to create a job container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Long-lived entry command; the job script runs through a separate exec.
    pub command: Vec<String>,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub working_dir: Option<String>,
    /// `host:container` bind mounts.
    pub binds: Vec<String>,
}

/// Runtime view of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
    pub status: String,
    pub exit_code: Option<i64>,
}

impl ContainerState {
    /// The container stopped and will never report running.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "exited" | "dead" | "removing")
    }
}

/// Container runtime capability.
///
/// Implementations must tolerate concurrent use by several in-flight jobs.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether the image is present locally.
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pull an image from its registry.
    async fn pull_image(&self, image: &str) -> Result<PullStream>;

    /// Create a container, returning its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerState>;

    /// Extract a tar archive into `path` inside the container.
    async fn copy_archive_into(&self, id: &str, path: &str, archive: Vec<u8>) -> Result<()>;

    /// Create an exec with stdout and stderr attached, returning its id.
    async fn create_exec(&self, id: &str, argv: &[String]) -> Result<String>;

    /// Start an exec and attach to its combined output.
    async fn attach_exec(&self, exec_id: &str) -> Result<ExecOutput>;

    /// Exit code of a finished exec, `None` while it is still running.
    async fn inspect_exec(&self, exec_id: &str) -> Result<Option<i64>>;

    async fn remove_container(&self, id: &str, force: bool, with_volumes: bool) -> Result<()>;
}
