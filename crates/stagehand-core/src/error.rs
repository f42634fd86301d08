//! Error types for stagehand.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Pipeline model errors
    #[error("Unknown stage {stage} for job {job}")]
    UnknownStage { stage: String, job: String },

    #[error("Invalid pipeline definition: {0}")]
    InvalidPipeline(String),

    #[error("Script of job {job} is neither a string nor a list of strings")]
    UnknownScriptShape { job: String },

    // Container lifecycle errors
    #[error("Failed to pull image {image}: {message}")]
    ImagePull { image: String, message: String },

    #[error("Failed to create container: {0}")]
    ContainerCreate(String),

    #[error("Failed to start container: {0}")]
    ContainerStart(String),

    #[error("Container {container} not running after {waited:?}")]
    ReadinessTimeout { container: String, waited: Duration },

    #[error("Failed to inject script into container: {0}")]
    ScriptInjection(String),

    #[error("Exec failed: {0}")]
    Exec(String),

    #[error("Script exited with code {exit_code}")]
    ScriptFailed { exit_code: i64 },

    #[error("Output stream error: {0}")]
    OutputStream(String),

    #[error("Failed to remove container {container}: {message}")]
    ContainerRemove { container: String, message: String },

    // Deadlines and cancellation
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    // Orchestration
    #[error("Job {stage}/{job} failed: {source}")]
    Job {
        stage: String,
        job: String,
        #[source]
        source: Box<Error>,
        cleanup_error: Option<String>,
    },

    // CI file handling
    #[error("No CI file found in {0}")]
    CiFileNotFound(PathBuf),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The innermost error, looking through job tagging.
    pub fn root(&self) -> &Error {
        match self {
            Error::Job { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled)
    }

    /// Deadline and cancellation errors pass through classification untouched.
    pub fn is_control(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Cancelled)
    }
}
