//! Container execution engine for stagehand.

pub mod cancel;
pub mod capture;
pub mod docker;
pub mod lifecycle;
pub mod runner;

pub use cancel::Cancellation;
pub use capture::{CaptureStats, LineFormatter, OutputFormat, capture_output};
pub use docker::DockerRuntime;
pub use lifecycle::{ContainerHandle, ContainerLifecycle, ExecSummary, JobRun};
pub use runner::{JobReport, PipelineReport, PipelineRunner, RunnerConfig};
