//! Test fixtures for creating sample pipelines and runners.

use stagehand_core::{Job, PipelineDescriptor};
use stagehand_runner::{
    Cancellation, OutputFormat, PipelineReport, PipelineRunner, RunnerConfig,
};
use std::sync::Arc;
use std::time::Duration;

use crate::fake_runtime::FakeRuntime;

/// Factory for creating test pipelines.
pub struct PipelineFixture;

impl PipelineFixture {
    pub fn job(name: &str, stage: &str, script: &[&str]) -> Job {
        Job::new(name, stage, script.iter().map(|s| s.to_string()).collect())
    }

    /// One stage, one job running `script`.
    pub fn single(script: &[&str]) -> PipelineDescriptor {
        PipelineDescriptor::new(["test"], [Self::job("hello", "test", script)])
            .expect("valid pipeline")
    }

    /// Two jobs in one stage, printing `hello` and `world`.
    pub fn hello_world() -> PipelineDescriptor {
        PipelineDescriptor::new(
            ["test"],
            [
                Self::job("first", "test", &["echo hello"]),
                Self::job("second", "test", &["echo world"]),
            ],
        )
        .expect("valid pipeline")
    }

    /// `build` -> `test` -> `deploy`, with two test jobs.
    pub fn multi_stage() -> PipelineDescriptor {
        PipelineDescriptor::new(
            ["build", "test", "deploy"],
            [
                Self::job("compile", "build", &["echo compiling"]),
                Self::job("unit", "test", &["echo unit ok"]),
                Self::job("lint", "test", &["echo lint ok"]),
                Self::job("ship", "deploy", &["echo shipped"]),
            ],
        )
        .expect("valid pipeline")
    }

    /// `multi_stage` with the `unit` job failing.
    pub fn failing_test_stage() -> PipelineDescriptor {
        PipelineDescriptor::new(
            ["build", "test", "deploy"],
            [
                Self::job("compile", "build", &["echo compiling"]),
                Self::job("unit", "test", &["echo running", "exit 2"]),
                Self::job("lint", "test", &["echo lint ok"]),
                Self::job("ship", "deploy", &["echo shipped"]),
            ],
        )
        .expect("valid pipeline")
    }
}

/// Plain output and short deadlines, suited to the fake runtime.
pub fn test_config() -> RunnerConfig {
    RunnerConfig {
        readiness_timeout: Duration::from_secs(2),
        operation_timeout: Duration::from_secs(5),
        pull_timeout: Duration::from_secs(5),
        output_format: OutputFormat::Plain,
        ..Default::default()
    }
}

pub fn runner(runtime: &Arc<FakeRuntime>, config: RunnerConfig) -> PipelineRunner {
    PipelineRunner::new(runtime.clone(), config)
}

pub fn cancellable_runner(
    runtime: &Arc<FakeRuntime>,
    config: RunnerConfig,
    cancel: Cancellation,
) -> PipelineRunner {
    runner(runtime, config).with_cancellation(cancel)
}

/// Output captured from one run.
#[derive(Debug)]
pub struct Captured<T> {
    pub result: stagehand_core::Result<T>,
    pub stdout: String,
    pub stderr: String,
}

/// Run a pipeline into fresh in-memory sinks.
pub async fn run_captured(
    runner: &PipelineRunner,
    pipeline: &PipelineDescriptor,
) -> Captured<PipelineReport> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let result = runner.run_pipeline(pipeline, &mut stdout, &mut stderr).await;

    Captured {
        result,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    }
}
