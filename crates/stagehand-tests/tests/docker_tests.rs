//! End-to-end tests against a local Docker daemon.
//!
//! Run with: `cargo test -p stagehand-tests --test docker_tests --features integration`

#![cfg(feature = "integration")]

use stagehand_core::{Error, PipelineDescriptor};
use stagehand_runner::{DockerRuntime, PipelineRunner};
use stagehand_tests::{PipelineFixture, init_test_logging, run_captured, test_config};
use std::sync::Arc;

const IMAGE: &str = "alpine:3.20";

async fn docker_runner() -> anyhow::Result<PipelineRunner> {
    init_test_logging();
    let docker = DockerRuntime::connect()?;
    docker.ping().await?;
    Ok(PipelineRunner::new(Arc::new(docker), test_config()))
}

fn single(script: &[&str]) -> PipelineDescriptor {
    PipelineDescriptor::new(
        ["test"],
        [PipelineFixture::job("hello", "test", script).with_image(IMAGE)],
    )
    .expect("valid pipeline")
}

#[tokio::test]
async fn test_echo_hello() -> anyhow::Result<()> {
    let runner = docker_runner().await?;

    let out = run_captured(&runner, &single(&["echo hello"])).await;

    out.result?;
    assert_eq!(out.stdout, "hello\n");
    assert_eq!(out.stderr, "");
    Ok(())
}

#[tokio::test]
async fn test_stderr_only() {
    let runner = docker_runner().await.expect("Docker available");

    let out = run_captured(&runner, &single(&["echo 'something went wrong' >&2"])).await;

    out.result.expect("pipeline should succeed");
    assert_eq!(out.stdout, "");
    assert_eq!(out.stderr, "something went wrong\n");
}

#[tokio::test]
async fn test_two_jobs_in_order() {
    let runner = docker_runner().await.expect("Docker available");
    let pipeline = PipelineDescriptor::new(
        ["test"],
        [
            PipelineFixture::job("first", "test", &["echo hello"]).with_image(IMAGE),
            PipelineFixture::job("second", "test", &["echo world"]).with_image(IMAGE),
        ],
    )
    .unwrap();

    let out = run_captured(&runner, &pipeline).await;

    out.result.expect("pipeline should succeed");
    assert_eq!(out.stdout, "hello\nworld\n");
}

#[tokio::test]
async fn test_failing_command_stops_script() {
    let runner = docker_runner().await.expect("Docker available");

    let out = run_captured(&runner, &single(&["echo before", "false", "echo after"])).await;

    let err = out.result.expect_err("job should fail");
    assert!(matches!(err.root(), Error::ScriptFailed { exit_code: 1 }));
    assert_eq!(out.stdout, "before\n");
}
