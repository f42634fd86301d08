//! Test infrastructure for stagehand.
//!
//! Provides an in-memory [`FakeRuntime`] that stands in for the container
//! daemon, plus fixtures for pipelines and runners. The Docker-backed suite
//! lives under `tests/` behind the `integration` feature.
//!
//! # Usage
//!
//! ```ignore
//! use stagehand_tests::{FakeRuntime, PipelineFixture, run_captured, runner, test_config};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let runtime = Arc::new(FakeRuntime::new());
//!     let runner = runner(&runtime, test_config());
//!     let out = run_captured(&runner, &PipelineFixture::single(&["echo hello"])).await;
//! }
//! ```

pub mod fake_runtime;
pub mod fixtures;

pub use fake_runtime::{FakeBehaviour, FakeRuntime, RuntimeEvent};
pub use fixtures::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,stagehand_runner=debug")),
        )
        .with_test_writer()
        .try_init();
}
