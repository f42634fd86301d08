//! Stagehand Core
//!
//! Pipeline model, error handling, and the ports consumed by the execution
//! engine. This crate has minimal dependencies and defines the shared
//! vocabulary used across the other crates.

pub mod error;
pub mod pipeline;
pub mod ports;
pub mod script;

pub use error::{Error, Result};
pub use pipeline::{DEFAULT_IMAGE, Job, PipelineDescriptor, Stage};
pub use ports::{
    ContainerRuntime, ContainerSpec, ContainerState, ExecOutput, OutputChunk, PullStream,
};
pub use script::{ScriptMaterializer, ShellScript};
