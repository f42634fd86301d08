//! Pipeline model types.
//!
//! A [`PipelineDescriptor`] is built once by the parsing layer and is read-only
//! for the whole run. Every job it holds already carries a resolved image.

use crate::{Error, Result};
use serde::Serialize;

/// Image used when neither the job nor the pipeline names one.
pub const DEFAULT_IMAGE: &str = "ubuntu:25.10";

/// A named unit of work: one container execution running ordered shell commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    name: String,
    stage: String,
    script: Vec<String>,
    image: String,
}

impl Job {
    pub fn new(name: impl Into<String>, stage: impl Into<String>, script: Vec<String>) -> Self {
        Self {
            name: name.into(),
            stage: stage.into(),
            script,
            image: DEFAULT_IMAGE.to_string(),
        }
    }

    /// Override the resolved image.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn script(&self) -> &[String] {
        &self.script
    }

    pub fn image(&self) -> &str {
        &self.image
    }
}

/// An ordered phase of the pipeline together with its jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
    name: String,
    jobs: Vec<Job>,
}

impl Stage {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Jobs in declaration order.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Validated, immutable model of stages and jobs consumed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineDescriptor {
    stages: Vec<Stage>,
}

impl PipelineDescriptor {
    /// Build a descriptor from the declared stage order and the jobs.
    ///
    /// Fails with [`Error::UnknownStage`] when a job names a stage that was not
    /// declared, and with [`Error::InvalidPipeline`] when a stage is declared twice.
    pub fn new<S, I, J>(stages: I, jobs: J) -> Result<Self>
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = Job>,
    {
        let mut resolved: Vec<Stage> = Vec::new();
        for name in stages {
            let name = name.into();
            if resolved.iter().any(|s| s.name == name) {
                return Err(Error::InvalidPipeline(format!(
                    "stage {} declared more than once",
                    name
                )));
            }
            resolved.push(Stage {
                name,
                jobs: Vec::new(),
            });
        }

        for job in jobs {
            let stage = resolved
                .iter_mut()
                .find(|s| s.name == job.stage)
                .ok_or_else(|| Error::UnknownStage {
                    stage: job.stage.clone(),
                    job: job.name.clone(),
                })?;
            stage.jobs.push(job);
        }

        Ok(Self { stages: resolved })
    }

    /// Stages in declared order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// All jobs, stage by stage.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.stages.iter().flat_map(|s| s.jobs.iter())
    }

    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs().find(|j| j.name == name)
    }

    pub fn job_count(&self) -> usize {
        self.stages.iter().map(|s| s.jobs.len()).sum()
    }
}
