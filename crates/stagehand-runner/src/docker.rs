//! Docker adapter for the container runtime port.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, UploadToContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{CreateImageInfo, HostConfig};
use futures::StreamExt;
use stagehand_core::ports::{
    ContainerRuntime, ContainerSpec, ContainerState, ExecOutput, OutputChunk, PullStream,
};
use stagehand_core::{Error, Result};
use tracing::{debug, warn};

/// Container runtime backed by the local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the local defaults (`DOCKER_HOST` or the platform socket).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            Error::RuntimeUnavailable(format!("Failed to connect to Docker: {}", e))
        })?;

        Ok(Self { docker })
    }

    /// Create with an existing Docker client.
    pub fn with_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| Error::RuntimeUnavailable(format!("Docker daemon not reachable: {}", e)))
    }
}

/// Split `repo[:tag]` into repository and tag, defaulting the tag to `latest`.
///
/// A colon before the last `/` belongs to a registry port, not a tag. Digest
/// references are passed through whole.
pub fn split_image_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

fn describe_progress(info: &CreateImageInfo) -> String {
    match (&info.id, &info.status, &info.progress) {
        (Some(id), Some(status), Some(progress)) => format!("{}: {} {}", id, status, progress),
        (Some(id), Some(status), None) => format!("{}: {}", id, status),
        (None, Some(status), _) => status.clone(),
        _ => String::new(),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(Error::Internal(format!(
                "Failed to inspect image {}: {}",
                image, e
            ))),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<PullStream> {
        let (from_image, tag) = split_image_reference(image);
        let options = CreateImageOptions {
            from_image: from_image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };

        let reference = image.to_string();
        let stream = self
            .docker
            .create_image(Some(options), None, None)
            .map(move |item| match item {
                Ok(info) => match info.error {
                    Some(message) => Err(Error::ImagePull {
                        image: reference.clone(),
                        message,
                    }),
                    None => Ok(describe_progress(&info)),
                },
                Err(e) => Err(Error::ImagePull {
                    image: reference.clone(),
                    message: e.to_string(),
                }),
            });

        Ok(Box::pin(stream))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            working_dir: spec.working_dir.clone(),
            tty: Some(false),
            host_config: Some(HostConfig {
                binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| Error::ContainerCreate(e.to_string()))?;

        for warning in &response.warnings {
            warn!(container = %spec.name, warning = %warning, "Docker warning on create");
        }

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::ContainerStart(e.to_string()))
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| Error::Internal(format!("Failed to inspect container {}: {}", id, e)))?;

        let state = response.state.unwrap_or_default();
        Ok(ContainerState {
            running: state.running.unwrap_or(false),
            status: state
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            exit_code: state.exit_code,
        })
    }

    async fn copy_archive_into(&self, id: &str, path: &str, archive: Vec<u8>) -> Result<()> {
        let options = UploadToContainerOptions {
            path: path.to_string(),
            ..Default::default()
        };

        self.docker
            .upload_to_container(id, Some(options), archive.into())
            .await
            .map_err(|e| Error::ScriptInjection(e.to_string()))
    }

    async fn create_exec(&self, id: &str, argv: &[String]) -> Result<String> {
        let options = CreateExecOptions {
            cmd: Some(argv.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, options)
            .await
            .map_err(|e| Error::Exec(format!("Failed to create exec: {}", e)))?;

        Ok(exec.id)
    }

    async fn attach_exec(&self, exec_id: &str) -> Result<ExecOutput> {
        let options = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        let started = self
            .docker
            .start_exec(exec_id, Some(options))
            .await
            .map_err(|e| Error::Exec(format!("Failed to start exec: {}", e)))?;

        match started {
            StartExecResults::Attached { output, .. } => {
                let chunks = output.filter_map(|frame| async move {
                    match frame {
                        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                            Some(Ok(OutputChunk::Stdout(message.to_vec())))
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            Some(Ok(OutputChunk::Stderr(message.to_vec())))
                        }
                        Ok(LogOutput::StdIn { .. }) => None,
                        Err(e) => Some(Err(Error::OutputStream(e.to_string()))),
                    }
                });
                Ok(Box::pin(chunks))
            }
            StartExecResults::Detached => {
                Err(Error::Exec("exec started detached, no output to attach".to_string()))
            }
        }
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<Option<i64>> {
        let exec = self
            .docker
            .inspect_exec(exec_id)
            .await
            .map_err(|e| Error::Exec(format!("Failed to inspect exec: {}", e)))?;

        debug!(exec_id, running = ?exec.running, exit_code = ?exec.exit_code, "Exec inspected");

        if exec.running.unwrap_or(false) {
            return Ok(None);
        }
        Ok(exec.exit_code)
    }

    async fn remove_container(&self, id: &str, force: bool, with_volumes: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: with_volumes,
            ..Default::default()
        };

        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| Error::ContainerRemove {
                container: id.to_string(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_image_with_tag() {
        assert_eq!(split_image_reference("ubuntu:25.10"), ("ubuntu", "25.10"));
    }

    #[test]
    fn test_split_image_defaults_to_latest() {
        assert_eq!(split_image_reference("alpine"), ("alpine", "latest"));
    }

    #[test]
    fn test_split_image_with_registry_port() {
        assert_eq!(
            split_image_reference("localhost:5000/team/app"),
            ("localhost:5000/team/app", "latest")
        );
        assert_eq!(
            split_image_reference("localhost:5000/team/app:1.2"),
            ("localhost:5000/team/app", "1.2")
        );
    }

    #[test]
    fn test_split_image_with_digest() {
        let image = "alpine@sha256:0123abcd";
        assert_eq!(split_image_reference(image), (image, ""));
    }
}
