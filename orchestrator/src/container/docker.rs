//! Docker/Podman Engine API backend built on bollard

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, UploadToContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, RemoveImageOptions};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::{Error, Result};

use super::daemon::{ContainerSpec, ContainerSummary, Daemon, ExecOutput, ExecTransport};

/// Seconds a stop request waits before the daemon kills the container
const STOP_GRACE_SECONDS: i64 = 5;

/// Daemon client talking to the local Docker-compatible socket
pub struct BollardDaemon {
    docker: Docker,
}

impl BollardDaemon {
    /// Connect using the configured socket, or the platform defaults
    pub fn connect(config: &AppConfig) -> Result<Self> {
        let docker = match config.docker_socket.as_deref() {
            Some(socket) => {
                let path = socket.trim_start_matches("unix://");
                Docker::connect_with_socket(
                    path,
                    config.daemon_timeout_seconds,
                    bollard::API_DEFAULT_VERSION,
                )
            }
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| Error::DaemonUnreachable(e.to_string()))?
        .with_timeout(Duration::from_secs(config.daemon_timeout_seconds));

        info!(socket = ?config.docker_socket, "Container daemon client initialized");

        Ok(Self { docker })
    }
}

/// Map a bollard error, turning 404s into the caller's not-found error
fn map_error(err: BollardError, not_found: impl FnOnce() -> Error) -> Error {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => not_found(),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => Error::Daemon {
            status: Some(status_code),
            message,
        },
        BollardError::IOError { .. }
        | BollardError::HyperResponseError { .. }
        | BollardError::RequestTimeoutError => Error::DaemonUnreachable(err.to_string()),
        other => Error::Daemon {
            status: None,
            message: other.to_string(),
        },
    }
}

/// Build failures stay build failures unless the daemon itself went away
fn build_error(err: BollardError, image: &str) -> Error {
    match map_error(err, || Error::ImageNotFound(image.to_string())) {
        err @ Error::DaemonUnreachable(_) => err,
        other => Error::ImageBuildFailed {
            image: image.to_string(),
            message: other.to_string(),
        },
    }
}

/// Exec failures keep their connection-level kind so the caller can decide
/// to re-resolve the container
fn exec_error(err: BollardError, container: &str) -> Error {
    match map_error(err, || Error::ContainerNotFound(container.to_string())) {
        err @ (Error::DaemonUnreachable(_) | Error::ContainerNotFound(_)) => err,
        other => Error::ExecutionTransportFailed(other.to_string()),
    }
}

fn status_of(err: &BollardError) -> Option<u16> {
    match err {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

#[async_trait]
impl Daemon for BollardDaemon {
    async fn list_containers(&self, name_filter: &str) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name_filter.to_string()]);

        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| map_error(e, || Error::ContainerNotFound(name_filter.to_string())))?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                names: c
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .collect(),
                image: c.image,
                running: c.state.as_deref() == Some("running"),
            })
            .collect())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if status_of(&e) == Some(404) => Ok(false),
            Err(e) => Err(map_error(e, || Error::ImageNotFound(image.to_string()))),
        }
    }

    async fn build_image(&self, image: &str, context: Vec<u8>) -> Result<()> {
        let options = BuildImageOptions::<String> {
            dockerfile: "Dockerfile".to_string(),
            t: image.to_string(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(context.into()));

        while let Some(message) = stream.next().await {
            let info = message.map_err(|e| build_error(e, image))?;

            if let Some(error) = info.error {
                return Err(Error::ImageBuildFailed {
                    image: image.to_string(),
                    message: error,
                });
            }

            if let Some(line) = info.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    debug!(image = %image, "{}", line);
                }
            }
        }

        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: Some(spec.working_dir.clone()),
            tty: Some(false),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        match self.docker.create_container(Some(options), config).await {
            Ok(response) => Ok(response.id),
            Err(e) if status_of(&e) == Some(409) => {
                Err(Error::ContainerNameConflict(spec.name.clone()))
            }
            Err(e) => Err(map_error(e, || Error::ImageNotFound(spec.image.clone()))),
        }
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        match self
            .docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            // Already running
            Err(e) if status_of(&e) == Some(304) => Ok(()),
            Err(e) => Err(map_error(e, || Error::ContainerNotFound(name.to_string()))),
        }
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        let options = StopContainerOptions {
            t: STOP_GRACE_SECONDS,
        };
        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped
            Err(e) if status_of(&e) == Some(304) => Ok(()),
            Err(e) => Err(map_error(e, || Error::ContainerNotFound(name.to_string()))),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| map_error(e, || Error::ContainerNotFound(name.to_string())))
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_image(image, Some(options), None)
            .await
            .map(|_| ())
            .map_err(|e| map_error(e, || Error::ImageNotFound(image.to_string())))
    }

    async fn upload_archive(&self, name: &str, dest: &str, archive: Vec<u8>) -> Result<()> {
        let options = UploadToContainerOptions {
            path: dest.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(name, Some(options), archive.into())
            .await
            .map_err(|e| map_error(e, || Error::ContainerNotFound(name.to_string())))
    }
}

#[async_trait]
impl ExecTransport for BollardDaemon {
    async fn exec(&self, container: &str, argv: &[String]) -> Result<ExecOutput> {
        let transport_error = |e: BollardError| exec_error(e, container);

        let options = CreateExecOptions::<String> {
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            cmd: Some(argv.to_vec()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container, options)
            .await
            .map_err(transport_error)?;

        let mut raw = Vec::new();
        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(transport_error)?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    let chunk = chunk.map_err(transport_error)?;
                    raw.extend_from_slice(&chunk.into_bytes());
                }
            }
            StartExecResults::Detached => {}
        }

        let exit_code = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(transport_error)?
            .exit_code;

        debug!(
            container = %container,
            bytes = raw.len(),
            exit_code = ?exit_code,
            "Exec completed"
        );

        Ok(ExecOutput { raw, exit_code })
    }
}
