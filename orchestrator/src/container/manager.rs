//! Container lifecycle management

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::models::KernelSpec;
use crate::protocol::{frame, HELPER_DIR, HELPER_PATH, HELPER_SCRIPT};

use super::archive::single_file_archive;
use super::daemon::{ContainerSpec, ContainerSummary, Daemon, ExecTransport};
use super::image::{derive_name, ImageDescriptor};

/// Name-based reference to the workspace container.
///
/// The daemon owns the container; the id is only the last value it reported
/// and may be stale. Every use goes back through the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub name: String,
    pub id: String,
}

/// Ensures the workspace image and its single named container exist and run.
///
/// Operations take `&mut self`: the manager does no internal locking and
/// callers serialize batches through ownership.
pub struct ContainerManager {
    /// Application configuration
    config: AppConfig,

    /// Container and image primitives
    daemon: Arc<dyn Daemon>,

    /// Exec primitive, used for kernel setup and enumeration
    transport: Arc<dyn ExecTransport>,

    /// Image derived from the workspace identity
    image: ImageDescriptor,

    /// Canonical container name
    container_name: String,

    /// Last container resolved as running
    handle: Option<ContainerHandle>,

    /// Helper uploaded into the container `handle` points at
    kernel_ready: bool,

    /// Kernel chosen through `select_kernel`
    selected_kernel: Option<String>,
}

impl ContainerManager {
    /// Create a new container manager for the configured workspace
    pub fn new(
        config: AppConfig,
        daemon: Arc<dyn Daemon>,
        transport: Arc<dyn ExecTransport>,
    ) -> Result<Self> {
        if !config.workspace_dir.is_dir() {
            return Err(Error::ConfigurationMissing(format!(
                "workspace directory {} does not exist",
                config.workspace_dir.display()
            )));
        }

        let image = ImageDescriptor::for_workspace(
            &config.workspace_dir,
            config.workspace_id.as_deref(),
            config.build_context_file(),
        );
        let container_name = config
            .container_name
            .clone()
            .unwrap_or_else(|| derive_name(&config.workspace_dir, config.workspace_id.as_deref()));

        info!(
            image = %image.name,
            container = %container_name,
            workspace = %config.workspace_dir.display(),
            "Container manager initialized"
        );

        Ok(Self {
            config,
            daemon,
            transport,
            image,
            container_name,
            handle: None,
            kernel_ready: false,
            selected_kernel: None,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn image(&self) -> &ImageDescriptor {
        &self.image
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Cached handle, valid only as a best-effort hint
    pub fn handle(&self) -> Option<&ContainerHandle> {
        self.handle.as_ref()
    }

    pub fn kernel_ready(&self) -> bool {
        self.handle.is_some() && self.kernel_ready
    }

    /// Drop the cached handle after a connection-level failure so the next
    /// `ensure_container` re-resolves by name
    pub fn invalidate(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!(container = %handle.name, "Dropping cached container handle");
        }
        self.kernel_ready = false;
    }

    /// Look up the canonical container by exact name
    async fn find_container(&self) -> Result<Option<ContainerSummary>> {
        let containers = self.daemon.list_containers(&self.container_name).await?;
        Ok(containers
            .into_iter()
            .find(|c| c.has_name(&self.container_name)))
    }

    /// Ensure the canonical container exists and is running.
    ///
    /// Idempotent: a running container is returned without side effects, a
    /// stopped one is started, a missing one is created from the workspace
    /// image (built first if needed).
    pub async fn ensure_container(&mut self) -> Result<ContainerHandle> {
        match self.find_container().await? {
            Some(existing) if existing.running => {
                debug!(container = %self.container_name, "Container already running");
                return Ok(self.cache(existing.id));
            }
            Some(existing) => {
                info!(container = %self.container_name, "Starting stopped container");
                match self.daemon.start_container(&self.container_name).await {
                    Ok(()) => return self.confirm_running(existing.id).await,
                    // Removed between list and start: fall through to creation
                    Err(Error::ContainerNotFound(_)) => {
                        warn!(container = %self.container_name, "Container vanished, recreating");
                    }
                    Err(e) => return Err(self.start_failed(e)),
                }
            }
            None => {}
        }

        self.ensure_image().await?;

        let id = match self.daemon.create_container(&self.container_spec()).await {
            Ok(id) => {
                info!(container = %self.container_name, image = %self.image.name, "Container created");
                id
            }
            // Somebody else created it meanwhile: resolve it like an existing one
            Err(Error::ContainerNameConflict(_)) => match self.find_container().await? {
                Some(existing) if existing.running => return Ok(self.cache(existing.id)),
                Some(existing) => existing.id,
                None => {
                    return Err(Error::ContainerCreateFailed {
                        name: self.container_name.clone(),
                        message: "name conflict but no container with that name".to_string(),
                    })
                }
            },
            Err(e @ Error::DaemonUnreachable(_)) => return Err(e),
            Err(e) => {
                self.invalidate();
                error!(container = %self.container_name, error = %e, "Container creation failed");
                return Err(Error::ContainerCreateFailed {
                    name: self.container_name.clone(),
                    message: e.to_string(),
                });
            }
        };

        // A failed start leaves a stopped container behind; the next call
        // resolves it through the stopped-container branch.
        if let Err(e) = self.daemon.start_container(&self.container_name).await {
            return Err(self.start_failed(e));
        }

        self.confirm_running(id).await
    }

    /// Re-list after a start so the cached handle only ever points at a
    /// running container
    async fn confirm_running(&mut self, fallback_id: String) -> Result<ContainerHandle> {
        match self.find_container().await? {
            Some(container) if container.running => {
                info!(container = %self.container_name, "Container running");
                let id = if container.id.is_empty() {
                    fallback_id
                } else {
                    container.id
                };
                Ok(self.cache(id))
            }
            _ => Err(self.start_failed(Error::ContainerNotRunning(self.container_name.clone()))),
        }
    }

    fn start_failed(&mut self, cause: Error) -> Error {
        self.invalidate();
        if matches!(cause, Error::DaemonUnreachable(_)) {
            return cause;
        }
        error!(container = %self.container_name, error = %cause, "Container start failed");
        Error::ContainerStartFailed {
            name: self.container_name.clone(),
            message: cause.to_string(),
        }
    }

    fn cache(&mut self, id: String) -> ContainerHandle {
        let changed = self.handle.as_ref().map(|h| h.id != id).unwrap_or(true);
        if changed {
            self.kernel_ready = false;
        }
        let handle = ContainerHandle {
            name: self.container_name.clone(),
            id,
        };
        self.handle = Some(handle.clone());
        handle
    }

    fn container_spec(&self) -> ContainerSpec {
        ContainerSpec {
            name: self.container_name.clone(),
            image: self.image.name.clone(),
            binds: vec![format!(
                "{}:{}",
                self.config.workspace_dir.display(),
                self.config.mount_path
            )],
            // Long-lived no-op foreground process keeps the container up
            command: vec!["sleep".to_string(), "infinity".to_string()],
            working_dir: self.config.mount_path.clone(),
        }
    }

    /// Build the workspace image unless the daemon already has it
    async fn ensure_image(&self) -> Result<()> {
        if self.daemon.image_exists(&self.image.name).await? {
            debug!(image = %self.image.name, "Image present");
            return Ok(());
        }

        info!(image = %self.image.name, "Building image");
        let context = self
            .image
            .build_context(&self.config.support_packages, &self.config.mount_path)
            .await
            .map_err(|e| Error::ImageBuildFailed {
                image: self.image.name.clone(),
                message: e.to_string(),
            })?;

        self.daemon.build_image(&self.image.name, context).await?;
        info!(image = %self.image.name, "Image built");
        Ok(())
    }

    /// Non-mutating check against the daemon's container list. Any failure reads
    /// as "not running".
    pub async fn is_container_running(&self) -> bool {
        match self.find_container().await {
            Ok(Some(container)) => container.running,
            Ok(None) => false,
            Err(e) => {
                debug!(error = %e, "Container status query failed");
                false
            }
        }
    }

    /// Stop then remove the container and forget the handle.
    ///
    /// Teardown never fails: errors are logged and a missing container
    /// counts as success.
    pub async fn stop_container(&mut self) {
        let name = self.container_name.clone();

        match self.daemon.stop_container(&name).await {
            Ok(()) => info!(container = %name, "Container stopped"),
            Err(Error::ContainerNotFound(_)) => debug!(container = %name, "Container already gone"),
            Err(e) => warn!(container = %name, error = %e, "Failed to stop container"),
        }

        match self.daemon.remove_container(&name).await {
            Ok(()) => info!(container = %name, "Container removed"),
            Err(Error::ContainerNotFound(_)) => {}
            Err(e) => warn!(container = %name, error = %e, "Failed to remove container"),
        }

        self.invalidate();
    }

    /// Tear everything down and start over from a freshly built image.
    ///
    /// Strictly sequential: the container must be gone before its image can
    /// be removed.
    pub async fn rebuild_container(&mut self) -> Result<ContainerHandle> {
        info!(container = %self.container_name, image = %self.image.name, "Rebuilding container");

        self.stop_container().await;

        match self.daemon.remove_image(&self.image.name).await {
            Ok(()) => info!(image = %self.image.name, "Image removed"),
            Err(Error::ImageNotFound(_)) => debug!(image = %self.image.name, "Image already absent"),
            Err(e) => return Err(e),
        }

        let handle = self.ensure_container().await?;
        self.setup_kernel().await?;
        Ok(handle)
    }

    /// Install the interpreter support packages and upload the execution
    /// helper into the running container
    pub async fn setup_kernel(&mut self) -> Result<()> {
        let handle = match self.handle.clone() {
            Some(handle) if self.is_container_running().await => handle,
            _ => {
                self.kernel_ready = false;
                return Err(Error::ContainerNotRunning(self.container_name.clone()));
            }
        };

        info!(container = %handle.name, "Setting up kernel");

        let mkdir = vec!["mkdir".to_string(), "-p".to_string(), HELPER_DIR.to_string()];
        let output = self.transport.exec(&handle.name, &mkdir).await?;
        if !output.succeeded() {
            return Err(Error::KernelSetupFailed(format!(
                "could not create {}: {}",
                HELPER_DIR,
                String::from_utf8_lossy(&frame::demultiplex(&output.raw)).trim()
            )));
        }

        if !self.config.support_packages.is_empty() {
            let mut install = vec![
                self.config.python_path.clone(),
                "-m".to_string(),
                "pip".to_string(),
                "install".to_string(),
                "--quiet".to_string(),
                "--disable-pip-version-check".to_string(),
            ];
            install.extend(self.config.support_packages.iter().cloned());

            let output = self.transport.exec(&handle.name, &install).await?;
            if output.succeeded() {
                debug!(packages = ?self.config.support_packages, "Support packages installed");
            } else {
                // The helper itself only needs the standard library
                warn!(
                    packages = ?self.config.support_packages,
                    exit_code = ?output.exit_code,
                    output = %String::from_utf8_lossy(&frame::demultiplex(&output.raw)).trim(),
                    "Support package installation failed"
                );
            }
        }

        let archive = single_file_archive(HELPER_PATH, HELPER_SCRIPT.as_bytes(), 0o755)?;
        self.daemon
            .upload_archive(&handle.name, "/", archive)
            .await
            .map_err(|e| match e {
                Error::DaemonUnreachable(_) | Error::ContainerNotFound(_) => e,
                other => Error::KernelSetupFailed(format!("helper upload failed: {other}")),
            })?;

        self.kernel_ready = true;
        info!(container = %handle.name, helper = HELPER_PATH, "Kernel ready");
        Ok(())
    }

    /// Kernels installed in the container. Never fails: any problem yields
    /// the default kernel alone.
    pub async fn list_available_kernels(&self) -> Vec<KernelSpec> {
        match self.query_kernels().await {
            Ok(kernels) if !kernels.is_empty() => kernels,
            Ok(_) => {
                debug!("No kernels reported, using default");
                vec![KernelSpec::fallback(&self.config.default_kernel)]
            }
            Err(e) => {
                debug!(error = %e, "Kernel enumeration failed, using default");
                vec![KernelSpec::fallback(&self.config.default_kernel)]
            }
        }
    }

    async fn query_kernels(&self) -> Result<Vec<KernelSpec>> {
        if !self.is_container_running().await {
            return Err(Error::ContainerNotRunning(self.container_name.clone()));
        }

        let argv = vec![
            self.config.python_path.clone(),
            "-m".to_string(),
            "jupyter".to_string(),
            "kernelspec".to_string(),
            "list".to_string(),
            "--json".to_string(),
        ];
        let output = self.transport.exec(&self.container_name, &argv).await?;
        if !output.succeeded() {
            return Err(Error::ExecutionTransportFailed(format!(
                "kernelspec list exited with {:?}",
                output.exit_code
            )));
        }

        parse_kernel_list(&frame::demultiplex(&output.raw))
    }

    /// Record the kernel to use, provided the container offers it. The choice
    /// is saved as the workspace default so later runs keep it.
    pub async fn select_kernel(&mut self, name: &str) -> Result<KernelSpec> {
        let kernels = self.list_available_kernels().await;
        let kernel = kernels
            .into_iter()
            .find(|k| k.name == name)
            .ok_or_else(|| Error::ConfigurationMissing(format!("kernel {name} is not available")))?;

        info!(kernel = %kernel.name, "Kernel selected");
        if let Err(e) = self.config.save_default_kernel(&kernel.name) {
            warn!(kernel = %kernel.name, error = %e, "Failed to save kernel selection");
        }
        self.selected_kernel = Some(kernel.name.clone());
        Ok(kernel)
    }

    pub fn selected_kernel(&self) -> &str {
        self.selected_kernel
            .as_deref()
            .unwrap_or(&self.config.default_kernel)
    }

    /// Activation hook: with auto-start on, bring the container up and
    /// prepare the kernel. Failures are reported, not propagated.
    pub async fn activate(&mut self) -> bool {
        if !self.config.auto_start {
            return false;
        }

        let result = match self.ensure_container().await {
            Ok(_) => self.setup_kernel().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to start workspace container");
                false
            }
        }
    }

    /// Explicit teardown
    pub async fn dispose(mut self) {
        if self.config.stop_container_on_exit {
            self.stop_container().await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct KernelSpecList {
    kernelspecs: BTreeMap<String, KernelSpecEntry>,
}

#[derive(Debug, Deserialize)]
struct KernelSpecEntry {
    spec: KernelSpecBody,
}

#[derive(Debug, Deserialize)]
struct KernelSpecBody {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

/// Parse `jupyter kernelspec list --json` output
fn parse_kernel_list(raw: &[u8]) -> Result<Vec<KernelSpec>> {
    let text = String::from_utf8_lossy(raw);
    // pip or jupyter may print warnings ahead of the JSON document
    let start = text
        .find('{')
        .ok_or_else(|| Error::ResultParseFailed(text.trim().to_string()))?;
    let list: KernelSpecList = serde_json::from_str(text[start..].trim())
        .map_err(|e| Error::ResultParseFailed(e.to_string()))?;

    Ok(list
        .kernelspecs
        .into_iter()
        .map(|(name, entry)| KernelSpec {
            display_name: entry.spec.display_name.unwrap_or_else(|| name.clone()),
            language: entry.spec.language,
            name,
        })
        .collect())
}
