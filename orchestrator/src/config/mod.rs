//! Configuration module for Cellbox
//!
//! Supports configuration via:
//! - TOML/YAML/JSON config files (`<workspace>/.cellbox/config`, `/etc/cellbox/config`)
//! - Workspace state written by the tool itself (`<workspace>/.cellbox/state.json`)
//! - Environment variables (with CELLBOX__ prefix)
//! - Command line overrides (workspace directory, log level)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Settings the tool persists for a workspace, relative to its root
pub const WORKSPACE_STATE_FILE: &str = ".cellbox/state.json";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional file receiving JSON logs
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Host directory bound into the container
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,

    /// Identity used to derive image and container names (defaults to the
    /// canonical workspace path)
    #[serde(default)]
    pub workspace_id: Option<String>,

    /// Build-context definition, relative to the workspace unless absolute
    #[serde(default = "default_build_context_path")]
    pub build_context_path: PathBuf,

    /// Canonical container name (derived from the workspace when unset)
    #[serde(default)]
    pub container_name: Option<String>,

    /// Interpreter path inside the container
    #[serde(default = "default_python_path")]
    pub python_path: String,

    /// Ensure and set up the container on activation
    #[serde(default = "default_true")]
    pub auto_start: bool,

    /// Kernel reported when enumeration inside the container fails
    #[serde(default = "default_kernel")]
    pub default_kernel: String,

    /// Mount target (and working directory) inside the container
    #[serde(default = "default_mount_path")]
    pub mount_path: String,

    /// Packages installed into the interpreter by kernel setup
    #[serde(default = "default_support_packages")]
    pub support_packages: Vec<String>,

    /// Docker/Podman socket path (local defaults when unset)
    #[serde(default)]
    pub docker_socket: Option<String>,

    /// Request timeout for daemon calls in seconds
    #[serde(default = "default_daemon_timeout")]
    pub daemon_timeout_seconds: u64,

    /// Per-cell execution timeout in seconds (unbounded when unset)
    #[serde(default)]
    pub execution_timeout_seconds: Option<u64>,

    /// Stop and remove the container when the manager is disposed
    #[serde(default)]
    pub stop_container_on_exit: bool,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_workspace_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_build_context_path() -> PathBuf {
    PathBuf::from(".cellbox/Dockerfile")
}

fn default_python_path() -> String {
    "python3".to_string()
}

fn default_true() -> bool {
    true
}

fn default_kernel() -> String {
    "python3".to_string()
}

fn default_mount_path() -> String {
    "/workspace".to_string()
}

fn default_support_packages() -> Vec<String> {
    vec!["ipykernel".to_string(), "dill".to_string()]
}

fn default_daemon_timeout() -> u64 {
    3600
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
            workspace_dir: default_workspace_dir(),
            workspace_id: None,
            build_context_path: default_build_context_path(),
            container_name: None,
            python_path: default_python_path(),
            auto_start: true,
            default_kernel: default_kernel(),
            mount_path: default_mount_path(),
            support_packages: default_support_packages(),
            docker_socket: None,
            daemon_timeout_seconds: default_daemon_timeout(),
            execution_timeout_seconds: None,
            stop_container_on_exit: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment variables.
    ///
    /// `workspace` overrides the configured workspace directory and decides
    /// where the per-workspace config file is looked up.
    pub fn load(workspace: Option<&Path>) -> Result<Self> {
        // Try to load .env file if present
        let _ = dotenvy::dotenv();

        let mut defaults = AppConfig::default();
        if let Some(dir) = workspace {
            defaults.workspace_dir = dir.to_path_buf();
        }
        let workspace_config = defaults.workspace_dir.join(".cellbox").join("config");
        let workspace_state = defaults.workspace_dir.join(WORKSPACE_STATE_FILE);

        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&defaults)?)
            // Load from config files if present
            .add_source(config::File::with_name("/etc/cellbox/config").required(false))
            .add_source(
                config::File::with_name(&workspace_config.to_string_lossy()).required(false),
            )
            .add_source(
                config::File::from(workspace_state)
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            // Override with environment variables (CELLBOX__ prefix)
            .add_source(
                config::Environment::with_prefix("CELLBOX")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("support_packages")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let mut app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // An explicit workspace argument wins over files and environment
        if let Some(dir) = workspace {
            app_config.workspace_dir = dir.to_path_buf();
        }

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.python_path.trim().is_empty() {
            anyhow::bail!("Interpreter path cannot be empty");
        }

        if matches!(self.container_name.as_deref(), Some(name) if name.trim().is_empty()) {
            anyhow::bail!("Container name cannot be empty");
        }

        if self.execution_timeout_seconds == Some(0) {
            anyhow::bail!("Execution timeout cannot be 0");
        }

        if self.daemon_timeout_seconds == 0 {
            anyhow::bail!("Daemon timeout cannot be 0");
        }

        if !self.mount_path.starts_with('/') {
            anyhow::bail!("Mount path must be absolute");
        }

        Ok(())
    }

    /// Record `name` as this workspace's default kernel so later loads pick it up
    pub fn save_default_kernel(&mut self, name: &str) -> Result<()> {
        let path = self.workspace_dir.join(WORKSPACE_STATE_FILE);
        let mut state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<Map<String, Value>>(&bytes).unwrap_or_default(),
            Err(_) => Map::new(),
        };
        state.insert("default_kernel".to_string(), Value::String(name.to_string()));

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, serde_json::to_vec_pretty(&state)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        self.default_kernel = name.to_string();
        Ok(())
    }

    /// Absolute location of the build-context definition on the host
    pub fn build_context_file(&self) -> PathBuf {
        if self.build_context_path.is_absolute() {
            self.build_context_path.clone()
        } else {
            self.workspace_dir.join(&self.build_context_path)
        }
    }
}
