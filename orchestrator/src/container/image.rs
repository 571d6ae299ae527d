//! Image identity and build context

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::Result;

use super::archive::single_file_archive;

/// Number of hex digits of the identity hash kept in derived names
const HASH_LEN: usize = 12;

/// The image backing a workspace. Derived once from the workspace identity;
/// the image itself lives only in the daemon's store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub name: String,
    pub build_context_path: PathBuf,
}

impl ImageDescriptor {
    /// Derive the descriptor for a workspace.
    ///
    /// `identity` overrides the canonical workspace path as the naming input.
    pub fn for_workspace(
        workspace_dir: &Path,
        identity: Option<&str>,
        build_context_path: PathBuf,
    ) -> Self {
        Self {
            name: derive_name(workspace_dir, identity),
            build_context_path,
        }
    }

    /// Tar archive holding the build-context definition as `Dockerfile`.
    ///
    /// A default definition is synthesized when the configured file is
    /// absent.
    pub async fn build_context(&self, support_packages: &[String], mount_path: &str) -> Result<Vec<u8>> {
        let definition = match tokio::fs::read(&self.build_context_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    path = %self.build_context_path.display(),
                    "Build context definition not found, using default"
                );
                default_dockerfile(support_packages, mount_path).into_bytes()
            }
            Err(e) => return Err(e.into()),
        };

        single_file_archive("Dockerfile", &definition, 0o644)
    }
}

/// `cellbox-<slug>-<hash>`: a pure function of the workspace identity
pub fn derive_name(workspace_dir: &Path, identity: Option<&str>) -> String {
    let identity = match identity {
        Some(id) => id.to_string(),
        None => std::fs::canonicalize(workspace_dir)
            .unwrap_or_else(|_| workspace_dir.to_path_buf())
            .to_string_lossy()
            .into_owned(),
    };

    let base = identity
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    // Image references only allow single separators between alphanumerics,
    // so every run of separators becomes one '-'
    let mut slug = String::new();
    let mut separated = false;
    for c in base.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            if separated && !slug.is_empty() {
                slug.push('-');
            }
            separated = false;
            slug.push(c);
        } else if matches!(c, '_' | '.' | '-') {
            separated = true;
        }
    }
    let slug = if slug.is_empty() { "workspace" } else { slug.as_str() };

    let digest = Sha256::digest(identity.as_bytes());
    let hash: String = format!("{digest:x}").chars().take(HASH_LEN).collect();

    format!("cellbox-{slug}-{hash}")
}

/// Build-context definition used when the workspace does not provide one
pub fn default_dockerfile(support_packages: &[String], mount_path: &str) -> String {
    let mut dockerfile = String::from("FROM python:3.11-slim\n\n");
    if !support_packages.is_empty() {
        dockerfile.push_str(&format!(
            "RUN pip install --no-cache-dir {}\n\n",
            support_packages.join(" ")
        ));
    }
    dockerfile.push_str(&format!("WORKDIR {mount_path}\n"));
    dockerfile
}
