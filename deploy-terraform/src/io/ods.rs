//! Pipeline metadata cached in the checkout's `.ods/` directory.
//!
//! Earlier pipeline steps write one small file per field (`.ods/namespace`,
//! `.ods/component`, ...). This module reads them back into [`OdsContext`] and
//! names the directories the deployment step reads from and writes to.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

/// Canonical paths within `.ods/` for a checkout root.
#[derive(Debug, Clone)]
pub struct OdsPaths {
    pub root: PathBuf,
    pub repos_dir: PathBuf,
    pub deployments_dir: PathBuf,
    pub plugin_cache_dir: PathBuf,
}

impl OdsPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let base_dir = root.join(".ods");
        Self {
            root: root.clone(),
            repos_dir: base_dir.join("repos"),
            deployments_dir: deployments_dir(&root),
            plugin_cache_dir: base_dir.join("deps").join("terraform"),
        }
    }
}

/// Deployment artifact directory of a checkout (main repo or sub-repository).
pub fn deployments_dir(checkout: &Path) -> PathBuf {
    checkout.join(".ods").join("artifacts").join("deployments")
}

/// Identity of the pipeline run, read from the `.ods/` cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OdsContext {
    pub namespace: String,
    pub component: String,
    pub project: Option<String>,
    pub repository: Option<String>,
    pub git_commit_sha: Option<String>,
    pub git_ref: Option<String>,
    pub git_url: Option<String>,
    pub version: Option<String>,
}

impl OdsContext {
    /// Read the cache under `checkout/.ods`.
    ///
    /// `namespace` and `component` are required; everything else is optional.
    pub fn read_cache(checkout: &Path) -> Result<Self> {
        let base = checkout.join(".ods");
        let ctxt = Self {
            namespace: read_required(&base, "namespace")?,
            component: read_required(&base, "component")?,
            project: read_optional(&base, "project")?,
            repository: read_optional(&base, "repository")?,
            git_commit_sha: read_optional(&base, "git-commit-sha")?,
            git_ref: read_optional(&base, "git-ref")?,
            git_url: read_optional(&base, "git-url")?,
            version: read_optional(&base, "version")?,
        };
        debug!(namespace = %ctxt.namespace, component = %ctxt.component, "read ods cache");
        Ok(ctxt)
    }
}

fn read_required(base: &Path, name: &str) -> Result<String> {
    read_optional(base, name)?
        .ok_or_else(|| anyhow!("missing {}", base.join(name).display()))
}

fn read_optional(base: &Path, name: &str) -> Result<Option<String>> {
    let path = base.join(name);
    match fs::read_to_string(&path) {
        Ok(contents) => {
            let value = contents.trim();
            if value.is_empty() {
                Ok(None)
            } else {
                Ok(Some(value.to_string()))
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}
