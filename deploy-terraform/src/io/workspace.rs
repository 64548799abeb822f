//! Discovery of sub-repositories, deployment artifacts and terraform directories.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::artifact::artifact_file_name;
use crate::io::ods::deployments_dir;

/// A sub-repository checked out under `.ods/repos/<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subrepo {
    pub name: String,
    pub path: PathBuf,
}

/// List sub-repositories under `repos_dir`, sorted by name.
///
/// A missing `repos_dir` means there are none.
pub fn detect_subrepos(repos_dir: &Path) -> Result<Vec<Subrepo>> {
    let entries = match fs::read_dir(repos_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("read dir {}", repos_dir.display()));
        }
    };
    let mut subrepos = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read dir {}", repos_dir.display()))?;
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat {}", entry.path().display()))?;
        if !file_type.is_dir() {
            continue;
        }
        subrepos.push(Subrepo {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path(),
        });
    }
    subrepos.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(subrepos)
}

/// Artifact files in the deployments dir of `checkout` and of every subrepo.
///
/// Paths are returned sorted within each checkout, main checkout first.
pub fn read_artifact_files(checkout: &Path, subrepos: &[Subrepo]) -> Result<Vec<PathBuf>> {
    let mut files = list_files(&deployments_dir(checkout))?;
    for subrepo in subrepos {
        files.extend(list_files(&deployments_dir(&subrepo.path))?);
    }
    Ok(files)
}

/// Artifact files of a single subrepo.
pub fn read_subrepo_artifact_files(subrepo: &Subrepo) -> Result<Vec<PathBuf>> {
    list_files(&deployments_dir(&subrepo.path))
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("read dir {}", dir.display())),
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read dir {}", dir.display()))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Whether `dir` can hold a terraform configuration.
pub fn is_terraform_dir(dir: &Path) -> bool {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "no terraform directory found");
        return false;
    }
    true
}

/// Variable file named after the target environment, if present in `dir`.
pub fn environment_var_file(dir: &Path, target_env: &str) -> Option<String> {
    let name = format!("{target_env}.tfvars");
    dir.join(&name).is_file().then_some(name)
}

/// Write one deployment artifact and return its path.
pub fn write_artifact(
    deployments_dir: &Path,
    subrepo: Option<&str>,
    artifact_name: &str,
    content: &[u8],
) -> Result<PathBuf> {
    fs::create_dir_all(deployments_dir)
        .with_context(|| format!("create artifact dir {}", deployments_dir.display()))?;
    let file_name = artifact_file_name(subrepo, artifact_name);
    let path = deployments_dir.join(&file_name);
    fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
    info!(artifact = %file_name, "wrote artifact");
    Ok(path)
}
