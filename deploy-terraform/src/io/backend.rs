//! Rendering of the kubernetes state backend into the terraform directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

const BACKEND_TEMPLATE_NAME: &str = "backend-kubernetes.tf";
const BACKEND_TEMPLATE: &str = include_str!("../../templates/backend-kubernetes.tf");
const GENERATED_HEADER: &str = "// File is generated; DO NOT EDIT.\n\n";

/// State is stored in the secret `tfstate-<workspace>-<secret_suffix>`.
pub fn secret_suffix(component: &str, target_env: &str) -> String {
    format!("{component}-{target_env}")
}

/// Render the backend template with `secret_suffix`.
pub fn render_backend(secret_suffix: &str) -> Result<String> {
    let mut env = Environment::new();
    env.add_template(BACKEND_TEMPLATE_NAME, BACKEND_TEMPLATE)
        .context("parse kubernetes backend template")?;
    let template = env.get_template(BACKEND_TEMPLATE_NAME)?;
    let rendered = template
        .render(context! { secret_suffix => secret_suffix })
        .context("rendering internal kubernetes backend template failed")?;
    Ok(format!("{GENERATED_HEADER}{rendered}\n"))
}

/// Write `backend-kubernetes.tf` into `terraform_dir`, replacing any previous copy.
pub fn write_backend(terraform_dir: &Path, secret_suffix: &str) -> Result<PathBuf> {
    let destination = terraform_dir.join(BACKEND_TEMPLATE_NAME);
    let contents = render_backend(secret_suffix)?;
    fs::write(&destination, contents)
        .with_context(|| format!("failed to create file {}", destination.display()))?;
    debug!(path = %destination.display(), "rendered backend");
    Ok(destination)
}
