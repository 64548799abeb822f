//! Naming of deployment artifacts produced from terraform output.

/// Directory name that contributes no prefix to artifact names.
pub const DEFAULT_TERRAFORM_DIR: &str = "terraform";

/// Derive the artifact name for `terraform_dir` and `target_env`.
///
/// A leading `./` is ignored. The default `terraform` directory adds nothing;
/// any other directory is prepended with `/` turned into `-`.
pub fn artifact_filename(prefix: &str, terraform_dir: &str, target_env: &str) -> String {
    let trimmed = terraform_dir.strip_prefix("./").unwrap_or(terraform_dir);
    if trimmed == DEFAULT_TERRAFORM_DIR {
        return format!("{prefix}-{target_env}");
    }
    format!("{}-{prefix}-{target_env}", trimmed.replace('/', "-"))
}

/// File name of the artifact written for one configuration location.
pub fn artifact_file_name(subrepo: Option<&str>, artifact_name: &str) -> String {
    match subrepo {
        Some(name) => format!("{name}-{artifact_name}.txt"),
        None => format!("{artifact_name}.txt"),
    }
}
