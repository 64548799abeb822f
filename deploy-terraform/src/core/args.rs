//! Deterministic assembly of `terraform` argument vectors and environments.
//!
//! Everything here is a pure function of its inputs: the same options, secret
//! map and variable files always produce a byte-identical argument vector.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Result, anyhow};

/// `terraform plan -detailed-exitcode`: succeeded, empty diff.
pub const PLAN_NO_CHANGES_EXIT_CODE: i32 = 0;
/// `terraform plan -detailed-exitcode`: errored.
pub const PLAN_ERROR_EXIT_CODE: i32 = 1;
/// `terraform plan -detailed-exitcode`: succeeded, diff not empty.
pub const PLAN_CHANGES_EXIT_CODE: i32 = 2;

/// Env key that routes the kubernetes backend to the pipeline namespace.
pub const NAMESPACE_ENV: &str = "KUBE_NAMESPACE";
/// Env key for the shared provider plugin cache.
pub const PLUGIN_CACHE_ENV: &str = "TF_PLUGIN_CACHE_DIR";

/// Arguments, environment overlay and sensitive values for one terraform call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerraformArgs {
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub sensitive: Vec<String>,
}

/// Inputs shared by all terraform subcommands.
#[derive(Debug, Clone, Copy)]
pub struct TerraformEnv<'a> {
    pub namespace: &'a str,
    pub secret_env: &'a BTreeMap<String, String>,
}

/// `terraform init` against the kubernetes backend.
pub fn init_args(env: TerraformEnv<'_>, plugin_cache_dir: &Path) -> TerraformArgs {
    let mut args = vec!["init".to_string()];
    args.extend(common_args());
    let mut overlay = common_env(env.namespace);
    overlay.insert(
        PLUGIN_CACHE_ENV.to_string(),
        plugin_cache_dir.display().to_string(),
    );
    with_secrets(args, overlay, env.secret_env)
}

/// `terraform plan` with a detailed exit code.
pub fn plan_args(
    env: TerraformEnv<'_>,
    extra_args: &str,
    var_files: &[String],
) -> Result<TerraformArgs> {
    let mut args = vec!["plan".to_string(), "-detailed-exitcode".to_string()];
    args.extend(split_extra_args("plan-extra-args", extra_args)?);
    args.extend(var_file_args(var_files));
    args.extend(common_plan_apply_args());
    Ok(with_secrets(args, common_env(env.namespace), env.secret_env))
}

/// `terraform apply` without interactive approval.
///
/// Known limitation: apply computes a fresh plan; it does not consume the
/// output of the `plan-terraform` step.
pub fn apply_args(
    env: TerraformEnv<'_>,
    extra_args: &str,
    var_files: &[String],
) -> Result<TerraformArgs> {
    let mut args = vec!["apply".to_string(), "-auto-approve".to_string()];
    args.extend(split_extra_args("apply-extra-args", extra_args)?);
    args.extend(var_file_args(var_files));
    args.extend(common_plan_apply_args());
    Ok(with_secrets(args, common_env(env.namespace), env.secret_env))
}

/// Shell-style tokenization of a user-supplied argument string.
pub fn split_extra_args(option: &str, raw: &str) -> Result<Vec<String>> {
    shlex::split(raw).ok_or_else(|| anyhow!("parse {option} ({raw}): unbalanced quoting"))
}

/// One-line rendering of a command for the build log.
///
/// Must be written through a mask writer: the env part contains secret values.
pub fn format_command_line(
    cwd: &str,
    dir: &Path,
    env: &BTreeMap<String, String>,
    program: &str,
    args: &[String],
) -> String {
    let env = env
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "pwd={cwd}, dir={}: {env} {program} {}",
        dir.display(),
        args.join(" ")
    )
}

fn common_args() -> Vec<String> {
    vec!["-input=false".to_string(), "-no-color".to_string()]
}

fn common_plan_apply_args() -> Vec<String> {
    let mut args = common_args();
    args.push("-compact-warnings".to_string());
    args
}

fn common_env(namespace: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(NAMESPACE_ENV.to_string(), namespace.to_string())])
}

fn var_file_args(var_files: &[String]) -> impl Iterator<Item = String> + '_ {
    var_files.iter().map(|file| format!("-var-file={file}"))
}

fn with_secrets(
    args: Vec<String>,
    mut env: BTreeMap<String, String>,
    secret_env: &BTreeMap<String, String>,
) -> TerraformArgs {
    let mut sensitive = Vec::with_capacity(secret_env.len());
    for (key, value) in secret_env {
        env.insert(key.clone(), value.clone());
        sensitive.push(value.clone());
    }
    TerraformArgs {
        args,
        env,
        sensitive,
    }
}
