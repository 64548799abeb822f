//! Run options and the optional tool configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Env variable that switches on debug mode when set to exactly `true`.
pub const DEBUG_ENV: &str = "DEBUG";

/// Whether the `DEBUG` env value enables debug mode.
///
/// Only `true` does; any other value, including `1`, leaves it off.
pub fn debug_from_env(value: Option<&str>) -> bool {
    value == Some("true")
}

/// Options for one deployment run, built once from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Checkout directory holding the `.ods/` cache.
    pub checkout_dir: PathBuf,
    /// Terraform configuration directory, relative to the checkout.
    pub terraform_dir: String,
    /// Target environment; part of the secret name, backend suffix and artifact names.
    pub target_environment: String,
    /// Derive terraform env variables from the cluster secret.
    pub env_from_secret: bool,
    /// Stop after `terraform plan`.
    pub plan_only: bool,
    pub apply_extra_args: String,
    pub plan_extra_args: String,
    /// Extra `-var-file` arguments for plan and apply.
    pub var_files: Vec<String>,
    pub debug: bool,
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            checkout_dir: PathBuf::from("."),
            terraform_dir: "./terraform".to_string(),
            target_environment: "dev".to_string(),
            env_from_secret: true,
            plan_only: false,
            apply_extra_args: String::new(),
            plan_extra_args: String::new(),
            var_files: Vec::new(),
            debug: false,
            verbose: false,
        }
    }
}

impl Options {
    /// Debug implies verbose.
    pub fn is_verbose(&self) -> bool {
        self.debug || self.verbose
    }

    pub fn validate(&self) -> Result<()> {
        if self.terraform_dir.trim().is_empty() {
            return Err(anyhow!("terraform-dir must not be empty"));
        }
        if self.target_environment.trim().is_empty() {
            return Err(anyhow!("target-environment must not be empty"));
        }
        Ok(())
    }
}

/// Tool locations and naming conventions (TOML).
///
/// Missing fields default to the values used inside the pipeline image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolConfig {
    /// Terraform executable.
    pub terraform_bin: String,
    /// kubectl executable used to read secrets.
    pub kubectl_bin: String,
    /// Secret name is `<secret_name_prefix>-<target-environment>`.
    pub secret_name_prefix: String,
    /// Service account mount; its token must exist to talk to the cluster.
    pub service_account_dir: PathBuf,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            terraform_bin: "terraform".to_string(),
            kubectl_bin: "kubectl".to_string(),
            secret_name_prefix: "terraform-envs".to_string(),
            service_account_dir: PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount"),
        }
    }
}

impl ToolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.terraform_bin.trim().is_empty() {
            return Err(anyhow!("terraform_bin must not be empty"));
        }
        if self.kubectl_bin.trim().is_empty() {
            return Err(anyhow!("kubectl_bin must not be empty"));
        }
        if self.secret_name_prefix.trim().is_empty() {
            return Err(anyhow!("secret_name_prefix must not be empty"));
        }
        Ok(())
    }

    /// Secret holding the terraform env variables for `target_environment`.
    pub fn secret_name(&self, target_environment: &str) -> String {
        format!("{}-{target_environment}", self.secret_name_prefix)
    }
}

/// Load tool config from a TOML file.
///
/// If the file is missing, returns `ToolConfig::default()`.
pub fn load_config(path: &Path) -> Result<ToolConfig> {
    if !path.exists() {
        let cfg = ToolConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ToolConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
