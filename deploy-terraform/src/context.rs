//! Mutable state threaded through the deployment steps.

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Result, anyhow};

use crate::core::args::TerraformEnv;
use crate::io::config::{Options, ToolConfig};
use crate::io::ods::{OdsContext, OdsPaths};
use crate::io::secrets::SecretSource;
use crate::io::workspace::Subrepo;

static NO_SECRETS: BTreeMap<String, String> = BTreeMap::new();

/// One terraform configuration to init, plan and apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerraformConfig {
    /// Directory holding the `*.tf` files.
    pub terraform_dir: PathBuf,
    /// Sub-repository the configuration belongs to; `None` for the main checkout.
    pub subrepo: Option<Subrepo>,
    pub subrepo_artifacts: Vec<PathBuf>,
    pub artifact_name: String,
    /// Passed as `-var-file` to plan and apply, relative to `terraform_dir`.
    pub var_files: Vec<String>,
}

impl fmt::Display for TerraformConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "terraformConfig{{")?;
        if let Some(subrepo) = &self.subrepo {
            write!(f, "subrepo: {}, ", subrepo.name)?;
        }
        write!(f, "terraformDir: {}, ", self.terraform_dir.display())?;
        write!(f, "artifactName: {}", self.artifact_name)?;
        write!(f, "}}")
    }
}

/// Execution context for one deployment run.
///
/// Owned by the pipeline; each step gets it by `&mut` in turn. The secret map and
/// the configuration list can each be set once and are read-only afterwards.
pub struct DeployContext {
    pub options: Options,
    pub tools: ToolConfig,
    pub paths: OdsPaths,
    pub ods: Option<OdsContext>,
    pub plugin_cache_dir: Option<PathBuf>,
    pub subrepos: Vec<Subrepo>,
    pub deployment_artifacts: Vec<PathBuf>,
    /// Line-buffered sink for tool stdout.
    pub out: Box<dyn Write + Send>,
    /// Sink for tool stderr.
    pub err: Box<dyn Write + Send>,
    secret_env: OnceCell<BTreeMap<String, String>>,
    tf_configs: OnceCell<Vec<TerraformConfig>>,
    secret_source: Box<dyn SecretSource>,
}

impl DeployContext {
    pub fn new(
        options: Options,
        tools: ToolConfig,
        secret_source: Box<dyn SecretSource>,
        out: Box<dyn Write + Send>,
        err: Box<dyn Write + Send>,
    ) -> Self {
        let paths = OdsPaths::new(options.checkout_dir.clone());
        Self {
            options,
            tools,
            paths,
            ods: None,
            plugin_cache_dir: None,
            subrepos: Vec::new(),
            deployment_artifacts: Vec::new(),
            out,
            err,
            secret_env: OnceCell::new(),
            tf_configs: OnceCell::new(),
            secret_source,
        }
    }

    /// Terraform directory of the main checkout.
    pub fn terraform_dir(&self) -> PathBuf {
        self.paths.root.join(&self.options.terraform_dir)
    }

    pub fn ods(&self) -> Result<&OdsContext> {
        self.ods
            .as_ref()
            .ok_or_else(|| anyhow!("pipeline context not read (setup-context must run first)"))
    }

    pub fn secret_source(&self) -> &dyn SecretSource {
        self.secret_source.as_ref()
    }

    /// Secret env variables; empty until `set_secret_env` ran.
    pub fn secret_env(&self) -> &BTreeMap<String, String> {
        self.secret_env.get().unwrap_or(&NO_SECRETS)
    }

    pub fn set_secret_env(&mut self, env: BTreeMap<String, String>) -> Result<()> {
        self.secret_env
            .set(env)
            .map_err(|_| anyhow!("secret env variables already set for this run"))
    }

    /// Located terraform configurations; empty until `set_tf_configs` ran.
    pub fn tf_configs(&self) -> &[TerraformConfig] {
        self.tf_configs.get().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn set_tf_configs(&mut self, configs: Vec<TerraformConfig>) -> Result<()> {
        self.tf_configs
            .set(configs)
            .map_err(|_| anyhow!("terraform configs already located for this run"))
    }

    /// Namespace and secrets shared by every terraform subcommand.
    pub fn terraform_env(&self) -> Result<TerraformEnv<'_>> {
        Ok(TerraformEnv {
            namespace: &self.ods()?.namespace,
            secret_env: self.secret_env(),
        })
    }
}
