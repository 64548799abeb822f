//! Terraform deployment step for ODS pipelines.
//!
//! Reads the pipeline cache from the checkout, derives terraform env variables
//! from a Kubernetes secret and runs `terraform init`, `plan` and `apply` for the
//! checkout and its sub-repositories.

use std::env;
use std::io::{self, LineWriter};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::info;

use deploy_terraform::context::DeployContext;
use deploy_terraform::exit_codes;
use deploy_terraform::io::config::{DEBUG_ENV, Options, ToolConfig, debug_from_env, load_config};
use deploy_terraform::io::secrets::KubectlSecretSource;
use deploy_terraform::logging;
use deploy_terraform::pipeline::Completion;

#[derive(Parser)]
#[command(
    name = "deploy-terraform",
    version,
    about = "Deploy terraform configurations from an ODS pipeline checkout"
)]
struct Cli {
    /// Checkout directory holding the `.ods/` cache.
    #[arg(long, default_value = ".")]
    checkout_dir: PathBuf,
    /// Terraform directory, relative to the checkout.
    #[arg(long, default_value = "./terraform")]
    terraform_dir: String,
    /// Target environment.
    #[arg(long, default_value = "dev")]
    target_environment: String,
    /// Derive env variables from the `terraform-envs-<env>` secret.
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = true, default_missing_value = "true")]
    env_from_secret: bool,
    /// Stop after `terraform plan`.
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = false, default_missing_value = "true")]
    plan_only: bool,
    /// Extra arguments for `terraform apply`.
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    apply_extra_args: String,
    /// Extra arguments for `terraform plan`.
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    plan_extra_args: String,
    /// Additional `-var-file` for plan and apply (repeatable).
    #[arg(long = "var-file")]
    var_files: Vec<String>,
    /// Debug logging; implies `--verbose`. Also enabled by `DEBUG=true`.
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = false, default_missing_value = "true")]
    debug: bool,
    /// Print the environment before deploying.
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = false, default_missing_value = "true")]
    verbose: bool,
    /// Tool configuration (TOML). Defaults apply when omitted or missing.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn into_parts(self) -> (Options, Option<PathBuf>) {
        let options = Options {
            checkout_dir: self.checkout_dir,
            terraform_dir: self.terraform_dir,
            target_environment: self.target_environment,
            env_from_secret: self.env_from_secret,
            plan_only: self.plan_only,
            apply_extra_args: self.apply_extra_args,
            plan_extra_args: self.plan_extra_args,
            var_files: self.var_files,
            debug: self.debug || debug_from_env(env::var(DEBUG_ENV).ok().as_deref()),
            verbose: self.verbose,
        };
        (options, self.config)
    }
}

fn main() {
    let (options, config) = Cli::parse().into_parts();
    logging::init(options.debug);
    if let Err(err) = run(options, config) {
        eprintln!("{:#}", err);
        process::exit(exit_codes::FAILED);
    }
    process::exit(exit_codes::OK);
}

fn run(options: Options, config: Option<PathBuf>) -> Result<()> {
    options.validate().context("invalid options")?;
    let tools = match config {
        Some(path) => load_config(&path)?,
        None => ToolConfig::default(),
    };
    let secrets = KubectlSecretSource::new(&tools.kubectl_bin, &tools.service_account_dir);
    let mut ctx = DeployContext::new(
        options,
        tools,
        Box::new(secrets),
        Box::new(LineWriter::new(io::stdout())),
        Box::new(LineWriter::new(io::stderr())),
    );
    match deploy_terraform::deploy(&mut ctx)? {
        Completion::Finished => info!("Deployment finished"),
        Completion::Stopped { step, .. } => info!(step, "Deployment stopped early"),
    }
    Ok(())
}
