//! The terraform deployment steps, in execution order.
//!
//! Each step is a plain function over [`DeployContext`]. Fallible work lives in a
//! `try_*` helper returning `anyhow::Result` so `?` and `.context` read naturally;
//! the step wrapper turns it into an [`Outcome`].

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::context::{DeployContext, TerraformConfig};
use crate::core::args::{
    PLAN_CHANGES_EXIT_CODE, TerraformArgs, apply_args, format_command_line, init_args, plan_args,
};
use crate::core::artifact::artifact_filename;
use crate::core::outcome::Outcome;
use crate::io::backend::{secret_suffix, write_backend};
use crate::io::mask::MaskWriter;
use crate::io::ods::OdsContext;
use crate::io::process::{Invocation, ProcessError, run, run_with_alternate_exit_code};
use crate::io::workspace::{
    detect_subrepos, environment_var_file, is_terraform_dir, read_artifact_files,
    read_subrepo_artifact_files, write_artifact,
};
use crate::pipeline::Step;

pub const PLAN_ONLY_REASON: &str = "Only planning was requested, skipping terraform apply.";
pub const NO_CHANGES_REASON: &str = "No changes detected, skipping terraform apply.";

/// Artifact name prefix for plan output.
const PLAN_ARTIFACT_PREFIX: &str = "plan";

/// The deployment workflow.
pub const DEPLOY_STEPS: &[Step<DeployContext>] = &[
    Step::new("setup-context", setup_context),
    Step::new("setup-env-from-secret", setup_env_from_secret),
    Step::new("render-backend", render_backend),
    Step::new("detect-subrepos", detect_subrepos_step),
    Step::new("detect-deployment-artifacts", detect_deployment_artifacts),
    Step::new("locate-terraform-configs", locate_terraform_configs),
    Step::new("init-terraform", init_terraform),
    Step::new("plan-terraform", plan_terraform),
    Step::new("apply-terraform", apply_terraform),
];

fn setup_context(ctx: &mut DeployContext) -> Outcome {
    try_setup_context(ctx).into()
}

fn try_setup_context(ctx: &mut DeployContext) -> Result<()> {
    let ods = OdsContext::read_cache(&ctx.paths.root).context("read cache")?;
    ctx.ods = Some(ods);

    if ctx.options.is_verbose() {
        let env = Invocation::new("sh").args(["-c", "env | sort"]);
        if let Err(err) = run(&env, &mut ctx.out, &mut ctx.err) {
            info!("env command failed: {err}");
        }
    }

    let deployments = &ctx.paths.deployments_dir;
    fs::create_dir_all(deployments)
        .with_context(|| format!("create artifact path {}", deployments.display()))?;

    let cache = &ctx.paths.plugin_cache_dir;
    fs::create_dir_all(cache)
        .with_context(|| format!("create plugin cache dir {}", cache.display()))?;
    let cache = cache
        .canonicalize()
        .with_context(|| format!("resolve plugin cache dir {}", cache.display()))?;
    ctx.plugin_cache_dir = Some(cache);
    Ok(())
}

fn setup_env_from_secret(ctx: &mut DeployContext) -> Outcome {
    try_setup_env_from_secret(ctx).into()
}

fn try_setup_env_from_secret(ctx: &mut DeployContext) -> Result<()> {
    if !ctx.options.env_from_secret {
        info!("Not deriving env variables from Kubernetes secret as --env-from-secret is false");
        return Ok(());
    }
    info!("Deriving env variables from Kubernetes secret");
    let namespace = ctx.ods()?.namespace.clone();
    let name = ctx.tools.secret_name(&ctx.options.target_environment);
    let envs = ctx
        .secret_source()
        .fetch(&namespace, &name)
        .with_context(|| format!("get secret '{name}' in namespace {namespace}"))?;
    let keys: Vec<&str> = envs.keys().map(String::as_str).collect();
    info!("Secret env variables: [{}]", keys.join(","));
    ctx.set_secret_env(envs)
}

fn render_backend(ctx: &mut DeployContext) -> Outcome {
    try_render_backend(ctx).into()
}

fn try_render_backend(ctx: &mut DeployContext) -> Result<()> {
    let suffix = secret_suffix(&ctx.ods()?.component, &ctx.options.target_environment);
    let dir = ctx.terraform_dir();
    info!("Rendering kubernetes backend into {} ...", dir.display());
    write_backend(&dir, &suffix).context("render backend")?;
    Ok(())
}

fn detect_subrepos_step(ctx: &mut DeployContext) -> Outcome {
    try_detect_subrepos(ctx).into()
}

fn try_detect_subrepos(ctx: &mut DeployContext) -> Result<()> {
    info!("Detecting sub-repositories ...");
    ctx.subrepos = detect_subrepos(&ctx.paths.repos_dir).context("detect subrepos")?;
    let names: Vec<&str> = ctx.subrepos.iter().map(|s| s.name.as_str()).collect();
    info!("Sub-repositories: [{}]", names.join(","));
    Ok(())
}

fn detect_deployment_artifacts(ctx: &mut DeployContext) -> Outcome {
    try_detect_deployment_artifacts(ctx).into()
}

fn try_detect_deployment_artifacts(ctx: &mut DeployContext) -> Result<()> {
    ctx.deployment_artifacts = read_artifact_files(&ctx.paths.root, &ctx.subrepos)
        .context("collect deployment artifacts")?;
    info!(
        count = ctx.deployment_artifacts.len(),
        "Detected deployment artifacts"
    );
    Ok(())
}

fn locate_terraform_configs(ctx: &mut DeployContext) -> Outcome {
    try_locate_terraform_configs(ctx).into()
}

fn try_locate_terraform_configs(ctx: &mut DeployContext) -> Result<()> {
    let options = &ctx.options;
    let artifact_name = artifact_filename(
        PLAN_ARTIFACT_PREFIX,
        &options.terraform_dir,
        &options.target_environment,
    );
    let var_files = |dir: &Path| -> Vec<String> {
        environment_var_file(dir, &options.target_environment)
            .into_iter()
            .chain(options.var_files.iter().cloned())
            .collect()
    };

    let mut configs = Vec::new();
    let main_dir = ctx.terraform_dir();
    if is_terraform_dir(&main_dir) {
        configs.push(TerraformConfig {
            var_files: var_files(&main_dir),
            terraform_dir: main_dir,
            subrepo: None,
            subrepo_artifacts: Vec::new(),
            artifact_name: artifact_name.clone(),
        });
    }
    for subrepo in &ctx.subrepos {
        let dir = subrepo.path.join(&options.terraform_dir);
        if !is_terraform_dir(&dir) {
            info!("No terraform config found at {}", dir.display());
            continue;
        }
        let artifacts = read_subrepo_artifact_files(subrepo)
            .with_context(|| format!("collect artifacts of subrepo {}", subrepo.name))?;
        configs.push(TerraformConfig {
            var_files: var_files(&dir),
            terraform_dir: dir,
            subrepo: Some(subrepo.clone()),
            subrepo_artifacts: artifacts,
            artifact_name: artifact_name.clone(),
        });
    }

    if configs.is_empty() {
        warn!("No terraform configuration located");
    }
    for config in &configs {
        info!("Located {config}");
    }
    ctx.set_tf_configs(configs)
}

fn init_terraform(ctx: &mut DeployContext) -> Outcome {
    try_init_terraform(ctx).into()
}

fn try_init_terraform(ctx: &mut DeployContext) -> Result<()> {
    let cache = ctx
        .plugin_cache_dir
        .clone()
        .ok_or_else(|| anyhow!("plugin cache dir not set up"))?;
    let configs = ctx.tf_configs().to_vec();
    for config in &configs {
        info!("terraform init {} ...", config.terraform_dir.display());
        let cmd = init_args(ctx.terraform_env()?, &cache);
        echo_command(ctx, &cmd, &config.terraform_dir)?;
        terraform(ctx, &cmd, &config.terraform_dir).context("terraform init")?;
    }
    Ok(())
}

fn plan_terraform(ctx: &mut DeployContext) -> Outcome {
    try_plan_terraform(ctx).into()
}

fn try_plan_terraform(ctx: &mut DeployContext) -> Result<Outcome> {
    let configs = ctx.tf_configs().to_vec();
    let mut in_sync = true;
    for config in &configs {
        info!("terraform plan {} ...", config.terraform_dir.display());
        let cmd = plan_args(
            ctx.terraform_env()?,
            &ctx.options.plan_extra_args,
            &config.var_files,
        )?;
        echo_command(ctx, &cmd, &config.terraform_dir)?;
        let (config_in_sync, plan) =
            terraform_plan(ctx, &cmd, &config.terraform_dir).context("terraform plan")?;
        write_artifact(
            &ctx.paths.deployments_dir,
            config.subrepo.as_ref().map(|s| s.name.as_str()),
            &config.artifact_name,
            &plan,
        )
        .context("write plan artifact")?;
        in_sync &= config_in_sync;
    }

    if ctx.options.plan_only {
        return Ok(Outcome::stop(PLAN_ONLY_REASON));
    }
    if in_sync {
        return Ok(Outcome::stop(NO_CHANGES_REASON));
    }
    Ok(Outcome::Continue)
}

fn apply_terraform(ctx: &mut DeployContext) -> Outcome {
    try_apply_terraform(ctx).into()
}

fn try_apply_terraform(ctx: &mut DeployContext) -> Result<()> {
    let configs = ctx.tf_configs().to_vec();
    for config in &configs {
        info!("terraform apply {} ...", config.terraform_dir.display());
        let cmd = apply_args(
            ctx.terraform_env()?,
            &ctx.options.apply_extra_args,
            &config.var_files,
        )?;
        echo_command(ctx, &cmd, &config.terraform_dir)?;
        terraform(ctx, &cmd, &config.terraform_dir).context("terraform apply")?;
    }
    Ok(())
}

fn invocation(ctx: &DeployContext, cmd: &TerraformArgs, dir: &Path) -> Invocation {
    let mut invocation = Invocation::new(&ctx.tools.terraform_bin)
        .args(&cmd.args)
        .dir(dir)
        .sensitive(&cmd.sensitive);
    for (key, value) in &cmd.env {
        invocation = invocation.env(key, value);
    }
    invocation
}

/// Print the command line to stdout with secret values masked.
fn echo_command(ctx: &mut DeployContext, cmd: &TerraformArgs, dir: &Path) -> Result<()> {
    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd.display().to_string(),
        Err(err) => format!("E:{err}"),
    };
    let line = format_command_line(&cwd, dir, &cmd.env, &ctx.tools.terraform_bin, &cmd.args);
    let mut out = MaskWriter::new(&mut ctx.out, &cmd.sensitive);
    out.write_all(format!("{line}\n").as_bytes())
        .and_then(|()| out.flush())
        .context("echo command")
}

#[instrument(skip_all, fields(dir = %dir.display()))]
fn terraform(ctx: &mut DeployContext, cmd: &TerraformArgs, dir: &Path) -> Result<(), ProcessError> {
    let invocation = invocation(ctx, cmd, dir);
    let out = MaskWriter::new(&mut ctx.out, &invocation.sensitive);
    let err = MaskWriter::new(&mut ctx.err, &invocation.sensitive);
    run(&invocation, out, err)
}

/// Run `terraform plan`, returning whether the configuration is in sync and
/// the masked stdout.
#[instrument(skip_all, fields(dir = %dir.display()))]
fn terraform_plan(
    ctx: &mut DeployContext,
    cmd: &TerraformArgs,
    dir: &Path,
) -> Result<(bool, Vec<u8>), ProcessError> {
    let invocation = invocation(ctx, cmd, dir);
    let out = MaskWriter::new(&mut ctx.out, &invocation.sensitive);
    let err = MaskWriter::new(&mut ctx.err, &invocation.sensitive);
    let in_sync = run_with_alternate_exit_code(&invocation, &out, err, PLAN_CHANGES_EXIT_CODE)?;
    Ok((in_sync, out.buffered()))
}
