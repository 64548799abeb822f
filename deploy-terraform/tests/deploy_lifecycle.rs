//! End-to-end deployment scenarios against a scripted `terraform`.
//!
//! Each test builds a scratch checkout with an `.ods/` cache, swaps the
//! terraform binary for a shell script that logs its arguments, and drives the
//! full step sequence through `deploy`.
#![cfg(unix)]

use std::fs;

use deploy_terraform::core::args::{
    PLAN_CHANGES_EXIT_CODE, PLAN_ERROR_EXIT_CODE, PLAN_NO_CHANGES_EXIT_CODE,
};
use deploy_terraform::deploy;
use deploy_terraform::io::config::Options;
use deploy_terraform::io::process::ProcessError;
use deploy_terraform::pipeline::Completion;
use deploy_terraform::steps::{NO_CHANGES_REASON, PLAN_ONLY_REASON};
use deploy_terraform::test_support::{FakeSecretSource, FakeTerraform, OdsWorkspace};

const PLAN_LINE: &str = "plan -detailed-exitcode -input=false -no-color -compact-warnings";
const APPLY_LINE: &str = "apply -auto-approve -input=false -no-color -compact-warnings";

#[test]
fn plan_only_stops_after_plan_and_masks_artifact() {
    let ws = OdsWorkspace::new().expect("workspace");
    let terraform = ws
        .write_fake_terraform(&FakeTerraform {
            plan_exit: PLAN_CHANGES_EXIT_CODE,
            plan_script: "echo \"hello=$TF_VAR_hello\"".to_string(),
            ..FakeTerraform::default()
        })
        .expect("fake terraform");
    let secrets = FakeSecretSource::with_secrets([("TF_VAR_hello", "Hello ods-pipeline!")]);
    let options = Options {
        plan_only: true,
        ..ws.options()
    };
    let (mut ctx, out, err) = ws.context(options, &terraform, secrets.clone());

    let completion = deploy(&mut ctx).expect("deploy");

    assert_eq!(
        completion,
        Completion::Stopped {
            step: "plan-terraform",
            reason: PLAN_ONLY_REASON.to_string(),
        }
    );
    assert_eq!(
        secrets.calls(),
        vec![("foo-cd".to_string(), "terraform-envs-dev".to_string())]
    );
    assert_eq!(
        ws.terraform_calls(),
        vec!["init -input=false -no-color".to_string(), PLAN_LINE.to_string()]
    );

    let artifact = fs::read_to_string(ws.deployments_dir().join("plan-dev.txt")).expect("artifact");
    assert!(artifact.contains("hello=***"));
    assert!(!artifact.contains("Hello ods-pipeline!"));

    let stdout = out.contents();
    assert!(stdout.contains("KUBE_NAMESPACE=foo-cd"));
    assert!(stdout.contains("TF_VAR_hello=***"));
    assert!(!stdout.contains("Hello ods-pipeline!"));
    assert!(err.contents().contains("plan warning"));

    let backend =
        fs::read_to_string(ws.terraform_dir().join("backend-kubernetes.tf")).expect("backend");
    assert!(backend.starts_with("// File is generated; DO NOT EDIT."));
    assert!(backend.contains("\"bar-dev\""));
}

#[test]
fn no_changes_skips_apply() {
    let ws = OdsWorkspace::new().expect("workspace");
    let terraform = ws
        .write_fake_terraform(&FakeTerraform {
            plan_exit: PLAN_NO_CHANGES_EXIT_CODE,
            ..FakeTerraform::default()
        })
        .expect("fake terraform");
    let options = Options {
        env_from_secret: false,
        ..ws.options()
    };
    let secrets = FakeSecretSource::default();
    let (mut ctx, _, _) = ws.context(options, &terraform, secrets.clone());

    let completion = deploy(&mut ctx).expect("deploy");

    assert_eq!(
        completion,
        Completion::Stopped {
            step: "plan-terraform",
            reason: NO_CHANGES_REASON.to_string(),
        }
    );
    assert!(secrets.calls().is_empty());
    assert!(!ws.terraform_calls().iter().any(|c| c.starts_with("apply")));
    assert!(ws.deployments_dir().join("plan-dev.txt").is_file());
}

#[test]
fn changes_are_applied() {
    let ws = OdsWorkspace::new().expect("workspace");
    let terraform = ws
        .write_fake_terraform(&FakeTerraform {
            plan_exit: PLAN_CHANGES_EXIT_CODE,
            ..FakeTerraform::default()
        })
        .expect("fake terraform");
    let (mut ctx, out, _) = ws.context(
        ws.options(),
        &terraform,
        FakeSecretSource::with_secrets([("TF_VAR_token", "s3cr3t")]),
    );

    let completion = deploy(&mut ctx).expect("deploy");

    assert_eq!(completion, Completion::Finished);
    assert_eq!(
        ws.terraform_calls(),
        vec![
            "init -input=false -no-color".to_string(),
            PLAN_LINE.to_string(),
            APPLY_LINE.to_string(),
        ]
    );
    assert!(out.contents().contains("Apply complete!"));
    assert!(!out.contents().contains("s3cr3t"));
}

#[test]
fn plan_error_fails_with_exit_code() {
    let ws = OdsWorkspace::new().expect("workspace");
    let terraform = ws
        .write_fake_terraform(&FakeTerraform {
            plan_exit: PLAN_ERROR_EXIT_CODE,
            ..FakeTerraform::default()
        })
        .expect("fake terraform");
    let (mut ctx, _, _) = ws.context(
        ws.options(),
        &terraform,
        FakeSecretSource::with_secrets([("TF_VAR_a", "value-a")]),
    );

    let err = deploy(&mut ctx).expect_err("should fail");

    assert!(format!("{err:#}").contains("terraform plan"));
    let process = err.downcast_ref::<ProcessError>().expect("process error");
    assert_eq!(process.exit_code(), Some(PLAN_ERROR_EXIT_CODE));
    assert!(!ws.terraform_calls().iter().any(|c| c.starts_with("apply")));
}

#[test]
fn init_error_stops_before_plan() {
    let ws = OdsWorkspace::new().expect("workspace");
    let terraform = ws
        .write_fake_terraform(&FakeTerraform {
            init_exit: 3,
            ..FakeTerraform::default()
        })
        .expect("fake terraform");
    let options = Options {
        env_from_secret: false,
        ..ws.options()
    };
    let (mut ctx, _, _) = ws.context(options, &terraform, FakeSecretSource::default());

    let err = deploy(&mut ctx).expect_err("should fail");

    assert!(format!("{err:#}").contains("terraform init"));
    assert_eq!(ws.terraform_calls(), vec!["init -input=false -no-color".to_string()]);
}

#[test]
fn subrepos_with_terraform_get_their_own_artifact() {
    let ws = OdsWorkspace::new().expect("workspace");
    ws.add_subrepo("infra", true).expect("subrepo");
    ws.add_subrepo("docs", false).expect("subrepo");
    let terraform = ws
        .write_fake_terraform(&FakeTerraform::default())
        .expect("fake terraform");
    let options = Options {
        env_from_secret: false,
        plan_only: true,
        ..ws.options()
    };
    let (mut ctx, _, _) = ws.context(options, &terraform, FakeSecretSource::default());

    deploy(&mut ctx).expect("deploy");

    let calls = ws.terraform_calls();
    assert_eq!(calls.iter().filter(|c| c.starts_with("init")).count(), 2);
    assert_eq!(calls.iter().filter(|c| c.starts_with("plan")).count(), 2);
    assert!(ws.deployments_dir().join("plan-dev.txt").is_file());
    assert!(ws.deployments_dir().join("infra-plan-dev.txt").is_file());
    assert!(!ws.deployments_dir().join("docs-plan-dev.txt").exists());
}

#[test]
fn environment_and_cli_var_files_are_passed_in_order() {
    let ws = OdsWorkspace::new().expect("workspace");
    fs::write(ws.terraform_dir().join("dev.tfvars"), "a = 1\n").expect("tfvars");
    let terraform = ws
        .write_fake_terraform(&FakeTerraform::default())
        .expect("fake terraform");
    let options = Options {
        env_from_secret: false,
        plan_extra_args: "-refresh=false".to_string(),
        var_files: vec!["extra.tfvars".to_string()],
        ..ws.options()
    };
    let (mut ctx, _, _) = ws.context(options, &terraform, FakeSecretSource::default());

    deploy(&mut ctx).expect("deploy");

    let plan = ws
        .terraform_calls()
        .into_iter()
        .find(|c| c.starts_with("plan"))
        .expect("plan call");
    assert_eq!(
        plan,
        "plan -detailed-exitcode -refresh=false -var-file=dev.tfvars -var-file=extra.tfvars \
         -input=false -no-color -compact-warnings"
    );
}

#[test]
fn missing_secret_fails_before_terraform_runs() {
    let ws = OdsWorkspace::new().expect("workspace");
    let terraform = ws
        .write_fake_terraform(&FakeTerraform::default())
        .expect("fake terraform");
    let (mut ctx, _, _) = ws.context(ws.options(), &terraform, FakeSecretSource::default());

    let err = deploy(&mut ctx).expect_err("should fail");

    assert!(format!("{err:#}").contains("terraform-envs-dev"));
    assert!(ws.terraform_calls().is_empty());
}

#[test]
fn unbalanced_plan_args_fail_the_plan_step() {
    let ws = OdsWorkspace::new().expect("workspace");
    let terraform = ws
        .write_fake_terraform(&FakeTerraform::default())
        .expect("fake terraform");
    let options = Options {
        env_from_secret: false,
        plan_extra_args: "-target='oops".to_string(),
        ..ws.options()
    };
    let (mut ctx, _, _) = ws.context(options, &terraform, FakeSecretSource::default());

    let err = deploy(&mut ctx).expect_err("should fail");

    assert!(err.to_string().contains("plan-extra-args"));
    assert_eq!(ws.terraform_calls(), vec!["init -input=false -no-color".to_string()]);
}

#[test]
fn missing_cache_fails_setup() {
    let temp = tempfile::tempdir().expect("tempdir");
    let ws = OdsWorkspace::new().expect("workspace");
    let options = Options {
        checkout_dir: temp.path().to_path_buf(),
        ..ws.options()
    };
    let (mut ctx, _, _) = ws.context(
        options,
        &temp.path().join("terraform"),
        FakeSecretSource::default(),
    );

    let err = deploy(&mut ctx).expect_err("should fail");

    assert!(format!("{err:#}").contains("read cache"));
}

#[test]
fn verbose_prints_environment_before_deploying() {
    let ws = OdsWorkspace::new().expect("workspace");
    let terraform = ws
        .write_fake_terraform(&FakeTerraform::default())
        .expect("fake terraform");
    let options = Options {
        env_from_secret: false,
        verbose: true,
        ..ws.options()
    };
    let (mut ctx, out, _) = ws.context(options, &terraform, FakeSecretSource::default());

    let completion = deploy(&mut ctx).expect("deploy");

    assert!(matches!(completion, Completion::Stopped { .. }));
    let stdout = out.contents();
    let env_line = stdout.lines().position(|l| l.starts_with("PATH="));
    let init_line = stdout.lines().position(|l| l.contains("terraform init"));
    assert!(env_line.is_some(), "missing env listing in {stdout}");
    assert!(env_line < init_line);
}

#[test]
fn debug_implies_environment_listing() {
    let ws = OdsWorkspace::new().expect("workspace");
    let terraform = ws
        .write_fake_terraform(&FakeTerraform::default())
        .expect("fake terraform");
    let options = Options {
        env_from_secret: false,
        debug: true,
        ..ws.options()
    };
    let (mut ctx, out, _) = ws.context(options, &terraform, FakeSecretSource::default());

    deploy(&mut ctx).expect("deploy");

    assert!(out.contents().lines().any(|l| l.starts_with("PATH=")));
}

#[test]
fn quiet_run_does_not_print_environment() {
    let ws = OdsWorkspace::new().expect("workspace");
    let terraform = ws
        .write_fake_terraform(&FakeTerraform::default())
        .expect("fake terraform");
    let options = Options {
        env_from_secret: false,
        ..ws.options()
    };
    let (mut ctx, out, _) = ws.context(options, &terraform, FakeSecretSource::default());

    deploy(&mut ctx).expect("deploy");

    assert!(!out.contents().lines().any(|l| l.starts_with("PATH=")));
}

#[test]
fn existing_deployment_artifacts_are_detected() {
    let ws = OdsWorkspace::new().expect("workspace");
    fs::create_dir_all(ws.deployments_dir()).expect("deployments dir");
    fs::write(ws.deployments_dir().join("helm-dev.txt"), "release").expect("artifact");
    let infra = ws.add_subrepo("infra", true).expect("subrepo");
    let infra_deployments = infra.join(".ods/artifacts/deployments");
    fs::create_dir_all(&infra_deployments).expect("subrepo deployments dir");
    fs::write(infra_deployments.join("image-dev.txt"), "digest").expect("subrepo artifact");
    let terraform = ws
        .write_fake_terraform(&FakeTerraform::default())
        .expect("fake terraform");
    let options = Options {
        env_from_secret: false,
        plan_only: true,
        ..ws.options()
    };
    let (mut ctx, _, _) = ws.context(options, &terraform, FakeSecretSource::default());

    deploy(&mut ctx).expect("deploy");

    assert_eq!(
        ctx.deployment_artifacts,
        vec![
            ws.deployments_dir().join("helm-dev.txt"),
            infra_deployments.join("image-dev.txt"),
        ]
    );
    let infra_config = ctx
        .tf_configs()
        .iter()
        .find(|c| c.subrepo.as_ref().is_some_and(|s| s.name == "infra"))
        .expect("infra config");
    assert_eq!(
        infra_config.subrepo_artifacts,
        vec![infra_deployments.join("image-dev.txt")]
    );
}
