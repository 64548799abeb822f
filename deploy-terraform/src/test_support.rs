//! Test-only helpers: in-memory sinks, a fake secret source and scratch
//! checkouts with a scripted `terraform`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::context::DeployContext;
use crate::io::config::{Options, ToolConfig};
use crate::io::secrets::{SecretError, SecretSource};

/// Cloneable in-memory sink; every clone appends to the same buffer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        let bytes = match self.0.lock() {
            Ok(bytes) => bytes.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("shared buffer lock poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Secret source returning a canned map and recording every lookup.
///
/// Clones share the lookup log, so a test can keep one while the context owns
/// the other. Without secrets every lookup fails with `NotFound`.
#[derive(Debug, Clone, Default)]
pub struct FakeSecretSource {
    secrets: Option<BTreeMap<String, String>>,
    calls: Rc<RefCell<Vec<(String, String)>>>,
}

impl FakeSecretSource {
    /// Every lookup succeeds with `secrets`.
    pub fn with_secrets<I, K, V>(secrets: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            secrets: Some(
                secrets
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
            calls: Rc::default(),
        }
    }

    /// `(namespace, name)` of every lookup so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.borrow().clone()
    }
}

impl SecretSource for FakeSecretSource {
    fn fetch(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>, SecretError> {
        self.calls
            .borrow_mut()
            .push((namespace.to_string(), name.to_string()));
        self.secrets.clone().ok_or_else(|| SecretError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

/// Exit codes and output of a scripted `terraform`.
#[derive(Debug, Clone, Default)]
pub struct FakeTerraform {
    pub init_exit: i32,
    pub plan_exit: i32,
    pub apply_exit: i32,
    /// Extra shell lines run for `plan`, e.g. to echo secret env variables.
    pub plan_script: String,
}

/// Scratch checkout with an `.ods/` cache and a `terraform` directory.
///
/// Cleaned up on drop.
pub struct OdsWorkspace {
    temp: TempDir,
}

impl OdsWorkspace {
    /// Checkout for namespace `foo-cd` and component `bar`.
    pub fn new() -> Result<Self> {
        Self::with_cache("foo-cd", "bar")
    }

    pub fn with_cache(namespace: &str, component: &str) -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let ods = temp.path().join(".ods");
        fs::create_dir_all(&ods).context("create .ods")?;
        fs::write(ods.join("namespace"), format!("{namespace}\n")).context("write namespace")?;
        fs::write(ods.join("component"), format!("{component}\n")).context("write component")?;
        fs::create_dir_all(temp.path().join("terraform")).context("create terraform dir")?;
        Ok(Self { temp })
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn terraform_dir(&self) -> PathBuf {
        self.path().join("terraform")
    }

    pub fn deployments_dir(&self) -> PathBuf {
        self.path().join(".ods/artifacts/deployments")
    }

    /// Add `.ods/repos/<name>`, optionally with a `terraform` directory.
    pub fn add_subrepo(&self, name: &str, with_terraform: bool) -> Result<PathBuf> {
        let dir = self.path().join(".ods/repos").join(name);
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        if with_terraform {
            fs::create_dir_all(dir.join("terraform")).context("create subrepo terraform dir")?;
        }
        Ok(dir)
    }

    fn calls_log(&self) -> PathBuf {
        self.path().join("terraform-calls.log")
    }

    /// Write an executable `terraform` stand-in and return its path.
    ///
    /// Every call appends its arguments to a log readable via
    /// [`OdsWorkspace::terraform_calls`].
    #[cfg(unix)]
    pub fn write_fake_terraform(&self, fake: &FakeTerraform) -> Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        let script = format!(
            "#!/bin/sh\n\
             echo \"$*\" >> '{log}'\n\
             case \"$1\" in\n\
             init) echo 'Terraform has been successfully initialized!'; exit {init};;\n\
             plan)\n\
             echo 'Terraform will perform the following actions:'\n\
             {plan_script}\n\
             echo 'plan warning' >&2\n\
             exit {plan};;\n\
             apply) echo 'Apply complete!'; exit {apply};;\n\
             esac\n\
             exit 99\n",
            log = self.calls_log().display(),
            init = fake.init_exit,
            plan = fake.plan_exit,
            apply = fake.apply_exit,
            plan_script = fake.plan_script,
        );
        let path = self.path().join("fake-terraform");
        fs::write(&path, script).with_context(|| format!("write {}", path.display()))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("chmod {}", path.display()))?;
        Ok(path)
    }

    /// Subcommand lines the fake `terraform` was called with, in order.
    pub fn terraform_calls(&self) -> Vec<String> {
        fs::read_to_string(self.calls_log())
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Options rooted at this checkout.
    pub fn options(&self) -> Options {
        Options {
            checkout_dir: self.path().to_path_buf(),
            ..Options::default()
        }
    }

    /// Context for this checkout with in-memory sinks.
    pub fn context(
        &self,
        options: Options,
        terraform_bin: &Path,
        secrets: FakeSecretSource,
    ) -> (DeployContext, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::default();
        let err = SharedBuffer::default();
        let tools = ToolConfig {
            terraform_bin: terraform_bin.display().to_string(),
            ..ToolConfig::default()
        };
        let ctx = DeployContext::new(
            options,
            tools,
            Box::new(secrets),
            Box::new(out.clone()),
            Box::new(err.clone()),
        );
        (ctx, out, err)
    }
}
