//! Secret source abstraction and the in-cluster `kubectl` implementation.
//!
//! The [`SecretSource`] trait decouples the deployment steps from the cluster.
//! Tests use fakes that return canned maps without spawning processes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::io::process::{Invocation, ProcessError, run};

/// Secret type whose `data` is a flat key/value map.
pub const OPAQUE_SECRET_TYPE: &str = "Opaque";

/// Failure to read a secret.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("not running in a cluster: missing service account token {0}")]
    NotInCluster(PathBuf),
    #[error("secret '{name}' not found in namespace {namespace}")]
    NotFound { namespace: String, name: String },
    #[error("secret type is not Opaque (got '{0}')")]
    WrongType(String),
    #[error("fetch secret: {source}: {stderr}")]
    Fetch {
        #[source]
        source: ProcessError,
        stderr: String,
    },
    #[error("parse secret json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("decode secret key '{key}': {reason}")]
    Decode { key: String, reason: String },
}

/// Read access to a namespaced key/value secret store.
pub trait SecretSource {
    /// Fetch secret `name` in `namespace` as a flat map. Every value is sensitive.
    fn fetch(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>, SecretError>;
}

/// Reads secrets with `kubectl get secret` using the pod's service account.
#[derive(Debug, Clone)]
pub struct KubectlSecretSource {
    kubectl_bin: String,
    service_account_dir: PathBuf,
}

impl KubectlSecretSource {
    pub fn new(kubectl_bin: impl Into<String>, service_account_dir: impl Into<PathBuf>) -> Self {
        Self {
            kubectl_bin: kubectl_bin.into(),
            service_account_dir: service_account_dir.into(),
        }
    }

    fn ensure_in_cluster(&self) -> Result<(), SecretError> {
        let token = self.service_account_dir.join("token");
        if !token.is_file() {
            return Err(SecretError::NotInCluster(token));
        }
        Ok(())
    }
}

impl SecretSource for KubectlSecretSource {
    #[instrument(skip(self))]
    fn fetch(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, String>, SecretError> {
        self.ensure_in_cluster()?;
        info!("Get secret {name} in namespace {namespace}");

        let invocation = Invocation::new(&self.kubectl_bin).args([
            "get",
            "secret",
            name,
            "--namespace",
            namespace,
            "--output",
            "json",
        ]);
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let Err(source) = run(&invocation, &mut stdout, &mut stderr) {
            let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
            if stderr.contains("NotFound") {
                return Err(SecretError::NotFound {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                });
            }
            return Err(SecretError::Fetch { source, stderr });
        }
        let secrets = parse_secret(&stdout)?;
        debug!(keys = secrets.len(), "decoded secret");
        Ok(secrets)
    }
}

#[derive(Debug, Deserialize)]
struct SecretDocument {
    #[serde(rename = "type", default)]
    secret_type: String,
    #[serde(default)]
    data: BTreeMap<String, String>,
}

/// Decode a `kubectl get secret -o json` document into a flat map.
pub fn parse_secret(raw: &[u8]) -> Result<BTreeMap<String, String>, SecretError> {
    let doc: SecretDocument = serde_json::from_slice(raw)?;
    if doc.secret_type != OPAQUE_SECRET_TYPE {
        return Err(SecretError::WrongType(doc.secret_type));
    }
    let mut secrets = BTreeMap::new();
    for (key, encoded) in doc.data {
        let bytes = STANDARD.decode(encoded.as_bytes()).map_err(|err| SecretError::Decode {
            key: key.clone(),
            reason: err.to_string(),
        })?;
        let value = String::from_utf8(bytes).map_err(|err| SecretError::Decode {
            key: key.clone(),
            reason: err.to_string(),
        })?;
        secrets.insert(key, value);
    }
    Ok(secrets)
}
