use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{ProvisionError, ResourceKind, ResourceProvisioner, ResourceSpec};
use crate::config::ScriptsConfig;

/// Locations of the four provisioning executables.
#[derive(Debug, Clone)]
pub struct ScriptPaths {
    pub create_ssh: PathBuf,
    pub delete_ssh: PathBuf,
    pub create_mysql: PathBuf,
    pub delete_mysql: PathBuf,
}

impl ScriptPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            create_ssh: dir.join("create-ssh.sh"),
            delete_ssh: dir.join("delete-ssh.sh"),
            create_mysql: dir.join("create-mysql.sh"),
            delete_mysql: dir.join("delete-mysql.sh"),
        }
    }
}

/// Runs each routine as a child process with positional arguments and a
/// hard deadline. Success means exit status zero and nothing on stderr.
#[derive(Debug, Clone)]
pub struct ScriptProvisioner {
    paths: ScriptPaths,
    timeout: Duration,
}

impl ScriptProvisioner {
    pub fn new(paths: ScriptPaths, timeout: Duration) -> Self {
        Self { paths, timeout }
    }

    pub fn from_config(cfg: &ScriptsConfig) -> Self {
        Self::new(ScriptPaths::in_dir(&cfg.dir), cfg.timeout())
    }

    #[instrument(skip(self, path, args), fields(script = %path.display()))]
    async fn run(
        &self,
        kind: ResourceKind,
        path: &Path,
        args: &[&str],
    ) -> Result<(), ProvisionError> {
        let mut cmd = if path.extension().is_some_and(|ext| ext == "sh") {
            let mut c = Command::new("bash");
            c.arg(path);
            c
        } else {
            Command::new(path)
        };
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|source| ProvisionError::Launch { kind, source })?;

        // Dropping the pending wait on timeout kills the child.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ProvisionError::Launch { kind, source })?,
            Err(_) => {
                warn!(%kind, after = ?self.timeout, "routine timed out; killed");
                return Err(ProvisionError::TimedOut {
                    kind,
                    after: self.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            debug!(%kind, stdout = %stdout.trim(), "routine output");
        }

        if !output.status.success() || !stderr.trim().is_empty() {
            let detail = if stderr.trim().is_empty() {
                "routine execution failed".to_string()
            } else {
                stderr.trim().to_string()
            };
            warn!(%kind, status = %output.status, detail = %detail, "routine failed");
            return Err(ProvisionError::Failed {
                kind,
                status: output.status.to_string(),
                detail,
            });
        }

        info!(%kind, "routine succeeded");
        Ok(())
    }
}

#[async_trait]
impl ResourceProvisioner for ScriptProvisioner {
    async fn create(&self, spec: &ResourceSpec) -> Result<(), ProvisionError> {
        match spec {
            ResourceSpec::Ssh { username, password } => {
                self.run(
                    ResourceKind::Ssh,
                    &self.paths.create_ssh,
                    &[username.as_str(), password.as_str()],
                )
                .await
            }
            ResourceSpec::Mysql {
                account,
                password,
                database_name,
            } => {
                self.run(
                    ResourceKind::Mysql,
                    &self.paths.create_mysql,
                    &[account.as_str(), password.as_str(), database_name.as_str()],
                )
                .await
            }
        }
    }

    async fn compensate(&self, spec: &ResourceSpec) -> Result<(), ProvisionError> {
        match spec {
            ResourceSpec::Ssh { username, .. } => {
                self.run(ResourceKind::Ssh, &self.paths.delete_ssh, &[username.as_str()])
                    .await
            }
            ResourceSpec::Mysql {
                account,
                database_name,
                ..
            } => {
                self.run(
                    ResourceKind::Mysql,
                    &self.paths.delete_mysql,
                    &[account.as_str(), database_name.as_str()],
                )
                .await
            }
        }
    }
}
