use std::{fmt, time::Duration};

use async_trait::async_trait;

pub mod script;

pub use script::ScriptProvisioner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Ssh,
    Mysql,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Ssh => f.write_str("ssh"),
            ResourceKind::Mysql => f.write_str("mysql"),
        }
    }
}

/// One external resource to create, or to remove again on compensation.
#[derive(Clone, PartialEq, Eq)]
pub enum ResourceSpec {
    Ssh {
        username: String,
        password: String,
    },
    Mysql {
        account: String,
        password: String,
        database_name: String,
    },
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Ssh { .. } => ResourceKind::Ssh,
            ResourceSpec::Mysql { .. } => ResourceKind::Mysql,
        }
    }

    /// Human-readable summary for notifications; never includes secrets.
    pub fn describe(&self) -> String {
        match self {
            ResourceSpec::Ssh { username, .. } => format!("SSH account: {username}"),
            ResourceSpec::Mysql {
                account,
                database_name,
                ..
            } => format!("MySQL account: {account}; database: {database_name}"),
        }
    }
}

impl fmt::Debug for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceSpec::Ssh { username, .. } => f
                .debug_struct("Ssh")
                .field("username", username)
                .finish_non_exhaustive(),
            ResourceSpec::Mysql {
                account,
                database_name,
                ..
            } => f
                .debug_struct("Mysql")
                .field("account", account)
                .field("database_name", database_name)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("{kind} routine failed ({status}): {detail}")]
    Failed {
        kind: ResourceKind,
        status: String,
        detail: String,
    },

    #[error("{kind} routine timed out after {after:?}")]
    TimedOut { kind: ResourceKind, after: Duration },

    #[error("failed to launch {kind} routine: {source}")]
    Launch {
        kind: ResourceKind,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    /// Text worth showing a developer: captured stderr when there is any.
    pub fn detail(&self) -> String {
        match self {
            ProvisionError::Failed { detail, .. } => detail.clone(),
            other => other.to_string(),
        }
    }
}

/// Creates and removes external resources. Only the outcome is reported;
/// routine output never drives control flow.
#[async_trait]
pub trait ResourceProvisioner: Send + Sync {
    async fn create(&self, spec: &ResourceSpec) -> Result<(), ProvisionError>;

    /// Best-effort reversal of a `create` made earlier in the same request.
    async fn compensate(&self, spec: &ResourceSpec) -> Result<(), ProvisionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_and_description_hide_passwords() {
        let spec = ResourceSpec::Mysql {
            account: "alice_db".into(),
            password: "S3cret!pass".into(),
            database_name: "shop".into(),
        };
        assert!(!format!("{:?}", spec).contains("S3cret"));
        assert!(!spec.describe().contains("S3cret"));
        assert!(spec.describe().contains("shop"));
        assert_eq!(spec.kind(), ResourceKind::Mysql);
    }

    #[test]
    fn failed_detail_is_raw_stderr() {
        let err = ProvisionError::Failed {
            kind: ResourceKind::Ssh,
            status: "exit status: 1".into(),
            detail: "useradd: user exists".into(),
        };
        assert_eq!(err.detail(), "useradd: user exists");
        assert!(err.to_string().starts_with("ssh routine failed"));
    }
}
