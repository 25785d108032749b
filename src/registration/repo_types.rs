use std::fmt;

use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Registration record in the database. One per email, never deleted.
#[derive(Clone, FromRow)]
pub struct Registration {
    pub id: Uuid,
    pub email: String,
    pub token: String,
    pub expiry_date: i64, // unix milliseconds
    pub username: Option<String>,
    pub account: Option<String>,
    pub database_name: Option<String>,
    pub password_ssh_hash: Option<String>,   // argon2 PHC string
    pub password_mysql_hash: Option<String>, // argon2 PHC string
    pub created_at: OffsetDateTime,
}

impl Registration {
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expiry_date
    }

    pub fn ssh_claimed(&self) -> bool {
        self.username.is_some()
    }

    pub fn mysql_claimed(&self) -> bool {
        self.account.is_some() || self.database_name.is_some()
    }

    pub fn has_claims(&self) -> bool {
        self.ssh_claimed() || self.mysql_claimed()
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("expiry_date", &self.expiry_date)
            .field("username", &self.username)
            .field("account", &self.account)
            .field("database_name", &self.database_name)
            .finish_non_exhaustive()
    }
}

/// The globally unique identifier columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentifierField {
    Username,
    Account,
    DatabaseName,
}

impl IdentifierField {
    pub fn as_str(self) -> &'static str {
        match self {
            IdentifierField::Username => "username",
            IdentifierField::Account => "account",
            IdentifierField::DatabaseName => "databaseName",
        }
    }
}

impl fmt::Display for IdentifierField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier values to test against other registrations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceIdentifiers {
    pub username: Option<String>,
    pub account: Option<String>,
    pub database_name: Option<String>,
}

impl ResourceIdentifiers {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.account.is_none() && self.database_name.is_none()
    }

    /// Fields of `self` that `other` holds with the same value.
    pub fn collisions_with(&self, other: &Registration) -> Vec<IdentifierField> {
        let mut hits = Vec::new();
        if self.username.is_some() && self.username == other.username {
            hits.push(IdentifierField::Username);
        }
        if self.account.is_some() && self.account == other.account {
            hits.push(IdentifierField::Account);
        }
        if self.database_name.is_some() && self.database_name == other.database_name {
            hits.push(IdentifierField::DatabaseName);
        }
        hits
    }
}

/// Write-once field values persisted after successful provisioning.
/// Passwords arrive here already hashed.
#[derive(Clone, Default)]
pub struct ResourceClaim {
    pub username: Option<String>,
    pub password_ssh_hash: Option<String>,
    pub account: Option<String>,
    pub password_mysql_hash: Option<String>,
    pub database_name: Option<String>,
}

impl ResourceClaim {
    pub fn identifiers(&self) -> ResourceIdentifiers {
        ResourceIdentifiers {
            username: self.username.clone(),
            account: self.account.clone(),
            database_name: self.database_name.clone(),
        }
    }

    /// First identifier this claim sets, used to report a lost race.
    pub fn first_field(&self) -> IdentifierField {
        if self.username.is_some() {
            IdentifierField::Username
        } else if self.account.is_some() {
            IdentifierField::Account
        } else {
            IdentifierField::DatabaseName
        }
    }

    /// True when every field this claim sets is still empty on `reg`.
    pub fn fits(&self, reg: &Registration) -> bool {
        (self.username.is_none() || reg.username.is_none())
            && (self.account.is_none() || reg.account.is_none())
            && (self.database_name.is_none() || reg.database_name.is_none())
    }

    pub fn apply_to(&self, reg: &mut Registration) {
        fn set_once(slot: &mut Option<String>, value: &Option<String>) {
            if slot.is_none() {
                slot.clone_from(value);
            }
        }
        set_once(&mut reg.username, &self.username);
        set_once(&mut reg.password_ssh_hash, &self.password_ssh_hash);
        set_once(&mut reg.account, &self.account);
        set_once(&mut reg.password_mysql_hash, &self.password_mysql_hash);
        set_once(&mut reg.database_name, &self.database_name);
    }
}

impl fmt::Debug for ResourceClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceClaim")
            .field("username", &self.username)
            .field("account", &self.account)
            .field("database_name", &self.database_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn sample_registration(email: &str) -> Registration {
    let now = OffsetDateTime::now_utc();
    Registration {
        id: Uuid::new_v4(),
        email: email.to_string(),
        token: "t".repeat(64),
        expiry_date: 1_000,
        username: None,
        account: None,
        database_name: None,
        password_ssh_hash: None,
        password_mysql_hash: None,
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_boundary_is_inclusive() {
        let reg = sample_registration("a@x.com");
        assert!(!reg.is_expired_at(999));
        assert!(!reg.is_expired_at(1_000));
        assert!(reg.is_expired_at(1_001));
    }

    #[test]
    fn collisions_only_count_supplied_fields() {
        let mut other = sample_registration("b@y.com");
        other.username = Some("alice".into());
        other.database_name = Some("shop".into());

        let ids = ResourceIdentifiers {
            username: Some("alice".into()),
            account: None,
            database_name: Some("other".into()),
        };
        assert_eq!(ids.collisions_with(&other), vec![IdentifierField::Username]);
        assert!(ResourceIdentifiers::default().collisions_with(&other).is_empty());
    }

    #[test]
    fn claim_never_overwrites_populated_fields() {
        let mut reg = sample_registration("a@x.com");
        reg.username = Some("alice".into());

        let claim = ResourceClaim {
            username: Some("mallory".into()),
            account: Some("alice_db".into()),
            database_name: Some("shop".into()),
            ..Default::default()
        };
        assert!(!claim.fits(&reg));

        claim.apply_to(&mut reg);
        assert_eq!(reg.username.as_deref(), Some("alice"));
        assert_eq!(reg.account.as_deref(), Some("alice_db"));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let mut reg = sample_registration("a@x.com");
        reg.password_ssh_hash = Some("$argon2id$secret".into());
        let out = format!("{:?}", reg);
        assert!(!out.contains("argon2"));
        assert!(!out.contains(&reg.token));
    }
}
