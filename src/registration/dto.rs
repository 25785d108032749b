use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::registration::repo_types::Registration;

/// Body of `POST /registers`.
#[derive(Debug, Deserialize)]
pub struct RegisterEmailRequest {
    pub email: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LocaleQuery {
    pub locale: Option<String>,
}

/// Acknowledgement of an issued token. Never carries the token itself.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterEmailResponse {
    pub email: String,
    pub expiry_date: i64,
}

/// Query of `GET /users`, i.e. the parameters of the emailed link.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyTokenQuery {
    pub email: String,
    pub token: String,
    #[serde(alias = "expiredate")]
    pub expiry_date: i64,
}

/// Body of `POST /users`.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    pub email: String,
    pub token: String,
    pub expiry_date: i64,
    pub username: Option<String>,
    pub password_ssh: Option<String>,
    pub account: Option<String>,
    pub password_mysql: Option<String>,
    pub database_name: Option<String>,
}

impl fmt::Debug for ProvisionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionRequest")
            .field("email", &self.email)
            .field("expiry_date", &self.expiry_date)
            .field("username", &self.username)
            .field("account", &self.account)
            .field("database_name", &self.database_name)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for VerifyTokenQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyTokenQuery")
            .field("email", &self.email)
            .field("expiry_date", &self.expiry_date)
            .finish_non_exhaustive()
    }
}

/// Public view of a registration: claimed identifiers, no secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationSnapshot {
    pub email: String,
    pub expiry_date: i64,
    pub username: Option<String>,
    pub account: Option<String>,
    pub database_name: Option<String>,
    pub ssh_claimed: bool,
    pub mysql_claimed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&Registration> for RegistrationSnapshot {
    fn from(r: &Registration) -> Self {
        Self {
            email: r.email.clone(),
            expiry_date: r.expiry_date,
            username: r.username.clone(),
            account: r.account.clone(),
            database_name: r.database_name.clone(),
            ssh_claimed: r.ssh_claimed(),
            mysql_claimed: r.mysql_claimed(),
            created_at: r.created_at,
        }
    }
}
