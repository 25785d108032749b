use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::registration::repo_types::{
    IdentifierField, Registration, ResourceClaim, ResourceIdentifiers,
};

const EMAIL_UNIQUE: &str = "registrations_email_key";
const USERNAME_UNIQUE: &str = "registrations_username_uidx";
const ACCOUNT_UNIQUE: &str = "registrations_account_uidx";
const DATABASE_NAME_UNIQUE: &str = "registrations_database_name_uidx";

const COLUMNS: &str = "id, email, token, expiry_date, username, account, database_name, \
                       password_ssh_hash, password_mysql_hash, created_at";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("a registration for this email already exists")]
    DuplicateEmail,
    #[error("{0} is already claimed by another registration")]
    Duplicate(IdentifierField),
    #[error("resource fields were claimed concurrently")]
    AlreadyClaimed,
    #[error("registration not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable registration ledger. Implementations must enforce email and
/// identifier uniqueness at write time.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Registration>, StoreError>;

    /// Create a fresh registration. Fails with `DuplicateEmail` if one exists.
    async fn insert(
        &self,
        email: &str,
        token: &str,
        expiry_date: i64,
    ) -> Result<Registration, StoreError>;

    /// Replace the token only if the stored one is still `expected_token`.
    /// Returns `None` when another request reissued first.
    async fn reissue_token(
        &self,
        email: &str,
        expected_token: &str,
        token: &str,
        expiry_date: i64,
    ) -> Result<Option<Registration>, StoreError>;

    /// Fields of `ids` held by any registration other than `excluding_email`.
    async fn find_conflicts(
        &self,
        ids: &ResourceIdentifiers,
        excluding_email: &str,
    ) -> Result<Vec<IdentifierField>, StoreError>;

    /// Set the claim's fields, all or nothing, only where still empty.
    async fn apply_claim(
        &self,
        email: &str,
        claim: &ResourceClaim,
    ) -> Result<Registration, StoreError>;
}

#[derive(Clone)]
pub struct PgRegistrationStore {
    db: PgPool,
}

impl PgRegistrationStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RegistrationStore for PgRegistrationStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Registration>, StoreError> {
        let row = sqlx::query_as::<_, Registration>(&format!(
            "SELECT {COLUMNS} FROM registrations WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn insert(
        &self,
        email: &str,
        token: &str,
        expiry_date: i64,
    ) -> Result<Registration, StoreError> {
        sqlx::query_as::<_, Registration>(&format!(
            r#"
            INSERT INTO registrations (id, email, token, expiry_date)
            VALUES ($1, $2, $3, $4)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(token)
        .bind(expiry_date)
        .fetch_one(&self.db)
        .await
        .map_err(map_write_error)
    }

    async fn reissue_token(
        &self,
        email: &str,
        expected_token: &str,
        token: &str,
        expiry_date: i64,
    ) -> Result<Option<Registration>, StoreError> {
        let row = sqlx::query_as::<_, Registration>(&format!(
            r#"
            UPDATE registrations
               SET token = $3, expiry_date = $4, updated_at = now()
             WHERE email = $1 AND token = $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(email)
        .bind(expected_token)
        .bind(token)
        .bind(expiry_date)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn find_conflicts(
        &self,
        ids: &ResourceIdentifiers,
        excluding_email: &str,
    ) -> Result<Vec<IdentifierField>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, Registration>(&format!(
            r#"
            SELECT {COLUMNS}
              FROM registrations
             WHERE email <> $1
               AND (username = $2 OR account = $3 OR database_name = $4)
            "#
        ))
        .bind(excluding_email)
        .bind(ids.username.as_deref())
        .bind(ids.account.as_deref())
        .bind(ids.database_name.as_deref())
        .fetch_all(&self.db)
        .await?;

        let mut fields: Vec<IdentifierField> = Vec::new();
        for row in &rows {
            for field in ids.collisions_with(row) {
                if !fields.contains(&field) {
                    fields.push(field);
                }
            }
        }
        Ok(fields)
    }

    async fn apply_claim(
        &self,
        email: &str,
        claim: &ResourceClaim,
    ) -> Result<Registration, StoreError> {
        let updated = sqlx::query_as::<_, Registration>(&format!(
            r#"
            UPDATE registrations
               SET username            = COALESCE(username, $2),
                   password_ssh_hash   = COALESCE(password_ssh_hash, $3),
                   account             = COALESCE(account, $4),
                   password_mysql_hash = COALESCE(password_mysql_hash, $5),
                   database_name       = COALESCE(database_name, $6),
                   updated_at          = now()
             WHERE email = $1
               AND ($2::text IS NULL OR username IS NULL)
               AND ($4::text IS NULL OR account IS NULL)
               AND ($6::text IS NULL OR database_name IS NULL)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(email)
        .bind(claim.username.as_deref())
        .bind(claim.password_ssh_hash.as_deref())
        .bind(claim.account.as_deref())
        .bind(claim.password_mysql_hash.as_deref())
        .bind(claim.database_name.as_deref())
        .fetch_optional(&self.db)
        .await
        .map_err(map_write_error)?;

        match updated {
            Some(reg) => Ok(reg),
            None => match self.find_by_email(email).await? {
                Some(_) => Err(StoreError::AlreadyClaimed),
                None => Err(StoreError::NotFound),
            },
        }
    }
}

/// Translate unique-index violations into typed duplicates.
fn map_write_error(err: sqlx::Error) -> StoreError {
    let duplicate = match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => match db.constraint() {
            Some(EMAIL_UNIQUE) => Some(StoreError::DuplicateEmail),
            Some(USERNAME_UNIQUE) => Some(StoreError::Duplicate(IdentifierField::Username)),
            Some(ACCOUNT_UNIQUE) => Some(StoreError::Duplicate(IdentifierField::Account)),
            Some(DATABASE_NAME_UNIQUE) => {
                Some(StoreError::Duplicate(IdentifierField::DatabaseName))
            }
            _ => None,
        },
        _ => None,
    };
    duplicate.unwrap_or(StoreError::Database(err))
}
