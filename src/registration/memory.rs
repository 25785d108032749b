use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::registration::{
    repo::{RegistrationStore, StoreError},
    repo_types::{IdentifierField, Registration, ResourceClaim, ResourceIdentifiers},
};

/// Process-local store. Every write runs under one lock, which gives the
/// same uniqueness guarantees as the database indexes.
#[derive(Default)]
pub struct MemoryRegistrationStore {
    rows: Mutex<HashMap<String, Registration>>,
}

impl MemoryRegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Registration>> {
        // A panic while holding the lock cannot leave a row half-written.
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RegistrationStore for MemoryRegistrationStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Registration>, StoreError> {
        Ok(self.lock().get(email).cloned())
    }

    async fn insert(
        &self,
        email: &str,
        token: &str,
        expiry_date: i64,
    ) -> Result<Registration, StoreError> {
        let mut rows = self.lock();
        if rows.contains_key(email) {
            return Err(StoreError::DuplicateEmail);
        }
        let reg = Registration {
            id: Uuid::new_v4(),
            email: email.to_string(),
            token: token.to_string(),
            expiry_date,
            username: None,
            account: None,
            database_name: None,
            password_ssh_hash: None,
            password_mysql_hash: None,
            created_at: OffsetDateTime::now_utc(),
        };
        rows.insert(email.to_string(), reg.clone());
        Ok(reg)
    }

    async fn reissue_token(
        &self,
        email: &str,
        expected_token: &str,
        token: &str,
        expiry_date: i64,
    ) -> Result<Option<Registration>, StoreError> {
        let mut rows = self.lock();
        match rows.get_mut(email) {
            Some(reg) if reg.token == expected_token => {
                reg.token = token.to_string();
                reg.expiry_date = expiry_date;
                Ok(Some(reg.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn find_conflicts(
        &self,
        ids: &ResourceIdentifiers,
        excluding_email: &str,
    ) -> Result<Vec<IdentifierField>, StoreError> {
        let rows = self.lock();
        Ok(conflicts_in(&rows, ids, excluding_email))
    }

    async fn apply_claim(
        &self,
        email: &str,
        claim: &ResourceClaim,
    ) -> Result<Registration, StoreError> {
        let mut rows = self.lock();
        if let Some(field) = conflicts_in(&rows, &claim.identifiers(), email).first() {
            return Err(StoreError::Duplicate(*field));
        }
        let reg = rows.get_mut(email).ok_or(StoreError::NotFound)?;
        if !claim.fits(reg) {
            return Err(StoreError::AlreadyClaimed);
        }
        claim.apply_to(reg);
        Ok(reg.clone())
    }
}

fn conflicts_in(
    rows: &HashMap<String, Registration>,
    ids: &ResourceIdentifiers,
    excluding_email: &str,
) -> Vec<IdentifierField> {
    let mut fields: Vec<IdentifierField> = Vec::new();
    for reg in rows.values().filter(|r| r.email != excluding_email) {
        for field in ids.collisions_with(reg) {
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim_username(name: &str) -> ResourceClaim {
        ResourceClaim {
            username: Some(name.into()),
            password_ssh_hash: Some("hash".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn insert_rejects_second_registration_for_email() {
        let store = MemoryRegistrationStore::new();
        store.insert("a@x.com", "t1", 10).await.unwrap();
        let err = store.insert("a@x.com", "t2", 20).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));

        let reg = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(reg.token, "t1");
    }

    #[tokio::test]
    async fn reissue_requires_expected_token() {
        let store = MemoryRegistrationStore::new();
        store.insert("a@x.com", "t1", 10).await.unwrap();

        assert!(store
            .reissue_token("a@x.com", "stale", "t2", 20)
            .await
            .unwrap()
            .is_none());

        let reg = store
            .reissue_token("a@x.com", "t1", "t2", 20)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reg.token, "t2");
        assert_eq!(reg.expiry_date, 20);
    }

    #[tokio::test]
    async fn claim_is_rejected_when_another_email_owns_identifier() {
        let store = MemoryRegistrationStore::new();
        store.insert("a@x.com", "t1", 10).await.unwrap();
        store.insert("b@y.com", "t2", 10).await.unwrap();
        store
            .apply_claim("a@x.com", &claim_username("alice"))
            .await
            .unwrap();

        let err = store
            .apply_claim("b@y.com", &claim_username("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(IdentifierField::Username)));

        let conflicts = store
            .find_conflicts(
                &ResourceIdentifiers {
                    username: Some("alice".into()),
                    ..Default::default()
                },
                "b@y.com",
            )
            .await
            .unwrap();
        assert_eq!(conflicts, vec![IdentifierField::Username]);
    }

    #[tokio::test]
    async fn own_identifier_is_not_a_conflict() {
        let store = MemoryRegistrationStore::new();
        store.insert("a@x.com", "t1", 10).await.unwrap();
        store
            .apply_claim("a@x.com", &claim_username("alice"))
            .await
            .unwrap();

        let ids = ResourceIdentifiers {
            username: Some("alice".into()),
            ..Default::default()
        };
        assert!(store.find_conflicts(&ids, "a@x.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_claim_of_same_field_is_refused() {
        let store = MemoryRegistrationStore::new();
        store.insert("a@x.com", "t1", 10).await.unwrap();
        store
            .apply_claim("a@x.com", &claim_username("alice"))
            .await
            .unwrap();

        let err = store
            .apply_claim("a@x.com", &claim_username("alice2"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyClaimed));
    }

    #[tokio::test]
    async fn claim_for_unknown_email_is_not_found() {
        let store = MemoryRegistrationStore::new();
        let err = store
            .apply_claim("ghost@x.com", &claim_username("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}
