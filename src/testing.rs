//! In-process fakes for the collaborators behind `AppState`.

use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    config::{AppConfig, Environment, ScriptsConfig, SmtpConfig},
    notify::{testing::RecordingMailer, Notifier},
    provisioning::{ProvisionError, ResourceKind, ResourceProvisioner, ResourceSpec},
    registration::{
        memory::MemoryRegistrationStore,
        repo::{RegistrationStore, StoreError},
        repo_types::{IdentifierField, Registration, ResourceClaim, ResourceIdentifiers},
        token::testing::ManualClock,
    },
    state::AppState,
};

pub const START_MS: i64 = 1_750_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(ResourceSpec),
    Compensate(ResourceSpec),
}

/// Records every invocation instead of spawning processes.
#[derive(Default)]
pub struct FakeProvisioner {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<ResourceKind>>,
    failing_compensation: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakeProvisioner {
    pub fn fail_create(&self, kind: ResourceKind) {
        self.failing.lock().unwrap().insert(kind);
    }

    pub fn fail_compensation(&self) {
        self.failing_compensation.store(true, Ordering::SeqCst);
    }

    /// Make each `create` yield for `delay`, letting concurrent requests interleave.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn creates(&self) -> Vec<ResourceSpec> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create(spec) => Some(spec),
                Call::Compensate(_) => None,
            })
            .collect()
    }

    pub fn compensations(&self) -> Vec<ResourceSpec> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Compensate(spec) => Some(spec),
                Call::Create(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl ResourceProvisioner for FakeProvisioner {
    async fn create(&self, spec: &ResourceSpec) -> Result<(), ProvisionError> {
        self.calls.lock().unwrap().push(Call::Create(spec.clone()));
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&spec.kind()) {
            return Err(ProvisionError::Failed {
                kind: spec.kind(),
                status: "exit status: 1".into(),
                detail: format!("{} routine refused", spec.kind()),
            });
        }
        Ok(())
    }

    async fn compensate(&self, spec: &ResourceSpec) -> Result<(), ProvisionError> {
        self.calls.lock().unwrap().push(Call::Compensate(spec.clone()));
        if self.failing_compensation.load(Ordering::SeqCst) {
            return Err(ProvisionError::Failed {
                kind: spec.kind(),
                status: "exit status: 1".into(),
                detail: "delete routine refused".into(),
            });
        }
        Ok(())
    }
}

/// Memory store whose claim writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryRegistrationStore,
    fail_claims: AtomicBool,
    duplicate_on_claim: Mutex<Option<IdentifierField>>,
}

impl FlakyStore {
    pub fn fail_claims(&self) {
        self.fail_claims.store(true, Ordering::SeqCst);
    }

    pub fn reject_claims_as_duplicate(&self, field: IdentifierField) {
        *self.duplicate_on_claim.lock().unwrap() = Some(field);
    }
}

#[async_trait]
impl RegistrationStore for FlakyStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Registration>, StoreError> {
        self.inner.find_by_email(email).await
    }

    async fn insert(
        &self,
        email: &str,
        token: &str,
        expiry_date: i64,
    ) -> Result<Registration, StoreError> {
        self.inner.insert(email, token, expiry_date).await
    }

    async fn reissue_token(
        &self,
        email: &str,
        expected_token: &str,
        token: &str,
        expiry_date: i64,
    ) -> Result<Option<Registration>, StoreError> {
        self.inner
            .reissue_token(email, expected_token, token, expiry_date)
            .await
    }

    async fn find_conflicts(
        &self,
        ids: &ResourceIdentifiers,
        excluding_email: &str,
    ) -> Result<Vec<IdentifierField>, StoreError> {
        self.inner.find_conflicts(ids, excluding_email).await
    }

    async fn apply_claim(
        &self,
        email: &str,
        claim: &ResourceClaim,
    ) -> Result<Registration, StoreError> {
        if self.fail_claims.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let duplicate = *self.duplicate_on_claim.lock().unwrap();
        if let Some(field) = duplicate {
            return Err(StoreError::Duplicate(field));
        }
        self.inner.apply_claim(email, claim).await
    }
}

pub fn test_config(environment: Environment) -> AppConfig {
    AppConfig {
        environment,
        database_url: None,
        public_base_url: "https://provision.test".into(),
        token_ttl_minutes: 60,
        smtp: SmtpConfig {
            host: "localhost".into(),
            port: 2525,
            username: None,
            password: None,
            from_address: "noreply@provision.test".into(),
            from_name: "Provisio".into(),
            use_tls: false,
        },
        dev_email: None,
        scripts: ScriptsConfig {
            dir: PathBuf::from("./scripts"),
            timeout_secs: 5,
        },
        mail_retry_attempts: 2,
        mail_retry_base_delay_ms: 1,
    }
}

pub struct Harness {
    pub state: AppState,
    pub store: Arc<FlakyStore>,
    pub mailer: Arc<RecordingMailer>,
    pub provisioner: Arc<FakeProvisioner>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config(Environment::Production))
    }

    pub fn with_config(config: AppConfig) -> Self {
        let store = Arc::new(FlakyStore::default());
        let mailer = Arc::new(RecordingMailer::default());
        let provisioner = Arc::new(FakeProvisioner::default());
        let clock = Arc::new(ManualClock::new(START_MS));

        let notifier = Notifier::new(mailer.clone(), config.mail_retry_attempts)
            .with_base_delay(config.mail_retry_base_delay());
        let state = AppState::from_parts(
            Arc::new(config),
            store.clone(),
            provisioner.clone(),
            notifier,
            clock.clone(),
        );
        Self {
            state,
            store,
            mailer,
            provisioner,
            clock,
        }
    }

    /// Current stored row for `email`.
    pub async fn stored(&self, email: &str) -> Registration {
        self.store
            .find_by_email(email)
            .await
            .unwrap()
            .expect("registration should exist")
    }

    /// Background notifications run on spawned tasks; give them a turn.
    pub async fn settle(&self) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
