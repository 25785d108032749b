use std::sync::Arc;

use tracing::warn;

use crate::config::AppConfig;
use crate::db;
use crate::notify::{Notifier, SmtpMailer};
use crate::provisioning::{ResourceProvisioner, ScriptProvisioner};
use crate::registration::{
    memory::MemoryRegistrationStore,
    repo::{PgRegistrationStore, RegistrationStore},
    token::{Clock, SystemClock},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn RegistrationStore>,
    pub provisioner: Arc<dyn ResourceProvisioner>,
    pub notifier: Notifier,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store: Arc<dyn RegistrationStore> = match &config.database_url {
            Some(url) => {
                let pool = db::connect(url).await?;
                db::migrate(&pool).await;
                Arc::new(PgRegistrationStore::new(pool))
            }
            None => {
                warn!("DATABASE_URL not set; registrations live in memory and vanish on restart");
                Arc::new(MemoryRegistrationStore::new())
            }
        };

        let provisioner = Arc::new(ScriptProvisioner::from_config(&config.scripts))
            as Arc<dyn ResourceProvisioner>;

        let mailer = Arc::new(SmtpMailer::new(&config.smtp)?);
        let notifier = Notifier::new(mailer, config.mail_retry_attempts)
            .with_base_delay(config.mail_retry_base_delay())
            .with_redirect(config.mail_redirect());

        Ok(Self::from_parts(
            config,
            store,
            provisioner,
            notifier,
            Arc::new(SystemClock),
        ))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn RegistrationStore>,
        provisioner: Arc<dyn ResourceProvisioner>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            provisioner,
            notifier,
            clock,
        }
    }
}
