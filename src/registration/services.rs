use tracing::{error, info, instrument, warn};
use url::Url;

use crate::{
    notify::messages,
    provisioning::ResourceSpec,
    registration::{
        dto::ProvisionRequest,
        error::RegistrationError,
        password::hash_password,
        repo::StoreError,
        repo_types::{Registration, ResourceClaim, ResourceIdentifiers},
        token::{generate_token, tokens_match},
        validation::{
            is_valid_email, non_empty, normalize_email, validate_identifier, validate_password,
        },
    },
    state::AppState,
};

/// Result of a provisioning call. `created` is empty for an idempotent no-op.
#[derive(Debug)]
pub struct ProvisionOutcome {
    pub registration: Registration,
    pub created: Vec<ResourceSpec>,
}

fn store_failure(e: StoreError) -> RegistrationError {
    error!(error = %e, "registration store failure");
    RegistrationError::PersistenceFailed
}

/// Issue a token for `email`, or reissue it once the previous one expired.
#[instrument(skip(st))]
pub async fn request_registration(
    st: &AppState,
    email: &str,
    locale: &str,
) -> Result<Registration, RegistrationError> {
    if !is_valid_email(&st.config.smtp.from_address) {
        error!("outbound sender address is misconfigured; refusing to issue tokens");
        return Err(RegistrationError::SystemError(
            "sender address is not configured".into(),
        ));
    }
    let email = normalize_email(email)?;

    let now = st.clock.now_ms();
    let expiry_date = now + st.config.token_ttl_ms();
    let token = generate_token();

    let registration = match st.store.find_by_email(&email).await.map_err(store_failure)? {
        None => match st.store.insert(&email, &token, expiry_date).await {
            Ok(reg) => {
                info!(%email, "registration created");
                reg
            }
            // Lost a race with a concurrent first submission.
            Err(StoreError::DuplicateEmail) => return Err(RegistrationError::AlreadyPending),
            Err(e) => return Err(store_failure(e)),
        },
        Some(existing) if !existing.is_expired_at(now) => {
            info!(%email, "token still pending; not reissuing");
            return Err(RegistrationError::AlreadyPending);
        }
        Some(existing) => {
            let reg = st
                .store
                .reissue_token(&email, &existing.token, &token, expiry_date)
                .await
                .map_err(store_failure)?
                .ok_or(RegistrationError::AlreadyPending)?;
            info!(%email, has_claims = reg.has_claims(), "token reissued");
            reg
        }
    };

    let link = verification_link(&st.config.public_base_url, locale, &registration)?;
    let mail = messages::verification(&email, &link, st.config.token_ttl_minutes);
    if let Err(e) = st.notifier.deliver(mail).await {
        // The token stays valid for its window; the caller may retry later.
        error!(error = %e, %email, "verification email not delivered");
        return Err(RegistrationError::NotificationFailed);
    }

    Ok(registration)
}

fn verification_link(
    base: &str,
    locale: &str,
    reg: &Registration,
) -> Result<String, RegistrationError> {
    let mut url = Url::parse(base)
        .map_err(|e| RegistrationError::SystemError(format!("invalid public base url: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| RegistrationError::SystemError("public base url cannot be a base".into()))?
        .pop_if_empty()
        .push(locale)
        .push("register");
    url.query_pairs_mut()
        .append_pair("email", &reg.email)
        .append_pair("expiryDate", &reg.expiry_date.to_string())
        .append_pair("token", &reg.token);
    Ok(url.into())
}

/// Check the (email, token, expiryDate) triple against the stored record.
#[instrument(skip(st, token))]
pub async fn verify_token(
    st: &AppState,
    email: &str,
    token: &str,
    expiry_date: i64,
) -> Result<Registration, RegistrationError> {
    let email = email.trim().to_lowercase();
    let reg = st
        .store
        .find_by_email(&email)
        .await
        .map_err(store_failure)?
        .ok_or(RegistrationError::RegistrationNotFound)?;

    if !tokens_match(&reg.token, token) || reg.expiry_date != expiry_date {
        warn!(%email, "token or expiry mismatch");
        return Err(RegistrationError::TokenInvalid);
    }
    if reg.is_expired_at(st.clock.now_ms()) {
        info!(%email, "token expired");
        return Err(RegistrationError::TokenExpired);
    }
    Ok(reg)
}

/// Fail if another registration already holds any of `ids`.
#[instrument(skip(st))]
pub async fn check_unique(
    st: &AppState,
    ids: &ResourceIdentifiers,
    excluding_email: &str,
) -> Result<(), RegistrationError> {
    if ids.is_empty() {
        return Ok(());
    }
    let conflicts = st
        .store
        .find_conflicts(ids, excluding_email)
        .await
        .map_err(store_failure)?;
    match conflicts.first() {
        Some(&field) => {
            info!(%field, "identifier already claimed elsewhere");
            Err(RegistrationError::ResourceConflict { field })
        }
        None => Ok(()),
    }
}

/// What a request will actually create, after dropping sides already claimed.
struct ClaimPlan {
    specs: Vec<ResourceSpec>,
    claim: ResourceClaim,
}

impl ClaimPlan {
    fn build(reg: &Registration, req: &ProvisionRequest) -> Result<Self, RegistrationError> {
        let mut specs = Vec::new();
        let mut claim = ResourceClaim::default();

        if !reg.ssh_claimed() {
            if let Some(username) = non_empty(req.username.as_deref()) {
                validate_identifier("username", &username)?;
                let password = req.password_ssh.clone().unwrap_or_default();
                validate_password("passwordSsh", &password)?;
                claim.username = Some(username.clone());
                claim.password_ssh_hash = Some(hash_secret(&password)?);
                specs.push(ResourceSpec::Ssh { username, password });
            }
        }

        if !reg.mysql_claimed() {
            let account = non_empty(req.account.as_deref());
            let database_name = non_empty(req.database_name.as_deref());
            match (account, database_name) {
                (None, None) => {}
                (Some(account), Some(database_name)) => {
                    validate_identifier("account", &account)?;
                    validate_identifier("databaseName", &database_name)?;
                    let password = req.password_mysql.clone().unwrap_or_default();
                    validate_password("passwordMysql", &password)?;
                    claim.account = Some(account.clone());
                    claim.database_name = Some(database_name.clone());
                    claim.password_mysql_hash = Some(hash_secret(&password)?);
                    specs.push(ResourceSpec::Mysql {
                        account,
                        password,
                        database_name,
                    });
                }
                _ => {
                    return Err(RegistrationError::ValidationFailed(
                        "account and databaseName must be supplied together".into(),
                    ))
                }
            }
        }

        Ok(Self { specs, claim })
    }
}

fn hash_secret(plain: &str) -> Result<String, RegistrationError> {
    hash_password(plain).map_err(|e| RegistrationError::SystemError(e.to_string()))
}

/// Verify the token, create the requested resources in order (SSH, then
/// MySQL), then persist the claims. Anything created in this call is
/// removed again if a later step fails.
#[instrument(skip(st, req), fields(email = %req.email))]
pub async fn provision_resources(
    st: &AppState,
    req: ProvisionRequest,
) -> Result<ProvisionOutcome, RegistrationError> {
    let registration = verify_token(st, &req.email, &req.token, req.expiry_date).await?;
    let plan = ClaimPlan::build(&registration, &req)?;

    if plan.specs.is_empty() {
        info!("requested resources already claimed; nothing to do");
        return Ok(ProvisionOutcome {
            registration,
            created: Vec::new(),
        });
    }

    check_unique(st, &plan.claim.identifiers(), &registration.email).await?;

    let mut created: Vec<ResourceSpec> = Vec::with_capacity(plan.specs.len());
    for spec in plan.specs {
        if let Err(e) = st.provisioner.create(&spec).await {
            error!(error = %e, kind = %spec.kind(), "provisioning step failed");
            compensate(st, &created).await;
            return Err(RegistrationError::ExternalProvisioningFailed {
                step: spec.kind(),
                detail: e.detail(),
            });
        }
        info!(resource = ?spec, "resource created");
        created.push(spec);
    }

    let updated = match st.store.apply_claim(&registration.email, &plan.claim).await {
        Ok(reg) => reg,
        Err(StoreError::Duplicate(field)) => {
            warn!(%field, "identifier claimed concurrently; rolling back");
            compensate(st, &created).await;
            return Err(RegistrationError::ResourceConflict { field });
        }
        Err(StoreError::AlreadyClaimed) => {
            warn!("registration claimed concurrently; rolling back");
            compensate(st, &created).await;
            return Err(RegistrationError::ResourceConflict {
                field: plan.claim.first_field(),
            });
        }
        Err(e) => {
            error!(error = %e, "persisting claims failed; rolling back");
            compensate(st, &created).await;
            return Err(RegistrationError::PersistenceFailed);
        }
    };

    st.notifier
        .deliver_in_background(messages::provisioned(&updated.email, &created));

    Ok(ProvisionOutcome {
        registration: updated,
        created,
    })
}

/// Undo `created` newest first. Failures are logged and swallowed.
async fn compensate(st: &AppState, created: &[ResourceSpec]) {
    for spec in created.iter().rev() {
        match st.provisioner.compensate(spec).await {
            Ok(()) => info!(resource = ?spec, "compensated"),
            Err(e) => {
                error!(error = %e, resource = ?spec, "compensation failed; manual cleanup needed")
            }
        }
    }
}
