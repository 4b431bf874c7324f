//! Fixture orchestration.
//!
//! Flow scenarios need two users and four client applications, each
//! subscribed to the fixture API:
//!
//! | variant        | confidential | trusted | redirect URI |
//! |----------------|--------------|---------|--------------|
//! | `trusted`      | yes          | yes     | yes          |
//! | `confidential` | yes          | no      | yes          |
//! | `public`       | no           | yes     | yes          |
//! | `withouturi`   | yes          | no      | no           |
//!
//! [`FixtureOrchestrator::setup`] always tears down whatever a previous run
//! left behind before creating anything, so fixture sets never accumulate.
//! Teardown treats "not found" as success, which makes it safe to call at
//! any time. Both end by waiting for the adapter queue to drain.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use secrecy::SecretString;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::auth::{ClientRegistration, UserCredentials};
use crate::directory::{DirectoryService, NewApplication, NewSubscription, WebhookQueueProbe};
use crate::error::{HarnessError, HarnessResult};
use crate::poller::ConsistencyPoller;
use crate::types::FixtureConfig;

/// Auth type of every fixture subscription.
const SUBSCRIPTION_AUTH: &str = "oauth2";

/// One of the four client application flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientVariant {
    /// Confidential and trusted.
    Trusted,
    /// Confidential, not trusted.
    Confidential,
    /// Public (no secret kept), trusted.
    Public,
    /// Confidential, not trusted, no redirect URI registered.
    WithoutUri,
}

impl ClientVariant {
    /// All variants, in creation order.
    pub const ALL: [Self; 4] = [
        Self::Trusted,
        Self::Confidential,
        Self::Public,
        Self::WithoutUri,
    ];

    /// Suffix appended to the base application id.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Trusted => "trusted",
            Self::Confidential => "confidential",
            Self::Public => "public",
            Self::WithoutUri => "withouturi",
        }
    }

    /// Whether the application is registered as confidential.
    #[must_use]
    pub fn is_confidential(self) -> bool {
        !matches!(self, Self::Public)
    }

    /// Whether the subscription is trusted.
    #[must_use]
    pub fn is_trusted(self) -> bool {
        matches!(self, Self::Trusted | Self::Public)
    }

    /// Whether a redirect URI is registered.
    #[must_use]
    pub fn has_redirect_uri(self) -> bool {
        !matches!(self, Self::WithoutUri)
    }

    /// Application id for this variant under `base`.
    #[must_use]
    pub fn app_id(self, base: &str) -> String {
        format!("{base}-{}", self.suffix())
    }
}

impl fmt::Display for ClientVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for ClientVariant {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|variant| variant.suffix().eq_ignore_ascii_case(s))
            .ok_or_else(|| HarnessError::config(format!("unknown client variant '{s}'")))
    }
}

/// The two fixed user identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Regular developer account.
    Normal,
    /// Portal administrator.
    Admin,
}

impl Identity {
    /// Login email.
    #[must_use]
    pub fn email(self) -> &'static str {
        match self {
            Self::Normal => "normal@user.com",
            Self::Admin => "admin@user.com",
        }
    }

    fn password(self) -> &'static str {
        match self {
            Self::Normal => "normalwicked",
            Self::Admin => "adminwicked",
        }
    }

    fn group(self) -> &'static str {
        match self {
            Self::Normal => "dev",
            Self::Admin => "admin",
        }
    }

    /// Credentials to create this identity with.
    #[must_use]
    pub fn template(self) -> UserCredentials {
        UserCredentials::new(
            self.email(),
            SecretString::new(self.password().into()),
            vec![self.group().to_owned()],
        )
    }
}

impl FromStr for Identity {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "admin" => Ok(Self::Admin),
            _ => Err(HarnessError::config(format!("unknown identity '{s}'"))),
        }
    }
}

/// The created users, with their clear-text passwords.
#[derive(Debug, Clone)]
pub struct FixtureUsers {
    /// The `dev` user.
    pub normal: UserCredentials,
    /// The `admin` user.
    pub admin: UserCredentials,
}

impl FixtureUsers {
    /// Returns the user for an identity.
    #[must_use]
    pub fn get(&self, identity: Identity) -> &UserCredentials {
        match identity {
            Identity::Normal => &self.normal,
            Identity::Admin => &self.admin,
        }
    }
}

/// Everything [`FixtureOrchestrator::setup`] creates.
#[derive(Debug, Clone)]
pub struct FixtureSet {
    /// Both users.
    pub users: FixtureUsers,
    /// Trusted confidential client.
    pub trusted: ClientRegistration,
    /// Untrusted confidential client.
    pub confidential: ClientRegistration,
    /// Trusted public client.
    pub public: ClientRegistration,
    /// Untrusted confidential client without redirect URI.
    pub without_uri: ClientRegistration,
}

impl FixtureSet {
    /// Returns the client registration of a variant.
    #[must_use]
    pub fn client(&self, variant: ClientVariant) -> &ClientRegistration {
        match variant {
            ClientVariant::Trusted => &self.trusted,
            ClientVariant::Confidential => &self.confidential,
            ClientVariant::Public => &self.public,
            ClientVariant::WithoutUri => &self.without_uri,
        }
    }
}

/// Creates and destroys the fixture set in the directory.
///
/// Setup and teardown on one orchestrator never overlap; a second caller
/// waits for the first to finish.
#[derive(Debug)]
pub struct FixtureOrchestrator<D> {
    directory: D,
    config: FixtureConfig,
    poller: ConsistencyPoller,
    plan_id: OnceCell<String>,
    lock: Mutex<()>,
}

impl<D: DirectoryService> FixtureOrchestrator<D> {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(directory: D, config: FixtureConfig, poller: ConsistencyPoller) -> Self {
        Self {
            directory,
            config,
            poller,
            plan_id: OnceCell::new(),
            lock: Mutex::new(()),
        }
    }

    /// Returns the directory service.
    #[must_use]
    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Returns the fixture configuration.
    #[must_use]
    pub fn config(&self) -> &FixtureConfig {
        &self.config
    }

    /// Removes every fixture this orchestrator could have created, then
    /// waits for the adapter to catch up.
    ///
    /// # Errors
    ///
    /// Any directory error other than "not found", or `ConvergenceTimeout`.
    pub async fn teardown(&self) -> HarnessResult<()> {
        let _guard = self.lock.lock().await;
        self.teardown_locked().await
    }

    /// Tears down stale fixtures and creates a fresh set.
    ///
    /// A failure aborts the whole setup; whatever was created so far stays
    /// in place until the next [`teardown`](Self::teardown) or setup.
    ///
    /// # Errors
    ///
    /// The first directory, protocol or convergence error encountered.
    pub async fn setup(&self) -> HarnessResult<FixtureSet> {
        let _guard = self.lock.lock().await;

        let started = Instant::now();
        self.teardown_locked().await?;
        info!(
            elapsed_ms = elapsed_ms(started),
            "Destroyed previous fixtures"
        );

        let started = Instant::now();
        let users = self.create_user_set().await?;
        let plan = self.default_plan_id().await?;
        let trusted = self.create_client(ClientVariant::Trusted, &plan).await?;
        let confidential = self.create_client(ClientVariant::Confidential, &plan).await?;
        let public = self.create_client(ClientVariant::Public, &plan).await?;
        let without_uri = self.create_client(ClientVariant::WithoutUri, &plan).await?;
        self.drain().await?;
        info!(
            elapsed_ms = elapsed_ms(started),
            "Created and propagated fixtures"
        );

        Ok(FixtureSet {
            users,
            trusted,
            confidential,
            public,
            without_uri,
        })
    }

    /// Deletes and recreates both users.
    ///
    /// # Errors
    ///
    /// Any directory error other than "not found" during deletion.
    pub async fn create_users(&self) -> HarnessResult<FixtureUsers> {
        let _guard = self.lock.lock().await;
        self.destroy_users_locked().await?;
        self.create_user_set().await
    }

    /// Deletes both users if they exist.
    ///
    /// # Errors
    ///
    /// Any directory error other than "not found", or a protocol violation
    /// if an email matches more than one user.
    pub async fn destroy_users(&self) -> HarnessResult<()> {
        let _guard = self.lock.lock().await;
        self.destroy_users_locked().await
    }

    async fn destroy_users_locked(&self) -> HarnessResult<()> {
        for identity in [Identity::Normal, Identity::Admin] {
            self.delete_user_by_email(identity.email()).await?;
        }
        Ok(())
    }

    /// Id of the first plan of the fixture API, looked up once.
    ///
    /// # Errors
    ///
    /// The directory error of the lookup, or a protocol violation if the
    /// API has no plans.
    pub async fn default_plan_id(&self) -> HarnessResult<String> {
        let plan = self
            .plan_id
            .get_or_try_init(|| async {
                let plans = self.directory.get_api_plans(&self.config.api_id).await?;
                let plan = plans.into_iter().next().ok_or_else(|| {
                    HarnessError::protocol_violation(format!(
                        "api {} has no plans",
                        self.config.api_id
                    ))
                })?;
                debug!(api_id = %self.config.api_id, plan_id = %plan.id, "Resolved default plan");
                Ok::<_, HarnessError>(plan.id)
            })
            .await?;
        Ok(plan.clone())
    }

    /// Waits until the adapter's webhook queue is empty.
    ///
    /// Returns the number of polls it took.
    ///
    /// # Errors
    ///
    /// `ConvergenceTimeout`, or the directory error of a failed poll.
    pub async fn drain(&self) -> HarnessResult<u32> {
        let probe = WebhookQueueProbe::new(&self.directory, &self.config.adapter_listener);
        self.poller.await_convergence(&probe).await
    }

    async fn teardown_locked(&self) -> HarnessResult<()> {
        for variant in ClientVariant::ALL {
            self.delete_application(&variant.app_id(&self.config.app_id))
                .await?;
        }
        self.destroy_users_locked().await?;
        self.drain().await?;
        Ok(())
    }

    async fn delete_application(&self, app_id: &str) -> HarnessResult<()> {
        match self.directory.get_application(app_id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        }
        debug!(app_id, "Deleting application");
        ignore_not_found(self.directory.delete_application(app_id).await)
    }

    async fn delete_user_by_email(&self, email: &str) -> HarnessResult<()> {
        let matches = match self.directory.get_user_by_email(email).await {
            Ok(matches) => matches,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        match matches.as_slice() {
            [] => Ok(()),
            [user] => {
                debug!(email, user_id = %user.id, "Deleting user");
                ignore_not_found(self.directory.delete_user(&user.id).await)
            }
            _ => Err(HarnessError::protocol_violation(format!(
                "{} users share the email {email}",
                matches.len()
            ))),
        }
    }

    async fn create_user_set(&self) -> HarnessResult<FixtureUsers> {
        Ok(FixtureUsers {
            normal: self.create_user(Identity::Normal).await?,
            admin: self.create_user(Identity::Admin).await?,
        })
    }

    async fn create_user(&self, identity: Identity) -> HarnessResult<UserCredentials> {
        let mut user = identity.template();
        let info = self.directory.create_user(&user).await?;
        user.id = Some(info.id);
        user.email = info.email;
        user.validated = info.validated;
        user.groups = info.groups;
        Ok(user)
    }

    async fn create_client(
        &self,
        variant: ClientVariant,
        plan: &str,
    ) -> HarnessResult<ClientRegistration> {
        let app_id = variant.app_id(&self.config.app_id);
        let redirect_uri = variant
            .has_redirect_uri()
            .then(|| self.config.redirect_uri.clone());

        self.directory
            .create_application(&NewApplication {
                id: app_id.clone(),
                name: app_id.clone(),
                confidential: variant.is_confidential(),
                redirect_uri: redirect_uri.clone(),
            })
            .await?;

        let subscription = self
            .directory
            .create_subscription(
                &app_id,
                &NewSubscription {
                    api: self.config.api_id.clone(),
                    application: app_id.clone(),
                    auth: SUBSCRIPTION_AUTH.to_owned(),
                    plan: plan.to_owned(),
                    trusted: variant.is_trusted(),
                },
            )
            .await?;

        let client_id = subscription.client_id.ok_or_else(|| {
            HarnessError::protocol_violation(format!("subscription of {app_id} has no clientId"))
        })?;
        debug!(app_id = %app_id, client_id = %client_id, "Created client");
        Ok(ClientRegistration::new(
            client_id,
            subscription
                .client_secret
                .map(|secret| SecretString::new(secret.into())),
            redirect_uri,
        ))
    }
}

fn ignore_not_found(result: HarnessResult<()>) -> HarnessResult<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
