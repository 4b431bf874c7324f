//! Directory (management) service interface.
//!
//! The harness never talks to the directory's storage directly: it goes
//! through [`DirectoryService`], which mirrors the management API calls the
//! fixtures need. [`rest::RestDirectoryClient`] implements it over HTTP;
//! tests plug in an in-memory fake.
//!
//! "Not found" is reported as [`HarnessError::NotFound`] so teardown can
//! treat it as success while every other failure still propagates.

pub mod resolver;
pub mod rest;

use serde::{Deserialize, Serialize};

use crate::auth::UserCredentials;
use crate::error::{HarnessError, HarnessResult};
use crate::poller::QueueProbe;

/// A user as stored by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    /// Directory id.
    pub id: String,
    /// Login email.
    pub email: String,
    /// Whether the email is verified.
    #[serde(default)]
    pub validated: bool,
    /// Authorization groups.
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Abbreviated user record returned by email lookups.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserShortInfo {
    /// Directory id.
    pub id: String,
    /// Login email.
    #[serde(default)]
    pub email: String,
}

/// Application registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewApplication {
    /// Application id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Confidential clients can keep a secret.
    pub confidential: bool,
    /// OAuth2 redirect URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
}

/// An application as stored by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInfo {
    /// Application id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Confidential clients can keep a secret.
    #[serde(default)]
    pub confidential: bool,
    /// OAuth2 redirect URI.
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

/// Subscription request tying an application to an API plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewSubscription {
    /// API id.
    pub api: String,
    /// Application id.
    pub application: String,
    /// Auth type, `oauth2` for all fixtures.
    pub auth: String,
    /// Plan id.
    pub plan: String,
    /// Trusted clients skip the consent screen.
    pub trusted: bool,
}

/// Subscription as stored by the directory, carrying the OAuth2 credentials.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    /// Issued client id.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Issued client secret.
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// An API plan.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Plan {
    /// Plan id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

/// Gateway definition of an API (or of the auth server itself).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApiDefinition {
    /// Public request paths, first one wins.
    #[serde(default)]
    pub uris: Vec<String>,
}

/// API configuration as returned by the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApiConfig {
    /// Gateway definition.
    #[serde(default)]
    pub api: ApiDefinition,
}

impl ApiConfig {
    /// Returns the first public path.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation if no path is configured.
    pub fn first_uri(&self, what: &str) -> HarnessResult<&str> {
        self.api
            .uris
            .first()
            .map(String::as_str)
            .ok_or_else(|| HarnessError::protocol_violation(format!("{what} has no api.uris")))
    }
}

/// Auth server description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuthServerInfo {
    /// Gateway configuration of the auth server.
    #[serde(default)]
    pub config: ApiConfig,
}

/// Pending webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebhookEvent {
    /// Event id.
    pub id: String,
    /// What happened (`add`, `update`, `delete`).
    #[serde(default)]
    pub action: String,
    /// What it happened to (`application`, `subscription`, ...).
    #[serde(default)]
    pub entity: String,
}

/// The management API operations the harness depends on.
#[allow(async_fn_in_trait)]
pub trait DirectoryService {
    /// Creates a user and returns the stored record.
    async fn create_user(&self, user: &UserCredentials) -> HarnessResult<UserInfo>;

    /// Deletes a user by id.
    async fn delete_user(&self, user_id: &str) -> HarnessResult<()>;

    /// Looks users up by email.
    async fn get_user_by_email(&self, email: &str) -> HarnessResult<Vec<UserShortInfo>>;

    /// Registers an application.
    async fn create_application(&self, app: &NewApplication) -> HarnessResult<ApplicationInfo>;

    /// Deletes an application and its subscriptions.
    async fn delete_application(&self, app_id: &str) -> HarnessResult<()>;

    /// Fetches an application.
    async fn get_application(&self, app_id: &str) -> HarnessResult<ApplicationInfo>;

    /// Subscribes an application to an API plan.
    async fn create_subscription(
        &self,
        app_id: &str,
        subscription: &NewSubscription,
    ) -> HarnessResult<SubscriptionInfo>;

    /// Lists the plans of an API.
    async fn get_api_plans(&self, api_id: &str) -> HarnessResult<Vec<Plan>>;

    /// Fetches the gateway configuration of an API.
    async fn get_api_config(&self, api_id: &str) -> HarnessResult<ApiConfig>;

    /// Fetches an auth server description.
    async fn get_auth_server(&self, name: &str) -> HarnessResult<AuthServerInfo>;

    /// Lists the events still queued for a webhook listener.
    async fn get_webhook_events(&self, listener: &str) -> HarnessResult<Vec<WebhookEvent>>;

    /// Public base URL of the API gateway.
    fn external_api_url(&self) -> &str;
}

/// Queue probe over a webhook listener's pending events.
#[derive(Debug, Clone, Copy)]
pub struct WebhookQueueProbe<'a, D> {
    directory: &'a D,
    listener: &'a str,
}

impl<'a, D: DirectoryService> WebhookQueueProbe<'a, D> {
    /// Creates a probe for `listener` (for example `kong-adapter`).
    #[must_use]
    pub fn new(directory: &'a D, listener: &'a str) -> Self {
        Self {
            directory,
            listener,
        }
    }
}

impl<D: DirectoryService> QueueProbe for WebhookQueueProbe<'_, D> {
    async fn queue_length(&self) -> HarnessResult<usize> {
        Ok(self.directory.get_webhook_events(self.listener).await?.len())
    }
}
