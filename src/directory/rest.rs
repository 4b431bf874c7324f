//! REST implementation of [`DirectoryService`] against the management API.

use reqwest::{RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use super::{
    ApiConfig, ApplicationInfo, AuthServerInfo, DirectoryService, NewApplication,
    NewSubscription, Plan, SubscriptionInfo, UserInfo, UserShortInfo, WebhookEvent,
};
use crate::auth::UserCredentials;
use crate::error::{HarnessError, HarnessResult};
use crate::types::{DirectoryConfig, HttpConfig};
use crate::util::ensure_slash;

/// Header identifying the acting user towards the management API.
const USER_ID_HEADER: &str = "X-UserId";

/// HTTP client for the management API.
#[derive(Debug, Clone)]
pub struct RestDirectoryClient {
    client: reqwest::Client,
    base: Url,
    user_id: Option<String>,
    external_api_url: String,
}

impl RestDirectoryClient {
    /// Creates a client for the management API.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unparseable URL, or a transport
    /// error if the HTTP client cannot be built.
    pub fn new(
        config: &DirectoryConfig,
        external_api_url: impl Into<String>,
        http: &HttpConfig,
    ) -> HarnessResult<Self> {
        let base = Url::parse(&ensure_slash(&config.url)).map_err(|e| {
            HarnessError::config(format!("invalid directory url '{}': {e}", config.url))
        })?;
        let client = reqwest::Client::builder().timeout(http.timeout()).build()?;
        Ok(Self {
            client,
            base,
            user_id: config.user_id.clone(),
            external_api_url: external_api_url.into(),
        })
    }

    fn url(&self, path: &str) -> HarnessResult<Url> {
        self.base
            .join(path)
            .map_err(|e| HarnessError::config(format!("bad directory path '{path}': {e}")))
    }

    fn with_user(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.user_id {
            Some(user_id) => request.header(USER_ID_HEADER, user_id),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder, resource: &str) -> HarnessResult<reqwest::Response> {
        let response = self.with_user(request).send().await?;
        let status = response.status();
        debug!(resource, status = status.as_u16(), "directory call");
        if status == StatusCode::NOT_FOUND {
            return Err(HarnessError::not_found(resource));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|e| e.to_string());
            return Err(HarnessError::directory(status.as_u16(), body));
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, resource: &str) -> HarnessResult<T> {
        let request = self.client.get(self.url(path)?);
        let response = self.execute(request, resource).await?;
        parse_json(response, resource).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B, resource: &str) -> HarnessResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.client.post(self.url(path)?).json(body);
        let response = self.execute(request, resource).await?;
        parse_json(response, resource).await
    }

    async fn delete(&self, path: &str, resource: &str) -> HarnessResult<()> {
        let request = self.client.delete(self.url(path)?);
        self.execute(request, resource).await?;
        Ok(())
    }
}

async fn parse_json<T: DeserializeOwned>(response: reqwest::Response, resource: &str) -> HarnessResult<T> {
    let raw = response.text().await?;
    serde_json::from_str(&raw).map_err(|e| {
        HarnessError::protocol_violation(format!("unexpected payload for {resource}: {e}"))
    })
}

impl DirectoryService for RestDirectoryClient {
    async fn create_user(&self, user: &UserCredentials) -> HarnessResult<UserInfo> {
        let body = serde_json::json!({
            "email": user.email,
            "password": user.password().expose_secret(),
            "validated": user.validated,
            "groups": user.groups,
        });
        self.post_json("users", &body, &format!("user {}", user.email))
            .await
    }

    async fn delete_user(&self, user_id: &str) -> HarnessResult<()> {
        self.delete(
            &format!("users/{}", urlencoding::encode(user_id)),
            &format!("user {user_id}"),
        )
        .await
    }

    async fn get_user_by_email(&self, email: &str) -> HarnessResult<Vec<UserShortInfo>> {
        self.get_json(
            &format!("users?email={}", urlencoding::encode(email)),
            &format!("user {email}"),
        )
        .await
    }

    async fn create_application(&self, app: &NewApplication) -> HarnessResult<ApplicationInfo> {
        self.post_json("applications", app, &format!("application {}", app.id))
            .await
    }

    async fn delete_application(&self, app_id: &str) -> HarnessResult<()> {
        self.delete(
            &format!("applications/{}", urlencoding::encode(app_id)),
            &format!("application {app_id}"),
        )
        .await
    }

    async fn get_application(&self, app_id: &str) -> HarnessResult<ApplicationInfo> {
        self.get_json(
            &format!("applications/{}", urlencoding::encode(app_id)),
            &format!("application {app_id}"),
        )
        .await
    }

    async fn create_subscription(
        &self,
        app_id: &str,
        subscription: &NewSubscription,
    ) -> HarnessResult<SubscriptionInfo> {
        self.post_json(
            &format!("applications/{}/subscriptions", urlencoding::encode(app_id)),
            subscription,
            &format!("subscription {app_id}/{}", subscription.api),
        )
        .await
    }

    async fn get_api_plans(&self, api_id: &str) -> HarnessResult<Vec<Plan>> {
        self.get_json(
            &format!("apis/{}/plans", urlencoding::encode(api_id)),
            &format!("plans of api {api_id}"),
        )
        .await
    }

    async fn get_api_config(&self, api_id: &str) -> HarnessResult<ApiConfig> {
        self.get_json(
            &format!("apis/{}/config", urlencoding::encode(api_id)),
            &format!("config of api {api_id}"),
        )
        .await
    }

    async fn get_auth_server(&self, name: &str) -> HarnessResult<AuthServerInfo> {
        self.get_json(
            &format!("authserver/{}", urlencoding::encode(name)),
            &format!("auth server {name}"),
        )
        .await
    }

    async fn get_webhook_events(&self, listener: &str) -> HarnessResult<Vec<WebhookEvent>> {
        self.get_json(
            &format!("webhooks/events/{}", urlencoding::encode(listener)),
            &format!("events of listener {listener}"),
        )
        .await
    }

    fn external_api_url(&self) -> &str {
        &self.external_api_url
    }
}
