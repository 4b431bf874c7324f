//! Common test utilities and fixtures for the harness.
//!
//! This module provides shared test infrastructure including:
//! - [`TestContext`] for tests that need files on disk
//! - [`FakeDirectory`], an in-memory [`DirectoryService`]
//! - [`MockAuthServer`], a wiremock authorization server with real CSRF,
//!   cookie and single-use code semantics

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use oauth_harness::auth::{ClientRegistration, UserCredentials};
use oauth_harness::directory::{
    ApiConfig, ApiDefinition, ApplicationInfo, AuthServerInfo, DirectoryService, NewApplication,
    NewSubscription, Plan, SubscriptionInfo, UserInfo, UserShortInfo, WebhookEvent,
};
use oauth_harness::types::{HttpConfig, PollerConfig};
use oauth_harness::{ConsistencyPoller, HarnessError, HarnessResult, HttpSessionClient};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Test context providing common setup for integration tests.
pub struct TestContext {
    /// Temporary directory for test file operations.
    pub temp_dir: tempfile::TempDir,
}

impl TestContext {
    /// Creates a new test context with a temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            temp_dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    /// Returns the path to the temporary directory.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    /// Creates a file in the temporary directory with the given content.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, content).expect("failed to write file");
        path
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A poller that does not make tests wait.
pub fn fast_poller(max_attempts: u32) -> ConsistencyPoller {
    ConsistencyPoller::new(PollerConfig {
        initial_delay_ms: 1,
        interval_ms: 1,
        max_attempts,
        slow_threshold: 7,
    })
}

// ============================================================================
// In-memory directory
// ============================================================================

#[derive(Default)]
struct DirectoryState {
    next_id: u32,
    users: HashMap<String, UserInfo>,
    apps: HashMap<String, ApplicationInfo>,
    subscriptions: HashMap<String, Vec<NewSubscription>>,
    plans: HashMap<String, Vec<Plan>>,
    api_configs: HashMap<String, ApiConfig>,
    auth_servers: HashMap<String, AuthServerInfo>,
    pending_events: Vec<WebhookEvent>,
    queue_stuck: bool,
    plan_lookups: u32,
    event_polls: u32,
    api_config_lookups: u32,
    auth_server_lookups: u32,
}

impl DirectoryState {
    fn enqueue(&mut self, action: &str, entity: &str) {
        self.next_id += 1;
        self.pending_events.push(WebhookEvent {
            id: format!("evt-{}", self.next_id),
            action: action.to_owned(),
            entity: entity.to_owned(),
        });
    }
}

/// In-memory directory service.
///
/// Every mutation enqueues a webhook event; the adapter is simulated as
/// having processed everything by the time the queue is polled a second
/// time. Clones share state.
#[derive(Clone)]
pub struct FakeDirectory {
    state: Arc<Mutex<DirectoryState>>,
    external_api_url: String,
}

impl FakeDirectory {
    /// Creates a directory seeded with the `echo` API (two plans, public
    /// path `/echo`) and the `default` auth server (public path `/auth`).
    pub fn new(external_api_url: &str) -> Self {
        let mut state = DirectoryState::default();
        state.plans.insert(
            "echo".to_owned(),
            vec![
                Plan {
                    id: "basic".to_owned(),
                    name: "Basic".to_owned(),
                },
                Plan {
                    id: "unlimited".to_owned(),
                    name: "Unlimited".to_owned(),
                },
            ],
        );
        state.api_configs.insert("echo".to_owned(), api_config("/echo"));
        state.auth_servers.insert(
            "default".to_owned(),
            AuthServerInfo {
                config: api_config("/auth"),
            },
        );
        Self {
            state: Arc::new(Mutex::new(state)),
            external_api_url: external_api_url.to_owned(),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut DirectoryState) -> T) -> T {
        f(&mut *self.state.lock().unwrap())
    }

    /// Replaces the plans of an API.
    pub fn set_plans(&self, api_id: &str, plans: Vec<Plan>) {
        self.with_state(|s| s.plans.insert(api_id.to_owned(), plans));
    }

    /// Makes the webhook queue never drain.
    pub fn stick_queue(&self) {
        self.with_state(|s| {
            s.queue_stuck = true;
            s.enqueue("update", "application");
        });
    }

    /// Inserts a user directly, bypassing the email uniqueness check.
    pub fn insert_raw_user(&self, email: &str) -> String {
        self.with_state(|s| {
            s.next_id += 1;
            let id = format!("user-{}", s.next_id);
            s.users.insert(
                id.clone(),
                UserInfo {
                    id: id.clone(),
                    email: email.to_owned(),
                    validated: true,
                    groups: Vec::new(),
                },
            );
            id
        })
    }

    /// Inserts an application directly.
    pub fn insert_raw_application(&self, app_id: &str) {
        self.with_state(|s| {
            s.apps.insert(
                app_id.to_owned(),
                ApplicationInfo {
                    id: app_id.to_owned(),
                    name: app_id.to_owned(),
                    confidential: true,
                    redirect_uri: None,
                },
            );
        });
    }

    pub fn user_count(&self) -> usize {
        self.with_state(|s| s.users.len())
    }

    pub fn app_count(&self) -> usize {
        self.with_state(|s| s.apps.len())
    }

    pub fn user_emails(&self) -> Vec<String> {
        let mut emails = self.with_state(|s| {
            s.users
                .values()
                .map(|u| u.email.clone())
                .collect::<Vec<_>>()
        });
        emails.sort();
        emails
    }

    pub fn application(&self, app_id: &str) -> Option<ApplicationInfo> {
        self.with_state(|s| s.apps.get(app_id).cloned())
    }

    pub fn subscriptions(&self, app_id: &str) -> Vec<NewSubscription> {
        self.with_state(|s| s.subscriptions.get(app_id).cloned().unwrap_or_default())
    }

    pub fn pending_events(&self) -> usize {
        self.with_state(|s| s.pending_events.len())
    }

    pub fn plan_lookups(&self) -> u32 {
        self.with_state(|s| s.plan_lookups)
    }

    pub fn event_polls(&self) -> u32 {
        self.with_state(|s| s.event_polls)
    }

    pub fn api_config_lookups(&self) -> u32 {
        self.with_state(|s| s.api_config_lookups)
    }

    pub fn auth_server_lookups(&self) -> u32 {
        self.with_state(|s| s.auth_server_lookups)
    }
}

fn api_config(uri: &str) -> ApiConfig {
    ApiConfig {
        api: ApiDefinition {
            uris: vec![uri.to_owned()],
        },
    }
}

impl DirectoryService for FakeDirectory {
    async fn create_user(&self, user: &UserCredentials) -> HarnessResult<UserInfo> {
        self.with_state(|s| {
            if s.users.values().any(|u| u.email == user.email) {
                return Err(HarnessError::directory(409, "email already registered"));
            }
            s.next_id += 1;
            let info = UserInfo {
                id: format!("user-{}", s.next_id),
                email: user.email.clone(),
                validated: user.validated,
                groups: user.groups.clone(),
            };
            s.users.insert(info.id.clone(), info.clone());
            s.enqueue("add", "user");
            Ok(info)
        })
    }

    async fn delete_user(&self, user_id: &str) -> HarnessResult<()> {
        self.with_state(|s| {
            s.users
                .remove(user_id)
                .ok_or_else(|| HarnessError::not_found(format!("user {user_id}")))?;
            s.enqueue("delete", "user");
            Ok(())
        })
    }

    async fn get_user_by_email(&self, email: &str) -> HarnessResult<Vec<UserShortInfo>> {
        Ok(self.with_state(|s| {
            s.users
                .values()
                .filter(|u| u.email == email)
                .map(|u| UserShortInfo {
                    id: u.id.clone(),
                    email: u.email.clone(),
                })
                .collect()
        }))
    }

    async fn create_application(&self, app: &NewApplication) -> HarnessResult<ApplicationInfo> {
        self.with_state(|s| {
            if s.apps.contains_key(&app.id) {
                return Err(HarnessError::directory(409, "application already exists"));
            }
            let info = ApplicationInfo {
                id: app.id.clone(),
                name: app.name.clone(),
                confidential: app.confidential,
                redirect_uri: app.redirect_uri.clone(),
            };
            s.apps.insert(app.id.clone(), info.clone());
            s.enqueue("add", "application");
            Ok(info)
        })
    }

    async fn delete_application(&self, app_id: &str) -> HarnessResult<()> {
        self.with_state(|s| {
            s.apps
                .remove(app_id)
                .ok_or_else(|| HarnessError::not_found(format!("application {app_id}")))?;
            s.subscriptions.remove(app_id);
            s.enqueue("delete", "application");
            Ok(())
        })
    }

    async fn get_application(&self, app_id: &str) -> HarnessResult<ApplicationInfo> {
        self.with_state(|s| {
            s.apps
                .get(app_id)
                .cloned()
                .ok_or_else(|| HarnessError::not_found(format!("application {app_id}")))
        })
    }

    async fn create_subscription(
        &self,
        app_id: &str,
        subscription: &NewSubscription,
    ) -> HarnessResult<SubscriptionInfo> {
        self.with_state(|s| {
            let app = s
                .apps
                .get(app_id)
                .cloned()
                .ok_or_else(|| HarnessError::not_found(format!("application {app_id}")))?;
            s.subscriptions
                .entry(app_id.to_owned())
                .or_default()
                .push(subscription.clone());
            s.enqueue("add", "subscription");
            Ok(SubscriptionInfo {
                client_id: Some(format!("client-{app_id}")),
                client_secret: app.confidential.then(|| format!("secret-{app_id}")),
            })
        })
    }

    async fn get_api_plans(&self, api_id: &str) -> HarnessResult<Vec<Plan>> {
        self.with_state(|s| {
            s.plan_lookups += 1;
            s.plans
                .get(api_id)
                .cloned()
                .ok_or_else(|| HarnessError::not_found(format!("api {api_id}")))
        })
    }

    async fn get_api_config(&self, api_id: &str) -> HarnessResult<ApiConfig> {
        self.with_state(|s| {
            s.api_config_lookups += 1;
            s.api_configs
                .get(api_id)
                .cloned()
                .ok_or_else(|| HarnessError::not_found(format!("api {api_id}")))
        })
    }

    async fn get_auth_server(&self, name: &str) -> HarnessResult<AuthServerInfo> {
        self.with_state(|s| {
            s.auth_server_lookups += 1;
            s.auth_servers
                .get(name)
                .cloned()
                .ok_or_else(|| HarnessError::not_found(format!("auth server {name}")))
        })
    }

    async fn get_webhook_events(&self, _listener: &str) -> HarnessResult<Vec<WebhookEvent>> {
        Ok(self.with_state(|s| {
            s.event_polls += 1;
            if s.queue_stuck {
                s.pending_events.clone()
            } else {
                std::mem::take(&mut s.pending_events)
            }
        }))
    }

    fn external_api_url(&self) -> &str {
        &self.external_api_url
    }
}

// ============================================================================
// Mock authorization server
// ============================================================================

/// Path prefix the mock auth server is mounted under.
pub const AUTH_PREFIX: &str = "/auth";

/// API id used by the flow tests.
pub const API_ID: &str = "echo";

#[derive(Clone)]
struct RegisteredClient {
    secret: Option<String>,
    redirect_uri: Option<String>,
}

struct PendingLogin {
    csrf: String,
    client_id: String,
    scope: Option<String>,
}

#[derive(Default)]
struct AuthState {
    next_id: u32,
    users: HashMap<String, String>,
    clients: HashMap<String, RegisteredClient>,
    logins: HashMap<String, PendingLogin>,
    codes: HashMap<String, (String, Option<String>)>,
}

type SharedAuthState = Arc<Mutex<AuthState>>;

/// Wiremock authorization server for the `local` auth method and the
/// `echo` API.
///
/// - `GET  /auth/local/api/echo/authorize` renders the login form as JSON
///   and binds a CSRF token to a session cookie; a client without redirect
///   URI is refused with `400`
/// - `POST /auth/local/login` checks cookie, CSRF token and password, then
///   redirects to the client's redirect URI with a single-use code
/// - `POST /auth/local/api/echo/token` serves the code and password grants
pub struct MockAuthServer {
    pub server: MockServer,
    state: SharedAuthState,
}

impl MockAuthServer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let state = SharedAuthState::default();
        let login_url = format!("{}{AUTH_PREFIX}/local/login", server.uri());

        Mock::given(method("GET"))
            .and(path(format!("{AUTH_PREFIX}/local/api/{API_ID}/authorize")))
            .respond_with(AuthorizeResponder {
                state: Arc::clone(&state),
                login_url,
            })
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{AUTH_PREFIX}/local/login")))
            .respond_with(LoginResponder {
                state: Arc::clone(&state),
            })
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{AUTH_PREFIX}/local/api/{API_ID}/token")))
            .respond_with(TokenResponder {
                state: Arc::clone(&state),
            })
            .mount(&server)
            .await;

        Self { server, state }
    }

    /// Base URL of the auth server, as the endpoint resolver would build it.
    pub fn auth_base(&self) -> String {
        format!("{}{AUTH_PREFIX}/", self.server.uri())
    }

    /// HTTP client pointed at the auth server.
    pub fn http_client(&self) -> HttpSessionClient {
        HttpSessionClient::new(&self.auth_base(), HttpConfig::default())
            .expect("auth base url is valid")
    }

    pub fn register_user(&self, user: &UserCredentials) {
        self.state.lock().unwrap().users.insert(
            user.email.clone(),
            user.password().expose_secret().to_owned(),
        );
    }

    pub fn register_client(&self, client: &ClientRegistration) {
        self.state.lock().unwrap().clients.insert(
            client.client_id.clone(),
            RegisteredClient {
                secret: client
                    .client_secret()
                    .map(|s| s.expose_secret().to_owned()),
                redirect_uri: client.redirect_uri.clone(),
            },
        );
    }

    /// Raw query strings of all authorize requests received so far.
    pub async fn authorize_queries(&self) -> Vec<String> {
        self.requests_to("authorize")
            .await
            .into_iter()
            .filter_map(|r| r.url.query().map(str::to_owned))
            .collect()
    }

    /// JSON bodies of all token requests received so far.
    pub async fn token_bodies(&self) -> Vec<Value> {
        self.requests_to("token")
            .await
            .into_iter()
            .filter_map(|r| serde_json::from_slice(&r.body).ok())
            .collect()
    }

    async fn requests_to(&self, suffix: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path().ends_with(suffix))
            .collect()
    }
}

fn error_reply(status: u16, error: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({ "error": error }))
}

fn body_str<'a>(body: &'a Value, field: &str) -> Option<&'a str> {
    body.get(field).and_then(Value::as_str)
}

struct AuthorizeResponder {
    state: SharedAuthState,
    login_url: String,
}

impl Respond for AuthorizeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let query: HashMap<String, String> = request.url.query_pairs().into_owned().collect();
        let mut state = self.state.lock().unwrap();

        let Some(client_id) = query.get("client_id") else {
            return error_reply(400, "invalid_request");
        };
        let Some(client) = state.clients.get(client_id).cloned() else {
            return error_reply(400, "unauthorized_client");
        };
        if query.get("response_type").map(String::as_str) != Some("code") {
            return error_reply(400, "unsupported_response_type");
        }
        match (&client.redirect_uri, query.get("redirect_uri")) {
            (Some(registered), Some(given)) if registered == given => {}
            _ => return error_reply(400, "invalid_request"),
        }

        state.next_id += 1;
        let sid = format!("sid-{}", state.next_id);
        let csrf = format!("csrf-{}", state.next_id);
        state.logins.insert(
            sid.clone(),
            PendingLogin {
                csrf: csrf.clone(),
                client_id: client_id.clone(),
                scope: query.get("scope").cloned(),
            },
        );

        ResponseTemplate::new(200)
            .insert_header("set-cookie", format!("wicked.sid={sid}; Path=/; HttpOnly"))
            .set_body_json(json!({
                "csrfToken": csrf,
                "loginUrl": self.login_url,
                "would_be_html": true,
            }))
    }
}

struct LoginResponder {
    state: SharedAuthState,
}

impl Respond for LoginResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let sid = request
            .headers
            .get("cookie")
            .and_then(|v| v.to_str().ok())
            .and_then(|cookies| {
                cookies
                    .split(';')
                    .find_map(|c| c.trim().strip_prefix("wicked.sid="))
                    .map(str::to_owned)
            });

        let mut state = self.state.lock().unwrap();
        let Some(sid) = sid else {
            return ResponseTemplate::new(403).set_body_string("missing session");
        };
        let Some(login) = state.logins.get(&sid) else {
            return ResponseTemplate::new(403).set_body_string("unknown session");
        };
        if body_str(&body, "_csrf") != Some(login.csrf.as_str()) {
            return ResponseTemplate::new(403).set_body_string("invalid csrf token");
        }

        let (Some(username), Some(password)) =
            (body_str(&body, "username"), body_str(&body, "password"))
        else {
            return error_reply(400, "invalid_request");
        };
        if state.users.get(username).map(String::as_str) != Some(password) {
            return ResponseTemplate::new(200).set_body_json(json!({
                "csrfToken": login.csrf,
                "errorMessage": "Username or password invalid.",
            }));
        }

        let Some(login) = state.logins.remove(&sid) else {
            return ResponseTemplate::new(403).set_body_string("unknown session");
        };
        let redirect_uri = state
            .clients
            .get(&login.client_id)
            .and_then(|c| c.redirect_uri.clone())
            .unwrap_or_default();
        state.next_id += 1;
        let code = format!("code-{}", state.next_id);
        state
            .codes
            .insert(code.clone(), (login.client_id, login.scope));

        ResponseTemplate::new(302).insert_header("location", format!("{redirect_uri}?code={code}"))
    }
}

struct TokenResponder {
    state: SharedAuthState,
}

impl TokenResponder {
    fn token(&self, state: &mut AuthState, scope: Option<String>, refresh: bool) -> ResponseTemplate {
        state.next_id += 1;
        let mut token = json!({
            "access_token": format!("access-{}", state.next_id),
            "token_type": "bearer",
            "expires_in": 1800,
        });
        if refresh {
            token["refresh_token"] = json!(format!("refresh-{}", state.next_id));
        }
        if let Some(scope) = scope {
            token["scope"] = json!(scope);
        }
        ResponseTemplate::new(200).set_body_json(token)
    }
}

impl Respond for TokenResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let mut state = self.state.lock().unwrap();

        let Some(client_id) = body_str(&body, "client_id") else {
            return error_reply(400, "invalid_request");
        };
        let Some(client) = state.clients.get(client_id).cloned() else {
            return error_reply(401, "invalid_client");
        };
        if let Some(secret) = &client.secret {
            if body_str(&body, "client_secret") != Some(secret.as_str()) {
                return error_reply(401, "invalid_client");
            }
        }

        match body_str(&body, "grant_type") {
            Some("authorization_code") => {
                let code = body_str(&body, "code").unwrap_or_default();
                match state.codes.remove(code) {
                    Some((owner, scope)) if owner == client_id => self.token(&mut state, scope, true),
                    _ => error_reply(400, "invalid_grant"),
                }
            }
            Some("password") => {
                let username = body_str(&body, "username").unwrap_or_default();
                let password = body_str(&body, "password").unwrap_or_default();
                if state.users.get(username).map(String::as_str) != Some(password) {
                    return error_reply(401, "invalid_grant");
                }
                let scope = body_str(&body, "scope").map(str::to_owned);
                self.token(&mut state, scope, client.secret.is_some())
            }
            _ => error_reply(400, "unsupported_grant_type"),
        }
    }
}
