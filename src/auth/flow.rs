//! OAuth 2.0 grant simulator.
//!
//! [`OAuthFlowSimulator`] plays the part of a browser and an API client
//! against the authorization server. The authorization-code grant is:
//!
//! 1. GET the authorize endpoint; the server answers with a JSON rendering
//!    of its login page carrying `csrfToken` and `loginUrl`
//! 2. POST the credentials and the untouched CSRF token to `loginUrl`,
//!    within the same cookie session
//! 3. Read the `code` from the `302` redirect
//! 4. Exchange the code at the token endpoint
//!
//! The password grant goes straight to the token endpoint, with no session,
//! login page or CSRF token involved.
//!
//! # Example
//!
//! ```no_run
//! use oauth_harness::auth::flow::OAuthFlowSimulator;
//! use oauth_harness::auth::{ClientRegistration, UserCredentials};
//! use oauth_harness::http::HttpSessionClient;
//! use oauth_harness::types::HttpConfig;
//!
//! # async fn example(
//! #     client: ClientRegistration,
//! #     user: UserCredentials,
//! # ) -> oauth_harness::error::HarnessResult<()> {
//! let http = HttpSessionClient::new("https://api.portal.local/auth/", HttpConfig::default())?;
//! let flow = OAuthFlowSimulator::new(http, "local");
//!
//! let session = flow.new_session()?;
//! let token = flow
//!     .get_authorization_code_token(&session, "echo", &client, &user, &["read"])
//!     .await?;
//! println!("granted scope: {:?}", token.scope());
//! # Ok(())
//! # }
//! ```

use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde_json::{Map, Value};
use tracing::{debug, info};
use url::Url;

use super::{join_scope, ClientRegistration, Token, UserCredentials};
use crate::error::{HarnessError, HarnessResult};
use crate::http::{HttpResponse, HttpSessionClient, Session};

/// The login form rendered by the authorize endpoint.
///
/// Fields are public so negative-path scenarios can tamper with them before
/// calling [`OAuthFlowSimulator::submit_login`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    /// Anti-forgery token bound to the rendered form.
    pub csrf_token: String,
    /// Where the credentials are posted.
    pub login_url: String,
}

/// Drives OAuth2 grants against one authorization server.
#[derive(Debug, Clone)]
pub struct OAuthFlowSimulator {
    http: HttpSessionClient,
    auth_method: String,
}

impl OAuthFlowSimulator {
    /// Creates a simulator for the given auth server client and auth method
    /// (the path segment in front of `/api/{apiId}/...`, usually `local`).
    #[must_use]
    pub fn new(http: HttpSessionClient, auth_method: impl Into<String>) -> Self {
        Self {
            http,
            auth_method: auth_method.into(),
        }
    }

    /// Returns the underlying auth server client.
    #[must_use]
    pub fn http(&self) -> &HttpSessionClient {
        &self.http
    }

    /// Starts a fresh user-agent session.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the HTTP client cannot be built.
    pub fn new_session(&self) -> HarnessResult<Session> {
        self.http.new_session()
    }

    /// Builds the authorize path for a client.
    ///
    /// `redirect_uri` is left out when the client has none, and `scope` is
    /// left out when empty.
    #[must_use]
    pub fn authorize_path(&self, api_id: &str, client: &ClientRegistration, scope: &[&str]) -> String {
        let mut path = format!(
            "{}/api/{}/authorize?response_type=code&client_id={}",
            self.auth_method,
            api_id,
            urlencoding::encode(&client.client_id)
        );
        if let Some(redirect_uri) = &client.redirect_uri {
            path.push_str("&redirect_uri=");
            path.push_str(&urlencoding::encode(redirect_uri));
        }
        if let Some(scope) = join_scope(scope) {
            path.push_str("&scope=");
            path.push_str(&urlencoding::encode(&scope));
        }
        path
    }

    /// Builds the token endpoint path for an API.
    #[must_use]
    pub fn token_path(&self, api_id: &str) -> String {
        format!("{}/api/{}/token", self.auth_method, api_id)
    }

    /// Requests the login form for an authorization-code grant.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation if the reply lacks `csrfToken` or
    /// `loginUrl`, or a transport error on network failure.
    pub async fn start_authorization(
        &self,
        session: &Session,
        api_id: &str,
        client: &ClientRegistration,
        scope: &[&str],
    ) -> HarnessResult<LoginForm> {
        let path = self.authorize_path(api_id, client, scope);
        let response = self.http.get(Some(session), &path).await?;

        let csrf_token = response.body.str_field("csrfToken").ok_or_else(|| {
            HarnessError::protocol_violation(format!(
                "authorize reply ({}) has no csrfToken",
                response.status
            ))
        })?;
        let login_url = response.body.str_field("loginUrl").ok_or_else(|| {
            HarnessError::protocol_violation(format!(
                "authorize reply ({}) has no loginUrl",
                response.status
            ))
        })?;

        Ok(LoginForm {
            csrf_token: csrf_token.to_owned(),
            login_url: login_url.to_owned(),
        })
    }

    /// Posts credentials to the login form and returns the raw reply.
    ///
    /// # Errors
    ///
    /// Returns a transport error on network failure.
    pub async fn submit_login(
        &self,
        session: &Session,
        form: &LoginForm,
        user: &UserCredentials,
    ) -> HarnessResult<HttpResponse> {
        let body = serde_json::json!({
            "_csrf": form.csrf_token,
            "username": user.email,
            "password": user.password().expose_secret(),
        });
        self.http.post(Some(session), &form.login_url, &body).await
    }

    /// Runs the browser part of the authorization-code grant and returns
    /// the code.
    ///
    /// The session keeps the login cookie afterwards.
    ///
    /// # Errors
    ///
    /// - `AuthenticationRejected` if the login POST is not answered with `302`
    /// - `ProtocolViolation` if the form, the redirect or the code is missing
    /// - `Transport` on network failure
    pub async fn get_authorization_code(
        &self,
        session: &Session,
        api_id: &str,
        client: &ClientRegistration,
        user: &UserCredentials,
        scope: &[&str],
    ) -> HarnessResult<String> {
        let form = self.start_authorization(session, api_id, client, scope).await?;
        let response = self.submit_login(session, &form, user).await?;
        let login_url = self.http.resolve(&form.login_url)?;
        let code = extract_code(&response, &login_url)?;
        debug!(api_id, client_id = %client.client_id, "Received authorization code");
        Ok(code)
    }

    /// Runs the full authorization-code grant.
    ///
    /// # Errors
    ///
    /// Any error of [`get_authorization_code`](Self::get_authorization_code)
    /// or [`exchange_code`](Self::exchange_code).
    pub async fn get_authorization_code_token(
        &self,
        session: &Session,
        api_id: &str,
        client: &ClientRegistration,
        user: &UserCredentials,
        scope: &[&str],
    ) -> HarnessResult<Token> {
        let code = self
            .get_authorization_code(session, api_id, client, user, scope)
            .await?;
        self.exchange_code(api_id, client, &code).await
    }

    /// Exchanges an authorization code for a token.
    ///
    /// A code is single-use; exchanging it a second time is expected to be
    /// refused by the server and surfaces here as a protocol violation.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation unless the server answers `200` with a
    /// token carrying access and refresh tokens of type `bearer`.
    pub async fn exchange_code(
        &self,
        api_id: &str,
        client: &ClientRegistration,
        code: &str,
    ) -> HarnessResult<Token> {
        let mut body = client_body("authorization_code", client);
        body.insert("code".to_owned(), Value::from(code));

        let response = self
            .http
            .post(None, &self.token_path(api_id), &Value::Object(body))
            .await?;
        if response.status != StatusCode::OK {
            return Err(HarnessError::protocol_violation(format!(
                "token endpoint answered {} to code exchange: {}",
                response.status, response.body
            )));
        }
        let token = require_json_token(&response, true)?;
        info!(api_id, client_id = %client.client_id, "Exchanged authorization code");
        Ok(token)
    }

    /// Sends a password grant and returns the raw reply.
    ///
    /// # Errors
    ///
    /// Returns a transport error on network failure.
    pub async fn request_password_token(
        &self,
        api_id: &str,
        client: &ClientRegistration,
        user: &UserCredentials,
        scope: &[&str],
    ) -> HarnessResult<HttpResponse> {
        let mut body = client_body("password", client);
        body.insert("username".to_owned(), Value::from(user.email.as_str()));
        body.insert(
            "password".to_owned(),
            Value::from(user.password().expose_secret()),
        );
        if let Some(scope) = join_scope(scope) {
            body.insert("scope".to_owned(), Value::from(scope));
        }
        self.http
            .post(None, &self.token_path(api_id), &Value::Object(body))
            .await
    }

    /// Runs the resource-owner password grant.
    ///
    /// # Errors
    ///
    /// - `AuthenticationRejected` for a `4xx` reply (wrong credentials,
    ///   grant not allowed for the client)
    /// - `ProtocolViolation` for any other non-`200` reply or a malformed token
    /// - `Transport` on network failure
    pub async fn get_password_token(
        &self,
        api_id: &str,
        client: &ClientRegistration,
        user: &UserCredentials,
        scope: &[&str],
    ) -> HarnessResult<Token> {
        let response = self
            .request_password_token(api_id, client, user, scope)
            .await?;
        if response.status.is_client_error() {
            return Err(HarnessError::authentication_rejected(
                response.status.as_u16(),
                response.body.to_string(),
            ));
        }
        if response.status != StatusCode::OK {
            return Err(HarnessError::protocol_violation(format!(
                "token endpoint answered {} to password grant: {}",
                response.status, response.body
            )));
        }
        require_json_token(&response, false)
    }
}

/// Common token endpoint fields: grant type and client credentials.
fn client_body(grant_type: &str, client: &ClientRegistration) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("grant_type".to_owned(), Value::from(grant_type));
    body.insert("client_id".to_owned(), Value::from(client.client_id.as_str()));
    if let Some(secret) = client.client_secret() {
        body.insert(
            "client_secret".to_owned(),
            Value::from(secret.expose_secret()),
        );
    }
    body
}

fn require_json_token(response: &HttpResponse, require_refresh: bool) -> HarnessResult<Token> {
    let json = response.body.as_json().ok_or_else(|| {
        HarnessError::protocol_violation("token endpoint did not answer with JSON")
    })?;
    Token::from_json(json, require_refresh)
}

/// Pulls the authorization code out of a login reply.
///
/// `login_url` is used to resolve relative `Location` headers.
///
/// # Errors
///
/// Returns `AuthenticationRejected` for anything but `302`, and a protocol
/// violation when the redirect has no usable `Location` or no `code`.
pub fn extract_code(response: &HttpResponse, login_url: &Url) -> HarnessResult<String> {
    if response.status != StatusCode::FOUND {
        return Err(HarnessError::authentication_rejected(
            response.status.as_u16(),
            response.body.to_string(),
        ));
    }
    let location = response
        .location()
        .ok_or_else(|| HarnessError::protocol_violation("login redirect has no Location header"))?;
    let target = login_url.join(location).map_err(|e| {
        HarnessError::protocol_violation(format!("unparseable redirect '{location}': {e}"))
    })?;

    let mut error = None;
    for (key, value) in target.query_pairs() {
        match key.as_ref() {
            "code" if !value.is_empty() => return Ok(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }
    Err(HarnessError::protocol_violation(match error {
        Some(error) => format!("login redirect carries error '{error}' instead of a code"),
        None => format!("login redirect '{target}' carries no code"),
    }))
}
