//! OAuth2 data model used by the flow simulator.
//!
//! - [`ClientRegistration`]: the identity of an OAuth2 client application.
//! - [`UserCredentials`]: a directory user the harness logs in as.
//! - [`Token`]: a validated token endpoint reply.
//!
//! Secrets (client secrets, passwords, tokens) are held as
//! [`SecretString`] and redacted from `Debug` output so fixture dumps and
//! logs never leak them.
//!
//! # Example
//!
//! ```
//! use oauth_harness::auth::{join_scope, ClientRegistration};
//! use secrecy::SecretString;
//!
//! let client = ClientRegistration::new(
//!     "abc123",
//!     Some(SecretString::new("s3cret".into())),
//!     Some("https://portal.local/callback".to_owned()),
//! );
//! assert!(format!("{client:?}").contains("[REDACTED]"));
//! assert_eq!(join_scope(&["read", "write"]).as_deref(), Some("read write"));
//! ```

pub mod flow;

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{HarnessError, HarnessResult};

/// Token type every valid token endpoint reply must carry.
pub const BEARER: &str = "bearer";

/// An OAuth2 client as registered through a subscription.
#[derive(Clone)]
pub struct ClientRegistration {
    /// Client id issued with the subscription.
    pub client_id: String,

    /// Client secret; public clients may not have one.
    client_secret: Option<SecretString>,

    /// Registered redirect URI, absent for the `withouturi` variant.
    pub redirect_uri: Option<String>,
}

impl fmt::Debug for ClientRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

impl ClientRegistration {
    /// Creates a client registration.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: Option<SecretString>,
        redirect_uri: Option<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            redirect_uri,
        }
    }

    /// Returns the client secret, if any.
    #[must_use]
    pub fn client_secret(&self) -> Option<&SecretString> {
        self.client_secret.as_ref()
    }
}

/// A directory user with the clear-text password the harness logs in with.
#[derive(Clone)]
pub struct UserCredentials {
    /// Directory id, known once the user has been created.
    pub id: Option<String>,

    /// Login name.
    pub email: String,

    /// Login password.
    password: SecretString,

    /// Whether the email address counts as verified.
    pub validated: bool,

    /// Authorization groups.
    pub groups: Vec<String>,
}

impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredentials")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("validated", &self.validated)
            .field("groups", &self.groups)
            .finish()
    }
}

impl UserCredentials {
    /// Creates credentials for a validated user.
    #[must_use]
    pub fn new(email: impl Into<String>, password: SecretString, groups: Vec<String>) -> Self {
        Self {
            id: None,
            email: email.into(),
            password,
            validated: true,
            groups,
        }
    }

    /// Returns the login password.
    #[must_use]
    pub fn password(&self) -> &SecretString {
        &self.password
    }

    /// Returns a copy of these credentials with a different password.
    ///
    /// Handy for negative-path scenarios.
    #[must_use]
    pub fn with_password(&self, password: SecretString) -> Self {
        Self {
            password,
            ..self.clone()
        }
    }
}

/// Joins a scope list into the canonical space-separated form.
///
/// Returns `None` for an empty list so callers can omit the parameter.
#[must_use]
pub fn join_scope(scope: &[&str]) -> Option<String> {
    if scope.is_empty() {
        None
    } else {
        Some(scope.join(" "))
    }
}

/// A validated token endpoint reply.
#[derive(Clone)]
pub struct Token {
    access_token: SecretString,
    refresh_token: Option<SecretString>,
    token_type: String,
    scope: Option<String>,
    expires_in: Option<u64>,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Raw token endpoint payload.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: String,
    scope: Option<Value>,
    expires_in: Option<u64>,
}

impl Token {
    /// Validates a token endpoint JSON body.
    ///
    /// The access token must be non-empty and the type must be `bearer`
    /// (compared ASCII case-insensitively). With `require_refresh` the
    /// refresh token must be present and non-empty too.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation describing the first shape mismatch.
    pub fn from_json(value: &Value, require_refresh: bool) -> HarnessResult<Self> {
        if !value.is_object() {
            return Err(HarnessError::protocol_violation(
                "token response is not a JSON object",
            ));
        }
        let raw: TokenResponse = serde_json::from_value(value.clone())
            .map_err(|e| HarnessError::protocol_violation(format!("malformed token response: {e}")))?;

        if raw.access_token.is_empty() {
            return Err(HarnessError::protocol_violation("token response lacks access_token"));
        }
        if !raw.token_type.eq_ignore_ascii_case(BEARER) {
            return Err(HarnessError::protocol_violation(format!(
                "token_type is '{}', expected '{BEARER}'",
                raw.token_type
            )));
        }
        let refresh_token = raw.refresh_token.filter(|t| !t.is_empty());
        if require_refresh && refresh_token.is_none() {
            return Err(HarnessError::protocol_violation("token response lacks refresh_token"));
        }

        Ok(Self {
            access_token: SecretString::new(raw.access_token.into()),
            refresh_token: refresh_token.map(|t| SecretString::new(t.into())),
            token_type: raw.token_type,
            scope: raw.scope.as_ref().and_then(scope_from_value),
            expires_in: raw.expires_in,
        })
    }

    /// Returns the access token.
    #[must_use]
    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    /// Returns the refresh token, if one was issued.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&SecretString> {
        self.refresh_token.as_ref()
    }

    /// Returns the token type as sent by the server.
    #[must_use]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Returns the granted scope string, if the server echoed one.
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Returns the granted scopes as a list.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Returns the lifetime in seconds, if the server sent one.
    #[must_use]
    pub fn expires_in(&self) -> Option<u64> {
        self.expires_in
    }

    /// Returns the `Authorization` header value for protected API calls.
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }
}

/// Normalizes an echoed scope, which some servers send as a list.
fn scope_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            join_scope(&parts)
        }
        _ => None,
    }
}
