//! HTTP plumbing for the auth server and protected APIs.
//!
//! Two pieces live here:
//!
//! - [`Session`]: one simulated user agent. It owns a cookie jar so the
//!   login cookie set during an authorization flow is carried into the
//!   following requests. Redirects are never followed, because the flows
//!   need to observe the `302` and its `Location` header themselves.
//! - [`HttpSessionClient`]: resolves auth-server paths against the auth
//!   server's base URL, stamps every request with a `Correlation-Id`, and
//!   turns replies into [`HttpResponse`] with a typed [`ResponseBody`].
//!
//! Sessions must not be shared between concurrently running flows: the CSRF
//! token and the login cookie are both bound to the jar.

use std::fmt;
use std::sync::Arc;

use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::error::{HarnessError, HarnessResult};
use crate::types::HttpConfig;
use crate::util::{create_random_id, ensure_slash};

/// Header carrying the per-request correlation id.
pub const CORRELATION_HEADER: &str = "Correlation-Id";

/// Body of a response, decided once from its `Content-Type`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// `application/json` payload.
    Json(Value),
    /// Anything else, kept verbatim.
    Text(String),
}

impl ResponseBody {
    /// Builds a body from the raw `Content-Type` header and payload.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation when the content type claims JSON but
    /// the payload does not parse.
    pub fn from_parts(content_type: Option<&str>, raw: &str) -> HarnessResult<Self> {
        let is_json = content_type.is_some_and(|ct| ct.contains("application/json"));
        if !is_json || raw.trim().is_empty() {
            return Ok(Self::Text(raw.to_owned()));
        }
        serde_json::from_str(raw)
            .map(Self::Json)
            .map_err(|e| HarnessError::protocol_violation(format!("malformed JSON body: {e}")))
    }

    /// Returns the JSON value, if this is a JSON body.
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    /// Returns the text, if this is a text body.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Json(_) => None,
            Self::Text(text) => Some(text),
        }
    }

    /// Looks up a string field of a JSON object body.
    #[must_use]
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.as_json()?.get(name)?.as_str()
    }
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Typed body.
    pub body: ResponseBody,
}

impl HttpResponse {
    /// Reads a reqwest response to completion.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the body cannot be read, or a protocol
    /// violation for malformed JSON.
    pub async fn read(response: reqwest::Response) -> HarnessResult<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let raw = response.text().await?;
        let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        let body = ResponseBody::from_parts(content_type, &raw)?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// Returns the `Location` header, if present and valid UTF-8.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }
}

/// One simulated user agent with its own cookie jar.
#[derive(Clone)]
pub struct Session {
    jar: Arc<Jar>,
    client: reqwest::Client,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session with an empty cookie jar.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the HTTP client cannot be built.
    pub fn new(config: &HttpConfig) -> HarnessResult<Self> {
        let jar = Arc::new(Jar::default());
        let client = base_builder(config)
            .cookie_provider(Arc::clone(&jar))
            .build()?;
        Ok(Self { jar, client })
    }

    /// Returns the cookie header this session would send to `url`.
    #[must_use]
    pub fn cookies_for(&self, url: &Url) -> Option<String> {
        use reqwest::cookie::CookieStore;

        self.jar
            .cookies(url)
            .and_then(|value| value.to_str().ok().map(str::to_owned))
    }

    fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

fn base_builder(config: &HttpConfig) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .redirect(Policy::none())
        .timeout(config.timeout())
}

/// Client for the authorization server.
///
/// Paths are resolved relative to the auth server base URL and must not
/// start with a slash. Absolute URLs (for example a `loginUrl` pointing
/// elsewhere) are used as given.
#[derive(Debug, Clone)]
pub struct HttpSessionClient {
    base: Url,
    stateless: reqwest::Client,
    config: HttpConfig,
}

impl HttpSessionClient {
    /// Creates a client for the auth server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unparseable base URL, or a
    /// transport error if the HTTP client cannot be built.
    pub fn new(base_url: &str, config: HttpConfig) -> HarnessResult<Self> {
        let base = Url::parse(&ensure_slash(base_url))
            .map_err(|e| HarnessError::config(format!("invalid auth server url '{base_url}': {e}")))?;
        let stateless = base_builder(&config).build()?;
        Ok(Self {
            base,
            stateless,
            config,
        })
    }

    /// Auth server base URL (always ends with a slash).
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Starts a fresh user-agent session.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the HTTP client cannot be built.
    pub fn new_session(&self) -> HarnessResult<Session> {
        Session::new(&self.config)
    }

    /// Resolves an auth-server path or absolute URL.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation if the result is not a valid URL.
    pub fn resolve(&self, path: &str) -> HarnessResult<Url> {
        match Url::parse(path) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .base
                .join(path.trim_start_matches('/'))
                .map_err(|e| HarnessError::protocol_violation(format!("bad path '{path}': {e}"))),
            Err(e) => Err(HarnessError::protocol_violation(format!(
                "bad url '{path}': {e}"
            ))),
        }
    }

    /// Sends a GET to the auth server.
    ///
    /// # Errors
    ///
    /// Returns a transport error on network failure.
    pub async fn get(&self, session: Option<&Session>, path: &str) -> HarnessResult<HttpResponse> {
        let url = self.resolve(path)?;
        let request = self.client_for(session).get(url);
        self.send(Method::GET, path, request).await
    }

    /// Sends a JSON POST to the auth server.
    ///
    /// # Errors
    ///
    /// Returns a transport error on network failure.
    pub async fn post(
        &self,
        session: Option<&Session>,
        path: &str,
        body: &Value,
    ) -> HarnessResult<HttpResponse> {
        let url = self.resolve(path)?;
        let request = self.client_for(session).post(url).json(body);
        self.send(Method::POST, path, request).await
    }

    fn client_for<'a>(&'a self, session: Option<&'a Session>) -> &'a reqwest::Client {
        session.map_or(&self.stateless, Session::client)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        request: RequestBuilder,
    ) -> HarnessResult<HttpResponse> {
        let correlation_id = create_random_id();
        if self.config.log_correlation_ids {
            info!(%method, path, correlation_id = %correlation_id, "auth server request");
        } else {
            debug!(%method, path, correlation_id = %correlation_id, "auth server request");
        }

        let response = request
            .header(ACCEPT, "application/json")
            .header(CORRELATION_HEADER, &correlation_id)
            .send()
            .await?;
        let response = HttpResponse::read(response).await?;
        debug!(status = response.status.as_u16(), correlation_id = %correlation_id, "auth server response");
        Ok(response)
    }
}
