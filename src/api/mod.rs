//! Client for APIs protected by the gateway.
//!
//! Once a scenario holds an access token, it calls the protected API through
//! the gateway with `Authorization: Bearer <token>`. The base URL of each API
//! is looked up once through the [`EndpointResolver`].

use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::directory::resolver::EndpointResolver;
use crate::directory::DirectoryService;
use crate::error::{HarnessError, HarnessResult};
use crate::http::{HttpResponse, CORRELATION_HEADER};
use crate::types::HttpConfig;
use crate::util::create_random_id;

/// Calls protected APIs with a bearer token.
#[derive(Debug)]
pub struct ProtectedApiClient<D> {
    resolver: EndpointResolver<D>,
    client: reqwest::Client,
}

impl<D: DirectoryService> ProtectedApiClient<D> {
    /// Creates a client resolving API URLs through `resolver`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the HTTP client cannot be built.
    pub fn new(resolver: EndpointResolver<D>, config: &HttpConfig) -> HarnessResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.timeout())
            .build()?;
        Ok(Self { resolver, client })
    }

    /// Returns the endpoint resolver.
    #[must_use]
    pub fn resolver(&self) -> &EndpointResolver<D> {
        &self.resolver
    }

    /// Sends a request to `path` below the public URL of `api_id`.
    ///
    /// Non-2xx replies are returned, not turned into errors, so scenarios
    /// can assert on rejected tokens.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error, a protocol violation for a bad path or
    /// malformed JSON reply, or a transport error.
    pub async fn call_api(
        &self,
        api_id: &str,
        access_token: &SecretString,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> HarnessResult<HttpResponse> {
        let base = self.resolver.api_url(api_id).await?;
        let url = Url::parse(&base)
            .and_then(|base| base.join(path.trim_start_matches('/')))
            .map_err(|e| {
                HarnessError::protocol_violation(format!("bad api path '{path}' for {api_id}: {e}"))
            })?;

        let correlation_id = create_random_id();
        debug!(%method, url = %url, correlation_id = %correlation_id, "api request");

        let mut request = self
            .client
            .request(method, url)
            .header(ACCEPT, "application/json")
            .header(CORRELATION_HEADER, &correlation_id)
            .header(
                AUTHORIZATION,
                format!("Bearer {}", access_token.expose_secret()),
            );
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = HttpResponse::read(request.send().await?).await?;
        debug!(status = response.status.as_u16(), correlation_id = %correlation_id, "api response");
        Ok(response)
    }
}
