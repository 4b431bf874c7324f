//! Memoized endpoint lookups.
//!
//! The auth server URL and the public URL of each API are derived from
//! directory configuration that does not change while the harness runs, so
//! each is looked up once. First population goes through a
//! [`tokio::sync::OnceCell`], which serializes concurrent first callers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;
use tracing::debug;

use super::DirectoryService;
use crate::error::{HarnessError, HarnessResult};
use crate::util::join_base_path;

/// Resolves and caches gateway URLs.
#[derive(Debug)]
pub struct EndpointResolver<D> {
    directory: D,
    auth_server_name: String,
    auth_server_url: OnceCell<String>,
    api_urls: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
}

impl<D: DirectoryService> EndpointResolver<D> {
    /// Creates a resolver for the named auth server.
    #[must_use]
    pub fn new(directory: D, auth_server_name: impl Into<String>) -> Self {
        Self {
            directory,
            auth_server_name: auth_server_name.into(),
            auth_server_url: OnceCell::new(),
            api_urls: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the directory the resolver reads from.
    #[must_use]
    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Public base URL of the auth server, with a trailing slash.
    ///
    /// # Errors
    ///
    /// Returns the directory error of the first failed lookup, or a
    /// protocol violation if the auth server has no public path. Failed
    /// lookups are not cached.
    pub async fn auth_server_url(&self) -> HarnessResult<String> {
        let url = self
            .auth_server_url
            .get_or_try_init(|| async {
                let server = self.directory.get_auth_server(&self.auth_server_name).await?;
                let path = server
                    .config
                    .first_uri(&format!("auth server {}", self.auth_server_name))?;
                let url = join_base_path(self.directory.external_api_url(), path);
                debug!(url = %url, "Resolved auth server url");
                Ok::<_, HarnessError>(url)
            })
            .await?;
        Ok(url.clone())
    }

    /// Public base URL of an API, with a trailing slash.
    ///
    /// # Errors
    ///
    /// Returns the directory error of the lookup, or a protocol violation if
    /// the API has no public path.
    pub async fn api_url(&self, api_id: &str) -> HarnessResult<String> {
        let cell = {
            let mut urls = self.api_urls.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(urls.entry(api_id.to_owned()).or_default())
        };
        let url = cell
            .get_or_try_init(|| async {
                let config = self.directory.get_api_config(api_id).await?;
                let path = config.first_uri(&format!("api {api_id}"))?;
                let url = join_base_path(self.directory.external_api_url(), path);
                debug!(api_id, url = %url, "Resolved api url");
                Ok::<_, HarnessError>(url)
            })
            .await?;
        Ok(url.clone())
    }
}
