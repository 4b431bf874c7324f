//! Configuration types for the harness.
//!
//! Configuration is read from an optional TOML file and then overridden by
//! command-line flags and environment variables in the binary. Every field
//! has a default matching a stock local portal deployment, so an empty file
//! is a valid configuration.
//!
//! ```toml
//! external_api_url = "https://api.portal.local"
//!
//! [directory]
//! url = "http://portal-api:3001"
//!
//! [poller]
//! max_attempts = 60
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// Top-level harness configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Public base URL of the API gateway fronting the auth server and
    /// protected APIs.
    pub external_api_url: String,

    /// Management API settings.
    pub directory: DirectoryConfig,

    /// Which auth server and auth method the flows run against.
    pub auth_server: AuthServerConfig,

    /// Naming and wiring of the fixture set.
    pub fixtures: FixtureConfig,

    /// Convergence polling parameters.
    pub poller: PollerConfig,

    /// Outbound HTTP settings.
    pub http: HttpConfig,
}

impl HarnessConfig {
    /// Loads configuration from a TOML file.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file exists but cannot be read
    /// or parsed.
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| {
            HarnessError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns a configuration error on malformed TOML or unknown types.
    pub fn from_toml(content: &str) -> HarnessResult<Self> {
        toml::from_str(content).map_err(|e| HarnessError::config(e.to_string()))
    }

    /// Checks that required values are present and limits are sane.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first problem found.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.external_api_url.is_empty() {
            return Err(HarnessError::config("external_api_url is not set"));
        }
        if self.directory.url.is_empty() {
            return Err(HarnessError::config("directory.url is not set"));
        }
        if self.poller.max_attempts == 0 {
            return Err(HarnessError::config("poller.max_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Management (directory) API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Base URL of the management API.
    pub url: String,

    /// Optional user id sent as `X-UserId` on every management call.
    pub user_id: Option<String>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3001".to_owned(),
            user_id: None,
        }
    }
}

/// Auth server selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthServerConfig {
    /// Auth server name as registered in the directory.
    pub name: String,

    /// Auth method path segment preceding `/api/{apiId}/...`.
    pub auth_method: String,
}

impl Default for AuthServerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            auth_method: "local".to_owned(),
        }
    }
}

/// Fixture naming and wiring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    /// Base id; the four applications are `<app_id>-trusted` and so on.
    pub app_id: String,

    /// Redirect URI registered on every variant that has one.
    pub redirect_uri: String,

    /// API the subscriptions are made against.
    pub api_id: String,

    /// Webhook listener whose queue signals adapter convergence.
    pub adapter_listener: String,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            app_id: "oauth2-test".to_owned(),
            redirect_uri: "https://portal.local/callback".to_owned(),
            api_id: "echo".to_owned(),
            adapter_listener: "kong-adapter".to_owned(),
        }
    }
}

/// Convergence polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Delay before the first poll, giving the change event time to be queued.
    pub initial_delay_ms: u64,

    /// Delay between polls.
    pub interval_ms: u64,

    /// Polls performed before giving up.
    pub max_attempts: u32,

    /// Attempt count above which a successful drain is reported as slow.
    pub slow_threshold: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250,
            interval_ms: 250,
            max_attempts: 40,
            slow_threshold: 7,
        }
    }
}

impl PollerConfig {
    /// Delay before the first poll.
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Delay between polls.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Outbound HTTP settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout.
    pub timeout_secs: u64,

    /// Log every auth-server call with its correlation id.
    pub log_correlation_ids: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            log_correlation_ids: false,
        }
    }
}

impl HttpConfig {
    /// Per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
