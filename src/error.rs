//! Centralized error types for the harness.
//!
//! Every fallible operation in the crate returns [`HarnessError`]. The
//! variants mirror the failure classes a scenario needs to tell apart:
//!
//! - transport failures (connection, DNS, timeouts), never retried
//! - protocol violations, where a response does not match the OAuth2 or
//!   management API contract
//! - rejected logins and grants, the expected outcome of negative-path
//!   scenarios
//! - convergence timeouts from the queue poller
//! - "not found" answers from the directory service, which teardown
//!   collapses to success
//!
//! # Example
//!
//! ```
//! use oauth_harness::error::{HarnessError, HarnessResult};
//!
//! fn require_code(code: Option<&str>) -> HarnessResult<String> {
//!     code.map(str::to_owned)
//!         .ok_or_else(|| HarnessError::protocol_violation("redirect carried no code"))
//! }
//!
//! let err = require_code(None).unwrap_err();
//! assert!(err.is_protocol_violation());
//! ```

use thiserror::Error;

/// Result type alias using `HarnessError`.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Centralized error type for the harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    // ============== Transport Errors ==============
    /// Network-level failure talking to a remote service.
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    // ============== Contract Errors ==============
    /// A response did not have the shape the OAuth2 or management contract requires.
    #[error("protocol violation: {message}")]
    ProtocolViolation {
        /// What was wrong with the response.
        message: String,
    },

    /// A login or grant was refused by the authorization server.
    #[error("authentication rejected with status {status}")]
    AuthenticationRejected {
        /// HTTP status returned by the server.
        status: u16,
        /// Response body, kept for assertions and diagnostics.
        body: String,
    },

    // ============== Convergence Errors ==============
    /// The downstream queue did not drain within the attempt cap.
    #[error("queue did not drain after {attempts} attempts")]
    ConvergenceTimeout {
        /// Number of polls performed.
        attempts: u32,
    },

    // ============== Directory Errors ==============
    /// The directory service has no such resource.
    #[error("not found: {resource}")]
    NotFound {
        /// The resource that was looked up.
        resource: String,
    },

    /// The directory service answered with an unexpected error status.
    #[error("directory service returned {status}: {message}")]
    Directory {
        /// HTTP status returned by the service.
        status: u16,
        /// Response body or description.
        message: String,
    },

    // ============== Configuration Errors ==============
    /// Invalid or incomplete harness configuration.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
}

// ============== Constructor Methods ==============

impl HarnessError {
    /// Creates a protocol violation error.
    #[must_use]
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Creates an authentication rejected error.
    #[must_use]
    pub fn authentication_rejected(status: u16, body: impl Into<String>) -> Self {
        Self::AuthenticationRejected {
            status,
            body: body.into(),
        }
    }

    /// Creates a convergence timeout error.
    #[must_use]
    pub fn convergence_timeout(attempts: u32) -> Self {
        Self::ConvergenceTimeout { attempts }
    }

    /// Creates a not found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Creates a directory service error.
    #[must_use]
    pub fn directory(status: u16, message: impl Into<String>) -> Self {
        Self::Directory {
            status,
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

// ============== Category Methods ==============

impl HarnessError {
    /// Returns `true` for the directory's "not found" answer.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if a response broke the expected contract.
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }

    /// Returns `true` if the server refused a login or grant.
    #[must_use]
    pub fn is_authentication_rejected(&self) -> bool {
        matches!(self, Self::AuthenticationRejected { .. })
    }

    /// Returns `true` if the poller gave up waiting.
    #[must_use]
    pub fn is_convergence_timeout(&self) -> bool {
        matches!(self, Self::ConvergenceTimeout { .. })
    }

    /// Returns the failure class, used as a structured log field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::ProtocolViolation { .. } => "protocol",
            Self::AuthenticationRejected { .. } => "authentication",
            Self::ConvergenceTimeout { .. } => "convergence",
            Self::NotFound { .. } | Self::Directory { .. } => "directory",
            Self::Config { .. } => "config",
        }
    }
}
