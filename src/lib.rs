//! OAuth Harness - black-box test harness for an OAuth2 authorization server
//!
//! Drives the authorization-code and password grants the way a browser and an
//! API client would, provisions the users and client applications those flows
//! need through the directory service, and waits for the gateway adapter to
//! pick up every change before a scenario asserts.
//!
//! This library exposes the building blocks so scenario suites can compose
//! them freely.

pub mod api;
pub mod auth;
pub mod directory;
pub mod error;
pub mod fixtures;
pub mod http;
pub mod poller;
pub mod types;
pub mod util;

// Re-export core types for convenient access
pub use auth::flow::OAuthFlowSimulator;
pub use auth::{ClientRegistration, Token, UserCredentials};
pub use error::{HarnessError, HarnessResult};
pub use fixtures::{ClientVariant, FixtureOrchestrator, FixtureSet, Identity};
pub use http::{HttpResponse, HttpSessionClient, ResponseBody, Session};
pub use poller::{ConsistencyPoller, PollOutcome, QueueProbe};
pub use types::HarnessConfig;
