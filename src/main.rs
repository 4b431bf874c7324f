//! OAuth Harness - fixture and token tooling for an OAuth2 authorization server

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::Method;
use secrecy::ExposeSecret;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oauth_harness::api::ProtectedApiClient;
use oauth_harness::directory::resolver::EndpointResolver;
use oauth_harness::directory::rest::RestDirectoryClient;
use oauth_harness::{
    ClientVariant, ConsistencyPoller, FixtureOrchestrator, FixtureSet, HarnessConfig,
    HttpSessionClient, Identity, OAuthFlowSimulator, Token,
};

#[derive(Parser, Debug)]
#[command(name = "oauth-harness")]
#[command(about = "OAuth Harness - fixtures and token flows against an OAuth2 authorization server")]
#[command(version)]
struct Args {
    /// Configuration file (TOML). Missing file means defaults.
    #[arg(long, value_name = "FILE", env = "HARNESS_CONFIG", default_value = "harness.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Management API base URL
    #[arg(long, env = "HARNESS_DIRECTORY_URL")]
    directory_url: Option<String>,

    /// Public API gateway base URL
    #[arg(long, env = "HARNESS_EXTERNAL_API_URL")]
    external_api_url: Option<String>,

    /// User id sent to the management API as X-UserId
    #[arg(long, env = "HARNESS_USER_ID")]
    user_id: Option<String>,

    /// Log every auth server request with its correlation id at info level
    #[arg(
        long,
        env = "OUTPUT_CORRELATION_IDS",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    log_correlation_ids: bool,

    /// Interval between queue polls (e.g. "250ms", "1s")
    #[arg(long, value_parser = humantime::parse_duration)]
    poll_interval: Option<Duration>,

    /// Maximum number of queue polls before giving up
    #[arg(long)]
    max_attempts: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recreate users and client applications, print the client ids.
    Setup,

    /// Remove every fixture.
    Teardown,

    /// Wait until the adapter has processed all pending events.
    Drain,

    /// Recreate fixtures and obtain a token for one client and user.
    Token {
        /// Client variant: trusted, confidential, public or withouturi
        #[arg(long, default_value = "trusted")]
        variant: ClientVariant,

        /// User identity: normal or admin
        #[arg(long, default_value = "normal")]
        user: Identity,

        /// Grant to run
        #[arg(long, value_enum, default_value_t = Grant::Code)]
        grant: Grant,

        /// Requested scope, may be repeated
        #[arg(long = "scope", value_name = "SCOPE")]
        scope: Vec<String>,

        /// Call this path on the fixture API with the token afterwards
        #[arg(long, value_name = "PATH")]
        call: Option<String>,

        /// Print tokens instead of redacting them
        #[arg(long)]
        show_secrets: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Grant {
    /// Authorization code grant through the login form
    Code,
    /// Resource owner password grant
    Password,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = load_config(&args)?;
    let directory =
        RestDirectoryClient::new(&config.directory, &config.external_api_url, &config.http)?;
    let orchestrator = FixtureOrchestrator::new(
        directory.clone(),
        config.fixtures.clone(),
        ConsistencyPoller::new(config.poller),
    );

    match args.command {
        Command::Setup => {
            let fixtures = orchestrator.setup().await?;
            print_fixtures(&fixtures);
        }
        Command::Teardown => {
            orchestrator.teardown().await?;
            println!("Fixtures removed.");
        }
        Command::Drain => {
            let attempts = orchestrator.drain().await?;
            println!("Queue drained after {attempts} poll(s).");
        }
        Command::Token {
            variant,
            user,
            grant,
            scope,
            call,
            show_secrets,
        } => {
            let fixtures = orchestrator.setup().await?;
            let api = ProtectedApiClient::new(
                EndpointResolver::new(directory, config.auth_server.name.as_str()),
                &config.http,
            )?;
            let auth_url = api.resolver().auth_server_url().await?;
            let flow = OAuthFlowSimulator::new(
                HttpSessionClient::new(&auth_url, config.http)?,
                config.auth_server.auth_method.as_str(),
            );

            let api_id = config.fixtures.api_id.as_str();
            let client = fixtures.client(variant);
            let user = fixtures.users.get(user);
            let scope: Vec<&str> = scope.iter().map(String::as_str).collect();

            let token = match grant {
                Grant::Code => {
                    let session = flow.new_session()?;
                    flow.get_authorization_code_token(&session, api_id, client, user, &scope)
                        .await?
                }
                Grant::Password => flow.get_password_token(api_id, client, user, &scope).await?,
            };
            print_token(&token, show_secrets);

            if let Some(path) = call {
                let response = api
                    .call_api(api_id, token.access_token(), Method::GET, &path, None)
                    .await?;
                println!("GET {path} -> {}", response.status);
                println!("{}", response.body);
            }
        }
    }

    Ok(())
}

/// Loads the config file and applies command-line and environment overrides.
fn load_config(args: &Args) -> Result<HarnessConfig> {
    let mut config = HarnessConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    if let Some(url) = &args.directory_url {
        config.directory.url.clone_from(url);
    }
    if let Some(url) = &args.external_api_url {
        config.external_api_url.clone_from(url);
    }
    if args.user_id.is_some() {
        config.directory.user_id.clone_from(&args.user_id);
    }
    if args.log_correlation_ids {
        config.http.log_correlation_ids = true;
    }
    if let Some(interval) = args.poll_interval {
        config.poller.interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    }
    if let Some(max_attempts) = args.max_attempts {
        config.poller.max_attempts = max_attempts;
    }

    config.validate()?;
    Ok(config)
}

fn print_fixtures(fixtures: &FixtureSet) {
    println!("Users:");
    for user in [&fixtures.users.normal, &fixtures.users.admin] {
        println!(
            "  {:<20} id={} groups={}",
            user.email,
            user.id.as_deref().unwrap_or("-"),
            user.groups.join(",")
        );
    }
    println!("Clients:");
    for variant in ClientVariant::ALL {
        let client = fixtures.client(variant);
        println!(
            "  {:<14} client_id={} secret={} redirect_uri={}",
            variant.suffix(),
            client.client_id,
            if client.client_secret().is_some() { "yes" } else { "no" },
            client.redirect_uri.as_deref().unwrap_or("-")
        );
    }
}

fn print_token(token: &Token, show_secrets: bool) {
    let reveal = |secret: &secrecy::SecretString| {
        if show_secrets {
            secret.expose_secret().to_owned()
        } else {
            "[REDACTED]".to_owned()
        }
    };
    println!("token_type:    {}", token.token_type());
    println!("access_token:  {}", reveal(token.access_token()));
    println!(
        "refresh_token: {}",
        token.refresh_token().map_or_else(|| "-".to_owned(), reveal)
    );
    println!("scope:         {}", token.scope().unwrap_or("-"));
    if let Some(expires_in) = token.expires_in() {
        println!("expires_in:    {expires_in}s");
    }
}
