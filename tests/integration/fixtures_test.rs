//! Integration tests for the fixture orchestrator.

use std::time::Duration;

use oauth_harness::directory::Plan;
use oauth_harness::types::{FixtureConfig, PollerConfig};
use oauth_harness::{ClientVariant, ConsistencyPoller, FixtureOrchestrator, Identity};
use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;

use crate::common::{fast_poller, FakeDirectory};

fn orchestrator(directory: &FakeDirectory) -> FixtureOrchestrator<FakeDirectory> {
    FixtureOrchestrator::new(directory.clone(), FixtureConfig::default(), fast_poller(10))
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn test_teardown_on_empty_directory_succeeds() {
    let directory = FakeDirectory::new("https://api.portal.local");
    let fixtures = orchestrator(&directory);

    fixtures.teardown().await.unwrap();
    fixtures.teardown().await.unwrap();

    assert_eq!(directory.user_count(), 0);
    assert_eq!(directory.app_count(), 0);
}

#[tokio::test]
async fn test_teardown_removes_everything_setup_created() {
    let directory = FakeDirectory::new("https://api.portal.local");
    let fixtures = orchestrator(&directory);

    fixtures.setup().await.unwrap();
    assert_eq!(directory.user_count(), 2);
    assert_eq!(directory.app_count(), 4);

    fixtures.teardown().await.unwrap();
    assert_eq!(directory.user_count(), 0);
    assert_eq!(directory.app_count(), 0);
    assert_eq!(directory.pending_events(), 0);
}

#[tokio::test]
async fn test_teardown_leaves_unrelated_data_alone() {
    let directory = FakeDirectory::new("https://api.portal.local");
    directory.insert_raw_user("someone@else.com");
    directory.insert_raw_application("other-app");

    orchestrator(&directory).teardown().await.unwrap();

    assert_eq!(directory.user_emails(), vec!["someone@else.com"]);
    assert!(directory.application("other-app").is_some());
}

#[tokio::test]
async fn test_ambiguous_email_is_protocol_violation() {
    let directory = FakeDirectory::new("https://api.portal.local");
    directory.insert_raw_user("normal@user.com");
    directory.insert_raw_user("normal@user.com");

    let err = orchestrator(&directory).teardown().await.unwrap_err();
    assert!(err.is_protocol_violation());
}

// ============================================================================
// Setup
// ============================================================================

#[tokio::test]
async fn test_setup_twice_yields_equivalent_sets() {
    let directory = FakeDirectory::new("https://api.portal.local");
    let fixtures = orchestrator(&directory);

    let first = fixtures.setup().await.unwrap();
    let second = fixtures.setup().await.unwrap();

    assert_eq!(directory.user_count(), 2);
    assert_eq!(directory.app_count(), 4);
    for variant in ClientVariant::ALL {
        assert_eq!(
            first.client(variant).client_id,
            second.client(variant).client_id
        );
        assert_eq!(
            first.client(variant).redirect_uri,
            second.client(variant).redirect_uri
        );
    }
    assert_eq!(first.users.normal.email, second.users.normal.email);
    assert_ne!(first.users.normal.id, second.users.normal.id);
}

#[tokio::test]
async fn test_setup_replaces_stale_fixtures() {
    let directory = FakeDirectory::new("https://api.portal.local");
    directory.insert_raw_application("oauth2-test-trusted");
    directory.insert_raw_user("admin@user.com");

    let set = orchestrator(&directory).setup().await.unwrap();

    assert_eq!(directory.app_count(), 4);
    assert_eq!(
        directory.user_emails(),
        vec!["admin@user.com", "normal@user.com"]
    );
    let trusted = directory.application("oauth2-test-trusted").unwrap();
    assert_eq!(
        trusted.redirect_uri.as_deref(),
        set.trusted.redirect_uri.as_deref()
    );
}

#[tokio::test]
async fn test_client_variants_match_matrix() {
    let directory = FakeDirectory::new("https://api.portal.local");
    let set = orchestrator(&directory).setup().await.unwrap();

    for variant in ClientVariant::ALL {
        let app_id = variant.app_id("oauth2-test");
        let app = directory.application(&app_id).unwrap();
        assert_eq!(app.confidential, variant.is_confidential(), "{variant}");
        assert_eq!(app.redirect_uri.is_some(), variant.has_redirect_uri(), "{variant}");

        let subscriptions = directory.subscriptions(&app_id);
        assert_eq!(subscriptions.len(), 1);
        assert_eq!(subscriptions[0].api, "echo");
        assert_eq!(subscriptions[0].auth, "oauth2");
        assert_eq!(subscriptions[0].plan, "basic");
        assert_eq!(subscriptions[0].trusted, variant.is_trusted(), "{variant}");

        let client = set.client(variant);
        assert_eq!(client.client_id, format!("client-{app_id}"));
        assert_eq!(client.client_secret().is_some(), variant.is_confidential());
    }
    assert!(set.without_uri.redirect_uri.is_none());
    assert_eq!(
        set.public.redirect_uri.as_deref(),
        Some("https://portal.local/callback")
    );
}

#[tokio::test]
async fn test_users_keep_their_passwords() {
    let directory = FakeDirectory::new("https://api.portal.local");
    let set = orchestrator(&directory).setup().await.unwrap();

    let normal = set.users.get(Identity::Normal);
    assert!(normal.id.is_some());
    assert_eq!(normal.password().expose_secret(), "normalwicked");
    assert_eq!(normal.groups, vec!["dev"]);

    let admin = set.users.get(Identity::Admin);
    assert_eq!(admin.password().expose_secret(), "adminwicked");
    assert_eq!(admin.groups, vec!["admin"]);
    assert!(admin.validated);
}

#[tokio::test]
async fn test_create_users_recreates_both() {
    let directory = FakeDirectory::new("https://api.portal.local");
    let fixtures = orchestrator(&directory);

    let first = fixtures.create_users().await.unwrap();
    let second = fixtures.create_users().await.unwrap();

    assert_eq!(directory.user_count(), 2);
    assert_ne!(first.admin.id, second.admin.id);
}

#[tokio::test]
async fn test_default_plan_is_looked_up_once() {
    let directory = FakeDirectory::new("https://api.portal.local");
    let fixtures = orchestrator(&directory);

    fixtures.setup().await.unwrap();
    fixtures.setup().await.unwrap();

    assert_eq!(fixtures.default_plan_id().await.unwrap(), "basic");
    assert_eq!(directory.plan_lookups(), 1);
}

#[tokio::test]
async fn test_setup_fails_without_plans() {
    let directory = FakeDirectory::new("https://api.portal.local");
    directory.set_plans("echo", Vec::<Plan>::new());

    let err = orchestrator(&directory).setup().await.unwrap_err();
    assert!(err.is_protocol_violation());
    assert!(err.to_string().contains("echo"));
}

#[tokio::test]
async fn test_setup_surfaces_convergence_timeout() {
    let directory = FakeDirectory::new("https://api.portal.local");
    directory.stick_queue();
    let fixtures =
        FixtureOrchestrator::new(directory.clone(), FixtureConfig::default(), fast_poller(3));

    let err = fixtures.setup().await.unwrap_err();
    assert!(err.is_convergence_timeout());
    assert_eq!(directory.event_polls(), 3);
}

#[tokio::test]
async fn test_drain_reports_polls() {
    let directory = FakeDirectory::new("https://api.portal.local");
    let fixtures = orchestrator(&directory);

    assert_eq!(fixtures.drain().await.unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_setups_do_not_interleave() {
    let directory = FakeDirectory::new("https://api.portal.local");
    let fixtures = orchestrator(&directory);

    let (a, b) = tokio::join!(fixtures.setup(), fixtures.setup());

    a.unwrap();
    b.unwrap();
    assert_eq!(directory.user_count(), 2);
    assert_eq!(directory.app_count(), 4);
}

#[tokio::test]
async fn test_destroy_users_waits_for_running_setup() {
    let directory = FakeDirectory::new("https://api.portal.local");
    // Slow enough that the destroy call lands while setup is draining.
    let poller = ConsistencyPoller::new(PollerConfig {
        initial_delay_ms: 50,
        interval_ms: 50,
        max_attempts: 10,
        slow_threshold: 7,
    });
    let fixtures = FixtureOrchestrator::new(directory.clone(), FixtureConfig::default(), poller);

    let ((set, users_after_setup), destroyed) = tokio::join!(
        async {
            let set = fixtures.setup().await;
            (set, directory.user_count())
        },
        async {
            tokio::time::sleep(Duration::from_millis(125)).await;
            fixtures.destroy_users().await
        }
    );

    let set = set.unwrap();
    assert!(set.users.normal.id.is_some());
    assert_eq!(users_after_setup, 2);
    destroyed.unwrap();
    assert_eq!(directory.user_count(), 0);
}
