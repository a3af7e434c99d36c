//! Provisioning orchestration against a scripted provider adapter

use keel_provision::{
    ProviderKind, ProviderRegistry, ProvisioningOptions, ProvisioningOrchestrator, ResourceStatus,
};
use keel_test_utils::{init_tracing, RegionScript, ScriptedAdapter};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn setup() -> (Arc<ScriptedAdapter>, ProvisioningOrchestrator) {
    init_tracing();
    let adapter = Arc::new(ScriptedAdapter::new(
        ProviderKind::Neon,
        "us-east-1",
        vec!["us-east-2", "us-west-2"],
    ));
    let registry = ProviderRegistry::new().with_adapter(adapter.clone());
    (adapter, ProvisioningOrchestrator::new(registry))
}

fn options(name: &str) -> ProvisioningOptions {
    ProvisioningOptions::new(name, ProviderKind::Neon)
}

#[tokio::test]
async fn first_try_success_in_primary_region() {
    let (adapter, orchestrator) = setup();

    let result = orchestrator.provision(&options("acme-app")).await;

    assert!(result.success, "{:?}", result.error);
    assert!(result.invariant_holds());
    assert!(result.warnings.is_empty());
    let creds = result.credentials.unwrap();
    assert!(creds.validate().is_ok());
    assert_eq!(creds.password.len(), 24);

    let calls = adapter.provision_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].region, "us-east-1");
}

#[tokio::test]
async fn existing_name_blocks_provisioning_case_insensitively() {
    let (adapter, orchestrator) = setup();
    adapter.add_existing("proj-42", "Acme-App");

    let result = orchestrator.provision(&options("acme-app")).await;

    assert!(!result.success);
    assert!(result.invariant_holds());
    let error = result.error.unwrap();
    assert!(error.contains("proj-42"));
    assert!(error.contains("manual action required"));
    // Idempotency: no creation attempt was made at all.
    assert!(adapter.provision_calls().is_empty());
}

#[tokio::test]
async fn transient_primary_failure_fails_over_with_warning() {
    let (adapter, orchestrator) = setup();
    adapter.script_region(
        "us-east-1",
        RegionScript::Fail("region is at capacity".into()),
    );

    let result = orchestrator.provision(&options("acme-app")).await;

    assert!(result.success, "{:?}", result.error);
    let creds = result.credentials.unwrap();
    assert!(creds.host.contains("us-east-2"));
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("failed over to us-east-2"));

    // One generated password, reused verbatim across attempts.
    let calls = adapter.provision_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].name, calls[1].name);
    assert_eq!(calls[0].password, calls[1].password);
    assert_eq!(creds.password, calls[0].password);
}

#[tokio::test]
async fn all_regions_exhausted_reports_every_region() {
    let (adapter, orchestrator) = setup();
    for region in ["us-east-1", "us-east-2", "us-west-2"] {
        adapter.script_region(region, RegionScript::Fail("no available instances".into()));
    }

    let result = orchestrator.provision(&options("acme-app")).await;

    assert!(!result.success);
    assert!(result.invariant_holds());
    assert!(result.resource_id.is_none());
    let error = result.error.unwrap();
    assert!(error.contains("us-east-1"));
    assert!(error.contains("us-west-2"));
    assert!(error.contains("retry is safe"));
    assert_eq!(adapter.provision_calls().len(), 3);
}

#[tokio::test]
async fn fatal_error_aborts_without_failover() {
    let (adapter, orchestrator) = setup();
    adapter.script_region("us-east-1", RegionScript::Fail("invalid api key".into()));

    let result = orchestrator.provision(&options("acme-app")).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("invalid api key"));
    assert!(error.contains("manual action required"));
    // Fatal means no other region is tried.
    assert_eq!(adapter.provision_calls().len(), 1);
}

#[tokio::test]
async fn requested_region_leads_the_failover_chain() {
    let (adapter, orchestrator) = setup();
    adapter.script_region("us-west-2", RegionScript::Fail("503 unavailable".into()));

    let result = orchestrator
        .provision(&options("acme-app").with_region("us-west-2"))
        .await;

    assert!(result.success, "{:?}", result.error);
    let calls = adapter.provision_calls();
    assert_eq!(calls[0].region, "us-west-2");
    // Falls back to the adapter's preference list, skipping the primary.
    assert_eq!(calls[1].region, "us-east-2");
}

#[tokio::test]
async fn readiness_timeout_is_a_warning_not_a_failure() {
    let (adapter, orchestrator) = setup();
    adapter.script_statuses(vec![ResourceStatus::Initializing; 200]);

    let result = orchestrator.provision(&options("acme-app")).await;

    assert!(result.success, "{:?}", result.error);
    assert!(result.credentials.is_some());
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("did not report ready"));
}

#[tokio::test]
async fn failed_status_during_initialization_is_a_warning() {
    let (adapter, orchestrator) = setup();
    adapter.script_statuses(vec![ResourceStatus::Failed {
        reason: "compute stuck".into(),
    }]);

    let result = orchestrator.provision(&options("acme-app")).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("compute stuck"));
}

#[tokio::test]
async fn transient_poll_errors_do_not_fail_readiness() {
    let (adapter, orchestrator) = setup();
    // A couple of flaky polls, then the resource reports ready.
    adapter.script_statuses(vec![
        ResourceStatus::Initializing,
        ResourceStatus::Initializing,
        ResourceStatus::Ready,
    ]);

    let result = orchestrator.provision(&options("acme-app")).await;

    assert!(result.success, "{:?}", result.error);
    assert!(result.warnings.is_empty());
}

#[tokio::test]
async fn unregistered_provider_fails_with_guidance() {
    let (_adapter, orchestrator) = setup();

    let result = orchestrator
        .provision(&ProvisioningOptions::new("acme-app", ProviderKind::Supabase))
        .await;

    assert!(!result.success);
    assert!(result.invariant_holds());
    let error = result.error.unwrap();
    assert!(error.contains("not configured"));
    assert!(error.contains("manual action required"));
}

#[tokio::test]
async fn listing_failure_is_reported_as_retry_safe() {
    let (adapter, orchestrator) = setup();
    adapter.fail_listing("connection reset by peer");

    let result = orchestrator.provision(&options("acme-app")).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("retry is safe"));
    assert!(adapter.provision_calls().is_empty());
}
