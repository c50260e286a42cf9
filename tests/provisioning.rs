use std::sync::atomic::Ordering;
use toolhost::model::ToolboxStatus;
use toolhost::services::status_view::ToolboxStatusView;

mod common;
use common::{Harness, ADDRESS, OWNER};

#[tokio::test]
async fn provision_creates_one_host_and_reconciles_to_active() {
    let h = Harness::new();
    h.seed_keys(OWNER);

    let record = h
        .provisioner
        .provision(OWNER, &Harness::config("dev"))
        .await
        .expect("provision accepted");

    // The synchronous test harness runs the creation task inline, so the
    // record is already past pending_creation.
    assert_eq!(h.status_of(record.id), ToolboxStatus::Creating);
    assert_eq!(h.provider.create_calls.load(Ordering::SeqCst), 1);
    let stored = h.store.require_toolbox(record.id).unwrap();
    assert_eq!(stored.host_id.as_deref(), Some("host-42"));
    assert_eq!(stored.public_address.as_deref(), Some(ADDRESS));

    h.agent.push_report(vec![]).await;
    h.reconciler.reconcile_once(record.id).await.unwrap();
    assert_eq!(h.status_of(record.id), ToolboxStatus::Active);
    let stored = h.store.require_toolbox(record.id).unwrap();
    assert!(stored.last_heartbeat_at.is_some());
}

#[tokio::test]
async fn provision_is_idempotent_while_a_record_is_in_flight() {
    let h = Harness::new();
    h.seed_keys(OWNER);

    let first = h
        .provisioner
        .provision(OWNER, &Harness::config("dev"))
        .await
        .unwrap();
    let second = h
        .provisioner
        .provision(OWNER, &Harness::config("dev"))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(h.provider.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_provisions_converge_on_one_record_and_one_host() {
    let h = Harness::new();
    // Keys are deliberately not seeded: key generation yields between the
    // idempotency check and the insert, which is where racers interleave.
    let config = Harness::config("dev");

    let (a, b) = tokio::join!(
        h.provisioner.provision(OWNER, &config),
        h.provisioner.provision(OWNER, &config)
    );
    let a = a.expect("first caller accepted");
    let b = b.expect("second caller accepted");

    assert_eq!(a.id, b.id, "both callers must see the same record");
    assert_eq!(h.provider.create_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.list_toolboxes(OWNER).unwrap().len(), 1);
}

#[tokio::test]
async fn same_name_different_owner_gets_its_own_host() {
    let h = Harness::new();
    h.seed_keys(OWNER);
    h.seed_keys("user-2");

    let a = h
        .provisioner
        .provision(OWNER, &Harness::config("dev"))
        .await
        .unwrap();
    let b = h
        .provisioner
        .provision("user-2", &Harness::config("dev"))
        .await
        .unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!(h.provider.create_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn provider_failure_keeps_raw_detail_on_the_record_but_not_in_the_view() {
    let h = Harness::new();
    h.seed_keys(OWNER);
    h.provider.fail_create.store(true, Ordering::SeqCst);

    let record = h
        .provisioner
        .provision(OWNER, &Harness::config("dev"))
        .await
        .unwrap();

    assert_eq!(h.status_of(record.id), ToolboxStatus::ErrorCreation);
    let stored = h.store.require_toolbox(record.id).unwrap();
    // Operators get the raw provider detail on the record itself.
    let message = stored
        .provisioning_error_message
        .clone()
        .expect("message recorded");
    assert!(message.contains("stack trace"));

    // The user-facing view carries only the plain-language category.
    let view = ToolboxStatusView::from_record(&stored, &[]);
    assert_eq!(view.error, Some("Something went wrong on our side."));
    let rendered = serde_json::to_string(&view).unwrap();
    assert!(!rendered.contains("stack trace"));
    assert!(!rendered.contains("account ids"));

    // Failed creations are never retried by a repeat call; the in-flight
    // record is returned as-is.
    let again = h
        .provisioner
        .provision(OWNER, &Harness::config("dev"))
        .await
        .unwrap();
    assert_eq!(again.id, record.id);
    assert_eq!(h.provider.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalid_config_is_rejected_before_any_record_exists() {
    let h = Harness::new();
    let mut config = Harness::config("dev");
    config.region = "mars-1".to_string();

    let err = h.provisioner.provision(OWNER, &config).await.unwrap_err();
    assert_eq!(err.code, "INVALID_PARAMS");
    assert_eq!(h.provider.create_calls.load(Ordering::SeqCst), 0);
    assert!(h.store.find_non_terminal(OWNER, "dev").unwrap().is_none());
}

#[tokio::test]
async fn deprovision_walks_to_deprovisioned_and_repeats_as_noop() {
    let h = Harness::new();
    h.seed_keys(OWNER);
    let record = h
        .provisioner
        .provision(OWNER, &Harness::config("dev"))
        .await
        .unwrap();
    h.agent.push_report(vec![common::tool("redis", "running")]).await;
    h.reconciler.reconcile_once(record.id).await.unwrap();
    assert_eq!(h.status_of(record.id), ToolboxStatus::Active);
    assert_eq!(h.store.list_instances(record.id).unwrap().len(), 1);

    h.provisioner.deprovision(OWNER, record.id).await.unwrap();
    assert_eq!(h.status_of(record.id), ToolboxStatus::Deprovisioned);
    assert_eq!(h.provider.delete_calls.load(Ordering::SeqCst), 1);
    // Cached instances go with the toolbox.
    assert!(h.store.list_instances(record.id).unwrap().is_empty());

    // Second call is a no-op, not an error, and calls the provider again
    // exactly zero times.
    let again = h.provisioner.deprovision(OWNER, record.id).await.unwrap();
    assert_eq!(again.status, ToolboxStatus::Deprovisioned);
    assert_eq!(h.provider.delete_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn deprovision_is_rejected_while_creation_is_in_flight() {
    let h = Harness::new();
    h.seed_keys(OWNER);
    let record = h
        .provisioner
        .provision(OWNER, &Harness::config("dev"))
        .await
        .unwrap();
    assert_eq!(h.status_of(record.id), ToolboxStatus::Creating);

    let err = h
        .provisioner
        .deprovision(OWNER, record.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, "CONFLICT");
}

#[tokio::test]
async fn deprovision_requires_the_owning_principal() {
    let h = Harness::new();
    h.seed_keys(OWNER);
    let record = h
        .provisioner
        .provision(OWNER, &Harness::config("dev"))
        .await
        .unwrap();

    let err = h
        .provisioner
        .deprovision("someone-else", record.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, "DENIED");
}

#[tokio::test]
async fn failed_teardown_lands_in_error_deprovisioning_and_can_retry() {
    let h = Harness::new();
    h.seed_keys(OWNER);
    let record = h
        .provisioner
        .provision(OWNER, &Harness::config("dev"))
        .await
        .unwrap();
    h.agent.push_report(vec![]).await;
    h.reconciler.reconcile_once(record.id).await.unwrap();

    h.provider.fail_delete.store(true, Ordering::SeqCst);
    h.provisioner.deprovision(OWNER, record.id).await.unwrap();
    assert_eq!(h.status_of(record.id), ToolboxStatus::ErrorDeprovisioning);

    // The error state accepts another deprovision attempt.
    h.provider.fail_delete.store(false, Ordering::SeqCst);
    h.provisioner.deprovision(OWNER, record.id).await.unwrap();
    assert_eq!(h.status_of(record.id), ToolboxStatus::Deprovisioned);
}
