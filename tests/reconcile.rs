use chrono::{Duration, Utc};
use toolhost::model::{InstanceStatus, ToolboxRecord, ToolboxStatus};
use uuid::Uuid;

mod common;
use common::{tool, Harness, ADDRESS, OWNER};

/// Insert a record directly in a given state, bypassing the provisioner.
fn seed_record(h: &Harness, status: ToolboxStatus, held_for: Duration) -> ToolboxRecord {
    let now = Utc::now();
    let record = ToolboxRecord {
        id: Uuid::new_v4(),
        owner_id: OWNER.to_string(),
        name: "dev".to_string(),
        region: "nyc3".to_string(),
        size_class: "s-1vcpu-1gb".to_string(),
        public_address: Some(ADDRESS.to_string()),
        host_id: Some("host-42".to_string()),
        agent_auth_token: "token".to_string(),
        status,
        status_changed_at: now - held_for,
        last_heartbeat_at: None,
        provisioning_error_message: None,
        created_at: now - held_for,
        updated_at: now,
    };
    h.store.insert_toolbox(&record).expect("insert record");
    record
}

#[tokio::test]
async fn instances_converge_to_the_agent_report() {
    let h = Harness::new();
    let record = seed_record(&h, ToolboxStatus::Active, Duration::seconds(5));

    h.agent
        .push_report(vec![tool("a", "running"), tool("c", "running")])
        .await;
    h.reconciler.reconcile_once(record.id).await.unwrap();

    // Next report: a still running, b appeared stopped, c is gone.
    h.agent
        .push_report(vec![tool("a", "running"), tool("b", "exited")])
        .await;
    h.reconciler.reconcile_once(record.id).await.unwrap();

    let rows = h.store.list_instances(record.id).unwrap();
    let summary: Vec<(String, InstanceStatus)> = rows
        .iter()
        .map(|r| (r.instance_name.clone(), r.status))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("a".to_string(), InstanceStatus::Running),
            ("b".to_string(), InstanceStatus::Stopped),
        ]
    );
}

#[tokio::test]
async fn active_toolbox_loses_and_regains_responsiveness() {
    let h = Harness::new();
    // Silent past the ceiling: the next failed poll demotes it.
    let record = seed_record(&h, ToolboxStatus::Active, Duration::minutes(11));

    h.agent.push_failure().await;
    h.reconciler.reconcile_once(record.id).await.unwrap();
    assert_eq!(h.status_of(record.id), ToolboxStatus::Unresponsive);

    h.agent.push_report(vec![]).await;
    h.reconciler.reconcile_once(record.id).await.unwrap();
    assert_eq!(h.status_of(record.id), ToolboxStatus::Active);
}

#[tokio::test]
async fn one_failed_poll_does_not_demote_a_fresh_active_toolbox() {
    let h = Harness::new();
    let record = seed_record(&h, ToolboxStatus::Active, Duration::seconds(30));

    h.agent.push_failure().await;
    h.reconciler.reconcile_once(record.id).await.unwrap();
    assert_eq!(
        h.status_of(record.id),
        ToolboxStatus::Active,
        "one failed poll well inside the ceiling must not mark unresponsive"
    );
}

#[tokio::test]
async fn a_recent_heartbeat_shields_a_long_held_active_status() {
    let h = Harness::new();
    let record = seed_record(&h, ToolboxStatus::Active, Duration::minutes(30));
    // The host answered seconds ago; silence is measured from contact,
    // not from when the status was entered.
    h.store.record_heartbeat(record.id, Utc::now()).unwrap();

    h.agent.push_failure().await;
    h.reconciler.reconcile_once(record.id).await.unwrap();
    assert_eq!(h.status_of(record.id), ToolboxStatus::Active);
}

#[tokio::test]
async fn creating_survives_poll_failures_until_the_ceiling() {
    let h = Harness::new();
    let record = seed_record(&h, ToolboxStatus::Creating, Duration::seconds(30));

    // Boot still in progress: failures keep the state.
    h.agent.push_failure().await;
    h.reconciler.reconcile_once(record.id).await.unwrap();
    assert_eq!(h.status_of(record.id), ToolboxStatus::Creating);
}

#[tokio::test]
async fn stuck_creating_escalates_to_error_after_the_ceiling() {
    let h = Harness::new();
    let record = seed_record(&h, ToolboxStatus::Creating, Duration::minutes(11));

    h.reconciler.reconcile_once(record.id).await.unwrap();
    assert_eq!(h.status_of(record.id), ToolboxStatus::ErrorCreation);
    let stored = h.store.require_toolbox(record.id).unwrap();
    assert!(stored.provisioning_error_message.is_some());
    // The agent was never consulted for an already-doomed record.
    assert_eq!(
        h.agent
            .status_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn stuck_scaling_degrades_to_unresponsive() {
    let h = Harness::new();
    let record = seed_record(&h, ToolboxStatus::Scaling, Duration::minutes(11));

    h.reconciler.reconcile_once(record.id).await.unwrap();
    assert_eq!(h.status_of(record.id), ToolboxStatus::Unresponsive);
}

#[tokio::test]
async fn stuck_teardown_escalates_after_the_ceiling() {
    let h = Harness::new();
    // Teardown task died with the process; the scan must still bound it.
    let record = seed_record(&h, ToolboxStatus::Deprovisioning, Duration::minutes(11));

    h.reconciler.reconcile_once(record.id).await.unwrap();
    assert_eq!(h.status_of(record.id), ToolboxStatus::ErrorDeprovisioning);
    let stored = h.store.require_toolbox(record.id).unwrap();
    assert!(stored.provisioning_error_message.is_some());
    assert_eq!(
        h.agent
            .status_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn fresh_teardown_is_left_to_its_own_task() {
    let h = Harness::new();
    let record = seed_record(&h, ToolboxStatus::PendingDeprovision, Duration::seconds(30));

    let after = h.reconciler.reconcile_once(record.id).await.unwrap();
    assert_eq!(after.status, ToolboxStatus::PendingDeprovision);
    assert_eq!(
        h.agent
            .status_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn terminal_records_are_left_alone() {
    let h = Harness::new();
    let record = seed_record(&h, ToolboxStatus::Deprovisioned, Duration::minutes(30));

    let after = h.reconciler.reconcile_once(record.id).await.unwrap();
    assert_eq!(after.status, ToolboxStatus::Deprovisioned);
    assert_eq!(
        h.agent
            .status_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn refresh_returns_a_phase_view_and_polls_on_demand() {
    let h = Harness::new();
    let record = seed_record(&h, ToolboxStatus::Creating, Duration::seconds(10));

    h.agent.push_report(vec![tool("a", "running")]).await;
    let view = h
        .reconciler
        .refresh_status(OWNER, record.id)
        .await
        .unwrap();

    assert_eq!(view.status, "active");
    assert_eq!(view.phase, "ready");
    assert_eq!(view.percent, 100);
    assert_eq!(view.tools.len(), 1);
}

#[tokio::test]
async fn refresh_is_refused_mid_teardown() {
    let h = Harness::new();
    let record = seed_record(&h, ToolboxStatus::Deprovisioning, Duration::seconds(10));

    let err = h
        .reconciler
        .refresh_status(OWNER, record.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, "CONFLICT");
}

#[tokio::test]
async fn refresh_checks_ownership() {
    let h = Harness::new();
    let record = seed_record(&h, ToolboxStatus::Active, Duration::seconds(10));

    let err = h
        .reconciler
        .refresh_status("intruder", record.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, "DENIED");
}

#[tokio::test]
async fn phase_is_a_function_of_status_not_elapsed_time() {
    let h = Harness::new();
    let young = seed_record(&h, ToolboxStatus::Creating, Duration::seconds(1));

    let view_young = h.reconciler.refresh_status(OWNER, young.id).await.unwrap();
    // The poll failed (no scripted report), so it is still creating; a
    // record held in creating for minutes reports the identical percent.
    assert_eq!(view_young.status, "creating");
    assert_eq!(view_young.percent, 55);
}
