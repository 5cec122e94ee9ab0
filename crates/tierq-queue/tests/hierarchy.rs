//! End-to-end tests for a global queue with local children.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio_test::{assert_err, assert_ok};

use tierq_queue::element::ElementStatus;
use tierq_queue::status::WorkflowStatus;
use tierq_test_utils::{
    assert_all_status, assert_workflow_status, init_test_logging, slots, FailingCatalog,
    QueueFixture, StaticCatalog, StoreOp, WorkloadFactory, DEFAULT_SITE,
};

const WF: &str = "ReReco_Run2024A";

async fn queued(fx: &QueueFixture, blocks: usize) {
    let inserted = fx
        .global
        .queue_work(&WorkloadFactory::rereco(blocks), WF, "production")
        .await
        .unwrap();
    assert_eq!(inserted, blocks);
}

/// Local priority overrides survive re-sync until the global priority changes.
#[tokio::test]
async fn priority_override_until_parent_changes() {
    init_test_logging();
    let fx = QueueFixture::new(&["local-a"]);
    queued(&fx, 1).await;
    let local = &fx.locals[0];

    fx.sync_local(0).await;
    assert_eq!(
        local.get_available_workflows().await.unwrap(),
        BTreeSet::from([(WF.to_string(), 8000)])
    );

    assert_eq!(local.update_priority(WF, 500).await.unwrap(), 1);
    fx.sync_local(0).await;
    assert_eq!(
        local.get_available_workflows().await.unwrap(),
        BTreeSet::from([(WF.to_string(), 500)])
    );

    fx.global.update_priority(WF, 9000).await.unwrap();
    assert_eq!(fx.global.workload_priority(WF).await.unwrap(), Some(9000));
    fx.sync_local(0).await;
    assert_eq!(
        local.get_available_workflows().await.unwrap(),
        BTreeSet::from([(WF.to_string(), 9000)])
    );
}

#[tokio::test]
async fn update_priority_of_unknown_workflow_is_noop() {
    let fx = QueueFixture::new(&[]);
    queued(&fx, 1).await;
    assert_eq!(fx.global.update_priority("nope", 1).await.unwrap(), 0);
    assert_eq!(
        fx.global.get_available_workflows().await.unwrap(),
        BTreeSet::from([(WF.to_string(), 8000)])
    );
}

#[tokio::test]
async fn pull_respects_slot_counts() {
    let fx = QueueFixture::new(&[]);
    queued(&fx, 4).await;

    let acquired = fx.global.pull_work(&slots(&[(DEFAULT_SITE, 2)])).await.unwrap();
    assert_eq!(acquired.len(), 2);
    assert_all_status(&acquired, ElementStatus::Acquired);

    let rest = fx.global.pull_work(&slots(&[(DEFAULT_SITE, 0)])).await.unwrap();
    assert!(rest.is_empty());
    assert_workflow_status(&fx.global, WF, Some(WorkflowStatus::RunningOpen)).await;
}

/// Two pulls over disjoint sites never hand out the same element.
#[tokio::test]
async fn disjoint_slot_maps_acquire_disjoint_elements() {
    let fx = QueueFixture::new(&[]);
    fx.global
        .queue_work(
            &WorkloadFactory::rereco_at(4, &["T2_XX_East", "T2_XX_West"]),
            WF,
            "production",
        )
        .await
        .unwrap();

    let east = fx.global.pull_work(&slots(&[("T2_XX_East", 2)])).await.unwrap();
    let west = fx.global.pull_work(&slots(&[("T2_XX_West", 2)])).await.unwrap();
    assert_eq!(east.len(), 2);
    assert_eq!(west.len(), 2);

    let east_ids: BTreeSet<_> = east.iter().map(|e| e.id.clone()).collect();
    let west_ids: BTreeSet<_> = west.iter().map(|e| e.id.clone()).collect();
    assert!(east_ids.is_disjoint(&west_ids));

    assert!(fx.global.get_available_workflows().await.unwrap().is_empty());
    let all = fx.global.get_elements_for_workflow(WF).await.unwrap();
    assert_all_status(&all, ElementStatus::Acquired);
}

#[tokio::test]
async fn placement_requires_a_site_hosting_the_data() {
    let fx = QueueFixture::new(&[]);
    fx.global
        .queue_work(&WorkloadFactory::rereco_at(1, &["T2_CH_CERN"]), WF, "production")
        .await
        .unwrap();

    let elsewhere = fx.global.pull_work(&slots(&[(DEFAULT_SITE, 10)])).await.unwrap();
    assert!(elsewhere.is_empty());
    assert_workflow_status(&fx.global, WF, Some(WorkflowStatus::Acquired)).await;

    let placed = fx
        .global
        .pull_work(&slots(&[(DEFAULT_SITE, 10), ("T2_CH_CERN", 1)]))
        .await
        .unwrap();
    assert_eq!(placed.len(), 1);
}

#[tokio::test]
async fn higher_priority_pulled_first() {
    let fx = QueueFixture::new(&[]);
    fx.global
        .queue_work(&WorkloadFactory::rereco(1), "low", "production")
        .await
        .unwrap();
    fx.global
        .queue_work(
            &WorkloadFactory::with_priority(WorkloadFactory::rereco(1), 100_000),
            "high",
            "production",
        )
        .await
        .unwrap();

    let acquired = fx.global.pull_work(&slots(&[(DEFAULT_SITE, 1)])).await.unwrap();
    assert_eq!(acquired.len(), 1);
    assert_eq!(acquired[0].request_name, "high");
}

/// Two siblings race for one element: exactly one wins, the other's copy is cancelled.
#[tokio::test]
async fn sibling_race_has_single_winner() {
    init_test_logging();
    let fx = QueueFixture::new(&["local-a", "local-b"]);
    queued(&fx, 1).await;
    fx.sync_local(0).await;
    fx.sync_local(1).await;

    let won = fx.locals[0].pull_work(&slots(&[(DEFAULT_SITE, 10)])).await.unwrap();
    assert_eq!(won.len(), 1);
    let lost = fx.locals[1].pull_work(&slots(&[(DEFAULT_SITE, 10)])).await.unwrap();
    assert!(lost.is_empty());

    let loser = fx.locals[1].get_elements_for_workflow(WF).await.unwrap();
    assert_all_status(&loser, ElementStatus::Canceled);

    let parent = fx.global.get_elements_for_workflow(WF).await.unwrap();
    assert_all_status(&parent, ElementStatus::Acquired);
    assert_eq!(parent[0].child_queue.as_deref(), Some("local-a"));

    let by_child = fx.global.child_queues_and_status().await.unwrap();
    assert_eq!(by_child.len(), 1);
    assert_eq!(by_child["local-a"][&ElementStatus::Acquired], 1);
}

#[tokio::test]
async fn status_reports_flow_up_to_global() {
    init_test_logging();
    let fx = QueueFixture::new(&["local-a"]);
    queued(&fx, 1).await;
    fx.sync_local(0).await;
    let local = &fx.locals[0];
    let acquired = local.pull_work(&slots(&[(DEFAULT_SITE, 5)])).await.unwrap();
    let ids: Vec<_> = acquired.iter().map(|e| e.id.clone()).collect();

    local
        .update_element_status(&ids, ElementStatus::Running, None)
        .await
        .unwrap();
    fx.report_up(0).await;
    assert_workflow_status(&fx.global, WF, Some(WorkflowStatus::RunningClosed)).await;

    local
        .update_element_status(&ids, ElementStatus::Done, None)
        .await
        .unwrap();
    fx.report_up(0).await;
    assert_workflow_status(&fx.global, WF, Some(WorkflowStatus::Completed)).await;
    assert!(fx.global.completed_workflows().await.unwrap().contains(WF));

    // Nothing left to report.
    let summary = local.pull_from_parent().await.unwrap();
    assert_eq!(summary.reported, 0);
}

#[tokio::test]
async fn global_cancellation_reaches_local_copies() {
    let fx = QueueFixture::new(&["local-a"]);
    queued(&fx, 2).await;
    fx.sync_local(0).await;
    let local = &fx.locals[0];
    let acquired = local.pull_work(&slots(&[(DEFAULT_SITE, 1)])).await.unwrap();
    assert_eq!(acquired.len(), 1);
    let running = vec![acquired[0].id.clone()];
    local
        .update_element_status(&running, ElementStatus::Running, None)
        .await
        .unwrap();

    assert_eq!(fx.global.cancel_workflow(WF).await.unwrap(), 2);
    fx.sync_local(0).await;

    // The running element waits for the agent; the idle one is gone.
    let elements = local.get_elements_for_workflow(WF).await.unwrap();
    let statuses: BTreeSet<_> = elements.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        BTreeSet::from([ElementStatus::CancelRequested, ElementStatus::Canceled])
    );
    assert_workflow_status(local, WF, None).await;

    local
        .update_element_status(&running, ElementStatus::Canceled, None)
        .await
        .unwrap();
    assert_workflow_status(local, WF, Some(WorkflowStatus::Completed)).await;
}

/// A child-claimed element stays cancelling on the global until the child confirms.
#[tokio::test]
async fn claimed_cancellation_waits_for_child_report() {
    init_test_logging();
    let fx = QueueFixture::new(&["local-a"]);
    queued(&fx, 1).await;
    fx.sync_local(0).await;
    let local = &fx.locals[0];
    let acquired = local.pull_work(&slots(&[(DEFAULT_SITE, 1)])).await.unwrap();
    let ids: Vec<_> = acquired.iter().map(|e| e.id.clone()).collect();
    local
        .update_element_status(&ids, ElementStatus::Running, None)
        .await
        .unwrap();

    assert_eq!(fx.global.cancel_workflow(WF).await.unwrap(), 1);
    let merged = fx.global.process_inbound_work().await.unwrap();
    assert_eq!(merged.canceled, 0);
    let parent = fx.global.get_elements_for_workflow(WF).await.unwrap();
    assert_all_status(&parent, ElementStatus::CancelRequested);
    assert_workflow_status(&fx.global, WF, None).await;

    // The running report arrives after the cancellation and changes nothing.
    fx.report_up(0).await;
    let parent = fx.global.get_elements_for_workflow(WF).await.unwrap();
    assert_all_status(&parent, ElementStatus::CancelRequested);
    assert!(!fx.global.completed_workflows().await.unwrap().contains(WF));

    local
        .update_element_status(&ids, ElementStatus::Canceled, None)
        .await
        .unwrap();
    fx.report_up(0).await;
    let parent = fx.global.get_elements_for_workflow(WF).await.unwrap();
    assert_all_status(&parent, ElementStatus::Canceled);
    assert_workflow_status(&fx.global, WF, Some(WorkflowStatus::Completed)).await;
}

/// A claim committed between an update's read and its write is not overwritten.
#[tokio::test]
async fn priority_update_keeps_concurrent_claim() {
    let fx = QueueFixture::new(&[]);
    queued(&fx, 1).await;

    fx.global_store.clear_operations();
    fx.global_store.claim_before_next_write("local-rival");
    assert_eq!(fx.global.update_priority(WF, 9000).await.unwrap(), 1);

    let writes = fx
        .global_store
        .operations()
        .into_iter()
        .filter(|op| matches!(op, StoreOp::SaveIf { .. }))
        .count();
    assert_eq!(writes, 2);

    let parent = fx.global.get_elements_for_workflow(WF).await.unwrap();
    assert_all_status(&parent, ElementStatus::Acquired);
    assert_eq!(parent[0].child_queue.as_deref(), Some("local-rival"));
    assert_eq!(parent[0].priority, 9000);

    let again = fx.global.pull_work(&slots(&[(DEFAULT_SITE, 10)])).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn cancel_racing_a_claim_waits_for_claimant() {
    let fx = QueueFixture::new(&[]);
    queued(&fx, 1).await;

    fx.global_store.claim_before_next_write("local-rival");
    assert_eq!(fx.global.cancel_workflow(WF).await.unwrap(), 1);
    let merged = fx.global.process_inbound_work().await.unwrap();
    assert_eq!(merged.canceled, 0);

    let parent = fx.global.get_elements_for_workflow(WF).await.unwrap();
    assert_all_status(&parent, ElementStatus::CancelRequested);
    assert_eq!(parent[0].child_queue.as_deref(), Some("local-rival"));
}

#[tokio::test]
async fn priority_change_reaches_running_elements() {
    let fx = QueueFixture::new(&[]);
    queued(&fx, 2).await;
    let acquired = fx.global.pull_work(&slots(&[(DEFAULT_SITE, 1)])).await.unwrap();
    let running: Vec<_> = acquired.iter().map(|e| e.id.clone()).collect();
    fx.global
        .update_element_status(&running, ElementStatus::Running, None)
        .await
        .unwrap();

    assert_eq!(fx.global.update_priority(WF, 1234).await.unwrap(), 2);
    let by_status = fx.global.jobs_by_status_and_priority().await.unwrap();
    assert!(by_status[&ElementStatus::Running].contains_key(&1234));
    assert!(!by_status[&ElementStatus::Running].contains_key(&8000));
    assert!(by_status[&ElementStatus::Available].contains_key(&1234));
}

/// One replication pass plus a pull acquires work at the parent's new priority.
#[tokio::test]
async fn pull_sees_priority_changed_upstream() {
    let fx = QueueFixture::new(&["local-a"]);
    queued(&fx, 2).await;
    fx.sync_local(0).await;
    let local = &fx.locals[0];

    fx.global.update_priority(WF, 9000).await.unwrap();
    let summary = local.pull_from_parent().await.unwrap();
    assert_eq!(summary.priority_updates, 2);

    let acquired = local.pull_work(&slots(&[(DEFAULT_SITE, 10)])).await.unwrap();
    assert_eq!(acquired.len(), 2);
    assert!(acquired.iter().all(|e| e.priority == 9000));
}

/// A parent store failure during the claim leaves the copy negotiating; the next pull finishes it.
#[tokio::test]
async fn parent_failure_during_claim_is_retried() {
    init_test_logging();
    let fx = QueueFixture::new(&["local-a"]);
    queued(&fx, 1).await;
    fx.sync_local(0).await;
    let local = &fx.locals[0];

    fx.global_store.clear_operations();
    fx.global_store.inject_failure();
    assert_err!(local.pull_work(&slots(&[(DEFAULT_SITE, 5)])).await);
    assert!(fx
        .global_store
        .operations()
        .iter()
        .any(|op| matches!(op, StoreOp::Cas { target: ElementStatus::Negotiating, .. })));
    let stuck = local.get_elements_for_workflow(WF).await.unwrap();
    assert_all_status(&stuck, ElementStatus::Negotiating);
    assert_workflow_status(local, WF, Some(WorkflowStatus::Acquired)).await;

    fx.global_store.clear_failures();
    let acquired = assert_ok!(local.pull_work(&slots(&[(DEFAULT_SITE, 5)])).await);
    assert_eq!(acquired.len(), 1);
    assert_eq!(acquired[0].status, ElementStatus::Acquired);
    let parent = fx.global.get_elements_for_workflow(WF).await.unwrap();
    assert_all_status(&parent, ElementStatus::Acquired);
}

#[tokio::test]
async fn site_lists_restrict_placement() {
    let fx = QueueFixture::new(&[]);
    let workload = WorkloadFactory::with_sites(
        WorkloadFactory::rereco_at(1, &["T1_US_FNAL", "T1_DE_KIT", "T2_CH_CERN"]),
        &["T1_*"],
        &["T1_US_FNAL"],
    );
    fx.global.queue_work(&workload, WF, "production").await.unwrap();

    let none = fx
        .global
        .pull_work(&slots(&[("T1_US_FNAL", 5), ("T2_CH_CERN", 5)]))
        .await
        .unwrap();
    assert!(none.is_empty());
    assert_workflow_status(&fx.global, WF, Some(WorkflowStatus::Acquired)).await;

    let placed = fx
        .global
        .pull_work(&slots(&[("T1_DE_KIT", 5)]))
        .await
        .unwrap();
    assert_eq!(placed.len(), 1);
}

#[tokio::test]
async fn whitelist_matches_catalog_names() {
    let catalog = StaticCatalog::new().with_site("T1_US_FNAL", &["cmssrm.fnal.gov"], &[]);
    let fx = QueueFixture::with_catalog(&[], Arc::new(catalog));
    // FNAL hosts the block under its storage element name.
    let workload = WorkloadFactory::with_sites(
        WorkloadFactory::rereco_at(1, &["cmssrm.fnal.gov", "T2_CH_CERN"]),
        &["cmssrm.fnal.gov"],
        &[],
    );
    fx.global.queue_work(&workload, WF, "production").await.unwrap();

    let placed = fx
        .global
        .pull_work(&slots(&[("T1_US_FNAL", 1), ("T2_CH_CERN", 10)]))
        .await
        .unwrap();
    assert_eq!(placed.len(), 1);
}

#[tokio::test]
async fn catalog_outage_falls_back_to_site_names() {
    let fx = QueueFixture::with_catalog(&[], Arc::new(FailingCatalog));
    let workload = WorkloadFactory::with_sites(
        WorkloadFactory::rereco_at(2, &["T2_CH_CERN"]),
        &["T2_CH_CERN"],
        &[],
    );
    fx.global.queue_work(&workload, WF, "production").await.unwrap();

    let placed = fx
        .global
        .pull_work(&slots(&[("T2_CH_CERN", 10)]))
        .await
        .unwrap();
    assert_eq!(placed.len(), 2);
}

#[tokio::test]
async fn replication_is_idempotent() {
    let fx = QueueFixture::new(&["local-a"]);
    queued(&fx, 3).await;

    let first = fx.locals[0].pull_from_parent().await.unwrap();
    assert_eq!(first.replicated, 3);
    // Copies still waiting in the inbox are not posted twice.
    let second = fx.locals[0].pull_from_parent().await.unwrap();
    assert_eq!(second.replicated, 0);

    let merged = fx.locals[0].process_inbound_work().await.unwrap();
    assert_eq!(merged.inserted, 3);
    fx.sync_local(0).await;
    assert_eq!(
        fx.locals[0].get_elements_for_workflow(WF).await.unwrap().len(),
        3
    );
}
