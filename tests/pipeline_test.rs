mod common;

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use common::{
    config_builder, keyed_request, recording_queue, request, submit_and_drain, Harness, Recorded,
    ScriptedFailStage, DATAPLANE, OTHER_DATAPLANE,
};
use tokio::sync::Semaphore;
use workload_launcher::{
    config::{LoadShedConfig, MutexPolicy, QueueConfig},
    core::{
        error::RegistryError,
        executor::{unit_id_for, Architecture, ExecutorCall, UnitSpec},
        registry::{RegistryCall, RegistryOp},
        MutexKey,
    },
    pipeline::{
        LaunchPipeline, LoadShedStage, PipelineItem, Stage, StageErrorKind, StageName, StageResult,
    },
    protocols::{DataplaneIdentity, LaunchRequest, WorkloadStatus},
};

#[tokio::test]
async fn test_check_status_failure_is_isolated_to_one_item() {
    let harness = Harness::new();
    for id in ["A", "B", "C"] {
        harness.registry.insert_pending(&request(id));
    }
    harness.registry.fail_workload(
        RegistryOp::Get,
        "B",
        RegistryError::Api {
            target: "get".to_string(),
            status: 400,
            message: "malformed workload".to_string(),
        },
    );

    harness
        .launch_all(["A", "B", "C"].map(request))
        .await;

    assert_eq!(harness.registry.status("A"), Some(WorkloadStatus::Running));
    assert_eq!(harness.registry.status("C"), Some(WorkloadStatus::Running));
    assert_eq!(harness.registry.status("B"), Some(WorkloadStatus::Failure));

    let reason = harness
        .registry
        .record("B")
        .and_then(|r| r.termination_reason)
        .unwrap();
    assert!(reason.starts_with("CHECK_STATUS: "), "reason: {}", reason);

    let launched: Vec<String> = harness
        .executor
        .units()
        .into_iter()
        .map(|u| u.workload_id)
        .collect();
    assert_eq!(launched, vec!["A", "C"]);
}

#[tokio::test]
async fn test_transient_failure_keeps_claim() {
    let harness = Harness::new();
    for id in ["A", "B", "C"] {
        harness.registry.insert_pending(&request(id));
    }
    harness.registry.fail_workload(
        RegistryOp::Get,
        "B",
        RegistryError::Transport {
            target: "get".to_string(),
            message: "connection reset".to_string(),
        },
    );

    harness
        .launch_all(["A", "B", "C"].map(request))
        .await;

    assert_eq!(harness.registry.status("B"), Some(WorkloadStatus::Claimed));
    assert!(!harness
        .registry
        .calls_for("B")
        .iter()
        .any(|c| matches!(c, RegistryCall::ReportTerminal { .. })));
    assert!(harness.executor.calls_for("B").is_empty());
    assert_eq!(harness.executor.units().len(), 2);
}

#[tokio::test]
async fn test_failing_stage_routes_only_that_item_to_failure() {
    let harness = Harness::new();
    let mut stages = harness.context.stages();
    stages.insert(
        2,
        Box::new(ScriptedFailStage {
            name: StageName::CheckStatus,
            fail_for: vec!["B".to_string()],
            kind: StageErrorKind::NonRetryable,
        }),
    );
    for id in ["A", "B", "C"] {
        harness.registry.insert_pending(&request(id));
    }

    let (queue, handlers) = recording_queue(&harness, LaunchPipeline::new(stages));
    submit_and_drain(&queue, ["A", "B", "C"].map(request)).await;

    assert_eq!(
        handlers.outcomes(),
        vec![
            Recorded::Succeeded {
                workload_id: "A".to_string(),
                launched: true
            },
            Recorded::Failed {
                workload_id: "B".to_string(),
                stage: StageName::CheckStatus,
                kind: StageErrorKind::NonRetryable
            },
            Recorded::Succeeded {
                workload_id: "C".to_string(),
                launched: true
            },
        ]
    );
}

#[tokio::test]
async fn test_claimed_by_other_makes_no_executor_calls() {
    let harness = Harness::new();
    let wl = keyed_request("wl-1", "c-1");
    harness.registry.insert_with_status(
        &wl,
        WorkloadStatus::Claimed,
        Some(&DataplaneIdentity::new(OTHER_DATAPLANE)),
    );

    let (queue, handlers) = recording_queue(&harness, harness.context.pipeline());
    submit_and_drain(&queue, [wl.clone()]).await;

    assert_eq!(
        handlers.outcomes(),
        vec![Recorded::Failed {
            workload_id: "wl-1".to_string(),
            stage: StageName::Claim,
            kind: StageErrorKind::NotOwned
        }]
    );
    assert!(harness.executor.calls().is_empty());

    // With the reporting handlers nothing is written back either
    harness.launch_all([wl]).await;
    let record = harness.registry.record("wl-1").unwrap();
    assert_eq!(record.status, WorkloadStatus::Claimed);
    assert_eq!(record.dataplane_id.as_deref(), Some(OTHER_DATAPLANE));
    assert_eq!(harness.registry.count(RegistryOp::ReportTerminal), 0);
    assert!(harness.executor.calls().is_empty());
}

#[tokio::test]
async fn test_redelivery_launches_once() {
    let harness = Harness::new();
    let wl = keyed_request("wl-1", "c-1");
    harness.registry.insert_pending(&wl);

    harness.launch_all([wl.clone()]).await;
    harness.launch_all([wl.clone(), wl]).await;

    assert_eq!(harness.registry.status("wl-1"), Some(WorkloadStatus::Running));
    assert_eq!(harness.executor.units().len(), 1);
    let creates = harness
        .executor
        .calls_for("wl-1")
        .into_iter()
        .filter(|c| matches!(c, ExecutorCall::Create { .. }))
        .count();
    assert_eq!(creates, 1);
}

#[tokio::test]
async fn test_terminal_work_is_never_relaunched() {
    let harness = Harness::new();
    let identity = DataplaneIdentity::new(DATAPLANE);
    for (id, status) in [
        ("done", WorkloadStatus::Success),
        ("failed", WorkloadStatus::Failure),
        ("cancelled", WorkloadStatus::Cancelled),
    ] {
        harness
            .registry
            .insert_with_status(&request(id), status, Some(&identity));
    }

    harness
        .launch_all(["done", "failed", "cancelled"].map(request))
        .await;

    assert!(harness.executor.calls().is_empty());
    assert_eq!(harness.registry.status("done"), Some(WorkloadStatus::Success));
    assert_eq!(harness.registry.status("failed"), Some(WorkloadStatus::Failure));
    assert_eq!(
        harness.registry.status("cancelled"),
        Some(WorkloadStatus::Cancelled)
    );
    assert_eq!(harness.registry.count(RegistryOp::ReportTerminal), 0);
}

#[tokio::test]
async fn test_concurrent_requests_leave_one_unit_per_key() {
    let harness = Harness::with_policy(MutexPolicy::NewestWins);
    let requests: Vec<_> = (0..10)
        .map(|i| keyed_request(&format!("wl-{}", i), "c-1"))
        .collect();
    for r in &requests {
        harness.registry.insert_pending(r);
    }
    harness.registry.insert_pending(&keyed_request("other", "c-2"));

    harness
        .launch_all(
            requests
                .into_iter()
                .chain([keyed_request("other", "c-2")]),
        )
        .await;

    assert_eq!(harness.executor.units_for_key(&MutexKey::new("c-1")).len(), 1);
    assert_eq!(harness.executor.units_for_key(&MutexKey::new("c-2")).len(), 1);
    assert!(harness.context.locks.is_empty());

    // Replay the call log: no c-1 unit is created while another one is alive
    let mut live: HashSet<String> = HashSet::new();
    for call in harness.executor.calls() {
        match call {
            ExecutorCall::Create { workload_id } if workload_id != "other" => {
                let unit_id = unit_id_for(&workload_id);
                assert!(
                    live.iter().all(|u| *u == unit_id),
                    "{} created while {:?} still running",
                    workload_id,
                    live
                );
                live.insert(unit_id);
            }
            ExecutorCall::Delete { unit_id } => {
                live.remove(&unit_id);
            }
            _ => {}
        }
    }
    assert_eq!(live.len(), 1);
}

#[tokio::test]
async fn test_existing_unit_deleted_before_create() {
    let harness = Harness::new();
    let old = keyed_request("old", "c-1");
    harness
        .registry
        .insert_with_status(&old, WorkloadStatus::Running, Some(&common::identity()));
    harness.executor.insert_unit(UnitSpec {
        unit_id: unit_id_for("old"),
        workload_id: "old".to_string(),
        architecture: Architecture::Amd64,
        labels: BTreeMap::new(),
        mutex_key: Some(MutexKey::new("c-1")),
        input_payload: old.input_payload.clone(),
        log_path: old.log_path.clone(),
    });
    let new = keyed_request("new", "c-1");
    harness.registry.insert_pending(&new);

    harness.launch_all([new]).await;

    let calls = harness.executor.calls();
    let delete = calls
        .iter()
        .position(|c| *c == ExecutorCall::Delete { unit_id: unit_id_for("old") })
        .expect("old unit deleted");
    let create = calls
        .iter()
        .position(|c| {
            *c == ExecutorCall::Create {
                workload_id: "new".to_string(),
            }
        })
        .expect("new unit created");
    assert!(delete < create, "calls: {:?}", calls);
    assert_eq!(harness.registry.status("new"), Some(WorkloadStatus::Running));
}

#[tokio::test]
async fn test_similar_workload_ids_launch_separately() {
    let harness = Harness::new();
    let ids = ["sync_1", "sync-1", "Job-A", "job-a"];
    for id in ids {
        harness.registry.insert_pending(&request(id));
    }

    harness.launch_all(ids.map(request)).await;

    for id in ids {
        assert_eq!(
            harness.registry.status(id),
            Some(WorkloadStatus::Running),
            "{} did not launch",
            id
        );
    }
    let mut launched: Vec<String> = harness
        .executor
        .units()
        .into_iter()
        .map(|u| u.workload_id)
        .collect();
    launched.sort();
    assert_eq!(launched, vec!["Job-A", "job-a", "sync-1", "sync_1"]);
}

#[tokio::test]
async fn test_stalled_registry_call_times_out_as_retryable() {
    let harness = Harness::with_config(
        config_builder(DATAPLANE)
            .registry_timeout_secs(1)
            .build()
            .unwrap(),
    );
    harness.registry.insert_pending(&request("wl-1"));
    harness.registry.stall(RegistryOp::Get);

    let (queue, handlers) = recording_queue(&harness, harness.context.pipeline());
    submit_and_drain(&queue, [request("wl-1")]).await;

    assert_eq!(
        handlers.outcomes(),
        vec![Recorded::Failed {
            workload_id: "wl-1".to_string(),
            stage: StageName::CheckStatus,
            kind: StageErrorKind::Retryable
        }]
    );
    assert_eq!(harness.registry.status("wl-1"), Some(WorkloadStatus::Claimed));
    assert!(harness.executor.calls().is_empty());
}

#[tokio::test]
async fn test_stalled_create_times_out_and_keeps_claim() {
    let harness = Harness::with_config(
        config_builder(DATAPLANE)
            .executor_timeout_secs(1)
            .build()
            .unwrap(),
    );
    harness.registry.insert_pending(&request("wl-1"));
    harness.executor.stall_creates();

    let (queue, handlers) = recording_queue(&harness, harness.context.pipeline());
    submit_and_drain(&queue, [request("wl-1")]).await;
    assert_eq!(
        handlers.outcomes(),
        vec![Recorded::Failed {
            workload_id: "wl-1".to_string(),
            stage: StageName::LaunchPod,
            kind: StageErrorKind::Retryable
        }]
    );

    // The reporting failure handler leaves the claim in place
    harness.launch_all([request("wl-1")]).await;
    assert_eq!(harness.registry.status("wl-1"), Some(WorkloadStatus::Claimed));
    assert_eq!(harness.registry.count(RegistryOp::ReportTerminal), 0);
    assert!(harness.executor.units().is_empty());
}

/// Holds every item until permits are added.
struct Gate(Arc<Semaphore>);

#[async_trait]
impl Stage for Gate {
    async fn apply(&self, _item: &mut PipelineItem) -> StageResult<()> {
        let _permit = self.0.acquire().await;
        Ok(())
    }

    fn name(&self) -> StageName {
        StageName::Claim
    }
}

#[tokio::test]
async fn test_queued_backlog_sheds_at_default_limits() {
    let harness = Harness::with_config(
        config_builder(DATAPLANE)
            .max_concurrent_launches(QueueConfig::default().max_concurrent_launches)
            .build()
            .unwrap(),
    );
    let limit = LoadShedConfig::default().max_inflight_launches;
    assert_eq!(harness.context.config.load_shed.max_inflight_launches, limit);

    let gate = Arc::new(Semaphore::new(0));
    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(Gate(gate.clone())),
        Box::new(LoadShedStage::new(
            harness.context.inflight.clone(),
            harness.context.pressure.clone(),
            harness.context.config.load_shed.clone(),
        )),
    ];
    let (queue, handlers) = recording_queue(&harness, LaunchPipeline::new(stages));

    let total = limit + 36;
    let requests: Vec<LaunchRequest> = (0..total)
        .map(|i| request(&format!("wl-{:03}", i)))
        .collect();
    for r in requests {
        queue.submit(r).await.unwrap();
    }
    assert_eq!(harness.context.inflight.len(), total);

    gate.add_permits(total);
    queue.close();
    assert!(queue.wait(common::DRAIN_TIMEOUT).await);

    let outcomes = handlers.outcomes();
    assert_eq!(outcomes.len(), total);
    let shed = outcomes
        .iter()
        .filter(|o| {
            matches!(
                o,
                Recorded::Failed {
                    stage: StageName::LoadShed,
                    kind: StageErrorKind::Retryable,
                    ..
                }
            )
        })
        .count();
    assert!(shed >= 1, "backlog above the limit was never shed");
    assert!(outcomes.iter().all(|o| matches!(
        o,
        Recorded::Succeeded { .. } | Recorded::Failed { stage: StageName::LoadShed, .. }
    )));
    assert!(harness.context.inflight.is_empty());
}

#[tokio::test]
async fn test_reject_new_fails_later_requests_for_key() {
    let harness = Harness::with_policy(MutexPolicy::RejectNew);
    let requests: Vec<_> = (0..5)
        .map(|i| keyed_request(&format!("wl-{}", i), "c-1"))
        .collect();
    for r in &requests {
        harness.registry.insert_pending(r);
    }

    harness.launch_all(requests).await;

    let statuses: Vec<WorkloadStatus> = (0..5)
        .filter_map(|i| harness.registry.status(&format!("wl-{}", i)))
        .collect();
    let running = statuses
        .iter()
        .filter(|s| **s == WorkloadStatus::Running)
        .count();
    let failed = statuses
        .iter()
        .filter(|s| **s == WorkloadStatus::Failure)
        .count();
    assert_eq!((running, failed), (1, 4));
    assert_eq!(harness.executor.units().len(), 1);
}

#[tokio::test]
async fn test_load_shed_keeps_claims() {
    let harness = Harness::with_config(
        common::config_builder(DATAPLANE)
            .max_cluster_units(3)
            .build()
            .unwrap(),
    );
    harness.pressure().record(3);
    harness.registry.insert_pending(&request("wl-1"));

    harness.launch_all([request("wl-1")]).await;

    assert_eq!(harness.registry.status("wl-1"), Some(WorkloadStatus::Claimed));
    assert!(harness.executor.calls().is_empty());

    harness.pressure().record(2);
    harness.launch_all([request("wl-1")]).await;
    assert_eq!(harness.registry.status("wl-1"), Some(WorkloadStatus::Running));
}

#[tokio::test]
async fn test_architecture_label_selects_node_arch() {
    let harness = Harness::new();
    let arm = request("arm").with_label("launcher.io/architecture", "aarch64");
    let bad = request("bad").with_label("launcher.io/architecture", "sparc");
    harness.registry.insert_pending(&arm);
    harness.registry.insert_pending(&bad);

    harness.launch_all([arm, bad]).await;

    let units = harness.executor.units();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].architecture.as_str(), "arm64");
    assert_eq!(harness.registry.status("bad"), Some(WorkloadStatus::Failure));
    let reason = harness
        .registry
        .record("bad")
        .and_then(|r| r.termination_reason)
        .unwrap();
    assert!(reason.starts_with("ARCHITECTURE: "));
}
