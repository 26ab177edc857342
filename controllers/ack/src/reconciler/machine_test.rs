//! Unit tests for the ACKMachine reconciler

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::events::reasons;
    use crate::reconciler::{ReconcileOutcome, NOT_READY_REQUEUE};
    use crate::store::InfraKind;
    use crate::test_utils::*;
    use crds::*;
    use ecs_client::{Instance, MACHINE_TAG_KEY};
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_creates_pending_instance() {
        let (reconciler, store, ecs, events) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);

        let outcome = reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::RequeueAfter(NOT_READY_REQUEUE));

        let stored = store.ack_machine("default", "m-0").unwrap();
        let status = stored.status.clone().unwrap();
        assert!(!status.ready);
        assert_eq!(status.instance_id.as_deref(), Some("i-mock000001"));
        assert_eq!(status.instance_state, Some(InstanceState::Pending));
        assert_eq!(status.failure(), FailureState::Active);
        assert_eq!(stored.spec.provider_id.as_deref(), Some("ack:////i-mock000001"));
        assert_eq!(stored.metadata.finalizers, Some(vec![MACHINE_FINALIZER.to_string()]));

        assert_eq!(ecs.calls().run_instance, 1);
        assert_eq!(reconciler.metrics().instances_created(), 1);
        assert_eq!(events.count(reasons::INSTANCE_CREATED), 1);
        assert_eq!(events.count(reasons::INSTANCE_STATE_CHANGED), 1);
    }

    #[tokio::test]
    async fn test_created_instance_carries_machine_tag_and_token() {
        let (reconciler, store, ecs, _) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);

        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();

        let instance = ecs.instance("i-mock000001").unwrap();
        assert_eq!(instance.tags.get(MACHINE_TAG_KEY).map(String::as_str), Some("default/m-0"));
        assert_eq!(instance.tags.get("cluster").map(String::as_str), Some("c"));
        assert_eq!(instance.region_id, TEST_REGION);
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let (reconciler, store, ecs, events) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);

        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();

        assert_eq!(ecs.calls().run_instance, 1);
        assert_eq!(ecs.calls().find_instance, 2);
        assert_eq!(ecs.instances().len(), 1);
        // State did not change between the two passes.
        assert_eq!(events.count(reasons::INSTANCE_STATE_CHANGED), 1);
    }

    #[tokio::test]
    async fn test_existing_tagged_instance_is_adopted() {
        let (reconciler, store, ecs, _) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);
        ecs.add_instance(Instance {
            id: "i-existing".to_string(),
            state: "Running".to_string(),
            region_id: TEST_REGION.to_string(),
            private_ip_addresses: vec!["10.0.0.8".to_string()],
            tags: BTreeMap::from([(MACHINE_TAG_KEY.to_string(), "default/m-0".to_string())]),
            ..Default::default()
        });

        let outcome = reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
        assert_eq!(ecs.calls().run_instance, 0);

        let stored = store.ack_machine("default", "m-0").unwrap();
        let status = stored.status.unwrap();
        assert!(status.ready);
        assert_eq!(status.addresses, vec![MachineAddress::internal_ip("10.0.0.8")]);
        assert_eq!(stored.spec.provider_id.as_deref(), Some("ack:////i-existing"));
    }

    #[tokio::test]
    async fn test_failed_machine_is_left_alone() {
        let (reconciler, store, ecs, _) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);
        let mut failed = create_test_ack_machine("m-0", "default", "m-0");
        failed.status = Some(ACKMachineStatus {
            failure_reason: Some(MachineStatusError::CreateError),
            failure_message: Some("image not found".to_string()),
            ..Default::default()
        });
        store.insert_ack_machine(failed);

        let outcome = reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
        assert_eq!(ecs.calls().mutating(), 0);
        assert_eq!(ecs.calls().find_instance, 0);
        assert_eq!(store.patch_count(), 0);

        let status = store.ack_machine("default", "m-0").unwrap().status.unwrap();
        assert_eq!(status.failure_reason, Some(MachineStatusError::CreateError));
        assert_eq!(status.failure_message.as_deref(), Some("image not found"));
    }

    #[tokio::test]
    async fn test_create_error_is_retryable_and_keeps_finalizer() {
        let (reconciler, store, ecs, _) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);
        ecs.fail_run_instance(Some("QuotaExceeded"));

        let result = reconciler.reconcile_ack_machine("default", "m-0").await;
        assert!(matches!(result, Err(ControllerError::Ecs(_))));

        let stored = store.ack_machine("default", "m-0").unwrap();
        assert_eq!(stored.metadata.finalizers, Some(vec![MACHINE_FINALIZER.to_string()]));
        assert!(!stored.has_failed());

        ecs.fail_run_instance(None);
        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        let stored = store.ack_machine("default", "m-0").unwrap();
        assert_eq!(stored.metadata.finalizers, Some(vec![MACHINE_FINALIZER.to_string()]));
        assert_eq!(ecs.instances().len(), 1);
    }

    #[tokio::test]
    async fn test_finalizer_conflict_stops_before_create() {
        let (reconciler, store, ecs, _) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);
        store.conflict_next_patch();

        let result = reconciler.reconcile_ack_machine("default", "m-0").await;
        assert!(matches!(result, Err(ControllerError::Conflict(_))));
        assert_eq!(ecs.calls().run_instance, 0);
    }

    #[tokio::test]
    async fn test_missing_instance_after_create_is_terminal() {
        let (reconciler, store, ecs, events) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);
        ecs.run_instance_returns_none(true);

        let outcome = reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);

        let stored = store.ack_machine("default", "m-0").unwrap();
        let status = stored.status.clone().unwrap();
        assert_eq!(status.failure_reason, Some(MachineStatusError::UpdateMachineError));
        assert!(status.failure_message.is_some());
        assert_eq!(events.count(reasons::INSTANCE_NOT_FOUND), 1);

        // Sticky: the next pass makes no provider calls at all.
        let before = ecs.calls();
        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(ecs.calls(), before);
    }

    #[tokio::test]
    async fn test_created_instance_not_yet_describable_is_pending() {
        let (reconciler, store, ecs, events) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);
        ecs.hide_new_instances(true);

        let outcome = reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::RequeueAfter(NOT_READY_REQUEUE));

        let stored = store.ack_machine("default", "m-0").unwrap();
        let status = stored.status.clone().unwrap();
        assert_eq!(status.failure(), FailureState::Active);
        assert_eq!(status.instance_id.as_deref(), Some("i-mock000001"));
        assert_eq!(status.instance_state, Some(InstanceState::Pending));
        assert_eq!(stored.spec.provider_id.as_deref(), Some("ack:////i-mock000001"));
        assert_eq!(events.count(reasons::INSTANCE_NOT_FOUND), 0);

        // Still invisible on the next pass; the client token keeps it to one instance.
        ecs.hide_new_instances(false);
        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        let stored = store.ack_machine("default", "m-0").unwrap();
        assert_eq!(stored.status.unwrap().failure(), FailureState::Active);
        assert_eq!(ecs.instances().len(), 1);

        ecs.set_instance_state("i-mock000001", "Running");
        let outcome = reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
        assert!(store.ack_machine("default", "m-0").unwrap().status.unwrap().ready);
    }

    #[tokio::test]
    async fn test_existing_provider_id_is_never_replaced() {
        let (reconciler, store, ecs, events) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);
        let mut ack_machine = create_test_ack_machine("m-0", "default", "m-0");
        ack_machine.spec.provider_id = Some("ack:////i-original".to_string());
        store.insert_ack_machine(ack_machine);

        let outcome = reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);

        let stored = store.ack_machine("default", "m-0").unwrap();
        assert_eq!(stored.spec.provider_id.as_deref(), Some("ack:////i-original"));
        let status = stored.status.clone().unwrap();
        assert_eq!(status.failure_reason, Some(MachineStatusError::UpdateMachineError));
        let message = status.failure_message.unwrap();
        assert!(message.contains("ack:////i-original"));
        assert!(message.contains("i-mock000001"));
        assert_eq!(events.count(reasons::PROVIDER_ID_MISMATCH), 1);

        // Sticky from here on.
        let before = ecs.calls();
        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(ecs.calls(), before);
    }

    #[tokio::test]
    async fn test_binary_bootstrap_data_reaches_the_instance_unchanged() {
        let (reconciler, store, ecs, _) = create_test_reconciler();
        seed_machine(&store, "m-0", true, false);
        let gzipped = [0x1f, 0x8b, 0x08, 0x00, 0xff, 0xfe, 0x80];
        store.insert_secret("default", "m-0-bootstrap", gzipped);

        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();

        assert_eq!(ecs.user_data("i-mock000001"), Some(gzipped.to_vec()));
    }

    #[tokio::test]
    async fn test_waits_for_cluster_infrastructure() {
        let (reconciler, store, ecs, _) = create_test_reconciler();
        seed_machine(&store, "m-0", false, true);

        let outcome = reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
        assert_eq!(ecs.calls(), Default::default());

        let stored = store.ack_machine("default", "m-0").unwrap();
        assert_eq!(stored.metadata.finalizers, Some(vec![MACHINE_FINALIZER.to_string()]));
        assert!(stored.status.is_none());
    }

    #[tokio::test]
    async fn test_waits_for_bootstrap_data() {
        let (reconciler, store, ecs, _) = create_test_reconciler();
        seed_machine(&store, "m-0", true, false);

        let outcome = reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
        assert_eq!(ecs.calls(), Default::default());
    }

    #[tokio::test]
    async fn test_running_instance_is_ready() {
        let (reconciler, store, ecs, _) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);
        ecs.set_new_instance_state("Running");

        let outcome = reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
        assert!(store.ack_machine("default", "m-0").unwrap().status.unwrap().ready);
    }

    #[tokio::test]
    async fn test_unrecognized_state_fails_machine() {
        let (reconciler, store, ecs, events) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);
        ecs.set_new_instance_state("Hibernating");

        let outcome = reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);

        let status = store.ack_machine("default", "m-0").unwrap().status.unwrap();
        assert!(!status.ready);
        assert_eq!(status.failure_reason, Some(MachineStatusError::UpdateMachineError));
        assert!(status.failure_message.unwrap().contains("Hibernating"));
        assert_eq!(events.count(reasons::INSTANCE_UNHANDLED_STATE), 1);
    }

    #[tokio::test]
    async fn test_unexpected_termination_warns() {
        let (reconciler, store, ecs, events) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);
        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        ecs.set_instance_state("i-mock000001", "Terminated");

        let outcome = reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);

        let stored = store.ack_machine("default", "m-0").unwrap();
        assert!(!stored.has_failed());
        assert!(!stored.status.unwrap().ready);
        let warnings: Vec<_> = events.events().into_iter().filter(|e| e.warning).collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].reason, reasons::INSTANCE_UNEXPECTED_TERMINATION);
    }

    #[tokio::test]
    async fn test_state_change_event_only_on_change() {
        let (reconciler, store, ecs, events) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);

        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(events.count(reasons::INSTANCE_STATE_CHANGED), 1);

        ecs.set_instance_state("i-mock000001", "Running");
        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(events.count(reasons::INSTANCE_STATE_CHANGED), 2);
    }

    #[tokio::test]
    async fn test_deletion_terminates_instance_and_releases_finalizer() {
        let (reconciler, store, ecs, events) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);
        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();

        store.mark_deleted(InfraKind::Machine, "default", "m-0");
        assert!(store.ack_machine("default", "m-0").is_some());

        let outcome = reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
        assert_eq!(ecs.instance("i-mock000001").unwrap().state, "Terminated");
        assert_eq!(events.count(reasons::INSTANCE_TERMINATED), 1);
        assert!(store.ack_machine("default", "m-0").is_none());

        // The object is gone; another delivery is a no-op.
        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(ecs.calls().terminate_instance, 1);
    }

    #[tokio::test]
    async fn test_deletion_falls_back_to_machine_tag() {
        let (reconciler, store, ecs, _) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);
        let mut ack_machine = create_test_ack_machine("m-0", "default", "m-0");
        ack_machine.spec.provider_id = Some("ack:////i-original".to_string());
        ack_machine.status = Some(ACKMachineStatus {
            instance_id: Some("i-original".to_string()),
            ..Default::default()
        });
        store.insert_ack_machine(ack_machine);
        // i-original is gone, so a replacement is launched and then refused.
        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(ecs.instances().len(), 1);

        store.mark_deleted(InfraKind::Machine, "default", "m-0");
        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();

        assert_eq!(ecs.instance("i-mock000001").unwrap().state, "Terminated");
        assert!(store.ack_machine("default", "m-0").is_none());
    }

    #[tokio::test]
    async fn test_deletion_without_instance_succeeds() {
        let (reconciler, store, ecs, _) = create_test_reconciler();
        seed_machine(&store, "m-0", false, true);
        // Adds the finalizer, then waits on the cluster.
        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        store.mark_deleted(InfraKind::Machine, "default", "m-0");

        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(ecs.calls().terminate_instance, 0);
        assert!(store.ack_machine("default", "m-0").is_none());
    }

    #[tokio::test]
    async fn test_deletion_of_terminated_instance_skips_terminate() {
        let (reconciler, store, ecs, _) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);
        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        ecs.set_instance_state("i-mock000001", "Terminated");
        store.mark_deleted(InfraKind::Machine, "default", "m-0");

        reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(ecs.calls().terminate_instance, 0);
        assert!(store.ack_machine("default", "m-0").is_none());
    }

    #[tokio::test]
    async fn test_paused_machine_is_skipped() {
        let (reconciler, store, ecs, _) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);
        let mut paused = create_test_ack_machine("m-0", "default", "m-0");
        paused.metadata.annotations = Some(BTreeMap::from([(PAUSED_ANNOTATION.to_string(), "true".to_string())]));
        store.insert_ack_machine(paused);

        let outcome = reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
        assert_eq!(store.patch_count(), 0);
        assert_eq!(ecs.calls(), Default::default());
    }

    #[tokio::test]
    async fn test_machine_without_owner_waits() {
        let (reconciler, store, ecs, _) = create_test_reconciler();
        seed_machine(&store, "m-0", true, true);
        let mut orphan = create_test_ack_machine("m-0", "default", "m-0");
        orphan.metadata.owner_references = None;
        store.insert_ack_machine(orphan);

        let outcome = reconciler.reconcile_ack_machine("default", "m-0").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
        assert_eq!(store.patch_count(), 0);
        assert_eq!(ecs.calls(), Default::default());
    }

    #[tokio::test]
    async fn test_missing_machine_is_not_an_error() {
        let (reconciler, _, ecs, _) = create_test_reconciler();
        let outcome = reconciler.reconcile_ack_machine("default", "absent").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
        assert_eq!(ecs.calls(), Default::default());
    }
}
