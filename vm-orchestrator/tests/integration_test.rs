//! Integration tests for vm-orchestrator
//!
//! Drives the lifecycle operations against an in-memory database and a
//! scripted hypervisor, checking quota, compensation, idempotency,
//! delegation, payment and transfer behaviour.

use std::time::Duration;

use chrono::Utc;
use vm_core::Role;
use vm_orchestrator::test_utils::TestHarness;
use vm_orchestrator::{
    ActionKind, AuditFilter, BackupRequest, ConfigureVmRequest, CreateVmRequest,
    EntitlementReason, OrchestratorError, QuotaResource, TransferVmRequest, VmStatus,
};

fn req(name: &str, disk_size_mb: u32, cpus: u32, memory_mb: u32) -> CreateVmRequest {
    CreateVmRequest {
        name: name.to_string(),
        disk_size_mb,
        cpus,
        memory_mb,
    }
}

async fn audit_actions(h: &TestHarness, vm_id: &str) -> Vec<ActionKind> {
    let admin = h.admin().await;
    let filter = AuditFilter {
        vm_id: Some(vm_id.to_string()),
        ..Default::default()
    };
    let mut actions: Vec<ActionKind> = h
        .orchestrator
        .audit_log(&admin, &filter)
        .await
        .expect("audit log")
        .into_iter()
        .map(|e| e.action)
        .collect();
    actions.reverse();
    actions
}

async fn vm_rows(h: &TestHarness) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM virtual_machines")
        .fetch_one(&h.pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_create_vm_runs_remote_sequence_then_persists() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;

    let outcome = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .expect("create should succeed");
    assert!(outcome.is_clean());

    let created = outcome.value;
    assert_eq!(created.vm.status, VmStatus::Stopped);
    assert_eq!(created.vm.owner_id, alice.tenant_id);
    assert!(created.adjustments.is_empty());
    assert!(created.payment.is_none());
    assert_eq!(created.vm.price_cents, 0);

    let commands = h.mock.commands();
    assert_eq!(
        commands,
        vec![
            "vboxmanage createvm --name web01 --register",
            "vboxmanage modifyvm web01 --memory 512 --cpus 1 --vram 16 --nic1 nat",
            "vboxmanage createhd --filename ~/'VirtualBox VMs/web01/web01.vdi' --size 1024",
        ]
    );

    let fetched = h.orchestrator.get_vm(&alice, &created.vm.id).await.unwrap();
    assert_eq!(fetched.name.as_str(), "web01");
    assert_eq!(audit_actions(&h, &created.vm.id).await, vec![ActionKind::Create]);
}

#[tokio::test]
async fn test_create_clamps_resources_and_charges_extra_disk() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;

    let created = h
        .orchestrator
        .create_vm(&alice, req("big", 4096, 8, 2048))
        .await
        .unwrap()
        .value;

    assert_eq!(created.vm.disk_size_mb, 2048);
    assert_eq!(created.vm.cpus, 2);
    assert_eq!(created.vm.memory_mb, 2048);
    let fields: Vec<&str> = created
        .adjustments
        .iter()
        .map(|a| a.field.as_str())
        .collect();
    assert_eq!(fields, vec!["disk_mb", "cpus"]);

    // 2048 MB - 1024 MB included = 1024 MB at one cent each.
    let payment = created.payment.expect("extra disk is charged");
    assert_eq!(payment.amount_cents, 1024);
    assert_eq!(created.vm.price_cents, 1024);
    assert_eq!(payment.due_date, payment.created_at + chrono::Duration::days(30));

    let payments = h.orchestrator.list_payments(&alice).await.unwrap();
    assert!(payments.iter().any(|p| p.id == payment.id));

    assert_eq!(h.mock.count_matching("--size 2048"), 1);
    assert_eq!(h.mock.count_matching("--cpus 2"), 1);
}

#[tokio::test]
async fn test_create_rejects_bad_names_before_any_remote_call() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;

    let err = h
        .orchestrator
        .create_vm(&alice, req("web01; reboot", 1024, 1, 512))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidInput(_)));

    let err = h
        .orchestrator
        .create_vm(&alice, req("web01", 0, 1, 512))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidInput(_)));

    assert!(h.mock.commands().is_empty());
}

#[tokio::test]
async fn test_concurrent_creates_at_limit_admit_exactly_one() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "bronze").await;
    h.mock.set_delay(Duration::from_millis(20));

    let (a, b) = tokio::join!(
        h.orchestrator.create_vm(&alice, req("race-a", 1024, 1, 512)),
        h.orchestrator.create_vm(&alice, req("race-b", 1024, 1, 512)),
    );

    let results = [a, b];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let quota_denials = results
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(OrchestratorError::QuotaExceeded {
                    resource: QuotaResource::Vms,
                    usage: 1,
                    limit: 1
                })
            )
        })
        .count();
    assert_eq!(successes, 1);
    assert_eq!(quota_denials, 1);
    assert_eq!(vm_rows(&h).await, 1);
    assert_eq!(h.mock.count_matching("createvm"), 1);
}

#[tokio::test]
async fn test_failed_disk_step_leaves_no_row_and_rolls_back_remote() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    h.mock.fail_command(
        "createhd",
        "VBoxManage: error: Failed to create medium: disk full",
    );

    let err = h
        .orchestrator
        .create_vm(&alice, req("web01", 1500, 1, 512))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Command { .. }));

    assert_eq!(vm_rows(&h).await, 0);
    assert_eq!(h.mock.count_matching("unregistervm web01 --delete"), 1);
    // No charge for a VM that never existed.
    assert!(h.orchestrator.list_payments(&alice).await.unwrap().len() == 1);
}

#[tokio::test]
async fn test_failed_createvm_needs_no_rollback() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    h.mock.fail_transport("createvm");

    let err = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Transport(_)));
    assert_eq!(vm_rows(&h).await, 0);
    assert_eq!(h.mock.count_matching("unregistervm"), 0);
}

#[tokio::test]
async fn test_failed_local_commit_unregisters_remote_vm() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    sqlx::query(
        "CREATE TRIGGER fail_create_audit BEFORE INSERT ON audit_log
         WHEN NEW.action = 'create'
         BEGIN SELECT RAISE(ABORT, 'audit store unavailable'); END",
    )
    .execute(&h.pool)
    .await
    .unwrap();

    let err = h
        .orchestrator
        .create_vm(&alice, req("web01", 2048, 1, 512))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Database(_)));

    assert_eq!(vm_rows(&h).await, 0);
    assert_eq!(h.mock.count_matching("unregistervm web01 --delete"), 1);
    let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE status = 'pending'")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(pending, 0);
}

#[tokio::test]
async fn test_create_without_entitlement_is_distinct_from_quota() {
    let h = TestHarness::new().await;
    let bob = h.tenant("bob", Role::Standard).await.actor();

    let err = h
        .orchestrator
        .create_vm(&bob, req("web01", 1024, 1, 512))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::NoEntitlement {
            reason: EntitlementReason::NoSubscription,
            ..
        }
    ));
    assert!(err.is_denial());
    assert!(h.mock.commands().is_empty());
}

#[tokio::test]
async fn test_guest_cannot_operate() {
    let h = TestHarness::new().await;
    let guest = h.tenant("visitor", Role::Guest).await.actor();

    let err = h
        .orchestrator
        .create_vm(&guest, req("web01", 1024, 1, 512))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Forbidden(_)));

    let err = h.orchestrator.subscribe(&guest, "bronze").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Forbidden(_)));
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;

    let first = h.orchestrator.start_vm(&alice, &vm.id).await.unwrap();
    assert_eq!(first.value.status, VmStatus::Running);
    let second = h.orchestrator.start_vm(&alice, &vm.id).await.unwrap();
    assert_eq!(second.value.status, VmStatus::Running);

    assert_eq!(h.mock.count_matching("startvm web01 --type headless"), 1);
    assert_eq!(
        audit_actions(&h, &vm.id).await,
        vec![ActionKind::Create, ActionKind::Start]
    );
}

#[tokio::test]
async fn test_stop_is_symmetric() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;

    // Already stopped: nothing happens.
    h.orchestrator.stop_vm(&alice, &vm.id).await.unwrap();
    assert_eq!(h.mock.count_matching("acpipowerbutton"), 0);

    h.orchestrator.start_vm(&alice, &vm.id).await.unwrap();
    let stopped = h.orchestrator.stop_vm(&alice, &vm.id).await.unwrap();
    assert_eq!(stopped.value.status, VmStatus::Stopped);
    assert_eq!(h.mock.count_matching("controlvm web01 acpipowerbutton"), 1);

    let stored = h.orchestrator.get_vm(&alice, &vm.id).await.unwrap();
    assert_eq!(stored.status, VmStatus::Stopped);
}

#[tokio::test]
async fn test_concurrent_starts_issue_one_power_on() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;
    h.mock.set_delay(Duration::from_millis(20));

    let (a, b) = tokio::join!(
        h.orchestrator.start_vm(&alice, &vm.id),
        h.orchestrator.start_vm(&alice, &vm.id),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(h.mock.count_matching("startvm"), 1);
}

#[tokio::test]
async fn test_start_transport_failure_leaves_status() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;
    h.mock.fail_transport("startvm");

    let err = h.orchestrator.start_vm(&alice, &vm.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Transport(_)));
    assert!(!err.is_denial());

    let stored = h.orchestrator.get_vm(&alice, &vm.id).await.unwrap();
    assert_eq!(stored.status, VmStatus::Stopped);
}

#[tokio::test]
async fn test_audit_failure_after_start_is_a_reconciliation_warning() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;
    sqlx::query(
        "CREATE TRIGGER fail_start_audit BEFORE INSERT ON audit_log
         WHEN NEW.action = 'start'
         BEGIN SELECT RAISE(ABORT, 'audit store unavailable'); END",
    )
    .execute(&h.pool)
    .await
    .unwrap();

    let outcome = h.orchestrator.start_vm(&alice, &vm.id).await.unwrap();
    assert_eq!(outcome.value.status, VmStatus::Running);
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.warnings[0].operation, "start");
    assert_eq!(outcome.warnings[0].vm_name, "web01");
}

#[tokio::test]
async fn test_other_tenant_cannot_touch_vm() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let mallory = h.subscribed("mallory", "silver").await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;
    let before = h.mock.commands().len();

    let err = h.orchestrator.delete_vm(&mallory, &vm.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::OwnershipViolation { .. }));
    let err = h.orchestrator.start_vm(&mallory, &vm.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::OwnershipViolation { .. }));
    assert_eq!(h.mock.commands().len(), before);

    // Administrators bypass ownership.
    let admin = h.admin().await;
    h.orchestrator.start_vm(&admin, &vm.id).await.unwrap();
}

#[tokio::test]
async fn test_configure_running_vm_forces_power_off() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;
    h.orchestrator.start_vm(&alice, &vm.id).await.unwrap();

    let configured = h
        .orchestrator
        .configure_vm(
            &alice,
            &vm.id,
            ConfigureVmRequest {
                cpus: 4,
                memory_mb: 1024,
            },
        )
        .await
        .unwrap()
        .value;

    assert!(configured.forced_stop);
    assert_eq!(configured.vm.cpus, 2);
    assert_eq!(configured.vm.memory_mb, 1024);
    assert_eq!(configured.vm.status, VmStatus::Stopped);
    assert_eq!(configured.adjustments.len(), 1);

    let commands = h.mock.commands();
    let tail = &commands[commands.len() - 2..];
    assert_eq!(
        tail,
        [
            "vboxmanage controlvm web01 poweroff",
            "vboxmanage modifyvm web01 --memory 1024 --cpus 2",
        ]
    );

    let stored = h.orchestrator.get_vm(&alice, &vm.id).await.unwrap();
    assert_eq!(stored.status, VmStatus::Stopped);
    assert_eq!(stored.cpus, 2);
    assert_eq!(
        audit_actions(&h, &vm.id).await,
        vec![ActionKind::Create, ActionKind::Start, ActionKind::Configure]
    );
}

#[tokio::test]
async fn test_configure_stopped_vm_skips_power_off() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;

    let configured = h
        .orchestrator
        .configure_vm(
            &alice,
            &vm.id,
            ConfigureVmRequest {
                cpus: 2,
                memory_mb: 768,
            },
        )
        .await
        .unwrap()
        .value;
    assert!(!configured.forced_stop);
    assert!(configured.adjustments.is_empty());
    assert_eq!(h.mock.count_matching("poweroff"), 0);
}

#[tokio::test]
async fn test_delete_removes_row_keeps_audit() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;
    h.orchestrator
        .backup_vm(&alice, &vm.id, BackupRequest::default())
        .await
        .unwrap();

    let outcome = h.orchestrator.delete_vm(&alice, &vm.id).await.unwrap();
    assert!(outcome.is_clean());
    assert_eq!(h.mock.count_matching("unregistervm web01 --delete"), 1);

    let err = h.orchestrator.get_vm(&alice, &vm.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
    let backups: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM backups")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(backups, 0);

    assert_eq!(
        audit_actions(&h, &vm.id).await,
        vec![ActionKind::Create, ActionKind::Backup, ActionKind::Delete]
    );
}

#[tokio::test]
async fn test_remote_delete_failure_keeps_row() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;
    h.mock.fail_command(
        "unregistervm",
        "VBoxManage: error: Cannot unregister the machine 'web01' while it is locked",
    );

    let err = h.orchestrator.delete_vm(&alice, &vm.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Command { .. }));
    assert!(h.orchestrator.get_vm(&alice, &vm.id).await.is_ok());
}

#[tokio::test]
async fn test_backup_quota_is_separate_from_vm_quota() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "bronze").await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;

    let backup = h
        .orchestrator
        .backup_vm(
            &alice,
            &vm.id,
            BackupRequest {
                description: Some("before upgrade".into()),
            },
        )
        .await
        .unwrap()
        .value;
    assert_eq!(backup.tenant_id, alice.tenant_id);
    assert_eq!(backup.requested_by, alice.tenant_id);
    assert_eq!(
        h.mock
            .count_matching(&format!("snapshot web01 take {}", backup.snapshot_name)),
        1
    );

    let err = h
        .orchestrator
        .backup_vm(&alice, &vm.id, BackupRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::QuotaExceeded {
            resource: QuotaResource::Backups,
            usage: 1,
            limit: 1
        }
    ));
    assert_eq!(h.mock.count_matching("snapshot web01 take"), 1);

    let listed = h.orchestrator.list_backups(&alice, &vm.id).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_delegated_pool_is_shared() {
    let h = TestHarness::new().await;
    let parent = h.subscribed("parent", "silver").await;
    let child_a = h.tenant("child-a", Role::Standard).await.actor();
    let child_b = h.tenant("child-b", Role::Standard).await.actor();

    h.orchestrator
        .add_managed_tenant(&parent, "child-a")
        .await
        .unwrap();
    h.orchestrator
        .add_managed_tenant(&parent, "child-b")
        .await
        .unwrap();

    h.orchestrator
        .create_vm(&child_a, req("a1", 1024, 1, 512))
        .await
        .unwrap();
    h.orchestrator
        .create_vm(&child_b, req("b1", 1024, 1, 512))
        .await
        .unwrap();
    let err = h
        .orchestrator
        .create_vm(&child_a, req("a2", 1024, 1, 512))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::QuotaExceeded {
            resource: QuotaResource::Vms,
            usage: 2,
            limit: 2
        }
    ));

    let report = h.orchestrator.quota(&child_b).await.unwrap();
    assert_eq!(report.pool_owner, parent.tenant_id);
    assert_eq!(report.plan, "silver");
    assert_eq!(report.vms_used, 2);
    assert_eq!(report.max_vms, 2);

    let managed = h.orchestrator.list_managed_tenants(&parent).await.unwrap();
    let names: Vec<&str> = managed.iter().map(|t| t.username.as_str()).collect();
    assert_eq!(names, vec!["child-a", "child-b"]);
}

#[tokio::test]
async fn test_child_has_at_most_one_parent() {
    let h = TestHarness::new().await;
    let first = h.subscribed("first", "gold").await;
    let second = h.subscribed("second", "gold").await;
    let child = h.tenant("child", Role::Standard).await;

    h.orchestrator
        .add_managed_tenant(&first, "child")
        .await
        .unwrap();
    let err = h
        .orchestrator
        .add_managed_tenant(&second, "child")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Conflict(_)));

    // A parent cannot be pulled under another parent either.
    let err = h
        .orchestrator
        .add_managed_tenant(&second, "first")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Conflict(_)));

    let err = h
        .orchestrator
        .remove_managed_tenant(&second, &child.id)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));

    h.orchestrator
        .remove_managed_tenant(&first, &child.id)
        .await
        .unwrap();
    h.orchestrator
        .add_managed_tenant(&second, "child")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_overdue_extra_disk_payment_breaks_good_standing() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let payment = h
        .orchestrator
        .create_vm(&alice, req("web01", 2048, 1, 512))
        .await
        .unwrap()
        .value
        .payment
        .expect("extra disk is charged");

    assert!(!payment.is_overdue());
    assert!(!payment.is_overdue_at(payment.due_date));
    assert!(payment.is_overdue_at(payment.due_date + chrono::Duration::seconds(1)));
    assert!(h
        .orchestrator
        .is_in_good_standing(&alice.tenant_id)
        .await
        .unwrap());

    // Backdate the charge past its due date.
    let past = (Utc::now() - chrono::Duration::days(31)).timestamp();
    sqlx::query("UPDATE payments SET created_at = ?, due_date = ? WHERE id = ?")
        .bind(past - 30 * 86_400)
        .bind(past)
        .bind(&payment.id)
        .execute(&h.pool)
        .await
        .unwrap();
    assert!(!h
        .orchestrator
        .is_in_good_standing(&alice.tenant_id)
        .await
        .unwrap());
    assert!(!h.orchestrator.quota(&alice).await.unwrap().good_standing);

    let settled = h
        .orchestrator
        .complete_payment(&alice, &payment.id)
        .await
        .unwrap();
    assert!(!settled.is_overdue());
    assert!(h
        .orchestrator
        .is_in_good_standing(&alice.tenant_id)
        .await
        .unwrap());

    let err = h
        .orchestrator
        .complete_payment(&alice, &payment.id)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidState(_)));
}

#[tokio::test]
async fn test_transfer_reassigns_audits_and_notifies_both() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let bob = h.tenant("bob", Role::Standard).await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;

    let moved = h
        .orchestrator
        .transfer_vm(
            &alice,
            &vm.id,
            TransferVmRequest {
                new_owner: "bob".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.owner_id, bob.id);

    let stored = h.orchestrator.get_vm(&bob.actor(), &vm.id).await.unwrap();
    assert_eq!(stored.owner_id, bob.id);

    let admin = h.admin().await;
    let entries = h
        .orchestrator
        .audit_log(
            &admin,
            &AuditFilter {
                vm_id: Some(vm.id.clone()),
                action: Some(ActionKind::Transfer),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].actor_id, alice.tenant_id);

    let recipients: Vec<String> = h
        .notifier
        .sent()
        .into_iter()
        .map(|n| n.recipient)
        .collect();
    assert_eq!(recipients, vec!["bob@example.com", "alice@example.com"]);
}

#[tokio::test]
async fn test_transfer_to_unknown_tenant_changes_nothing() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;

    let err = h
        .orchestrator
        .transfer_vm(
            &alice,
            &vm.id,
            TransferVmRequest {
                new_owner: "ghost".into(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));

    let stored = h.orchestrator.get_vm(&alice, &vm.id).await.unwrap();
    assert_eq!(stored.owner_id, alice.tenant_id);
    assert!(h.notifier.sent().is_empty());
    assert_eq!(audit_actions(&h, &vm.id).await, vec![ActionKind::Create]);
}

#[tokio::test]
async fn test_transfer_survives_notification_failure() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let bob = h.tenant("bob", Role::Standard).await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;
    h.notifier.set_failing(true);

    let moved = h
        .orchestrator
        .transfer_vm(
            &alice,
            &vm.id,
            TransferVmRequest {
                new_owner: "bob".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.owner_id, bob.id);
    assert_eq!(h.notifier.sent().len(), 2);
}

#[tokio::test]
async fn test_inspection_reads_hypervisor_output() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;

    h.mock.respond(
        "showvminfo web01 --machinereadable",
        "name=\"web01\"\nVMState=\"poweroff\"\n",
    );
    h.mock.respond(
        "snapshot web01 list",
        "   Name: backup-20240101T000000Z (UUID: 1111)\n",
    );

    assert_eq!(
        h.orchestrator.vm_state(&alice, &vm.id).await.unwrap(),
        "poweroff"
    );
    assert_eq!(
        h.orchestrator.list_snapshots(&alice, &vm.id).await.unwrap(),
        vec!["backup-20240101T000000Z"]
    );

    let listed = h.orchestrator.list_vms(&alice).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_admin_only_operations() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;

    let err = h
        .orchestrator
        .audit_log(&alice, &AuditFilter::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Forbidden(_)));
    let err = h.orchestrator.list_all_payments(&alice).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Forbidden(_)));

    let admin = h.admin().await;
    assert_eq!(h.orchestrator.list_all_payments(&admin).await.unwrap().len(), 1);
    h.orchestrator
        .deactivate_subscription(&admin, &alice.tenant_id)
        .await
        .unwrap();

    let err = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::NoEntitlement {
            reason: EntitlementReason::Inactive,
            ..
        }
    ));
}

#[tokio::test]
async fn test_dropped_create_still_finishes_on_its_own_task() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    h.mock.set_delay(Duration::from_millis(100));

    // The caller gives up during the second remote step.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(150),
        h.orchestrator.create_vm(&alice, req("web01", 1024, 1, 512)),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(vm_rows(&h).await, 1);
    assert_eq!(h.mock.count_matching("createvm --name web01"), 1);
    assert_eq!(h.mock.count_matching("createhd"), 1);
    assert_eq!(h.mock.count_matching("unregistervm"), 0);

    let vms = h.orchestrator.list_vms(&alice).await.unwrap();
    assert_eq!(vms.len(), 1);
    assert_eq!(audit_actions(&h, &vms[0].id).await, vec![ActionKind::Create]);
}

#[tokio::test]
async fn test_failed_rollback_rides_on_the_create_error() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    h.mock.fail_command(
        "createhd",
        "VBoxManage: error: Failed to create medium: disk full",
    );
    h.mock.fail_transport("unregistervm");

    let err = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap_err();

    assert!(matches!(err.root(), OrchestratorError::Command { .. }));
    assert_eq!(err.kind(), "command_error");
    assert!(!err.is_denial());
    assert_eq!(err.warnings().len(), 1);
    assert_eq!(err.warnings()[0].operation, "create");
    assert_eq!(err.warnings()[0].vm_name, "web01");
    assert!(err.warnings()[0].detail.contains("orphaned"));

    assert_eq!(vm_rows(&h).await, 0);
    assert_eq!(h.mock.count_matching("unregistervm web01 --delete"), 1);
}

#[tokio::test]
async fn test_failed_resize_after_forced_stop_records_the_stop() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;
    h.orchestrator.start_vm(&alice, &vm.id).await.unwrap();
    h.mock.fail_command(
        "modifyvm web01 --memory 1024",
        "VBoxManage: error: The machine is not mutable",
    );

    let err = h
        .orchestrator
        .configure_vm(
            &alice,
            &vm.id,
            ConfigureVmRequest {
                cpus: 2,
                memory_mb: 1024,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Command { .. }));
    assert!(err.warnings().is_empty());

    let stored = h.orchestrator.get_vm(&alice, &vm.id).await.unwrap();
    assert_eq!(stored.status, VmStatus::Stopped);
    assert_eq!(stored.memory_mb, 512);
    assert_eq!(
        audit_actions(&h, &vm.id).await,
        vec![ActionKind::Create, ActionKind::Start, ActionKind::Stop]
    );
}

#[tokio::test]
async fn test_configure_persist_failure_is_a_reconciliation_warning() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;
    sqlx::query(
        "CREATE TRIGGER fail_configure_audit BEFORE INSERT ON audit_log
         WHEN NEW.action = 'configure'
         BEGIN SELECT RAISE(ABORT, 'audit store unavailable'); END",
    )
    .execute(&h.pool)
    .await
    .unwrap();

    let outcome = h
        .orchestrator
        .configure_vm(
            &alice,
            &vm.id,
            ConfigureVmRequest {
                cpus: 2,
                memory_mb: 1024,
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.value.vm.memory_mb, 1024);
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.warnings[0].operation, "configure");
    assert_eq!(h.mock.count_matching("modifyvm web01 --memory 1024"), 1);

    // The resize and its audit entry roll back together.
    let stored = h.orchestrator.get_vm(&alice, &vm.id).await.unwrap();
    assert_eq!(stored.memory_mb, 512);
    assert_eq!(audit_actions(&h, &vm.id).await, vec![ActionKind::Create]);
}

#[tokio::test]
async fn test_transfer_persist_failure_sends_no_notifications() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    h.tenant("bob", Role::Standard).await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;
    sqlx::query(
        "CREATE TRIGGER fail_transfer_audit BEFORE INSERT ON audit_log
         WHEN NEW.action = 'transfer'
         BEGIN SELECT RAISE(ABORT, 'audit store unavailable'); END",
    )
    .execute(&h.pool)
    .await
    .unwrap();

    let err = h
        .orchestrator
        .transfer_vm(
            &alice,
            &vm.id,
            TransferVmRequest {
                new_owner: "bob".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "internal");

    let stored = h.orchestrator.get_vm(&alice, &vm.id).await.unwrap();
    assert_eq!(stored.owner_id, alice.tenant_id);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_delete_persist_failure_is_a_reconciliation_warning() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;
    sqlx::query(
        "CREATE TRIGGER fail_delete_audit BEFORE INSERT ON audit_log
         WHEN NEW.action = 'delete'
         BEGIN SELECT RAISE(ABORT, 'audit store unavailable'); END",
    )
    .execute(&h.pool)
    .await
    .unwrap();

    let outcome = h.orchestrator.delete_vm(&alice, &vm.id).await.unwrap();
    assert_eq!(outcome.value.id, vm.id);
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.warnings[0].operation, "delete");
    assert_eq!(h.mock.count_matching("unregistervm web01 --delete"), 1);

    // Remote VM gone, record still present.
    assert_eq!(vm_rows(&h).await, 1);
}

#[tokio::test]
async fn test_backups_in_the_same_second_get_distinct_snapshots() {
    let h = TestHarness::new().await;
    h.plan("roomy", 5, 5).await;
    let alice = h.subscribed("alice", "roomy").await;
    let vm = h
        .orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap()
        .value
        .vm;

    let first = h
        .orchestrator
        .backup_vm(&alice, &vm.id, BackupRequest::default())
        .await
        .unwrap()
        .value;
    let second = h
        .orchestrator
        .backup_vm(&alice, &vm.id, BackupRequest::default())
        .await
        .unwrap()
        .value;

    assert_ne!(first.snapshot_name, second.snapshot_name);
    assert_eq!(h.mock.count_matching("snapshot web01 take backup-"), 2);
    assert_eq!(h.orchestrator.list_backups(&alice, &vm.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_admin_reactivates_a_deactivated_subscription() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let admin = h.admin().await;
    h.orchestrator
        .deactivate_subscription(&admin, &alice.tenant_id)
        .await
        .unwrap();

    let err = h
        .orchestrator
        .activate_subscription(&alice, &alice.tenant_id)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Forbidden(_)));

    let reopened = h
        .orchestrator
        .activate_subscription(&admin, &alice.tenant_id)
        .await
        .unwrap();
    assert!(reopened.active);
    assert!(reopened.end_date.is_none());
    assert_eq!(reopened.plan_name.as_deref(), Some("silver"));

    h.orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap();

    let bob = h.tenant("bob", Role::Standard).await;
    let err = h
        .orchestrator
        .activate_subscription(&admin, &bob.id)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[tokio::test]
async fn test_change_plan_rebinds_without_checkout() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "bronze").await;
    h.orchestrator
        .create_vm(&alice, req("web01", 1024, 1, 512))
        .await
        .unwrap();
    let err = h
        .orchestrator
        .create_vm(&alice, req("web02", 1024, 1, 512))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::QuotaExceeded { .. }));
    let payments_before = h.orchestrator.list_payments(&alice).await.unwrap().len();

    let changed = h.orchestrator.change_plan(&alice, "silver").await.unwrap();
    assert_eq!(changed.plan_name.as_deref(), Some("silver"));
    assert!(changed.active);

    h.orchestrator
        .create_vm(&alice, req("web02", 1024, 1, 512))
        .await
        .unwrap();
    assert_eq!(
        h.orchestrator.list_payments(&alice).await.unwrap().len(),
        payments_before
    );

    let err = h.orchestrator.change_plan(&alice, "diamond").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[tokio::test]
async fn test_change_plan_needs_an_own_subscription() {
    let h = TestHarness::new().await;
    let parent = h.subscribed("parent", "silver").await;
    let child = h.tenant("child", Role::Standard).await.actor();
    h.orchestrator
        .add_managed_tenant(&parent, "child")
        .await
        .unwrap();

    let err = h.orchestrator.change_plan(&child, "gold").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidState(_)));

    let loner = h.tenant("loner", Role::Standard).await.actor();
    let err = h.orchestrator.change_plan(&loner, "gold").await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::NoEntitlement {
            reason: EntitlementReason::NoSubscription,
            ..
        }
    ));

    let guest = h.tenant("visitor", Role::Guest).await.actor();
    let err = h.orchestrator.change_plan(&guest, "gold").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Forbidden(_)));
}

#[tokio::test]
async fn test_tenant_reports_show_standing_and_activity() {
    let h = TestHarness::new().await;
    let alice = h.subscribed("alice", "silver").await;
    let bob = h.subscribed("bob", "silver").await;
    h.tenant("carol", Role::Guest).await;
    let admin = h.admin().await;
    // A disk beyond the free allowance leaves a pending charge.
    h.orchestrator
        .create_vm(&alice, req("web01", 2048, 1, 512))
        .await
        .unwrap();

    sqlx::query("UPDATE payments SET due_date = 0 WHERE tenant_id = ? AND status = 'pending'")
        .bind(&alice.tenant_id)
        .execute(&h.pool)
        .await
        .unwrap();
    h.orchestrator
        .deactivate_subscription(&admin, &bob.tenant_id)
        .await
        .unwrap();

    let err = h.orchestrator.tenant_reports(&alice).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Forbidden(_)));

    let reports = h.orchestrator.tenant_reports(&admin).await.unwrap();
    let names: Vec<&str> = reports.iter().map(|r| r.username.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob", "carol", "root"]);

    let alice_report = &reports[0];
    assert!(alice_report.has_overdue_payments);
    assert!(alice_report.is_active);
    assert_eq!(alice_report.plan.as_deref(), Some("silver"));

    let bob_report = &reports[1];
    assert!(!bob_report.has_overdue_payments);
    assert!(!bob_report.is_active);

    let carol_report = &reports[2];
    assert_eq!(carol_report.role, Role::Guest);
    assert!(!carol_report.is_active);
    assert!(carol_report.plan.is_none());

    let single = h
        .orchestrator
        .tenant_report(&admin, &bob.tenant_id)
        .await
        .unwrap();
    assert_eq!(single.username, "bob");

    let err = h
        .orchestrator
        .tenant_report(&admin, "no-such-tenant")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}
