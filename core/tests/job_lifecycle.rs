use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use core_test_support::ScriptedAppliance;
use core_test_support::fast_timing;
use core_test_support::wait_for_done;
use opsdesk_core::AutomationService;
use opsdesk_core::JobOwner;
use opsdesk_core::JobStatus;
use opsdesk_core::OpsConfig;
use opsdesk_core::OpsErr;
use opsdesk_core::SystemTag;
use opsdesk_core::credentials::Credentials;
use opsdesk_core::credentials::MemoryCredentialStore;
use opsdesk_core::progress::ProgressSink;
use pretty_assertions::assert_eq;
use serde_json::json;

fn service(appliance: &ScriptedAppliance, store: MemoryCredentialStore) -> AutomationService {
    let config = OpsConfig {
        shell: fast_timing(),
        ..OpsConfig::default()
    };
    AutomationService::new(config, Arc::new(store), Arc::new(appliance.clone()))
}

fn admin_credentials() -> MemoryCredentialStore {
    let store = MemoryCredentialStore::new();
    store.insert_shared("vpn", Credentials::new("admin", "Sup3rSecret").expect("credentials"));
    store
}

#[tokio::test]
async fn invalid_parameters_never_create_a_job() {
    let appliance = ScriptedAppliance::new();
    let service = service(&appliance, admin_credentials());
    let owner = JobOwner::new(1, "operator");

    let err = service
        .submit(
            &owner,
            SystemTag::Vpn,
            "add_user",
            json!({
                "vpn_user": "alice",
                "description": "Alice",
                "mail": "not-a-mail",
                "status": "enabled",
            }),
            None,
        )
        .expect_err("bad mail must be rejected");

    assert!(matches!(err, OpsErr::InvalidRequest(_)), "{err:?}");
    assert!(service.jobs().is_empty());
    assert!(appliance.logins().is_empty());
}

#[tokio::test]
async fn missing_credentials_never_create_a_job() {
    let appliance = ScriptedAppliance::new();
    let service = service(&appliance, MemoryCredentialStore::new());
    let owner = JobOwner::new(1, "operator");

    let err = service
        .submit(&owner, SystemTag::Vpn, "search_user", json!({ "description": "x" }), None)
        .expect_err("no credentials");

    assert!(matches!(err, OpsErr::Credentials(_)), "{err:?}");
    assert!(service.jobs().is_empty());
}

#[tokio::test]
async fn unsupported_operations_are_refused_up_front() {
    let appliance = ScriptedAppliance::new();
    let service = service(&appliance, admin_credentials());
    let owner = JobOwner::new(1, "operator");

    for (system, operation) in [
        (SystemTag::Vpn, "export_excel"),
        (SystemTag::Vpn, "reboot"),
        (SystemTag::Directory, "unlock_user"),
        (SystemTag::Print, "list_printers"),
    ] {
        let err = service
            .submit(&owner, system, operation, json!({}), None)
            .expect_err("unsupported");
        assert!(matches!(err, OpsErr::Unsupported { .. }), "{operation}: {err:?}");
    }
    assert!(service.jobs().is_empty());
}

#[tokio::test]
async fn jobs_are_only_visible_to_their_owner() {
    let appliance = ScriptedAppliance::new();
    let service = service(&appliance, admin_credentials());
    let owner = JobOwner::new(1, "operator");
    let stranger = JobOwner::new(2, "someone-else");

    let id = service
        .submit(&owner, SystemTag::Vpn, "search_user", json!({ "description": "x" }), None)
        .expect("submit");

    assert!(service.poll(&id, &stranger).is_none());
    let view = wait_for_done(&service, &id, &owner, Duration::from_secs(10)).await;
    assert_eq!(view.job_id, id);
    assert_eq!(view.system, SystemTag::Vpn);
    assert_eq!(view.operation, "search_user");
    assert!(service.poll(&id, &stranger).is_none());
}

#[tokio::test]
async fn observer_sees_every_progress_line() {
    let listing = "name a id 1 description 'Team' group default^root role none mail a@example.com phone - invalid no \r\n\
        name b id 2 description 'Team' group default^root role none mail b@example.com phone - invalid no \r\n";
    let appliance = ScriptedAppliance::new().reply("aaaa user user search", listing);
    let service = service(&appliance, admin_credentials());
    let owner = JobOwner::new(1, "operator");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let observer: Arc<dyn ProgressSink> = Arc::new(move |line: &str, processed: usize, total: usize| {
        if let Ok(mut seen) = sink.lock() {
            seen.push((line.to_string(), processed, total));
        }
    });

    let id = service
        .submit(&owner, SystemTag::Vpn, "search_user", json!({ "description": "Team" }), Some(observer))
        .expect("submit");
    let view = wait_for_done(&service, &id, &owner, Duration::from_secs(10)).await;

    let seen = seen.lock().expect("observer lock").clone();
    assert_eq!(seen.len(), 2);
    assert_eq!((seen[0].1, seen[0].2), (1, 2));
    assert!(seen[1].0.starts_with("name: b"), "{}", seen[1].0);
    assert_eq!(view.status, JobStatus::Success);
}

#[tokio::test]
async fn refused_login_fails_the_job() {
    let appliance = ScriptedAppliance::new().refuse_logins(1);
    let service = service(&appliance, admin_credentials());
    let owner = JobOwner::new(1, "operator");

    let id = service
        .submit(&owner, SystemTag::Vpn, "modify_status", json!({ "vpn_user": "bob" }), None)
        .expect("submit");
    let view = wait_for_done(&service, &id, &owner, Duration::from_secs(10)).await;

    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.done);
    assert!(!view.ok);
    assert_eq!(view.progress, 100);
    assert_eq!(view.message, "execution failed");
    assert_eq!(view.error, "authentication rejected for account admin");
    assert!(appliance.commands().is_empty());
}
