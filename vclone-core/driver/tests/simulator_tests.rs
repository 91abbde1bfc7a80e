//! 模拟器驱动测试

use std::net::IpAddr;
use vclone_driver::*;

fn credentials() -> Credentials {
    Credentials {
        username: "administrator@vsphere.local".into(),
        password: "secret".into(),
        insecure: true,
    }
}

async fn logged_in() -> Simulator {
    let sim = Simulator::new();
    sim.login(&credentials()).await.unwrap();
    sim
}

fn clone_request(sim_source: ObjectRef, name: &str) -> CloneRequest {
    CloneRequest {
        source: sim_source,
        name: name.into(),
        folder: ObjectRef::new(InventoryKind::Folder, "group-v3"),
        resource_pool: None,
        host: None,
        datastore: None,
        linked_snapshot: None,
        num_cpus: None,
        cores_per_socket: None,
        memory_mb: None,
        disk_size_mb: None,
        network: None,
        mac_address: None,
        annotation: None,
    }
}

async fn wait_task(sim: &Simulator, task: &ObjectRef) -> TaskInfo {
    for _ in 0..20 {
        let info = sim.task_info(task).await.unwrap();
        if info.state.is_finished() {
            return info;
        }
    }
    panic!("任务未完成");
}

#[tokio::test]
async fn test_operations_require_session() {
    let sim = Simulator::new();
    let result = sim
        .find_objects(InventoryKind::Datacenter, &Lookup::named("DC0"))
        .await;
    assert!(matches!(result, Err(DriverError::AuthError(_))));
}

#[tokio::test]
async fn test_untrusted_certificate() {
    let sim = Simulator::with_behavior(SimBehavior {
        untrusted_certificate: true,
        ..Default::default()
    });

    let strict = Credentials {
        insecure: false,
        ..credentials()
    };
    let err = sim.login(&strict).await.unwrap_err();
    assert!(matches!(err, DriverError::CertificateError(_)));
    assert!(err.is_connection_failure());

    sim.login(&credentials()).await.unwrap();
    assert!(sim.session_active().await);
}

#[tokio::test]
async fn test_wrong_password() {
    let sim = Simulator::with_behavior(SimBehavior {
        password: Some("right".into()),
        ..Default::default()
    });
    assert!(matches!(
        sim.login(&credentials()).await,
        Err(DriverError::AuthError(_))
    ));
}

#[tokio::test]
async fn test_find_by_name_and_path() {
    let sim = logged_in().await;

    let by_name = sim
        .find_objects(InventoryKind::Cluster, &Lookup::named("DC0_C0"))
        .await
        .unwrap();
    assert_eq!(by_name.len(), 1);

    let by_path = sim
        .find_objects(InventoryKind::Cluster, &Lookup::named("/DC0/host/DC0_C0"))
        .await
        .unwrap();
    assert_eq!(by_path[0].reference, by_name[0].reference);

    let dc = sim
        .find_objects(InventoryKind::Datacenter, &Lookup::named("DC0"))
        .await
        .unwrap();
    let scoped = sim
        .find_objects(
            InventoryKind::Network,
            &Lookup::named("VM Network").within(&dc[0].reference),
        )
        .await
        .unwrap();
    assert_eq!(scoped[0].reference.to_string(), "Network:network-7");

    let missing = sim
        .find_objects(InventoryKind::Host, &Lookup::named("nope"))
        .await
        .unwrap();
    assert!(missing.is_empty());
}

#[tokio::test]
async fn test_clone_creates_vm_after_polls() {
    let sim = Simulator::with_behavior(SimBehavior {
        clone_polls: 3,
        ..Default::default()
    });
    sim.login(&credentials()).await.unwrap();

    let source = sim.vm_ref("DC0_C0_RP0_VM0").await.unwrap();
    let mut req = clone_request(source, "clone-1");
    req.num_cpus = Some(2);
    req.memory_mb = Some(4096);
    req.annotation = Some("simple vm description".into());

    let task = sim.clone_vm(&req).await.unwrap();

    let first = sim.task_info(&task).await.unwrap();
    assert_eq!(first.state, TaskState::Running);
    assert!(sim.vm_by_name("clone-1").await.is_none());

    let info = wait_task(&sim, &task).await;
    assert_eq!(info.state, TaskState::Success);

    let config = sim.vm_config(info.result.as_ref().unwrap()).await.unwrap();
    assert_eq!(config.num_cpu, 2);
    assert_eq!(config.memory_mb, 4096);
    assert_eq!(config.annotation, "simple vm description");
    assert_eq!(config.vm_dir, "[LocalDS_0] clone-1");
}

#[tokio::test]
async fn test_clone_fault_leaves_partial_vm() {
    let sim = Simulator::with_behavior(SimBehavior {
        clone_fault: Some("InsufficientResourcesFault".into()),
        clone_leaves_partial: true,
        ..Default::default()
    });
    sim.login(&credentials()).await.unwrap();

    let source = sim.vm_ref("DC0_C0_RP0_VM0").await.unwrap();
    let task = sim.clone_vm(&clone_request(source, "broken")).await.unwrap();
    let info = wait_task(&sim, &task).await;

    assert_eq!(info.state, TaskState::Error);
    assert_eq!(info.error.as_deref(), Some("InsufficientResourcesFault"));
    assert_eq!(info.result, sim.vm_ref("broken").await);
    assert!(info.result.is_some());
}

#[tokio::test]
async fn test_cancel_task() {
    let sim = Simulator::with_behavior(SimBehavior {
        clone_polls: 10,
        ..Default::default()
    });
    sim.login(&credentials()).await.unwrap();

    let source = sim.vm_ref("DC0_C0_RP0_VM0").await.unwrap();
    let task = sim.clone_vm(&clone_request(source, "c")).await.unwrap();
    sim.cancel_task(&task).await.unwrap();

    let info = sim.task_info(&task).await.unwrap();
    assert_eq!(info.state, TaskState::Error);
    assert!(sim.vm_by_name("c").await.is_none());
}

#[tokio::test]
async fn test_customization_progresses_after_power_on() {
    let sim = Simulator::with_behavior(SimBehavior {
        customization: CustomizationOutcome::SucceedAfter(2),
        guest_ip: GuestIpBehavior::After(1, "10.0.0.5".parse().unwrap()),
        ..Default::default()
    });
    sim.login(&credentials()).await.unwrap();
    let vm = sim.vm_ref("DC0_C0_RP0_VM1").await.unwrap();

    let spec = CustomizationSpec {
        identity: Identity::Linux(LinuxPrep {
            host_name: "web01".into(),
            domain: "local".into(),
            time_zone: None,
            hw_clock_utc: true,
        }),
        adapters: vec![AdapterMapping::default()],
        global_ip: GlobalIpSettings::default(),
    };
    sim.customize(&vm, &spec).await.unwrap();

    assert_eq!(
        sim.customization_status(&vm).await.unwrap(),
        CustomizationStatus::Pending
    );

    sim.power_on(&vm).await.unwrap();
    assert!(sim.guest_net(&vm).await.unwrap().ip_addresses.is_empty());
    assert_eq!(
        sim.customization_status(&vm).await.unwrap(),
        CustomizationStatus::Running
    );
    assert_eq!(
        sim.customization_status(&vm).await.unwrap(),
        CustomizationStatus::Succeeded
    );

    let net = sim.guest_net(&vm).await.unwrap();
    assert_eq!(net.ip_addresses, vec!["10.0.0.5".parse::<IpAddr>().unwrap()]);
}

#[tokio::test]
async fn test_shutdown_and_template() {
    let sim = Simulator::with_behavior(SimBehavior {
        shutdown_polls: 2,
        ..Default::default()
    });
    sim.login(&credentials()).await.unwrap();
    let vm = sim.vm_ref("DC0_C0_RP0_VM0").await.unwrap();

    sim.power_on(&vm).await.unwrap();
    assert!(sim.mark_as_template(&vm).await.is_err());

    sim.shutdown_guest(&vm).await.unwrap();
    assert_eq!(sim.power_state(&vm).await.unwrap(), PowerState::PoweredOn);
    assert_eq!(sim.power_state(&vm).await.unwrap(), PowerState::PoweredOff);

    sim.mark_as_template(&vm).await.unwrap();
    assert!(sim.vm_by_name("DC0_C0_RP0_VM0").await.unwrap().is_template);
}

#[tokio::test]
async fn test_removable_devices_need_power_off() {
    let sim = logged_in().await;
    let vm = sim.vm_ref("DC0_C0_RP0_VM0").await.unwrap();
    let device = CdromDevice {
        controller: CdromController::Sata,
        iso_path: Some("[LocalDS_0] iso/tools.iso".into()),
    };

    sim.power_on(&vm).await.unwrap();
    assert!(sim.add_cdrom(&vm, &device).await.is_err());
    sim.power_off(&vm).await.unwrap();

    sim.add_cdrom(&vm, &device).await.unwrap();
    sim.add_floppy(&vm, "[LocalDS_0] floppy/answer.flp").await.unwrap();
    assert_eq!(sim.cdroms("DC0_C0_RP0_VM0").await, vec![device]);

    assert_eq!(sim.remove_cdroms(&vm).await.unwrap(), 1);
    assert_eq!(sim.remove_cdroms(&vm).await.unwrap(), 0);
    assert_eq!(sim.remove_floppies(&vm).await.unwrap(), 1);
    assert!(sim.floppies("DC0_C0_RP0_VM0").await.is_empty());
}

#[tokio::test]
async fn test_export_download() {
    let sim = logged_in().await;
    let vm = sim.vm_ref("DC0_C0_RP0_VM0").await.unwrap();
    let dir = tempfile::tempdir().unwrap();

    let lease = sim.export_lease(&vm).await.unwrap();
    assert!(lease.descriptor.contains("DC0_C0_RP0_VM0"));
    assert_eq!(lease.items.len(), 1);

    let dest = dir.path().join(&lease.items[0].name);
    let written = sim.download(&lease.items[0], &dest).await.unwrap();
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), written);

    sim.complete_export(&vm).await.unwrap();
}

#[tokio::test]
async fn test_handles_have_separate_sessions() {
    let sim = Simulator::new();
    let endpoint = Endpoint {
        server: "vcenter.local".into(),
        insecure: true,
    };

    let a = sim.new_session(&endpoint).unwrap();
    let b = sim.new_session(&endpoint).unwrap();
    a.login(&credentials()).await.unwrap();

    assert!(a.session_active().await);
    assert!(!b.session_active().await);
    assert_eq!(sim.active_sessions().await, 1);

    a.logout().await.unwrap();
    assert_eq!(sim.active_sessions().await, 0);
}

#[tokio::test]
async fn test_calls_are_recorded() {
    let sim = logged_in().await;
    sim.find_vms(&VmQuery::Name("DC0_C0_RP0_VM0".into()))
        .await
        .unwrap();

    assert_eq!(sim.count_calls("find_vms").await, 1);
    assert_eq!(sim.count_calls("clone_vm").await, 0);
    assert_eq!(sim.calls().await, vec!["login", "find_vms"]);
}
