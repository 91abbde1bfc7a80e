//! 流水线集成测试（基于模拟器）

mod common;

use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;
use vclone_builder::config::{
    CdromType, ContentLibraryDestinationConfig, ExportConfig, ExportFormat,
};
use vclone_builder::*;
use vclone_driver::{CustomizationOutcome, GuestIpBehavior, SimBehavior, Simulator};

use common::{base_config, builder, linux_customize, SOURCE_VM};

#[tokio::test(start_paused = true)]
async fn test_full_build() {
    let sim = Simulator::new();
    let mut config = base_config("build-1");
    config.hardware.cpus = Some(2);
    config.hardware.cpu_cores = Some(1);
    config.hardware.ram = Some(4096);
    config.hardware.cpu_hot_plug = true;
    config.clone.notes = Some("simple vm description".into());
    config.customize = Some(linux_customize(Duration::from_secs(600)));
    config.create_snapshot = true;

    let (artifact, report) = builder(config, &sim).run().await.unwrap();

    assert_eq!(artifact.id(), "build-1");
    assert_eq!(artifact.builder_id(), BUILDER_ID);
    assert!(report.is_success());
    assert_eq!(report.step(Stage::Snapshot).unwrap().status, StepStatus::Success);
    assert_eq!(report.step(Stage::Export).unwrap().status, StepStatus::Skipped);

    let vm = sim.vm_by_name("build-1").await.unwrap();
    assert_eq!(vm.num_cpu, 2);
    assert_eq!(vm.memory_mb, 4096);
    assert!(!vm.power_state.is_on());
    assert_eq!(sim.snapshot_names("build-1").await, vec!["Created by vclone"]);
    assert_eq!(sim.reconfigurations("build-1").await.len(), 1);
    assert!(sim.customization_spec("build-1").await.is_some());

    assert_eq!(
        artifact.state("ip_address"),
        Some(serde_json::json!("192.168.1.100"))
    );
    assert_eq!(sim.active_sessions().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_linked_clone_without_snapshot() {
    let sim = Simulator::new();
    let mut config = base_config("linked-1");
    config.clone.linked_clone = true;

    let err = builder(config, &sim).run().await.unwrap_err();

    assert_eq!(err.stage, Stage::Clone);
    assert_eq!(err.source.kind(), "InvalidCloneSpecError");
    assert_eq!(sim.count_calls("clone_vm").await, 0);
    assert_eq!(sim.active_sessions().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_linked_clone_named_snapshot_missing() {
    let sim = Simulator::new();
    sim.add_snapshot(SOURCE_VM, "base").await.unwrap();

    let mut config = base_config("linked-2");
    config.clone.linked_clone = true;
    config.clone.snapshot = Some("other".into());

    let err = builder(config, &sim).run().await.unwrap_err();
    assert_eq!(err.source.kind(), "InvalidCloneSpecError");
    assert_eq!(sim.count_calls("clone_vm").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_linked_clone_uses_current_snapshot() {
    let sim = Simulator::new();
    sim.add_snapshot(SOURCE_VM, "base").await.unwrap();

    let mut config = base_config("linked-3");
    config.clone.linked_clone = true;

    let (artifact, _) = builder(config, &sim).run().await.unwrap();
    assert_eq!(artifact.id(), "linked-3");
    assert_eq!(sim.count_calls("clone_vm").await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_customization_timeout_skips_ip_wait() {
    let sim = Simulator::with_behavior(SimBehavior {
        customization: CustomizationOutcome::Never,
        ..Default::default()
    });
    let mut config = base_config("custom-1");
    config.customize = Some(linux_customize(Duration::from_secs(60)));

    let err = builder(config, &sim).run().await.unwrap_err();

    assert_eq!(err.stage, Stage::WaitCustomization);
    assert_eq!(err.source.kind(), "CustomizationTimeoutError");
    assert_eq!(sim.count_calls("guest_net").await, 0);
    // 关机之前的失败会删除虚拟机
    assert!(sim.vm_by_name("custom-1").await.is_none());
    assert!(err.warnings.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_customization_failure_reported() {
    let sim = Simulator::with_behavior(SimBehavior {
        customization: CustomizationOutcome::FailAfter(2, "sysprep 失败".into()),
        ..Default::default()
    });
    let mut config = base_config("custom-2");
    config.customize = Some(linux_customize(Duration::from_secs(600)));

    let err = builder(config, &sim).run().await.unwrap_err();
    assert_eq!(err.source.kind(), "CustomizationFailedError");
    assert!(err.source.to_string().contains("sysprep 失败"));
}

#[tokio::test(start_paused = true)]
async fn test_guest_unreachable_without_customization() {
    let sim = Simulator::with_behavior(SimBehavior {
        guest_ip: GuestIpBehavior::Never,
        ..Default::default()
    });
    let mut config = base_config("ip-1");
    config.wait_ip.ip_wait_timeout = Duration::from_secs(120);

    let err = builder(config, &sim).run().await.unwrap_err();

    assert_eq!(err.stage, Stage::WaitForIp);
    assert_eq!(err.source.kind(), "GuestUnreachableError");
    assert_eq!(
        err.report.step(Stage::WaitCustomization).unwrap().status,
        StepStatus::Skipped
    );
    assert!(sim.count_calls("guest_net").await > 0);
}

#[tokio::test(start_paused = true)]
async fn test_ip_filter_and_settle() {
    let outside: IpAddr = "172.16.0.5".parse().unwrap();
    let inside: IpAddr = "10.20.0.8".parse().unwrap();
    let sim = Simulator::with_behavior(SimBehavior {
        guest_ip: GuestIpBehavior::Sequence(vec![vec![], vec![outside], vec![outside, inside]]),
        ..Default::default()
    });
    let mut config = base_config("ip-2");
    config.wait_ip.ip_wait_address = "10.0.0.0/8".parse().unwrap();

    let (artifact, _) = builder(config, &sim).run().await.unwrap();
    assert_eq!(artifact.state("ip_address"), Some(serde_json::json!("10.20.0.8")));
}

#[tokio::test(start_paused = true)]
async fn test_iso_attached_then_removed() {
    let sim = Simulator::new();
    let mut config = base_config("media-1");
    config.cdrom.cdrom_type = CdromType::Sata;
    config.cdrom.iso_paths = vec![
        "[LocalDS_0] iso/os.iso".into(),
        "[LocalDS_0] iso/tools.iso".into(),
    ];
    config.cdrom.remove_cdrom = true;

    let (_, report) = builder(config, &sim).run().await.unwrap();

    assert_eq!(report.step(Stage::AttachMedia).unwrap().status, StepStatus::Success);
    assert_eq!(report.step(Stage::DetachMedia).unwrap().status, StepStatus::Success);
    assert_eq!(sim.count_calls("add_cdrom").await, 2);
    assert_eq!(sim.count_calls("remove_cdroms").await, 1);
    assert_eq!(sim.count_calls("remove_floppies").await, 0);
    assert!(sim.cdroms("media-1").await.is_empty());

    let calls = sim.calls().await;
    let attached = calls.iter().position(|c| c == "add_cdrom").unwrap();
    let powered = calls.iter().position(|c| c == "power_on").unwrap();
    assert!(attached < powered);
}

#[tokio::test(start_paused = true)]
async fn test_iso_kept_without_remove_cdrom() {
    let sim = Simulator::new();
    let mut config = base_config("media-2");
    config.cdrom.iso_paths = vec!["[LocalDS_0] iso/tools.iso".into()];

    let (_, report) = builder(config, &sim).run().await.unwrap();

    assert_eq!(report.step(Stage::DetachMedia).unwrap().status, StepStatus::Skipped);
    let cdroms = sim.cdroms("media-2").await;
    assert_eq!(cdroms.len(), 1);
    assert_eq!(cdroms[0].controller, vclone_driver::CdromController::Ide);
    assert_eq!(cdroms[0].iso_path.as_deref(), Some("[LocalDS_0] iso/tools.iso"));
}

#[tokio::test(start_paused = true)]
async fn test_floppy_removed_after_shutdown() {
    let sim = Simulator::new();
    let mut config = base_config("media-3");
    config.floppy.floppy_img_path = Some("[LocalDS_0] floppy/answer.flp".into());

    let (_, report) = builder(config, &sim).run().await.unwrap();

    assert_eq!(report.step(Stage::AttachMedia).unwrap().status, StepStatus::Success);
    assert_eq!(sim.count_calls("add_floppy").await, 1);
    assert_eq!(sim.count_calls("remove_floppies").await, 1);
    assert_eq!(sim.count_calls("remove_cdroms").await, 0);
    assert!(sim.floppies("media-3").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_media_fault_destroys_vm() {
    let sim = Simulator::with_behavior(SimBehavior {
        device_fault: Some("数据存储中没有该文件".into()),
        ..Default::default()
    });
    let mut config = base_config("media-4");
    config.cdrom.iso_paths = vec!["[LocalDS_0] iso/missing.iso".into()];

    let err = builder(config, &sim).run().await.unwrap_err();

    assert_eq!(err.stage, Stage::AttachMedia);
    assert_eq!(err.source.kind(), "DriverError");
    assert_eq!(sim.count_calls("power_on").await, 0);
    assert!(sim.vm_by_name("media-4").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_convert_with_library_fails_before_clone() {
    let sim = Simulator::new();
    let mut config = base_config("conflict-1");
    config.convert_to_template = true;
    config.content_library_destination = Some(ContentLibraryDestinationConfig {
        library: "vclone-library".into(),
        ..Default::default()
    });

    let err = builder(config, &sim).run().await.unwrap_err();

    assert_eq!(err.stage, Stage::Validate);
    match &err.source {
        BuildError::InvalidConfig(errs) => assert!(errs
            .iter()
            .any(|e| e.kind() == "InvalidStageCombinationError")),
        other => panic!("期望 InvalidConfig, 实际: {}", other),
    }
    assert_eq!(sim.count_calls("login").await, 0);
    assert_eq!(sim.count_calls("clone_vm").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_clone_fault_removes_partial_vm() {
    let sim = Simulator::with_behavior(SimBehavior {
        clone_fault: Some("磁盘空间不足".into()),
        clone_leaves_partial: true,
        ..Default::default()
    });

    let err = builder(base_config("fault-1"), &sim).run().await.unwrap_err();

    assert_eq!(err.stage, Stage::Clone);
    match &err.source {
        BuildError::CloneTask { fault, orphan } => {
            assert_eq!(fault, "磁盘空间不足");
            assert!(orphan.is_none());
        }
        other => panic!("期望 CloneTask, 实际: {}", other),
    }
    assert!(sim.vm_by_name("fault-1").await.is_none());
    assert!(err.to_string().contains("克隆"));
}

#[tokio::test(start_paused = true)]
async fn test_clone_fault_reports_orphan() {
    let sim = Simulator::with_behavior(SimBehavior {
        clone_fault: Some("磁盘空间不足".into()),
        clone_leaves_partial: true,
        destroy_fault: Some("权限不足".into()),
        ..Default::default()
    });

    let err = builder(base_config("fault-2"), &sim).run().await.unwrap_err();

    match &err.source {
        BuildError::CloneTask { orphan, .. } => {
            assert!(orphan.as_deref().unwrap_or_default().contains("fault-2"))
        }
        other => panic!("期望 CloneTask, 实际: {}", other),
    }
    // 主错误不被清理失败覆盖
    assert_eq!(err.source.kind(), "CloneTaskError");
    assert_eq!(err.warnings.len(), 1);
    assert!(sim.vm_by_name("fault-2").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_clone_fault_keeps_unrelated_same_name_vm() {
    let sim = Simulator::with_behavior(SimBehavior {
        clone_polls: 3,
        clone_fault: Some("DuplicateName".into()),
        clone_leaves_partial: false,
        ..Default::default()
    });

    // 任务运行期间他人创建了同名虚拟机
    let other = sim.clone();
    let added = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        other.add_vm("dup-1", 1, 1, 512).await
    });

    let err = builder(base_config("dup-1"), &sim).run().await.unwrap_err();
    let unrelated = added.await.unwrap();

    assert_eq!(err.stage, Stage::Clone);
    assert_eq!(err.source.kind(), "CloneTaskError");
    match &err.source {
        BuildError::CloneTask { fault, orphan } => {
            assert_eq!(fault, "DuplicateName");
            assert!(orphan.as_deref().unwrap_or_default().contains("未确认"));
        }
        other => panic!("期望 CloneTask, 实际: {}", other),
    }
    assert_eq!(sim.vm_ref("dup-1").await, Some(unrelated));
    assert_eq!(sim.count_calls("destroy_vm").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_clone_task_timeout_cancels_task() {
    let sim = Simulator::with_behavior(SimBehavior {
        clone_polls: 10_000,
        ..Default::default()
    });
    let mut config = base_config("slow-1");
    config.clone.task_timeout = Duration::from_secs(60);

    let err = builder(config, &sim).run().await.unwrap_err();

    assert_eq!(err.stage, Stage::Clone);
    assert_eq!(err.source.kind(), "TimeoutError");
    assert_eq!(sim.count_calls("cancel_task").await, 1);
    assert!(sim.vm_by_name("slow-1").await.is_none());
    assert_eq!(sim.active_sessions().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_clone() {
    let sim = Simulator::with_behavior(SimBehavior {
        clone_polls: 10_000,
        ..Default::default()
    });
    let build = builder(base_config("slow-2"), &sim);
    let token = build.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        token.cancel();
    });

    let err = build.run().await.unwrap_err();

    assert_eq!(err.stage, Stage::Clone);
    assert!(err.source.is_cancelled());
    assert_eq!(err.source.kind(), "CancelledError");
    assert_eq!(sim.count_calls("cancel_task").await, 1);
    assert!(sim.vm_by_name("slow-2").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_timeout() {
    let sim = Simulator::with_behavior(SimBehavior {
        ignore_shutdown: true,
        ..Default::default()
    });
    let mut config = base_config("stuck-1");
    config.shutdown.shutdown_timeout = Duration::from_secs(60);

    let err = builder(config, &sim).run().await.unwrap_err();

    assert_eq!(err.stage, Stage::Shutdown);
    assert_eq!(err.source.kind(), "TimeoutError");
    assert_eq!(sim.count_calls("shutdown_guest").await, 1);
    // 关机阶段失败视为构建失败，虚拟机被强制断电并删除
    assert!(sim.count_calls("power_off").await >= 1);
    assert!(sim.vm_by_name("stuck-1").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_is_distinct_from_timeout() {
    let sim = Simulator::with_behavior(SimBehavior {
        customization: CustomizationOutcome::Never,
        ..Default::default()
    });
    let mut config = base_config("cancel-1");
    config.customize = Some(linux_customize(Duration::from_secs(1800)));
    let interval = config.poll.max_interval;

    let build = builder(config, &sim);
    let token = build.cancellation_token();
    let cancelled_at = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(45)).await;
        token.cancel();
        Instant::now()
    });

    let err = build.run().await.unwrap_err();
    let finished = Instant::now();
    let cancelled_at = cancelled_at.await.unwrap();

    assert!(err.source.is_cancelled());
    assert_eq!(err.source.kind(), "CancelledError");
    assert_eq!(err.stage, Stage::WaitCustomization);
    assert!(finished - cancelled_at <= interval);
    assert!(sim.vm_by_name("cancel-1").await.is_none());
    assert_eq!(sim.active_sessions().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_start() {
    let sim = Simulator::new();
    let build = builder(base_config("cancel-2"), &sim);
    build.cancellation_token().cancel();

    let err = build.run().await.unwrap_err();
    assert!(err.source.is_cancelled());
    assert_eq!(sim.count_calls("login").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_post_processing_failure_keeps_effects() {
    let sim = Simulator::with_behavior(SimBehavior {
        export_fault: Some("导出租约被拒绝".into()),
        ..Default::default()
    });
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config("post-1");
    config.create_snapshot = true;
    config.export = Some(ExportConfig {
        output_directory: Some(dir.path().join("out")),
        ..Default::default()
    });

    let err = builder(config, &sim).run().await.unwrap_err();

    assert_eq!(err.stage, Stage::Export);
    assert_eq!(err.source.kind(), "StageExecutionError");
    assert!(err.to_string().contains("导出"));
    assert!(sim.vm_by_name("post-1").await.is_some());
    assert_eq!(sim.snapshot_names("post-1").await, vec!["Created by vclone"]);
    assert!(err.retained.iter().any(|r| r.contains("Created by vclone")));
    assert_eq!(sim.active_sessions().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_template_and_export() {
    let sim = Simulator::new();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let mut config = base_config("export-1");
    config.convert_to_template = true;
    config.export = Some(ExportConfig {
        output_directory: Some(out.clone()),
        ..Default::default()
    });

    let (artifact, _) = builder(config, &sim).run().await.unwrap();

    assert!(sim.vm_by_name("export-1").await.unwrap().is_template);
    assert_eq!(artifact.vm().state, VmState::Template);
    assert_eq!(artifact.state("template"), Some(serde_json::json!(true)));

    let names: Vec<String> = artifact
        .files()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["export-1.ovf", "export-1-disk0.vmdk", "export-1.mf"]);

    let manifest = std::fs::read_to_string(out.join("export-1.mf")).unwrap();
    assert_eq!(manifest.lines().count(), 2);
    assert!(manifest.starts_with("SHA256(export-1.ovf)= "));
}

#[tokio::test(start_paused = true)]
async fn test_export_ova() {
    let sim = Simulator::new();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let mut config = base_config("ova-1");
    config.export = Some(ExportConfig {
        output_directory: Some(out.clone()),
        format: ExportFormat::Ova,
        ..Default::default()
    });

    let (artifact, _) = builder(config, &sim).run().await.unwrap();

    assert_eq!(artifact.files(), &[out.join("ova-1.ova")]);
    assert!(!out.join("ova-1.ovf").exists());

    let mut archive = tar::Archive::new(std::fs::File::open(out.join("ova-1.ova")).unwrap());
    let first = archive
        .entries()
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path()
        .unwrap()
        .into_owned();
    assert_eq!(first.to_string_lossy(), "ova-1.ovf");
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_export() {
    let sim = Simulator::with_behavior(SimBehavior {
        download_delay: Duration::from_secs(3600),
        ..Default::default()
    });
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config("export-2");
    config.export = Some(ExportConfig {
        output_directory: Some(dir.path().join("out")),
        ..Default::default()
    });

    let build = builder(config, &sim);
    let token = build.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(600)).await;
        token.cancel();
    });

    let err = build.run().await.unwrap_err();

    assert_eq!(err.stage, Stage::Export);
    assert_eq!(err.source.kind(), "CancelledError");
    // 租约在取消后仍被结束
    assert_eq!(sim.count_calls("complete_export").await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_export_rejects_escaping_file_name() {
    let sim = Simulator::with_behavior(SimBehavior {
        lease_item_name: Some("../escape.vmdk".into()),
        ..Default::default()
    });
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config("export-3");
    config.export = Some(ExportConfig {
        output_directory: Some(dir.path().join("out")),
        ..Default::default()
    });

    let err = builder(config, &sim).run().await.unwrap_err();

    assert_eq!(err.stage, Stage::Export);
    assert_eq!(err.source.kind(), "StageExecutionError");
    assert!(!dir.path().join("escape.vmdk").exists());
    assert_eq!(sim.count_calls("download").await, 0);
    assert_eq!(sim.count_calls("complete_export").await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_content_library_import() {
    let sim = Simulator::new();
    let mut config = base_config("lib-1");
    config.content_library_destination = Some(ContentLibraryDestinationConfig {
        library: "vclone-library".into(),
        ovf: true,
        ..Default::default()
    });

    let (artifact, _) = builder(config, &sim).run().await.unwrap();

    assert_eq!(sim.library_items().await, vec![("lib-1".to_string(), true)]);
    assert!(artifact.state("content_library_item").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_library_is_stage_error() {
    let sim = Simulator::new();
    let mut config = base_config("lib-2");
    config.content_library_destination = Some(ContentLibraryDestinationConfig {
        library: "missing".into(),
        ..Default::default()
    });

    let err = builder(config, &sim).run().await.unwrap_err();
    assert_eq!(err.stage, Stage::ContentLibraryImport);
    assert_eq!(err.source.kind(), "StageExecutionError");
    assert!(sim.vm_by_name("lib-2").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_library_name_is_rejected() {
    let sim = Simulator::new();
    sim.add_library("vclone-library").await;
    let mut config = base_config("lib-3");
    config.content_library_destination = Some(ContentLibraryDestinationConfig {
        library: "vclone-library".into(),
        ..Default::default()
    });

    let err = builder(config, &sim).run().await.unwrap_err();

    assert_eq!(err.stage, Stage::ContentLibraryImport);
    assert_eq!(err.source.kind(), "StageExecutionError");
    assert!(err.source.to_string().contains("2 个同名内容库"));
    assert_eq!(sim.count_calls("import_to_library").await, 0);
    assert!(sim.library_items().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_wrong_password() {
    let sim = Simulator::with_behavior(SimBehavior {
        password: Some("correct".into()),
        ..Default::default()
    });

    let err = builder(base_config("auth-1"), &sim).run().await.unwrap_err();
    assert_eq!(err.stage, Stage::Connect);
    assert_eq!(err.source.kind(), "ConnectionError");
}

#[tokio::test(start_paused = true)]
async fn test_untrusted_certificate_requires_insecure() {
    let sim = Simulator::with_behavior(SimBehavior {
        untrusted_certificate: true,
        ..Default::default()
    });
    let mut config = base_config("tls-1");
    config.connect.insecure_connection = false;

    let err = builder(config, &sim).run().await.unwrap_err();
    assert_eq!(err.source.kind(), "ConnectionError");

    let (artifact, _) = builder(base_config("tls-2"), &sim).run().await.unwrap();
    assert_eq!(artifact.id(), "tls-2");
}

#[tokio::test(start_paused = true)]
async fn test_missing_placement() {
    let sim = Simulator::new();
    let mut config = base_config("place-1");
    config.location.datastore = Some("NoSuchDS".into());

    let err = builder(config, &sim).run().await.unwrap_err();
    assert_eq!(err.stage, Stage::Connect);
    assert_eq!(err.source.kind(), "PlacementNotFoundError");
    assert_eq!(sim.active_sessions().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_source_not_found_and_ambiguous() {
    let sim = Simulator::new();
    let mut config = base_config("src-1");
    config.clone.template = "no-such-template".into();
    let err = builder(config, &sim).run().await.unwrap_err();
    assert_eq!(err.source.kind(), "SourceNotFoundError");

    sim.add_vm("dup", 1, 1, 32).await;
    sim.add_vm("dup", 1, 1, 32).await;
    let mut config = base_config("src-2");
    config.clone.template = "dup".into();
    let err = builder(config, &sim).run().await.unwrap_err();
    assert_eq!(err.stage, Stage::ResolveSource);
    assert_eq!(err.source.kind(), "AmbiguousSourceError");
    assert_eq!(sim.active_sessions().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_builds_use_separate_sessions() {
    let sim = Simulator::new();

    let (a, b) = tokio::join!(
        builder(base_config("para-a"), &sim).run(),
        builder(base_config("para-b"), &sim).run()
    );

    assert_eq!(a.unwrap().0.id(), "para-a");
    assert_eq!(b.unwrap().0.id(), "para-b");
    assert_eq!(sim.sessions_opened().await, 2);
    assert_eq!(sim.active_sessions().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_report_serialization() {
    let sim = Simulator::new();
    let (_, report) = builder(base_config("report-1"), &sim).run().await.unwrap();

    let json = report.to_json().unwrap();
    assert!(json.contains("\"wait_for_ip\""));
    assert!(report.to_yaml().unwrap().contains("report-1"));
    assert_eq!(report.failed_count, 0);
    assert_eq!(report.total_steps, 17);
}
