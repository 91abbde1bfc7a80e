//! 配置文件加载测试

mod common;

use std::fs;
use std::time::Duration;
use vclone_builder::config::{ExportFormat, ManifestAlgorithm};
use vclone_builder::{BuildError, Config, Stage};
use vclone_driver::Simulator;

use common::builder;

fn write_toml(dir: &std::path::Path, export_dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("build.toml");
    fs::write(
        &path,
        format!(
            r#"
create_snapshot = true

[connect]
vcenter_server = "vcenter.local"
username = "administrator@vsphere.local"
password = "secret"
insecure_connection = true

[clone]
template = "DC0_C0_RP0_VM0"
notes = "built from toml"

[location]
vm_name = "toml-1"
cluster = "DC0_C0"

[hardware]
cpus = 4
ram = 8192

[customize]
timeout = "10m"

[customize.linux_options]
host_name = "toml-1"
domain = "example.local"

[[customize.network_interface]]

[wait_ip]
ip_settle_timeout = "1s"

[export]
output_directory = '{}'
manifest = "sha1"
"#,
            export_dir.display()
        ),
    )
    .unwrap();
    path
}

#[test]
fn test_load_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_toml(dir.path(), &dir.path().join("out"));

    let mut config = Config::load_from_file(&path).unwrap();
    assert_eq!(config.hardware.cpus, Some(4));
    assert_eq!(config.customize.as_ref().unwrap().timeout, Duration::from_secs(600));

    config.prepare().unwrap();
    let export = config.export.as_ref().unwrap();
    assert_eq!(export.name.as_deref(), Some("toml-1"));
    assert_eq!(export.manifest, ManifestAlgorithm::Sha1);
    assert_eq!(export.format, ExportFormat::Ovf);
}

#[test]
fn test_load_json_reports_every_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("build.json");
    fs::write(
        &path,
        r#"{
  "connect": { "vcenter_server": "vcenter.local" },
  "clone": { "template": "base", "linked_clone": true, "disk_size": 100 },
  "location": { "vm_name": "json-1" },
  "convert_to_template": true,
  "content_library_destination": { "library": "lib" }
}"#,
    )
    .unwrap();

    let mut config = Config::load_from_file(&path).unwrap();
    match config.prepare() {
        // username, password, linked_clone+disk_size, cluster/host, convert+library
        Err(BuildError::InvalidConfig(errors)) => assert_eq!(errors.len(), 5, "{:?}", errors),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_build_from_toml() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let config = Config::load_from_file(&write_toml(dir.path(), &out)).unwrap();

    let sim = Simulator::new();
    let (artifact, report) = builder(config, &sim).run().await.unwrap();

    assert!(report.is_success());
    assert!(report.step(Stage::Snapshot).is_some());
    assert_eq!(artifact.provenance().labels["num_cpu"], "4");
    assert_eq!(artifact.provenance().labels["memory_mb"], "8192");
    assert_eq!(artifact.provenance().labels["annotation"], "built from toml");

    let manifest = fs::read_to_string(out.join("toml-1.mf")).unwrap();
    assert!(manifest.lines().all(|l| l.starts_with("SHA1(")));
}
