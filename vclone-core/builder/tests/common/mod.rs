//! 集成测试公共工具

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use vclone_builder::config::{CustomizeConfig, LinuxOptions, NetworkInterface};
use vclone_builder::{CloneBuilder, Config};
use vclone_driver::Simulator;

/// 模拟器中预置的克隆源
pub const SOURCE_VM: &str = "DC0_C0_RP0_VM0";

/// 以模拟器默认清单为目标的最小配置
pub fn base_config(vm_name: &str) -> Config {
    let mut config = Config::default();
    config.connect.vcenter_server = "vcenter.local".into();
    config.connect.username = "administrator@vsphere.local".into();
    config.connect.password = "secret".into();
    config.connect.insecure_connection = true;
    config.clone.template = SOURCE_VM.into();
    config.location.vm_name = vm_name.into();
    config.location.cluster = Some("DC0_C0".into());
    config
}

pub fn linux_customize(timeout: Duration) -> CustomizeConfig {
    CustomizeConfig {
        linux_options: Some(LinuxOptions {
            host_name: "build".into(),
            domain: "example.local".into(),
            time_zone: None,
            hw_clock_utc: true,
        }),
        windows_options: None,
        windows_sysprep_text: None,
        network_interface: vec![NetworkInterface::default()],
        ipv4_gateway: None,
        ipv6_gateway: None,
        dns_server_list: Vec::new(),
        dns_suffix_list: Vec::new(),
        timeout,
    }
}

pub fn builder(config: Config, sim: &Simulator) -> CloneBuilder {
    CloneBuilder::new(config, Arc::new(sim.clone()))
}
