//! 客户机定制规范
//!
//! Linux 风格与 Windows Sysprep 风格的身份设置，以及按网卡的 IP 设置。

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// 客户机定制规范
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomizationSpec {
    /// 身份设置
    pub identity: Identity,

    /// 按网卡顺序的 IP 设置
    pub adapters: Vec<AdapterMapping>,

    /// 全局 IP 设置
    pub global_ip: GlobalIpSettings,
}

/// 身份设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    Linux(LinuxPrep),
    Sysprep(Sysprep),
    /// 原始 sysprep 应答文件内容
    SysprepText(String),
}

impl Identity {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Linux(_) => "linux",
            Self::Sysprep(_) => "sysprep",
            Self::SysprepText(_) => "sysprep-text",
        }
    }
}

/// Linux 身份设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinuxPrep {
    pub host_name: String,
    pub domain: String,
    pub time_zone: Option<String>,
    pub hw_clock_utc: bool,
}

/// Windows Sysprep 身份设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sysprep {
    pub computer_name: String,
    pub full_name: String,
    pub organization_name: String,
    pub product_key: Option<String>,
    pub admin_password: Option<String>,
    pub time_zone: i32,
    pub auto_logon: bool,
    pub auto_logon_count: i32,
    pub run_once_command_list: Vec<String>,
    pub join_domain: Option<String>,
    pub domain_admin: Option<String>,
    pub domain_admin_password: Option<String>,
    pub workgroup: Option<String>,
}

/// IP 设置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpSetting {
    Dhcp,
    Static { address: IpAddr, prefix: u8 },
}

/// 单块网卡的 IP 设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterMapping {
    pub ipv4: IpSetting,
    pub ipv6: Option<IpSetting>,
    pub gateways: Vec<IpAddr>,
    pub dns_servers: Vec<IpAddr>,
    pub dns_domain: Option<String>,
}

impl Default for AdapterMapping {
    fn default() -> Self {
        Self {
            ipv4: IpSetting::Dhcp,
            ipv6: None,
            gateways: Vec::new(),
            dns_servers: Vec::new(),
            dns_domain: None,
        }
    }
}

/// 全局 IP 设置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalIpSettings {
    pub dns_servers: Vec<IpAddr>,
    pub dns_suffixes: Vec<String>,
}

/// 客户机定制状态（由客户机内的工具上报）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomizationStatus {
    /// 未下发定制
    Idle,
    /// 已下发，等待客户机启动
    Pending,
    /// 客户机正在执行定制
    Running,
    Succeeded,
    Failed(String),
}

impl CustomizationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}
