//! 构建配置
//!
//! 顶层配置由多个命名段组成（连接、克隆、放置、硬件、光驱与软驱、定制、启动、
//! 等待 IP、关机、轮询以及后处理），每个段有自己的 `prepare()`：补全默认值并收集全部错误。
//!
//! 加载优先级：环境变量 > 配置文件 > 默认值

use anyhow::{Context, Result as AnyResult};
use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BuildError, Result};
use crate::poll::PollPolicy;
use crate::stages::StageSet;

/// 构建配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 连接配置
    #[serde(default)]
    pub connect: ConnectConfig,

    /// 克隆配置
    #[serde(default)]
    pub clone: CloneConfig,

    /// 放置位置
    #[serde(default)]
    pub location: LocationConfig,

    /// 硬件配置
    #[serde(default)]
    pub hardware: HardwareConfig,

    /// 光驱
    #[serde(default)]
    pub cdrom: CdromConfig,

    /// 软驱
    #[serde(default)]
    pub floppy: FloppyConfig,

    /// 客户机定制（可选）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customize: Option<CustomizeConfig>,

    #[serde(default)]
    pub boot: BootConfig,

    #[serde(default)]
    pub wait_ip: WaitIpConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// 轮询策略
    #[serde(default)]
    pub poll: PollConfig,

    /// 构建完成后创建快照（可作为链接克隆的基础）
    #[serde(default)]
    pub create_snapshot: bool,

    /// 快照名称
    #[serde(default = "default_snapshot_name")]
    pub snapshot_name: String,

    /// 转换为模板
    #[serde(default)]
    pub convert_to_template: bool,

    /// 导出配置（可选）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportConfig>,

    /// 内容库导入配置（可选）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_library_destination: Option<ContentLibraryDestinationConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect: ConnectConfig::default(),
            clone: CloneConfig::default(),
            location: LocationConfig::default(),
            hardware: HardwareConfig::default(),
            cdrom: CdromConfig::default(),
            floppy: FloppyConfig::default(),
            customize: None,
            boot: BootConfig::default(),
            wait_ip: WaitIpConfig::default(),
            shutdown: ShutdownConfig::default(),
            poll: PollConfig::default(),
            create_snapshot: false,
            snapshot_name: default_snapshot_name(),
            convert_to_template: false,
            export: None,
            content_library_destination: None,
        }
    }
}

// ============================================
// 连接
// ============================================

/// 连接配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectConfig {
    /// vCenter 地址
    #[serde(default)]
    pub vcenter_server: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// 跳过证书校验
    #[serde(default)]
    pub insecure_connection: bool,

    /// 数据中心（只有一个时可省略）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,
}

impl ConnectConfig {
    pub fn prepare(&mut self) -> Vec<BuildError> {
        let mut errs = Vec::new();
        for (field, value) in [
            ("vcenter_server", &self.vcenter_server),
            ("username", &self.username),
            ("password", &self.password),
        ] {
            if value.trim().is_empty() {
                errs.push(required(field));
            }
        }
        errs
    }
}

// ============================================
// 克隆
// ============================================

/// 克隆配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneConfig {
    /// 克隆源：清单路径、名称或 UUID
    #[serde(default)]
    pub template: String,

    /// 链接克隆
    #[serde(default)]
    pub linked_clone: bool,

    /// 链接克隆使用的快照名称，缺省为克隆源的当前快照
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,

    /// 主磁盘大小 (MB)，只能扩大
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<u64>,

    /// 第一块网卡连接的网络
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// 第一块网卡的 MAC 地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,

    /// 虚拟机备注
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// 克隆任务超时
    #[serde(with = "humantime_serde", default = "default_task_timeout")]
    pub task_timeout: Duration,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            template: String::new(),
            linked_clone: false,
            snapshot: None,
            disk_size: None,
            network: None,
            mac_address: None,
            notes: None,
            task_timeout: default_task_timeout(),
        }
    }
}

impl CloneConfig {
    pub fn prepare(&mut self) -> Vec<BuildError> {
        let mut errs = Vec::new();

        if self.template.trim().is_empty() {
            errs.push(required("template"));
        }
        if self.linked_clone && self.disk_size.is_some() {
            errs.push(BuildError::InvalidCloneSpec(
                "链接克隆不能修改 'disk_size'".to_string(),
            ));
        }
        if self.disk_size == Some(0) {
            errs.push(BuildError::InvalidField("'disk_size' 必须大于 0".to_string()));
        }
        if let Some(mac) = &self.mac_address {
            if self.network.is_none() {
                errs.push(BuildError::InvalidField(
                    "设置 'mac_address' 时必须同时设置 'network'".to_string(),
                ));
            }
            if !is_valid_mac(mac) {
                errs.push(BuildError::InvalidField(format!(
                    "'mac_address' 格式无效: {}",
                    mac
                )));
            }
        }
        if self.task_timeout.is_zero() {
            errs.push(BuildError::InvalidField("'task_timeout' 必须大于 0".to_string()));
        }

        errs
    }
}

fn is_valid_mac(mac: &str) -> bool {
    let parts: Vec<&str> = mac.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

// ============================================
// 放置位置
// ============================================

/// 放置位置配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationConfig {
    /// 新虚拟机名称
    #[serde(default)]
    pub vm_name: String,

    /// 目标文件夹，缺省为数据中心的虚拟机根文件夹
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_pool: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastore: Option<String>,
}

impl LocationConfig {
    pub fn prepare(&mut self) -> Vec<BuildError> {
        let mut errs = Vec::new();
        if self.vm_name.trim().is_empty() {
            errs.push(required("vm_name"));
        }
        if self.cluster.is_none() && self.host.is_none() {
            errs.push(BuildError::InvalidField(
                "'cluster' 与 'host' 至少需要设置一个".to_string(),
            ));
        }
        errs
    }
}

// ============================================
// 硬件
// ============================================

/// 硬件配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// vCPU 数量
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<u32>,

    /// 每插槽核心数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u32>,

    /// CPU 预留 (MHz)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_reservation: Option<i64>,

    /// CPU 上限 (MHz)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<i64>,

    #[serde(default)]
    pub cpu_hot_plug: bool,

    /// 内存 (MB)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram: Option<u64>,

    /// 内存预留 (MB)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_reservation: Option<i64>,

    /// 预留全部内存
    #[serde(default)]
    pub ram_reserve_all: bool,

    #[serde(default)]
    pub ram_hot_plug: bool,

    /// 嵌套虚拟化
    #[serde(default)]
    pub nested_hv: bool,

    /// 扩展配置参数
    #[serde(default)]
    pub configuration_parameters: BTreeMap<String, String>,
}

impl HardwareConfig {
    pub fn prepare(&mut self) -> Vec<BuildError> {
        let mut errs = Vec::new();

        if self.cpus == Some(0) {
            errs.push(BuildError::InvalidField("'cpus' 必须大于 0".to_string()));
        }
        if self.cpu_cores == Some(0) {
            errs.push(BuildError::InvalidField("'cpu_cores' 必须大于 0".to_string()));
        }
        if let (Some(cpus), Some(cores)) = (self.cpus, self.cpu_cores) {
            if cores > 0 && cpus % cores != 0 {
                errs.push(BuildError::InvalidField(format!(
                    "'cpus' ({}) 必须是 'cpu_cores' ({}) 的整数倍",
                    cpus, cores
                )));
            }
        }
        if self.ram == Some(0) {
            errs.push(BuildError::InvalidField("'ram' 必须大于 0".to_string()));
        }
        if self.ram_reserve_all && self.ram_reservation.is_some() {
            errs.push(BuildError::InvalidField(
                "'ram_reserve_all' 与 'ram_reservation' 不能同时设置".to_string(),
            ));
        }

        errs
    }
}

// ============================================
// 光驱与软驱
// ============================================

/// 光驱控制器类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdromType {
    #[default]
    Ide,
    Sata,
}

/// 光驱配置
///
/// 每个 ISO 挂载到一个新光驱上；构建结束关机后可按 `remove_cdrom` 移除全部光驱。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CdromConfig {
    #[serde(default)]
    pub cdrom_type: CdromType,

    /// 数据存储中的 ISO 路径，形如 `[datastore1] iso/tools.iso`
    #[serde(default)]
    pub iso_paths: Vec<String>,

    /// 关机后移除虚拟机上的全部光驱
    #[serde(default)]
    pub remove_cdrom: bool,
}

impl CdromConfig {
    pub fn prepare(&mut self) -> Vec<BuildError> {
        self.iso_paths
            .iter()
            .filter(|path| !is_datastore_path(path))
            .map(|path| {
                BuildError::InvalidField(format!(
                    "'iso_paths' 必须是 \"[数据存储] 路径\" 形式: {}",
                    path
                ))
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.iso_paths.is_empty() && !self.remove_cdrom
    }
}

/// 软驱配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloppyConfig {
    /// 数据存储中的软盘镜像路径；关机后自动移除软驱
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floppy_img_path: Option<String>,
}

impl FloppyConfig {
    pub fn prepare(&mut self) -> Vec<BuildError> {
        match self.floppy_img_path.as_deref() {
            Some(path) if !is_datastore_path(path) => vec![BuildError::InvalidField(format!(
                "'floppy_img_path' 必须是 \"[数据存储] 路径\" 形式: {}",
                path
            ))],
            _ => Vec::new(),
        }
    }
}

/// `[datastore] path/to/file`
fn is_datastore_path(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('[') else {
        return false;
    };
    match rest.split_once(']') {
        Some((datastore, file)) => !datastore.trim().is_empty() && !file.trim().is_empty(),
        None => false,
    }
}

// ============================================
// 客户机定制
// ============================================

/// 客户机定制配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomizeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux_options: Option<LinuxOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows_options: Option<WindowsOptions>,

    /// 原始 sysprep 应答文件内容
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows_sysprep_text: Option<String>,

    /// 按网卡顺序的网络设置
    #[serde(default)]
    pub network_interface: Vec<NetworkInterface>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_gateway: Option<Ipv4Addr>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_gateway: Option<Ipv6Addr>,

    /// 全局 DNS 服务器
    #[serde(default)]
    pub dns_server_list: Vec<IpAddr>,

    /// DNS 搜索后缀
    #[serde(default)]
    pub dns_suffix_list: Vec<String>,

    /// 等待客户机确认定制完成的超时
    #[serde(with = "humantime_serde", default = "default_customize_timeout")]
    pub timeout: Duration,
}

/// Linux 定制选项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinuxOptions {
    pub host_name: String,

    pub domain: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,

    /// 硬件时钟使用 UTC
    #[serde(default = "default_true")]
    pub hw_clock_utc: bool,
}

/// Windows 定制选项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowsOptions {
    pub computer_name: String,

    #[serde(default = "default_full_name")]
    pub full_name: String,

    #[serde(default = "default_organization_name")]
    pub organization_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,

    /// Windows 时区索引
    #[serde(default = "default_windows_time_zone")]
    pub time_zone: i32,

    #[serde(default)]
    pub auto_logon: bool,

    #[serde(default = "default_auto_logon_count")]
    pub auto_logon_count: i32,

    #[serde(default)]
    pub run_once_command_list: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_admin: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_admin_password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workgroup: Option<String>,
}

/// 单块网卡的定制
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInterface {
    #[serde(default)]
    pub dns_server_list: Vec<IpAddr>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_domain: Option<String>,

    /// 缺省为 DHCP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_address: Option<Ipv4Addr>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_netmask: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_address: Option<Ipv6Addr>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6_netmask: Option<u8>,
}

impl CustomizeConfig {
    pub fn prepare(&mut self) -> Vec<BuildError> {
        let mut errs = Vec::new();

        let identities = [
            self.linux_options.is_some(),
            self.windows_options.is_some(),
            self.windows_sysprep_text.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if identities != 1 {
            errs.push(BuildError::InvalidField(
                "'linux_options'、'windows_options' 与 'windows_sysprep_text' 必须且只能设置一个"
                    .to_string(),
            ));
        }

        if let Some(linux) = &self.linux_options {
            if linux.host_name.trim().is_empty() {
                errs.push(required("linux_options.host_name"));
            }
            if linux.domain.trim().is_empty() {
                errs.push(required("linux_options.domain"));
            }
        }

        if let Some(windows) = &self.windows_options {
            errs.extend(windows.prepare());
        }

        if let Some(text) = &self.windows_sysprep_text {
            if text.trim().is_empty() {
                errs.push(required("windows_sysprep_text"));
            }
        }

        if self.network_interface.is_empty() {
            errs.push(BuildError::InvalidField(
                "'network_interface' 至少需要一项".to_string(),
            ));
        }
        for (i, iface) in self.network_interface.iter().enumerate() {
            errs.extend(iface.prepare(i));
        }

        if self.timeout.is_zero() {
            errs.push(BuildError::InvalidField(
                "'customize.timeout' 必须大于 0".to_string(),
            ));
        }

        errs
    }
}

impl WindowsOptions {
    fn prepare(&self) -> Vec<BuildError> {
        let mut errs = Vec::new();

        if self.computer_name.trim().is_empty() {
            errs.push(required("windows_options.computer_name"));
        }
        if self.join_domain.is_some() && self.workgroup.is_some() {
            errs.push(BuildError::InvalidField(
                "'join_domain' 与 'workgroup' 不能同时设置".to_string(),
            ));
        }
        if self.join_domain.is_some() {
            if self.domain_admin.is_none() {
                errs.push(BuildError::InvalidField(
                    "设置 'join_domain' 时必须提供 'domain_admin'".to_string(),
                ));
            }
            if self.domain_admin_password.is_none() {
                errs.push(BuildError::InvalidField(
                    "设置 'join_domain' 时必须提供 'domain_admin_password'".to_string(),
                ));
            }
        }

        errs
    }
}

impl NetworkInterface {
    fn prepare(&self, index: usize) -> Vec<BuildError> {
        let mut errs = Vec::new();

        match (self.ipv4_address, self.ipv4_netmask) {
            (Some(_), None) => errs.push(BuildError::InvalidField(format!(
                "network_interface[{}]: 设置 'ipv4_address' 时必须提供 'ipv4_netmask'",
                index
            ))),
            (_, Some(mask)) if mask > 32 => errs.push(BuildError::InvalidField(format!(
                "network_interface[{}]: 'ipv4_netmask' 超出范围 (0-32): {}",
                index, mask
            ))),
            _ => {}
        }

        match (self.ipv6_address, self.ipv6_netmask) {
            (Some(_), None) => errs.push(BuildError::InvalidField(format!(
                "network_interface[{}]: 设置 'ipv6_address' 时必须提供 'ipv6_netmask'",
                index
            ))),
            (_, Some(mask)) if mask > 128 => errs.push(BuildError::InvalidField(format!(
                "network_interface[{}]: 'ipv6_netmask' 超出范围 (0-128): {}",
                index, mask
            ))),
            _ => {}
        }

        errs
    }
}

// ============================================
// 启动、等待 IP、关机、轮询
// ============================================

/// 启动配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootConfig {
    /// 启动设备顺序：disk / cdrom / floppy / ethernet
    #[serde(default)]
    pub boot_order: Vec<String>,

    /// 开机后的等待时间
    #[serde(with = "humantime_serde", default)]
    pub boot_wait: Duration,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            boot_order: Vec::new(),
            boot_wait: Duration::ZERO,
        }
    }
}

impl BootConfig {
    pub fn prepare(&mut self) -> Vec<BuildError> {
        self.boot_order
            .iter()
            .filter(|d| {
                !matches!(
                    d.to_lowercase().as_str(),
                    "disk" | "cdrom" | "floppy" | "ethernet" | "net"
                )
            })
            .map(|d| BuildError::InvalidField(format!("未知的启动设备: {}", d)))
            .collect()
    }
}

/// 等待 IP 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitIpConfig {
    /// 等待客户机上报 IP 的超时
    #[serde(with = "humantime_serde", default = "default_ip_wait_timeout")]
    pub ip_wait_timeout: Duration,

    /// IP 需要保持不变的时长
    #[serde(with = "humantime_serde", default = "default_ip_settle_timeout")]
    pub ip_settle_timeout: Duration,

    /// 只接受落在该网段内的地址
    #[serde(default = "default_ip_wait_address")]
    pub ip_wait_address: IpNet,
}

impl Default for WaitIpConfig {
    fn default() -> Self {
        Self {
            ip_wait_timeout: default_ip_wait_timeout(),
            ip_settle_timeout: default_ip_settle_timeout(),
            ip_wait_address: default_ip_wait_address(),
        }
    }
}

impl WaitIpConfig {
    pub fn prepare(&mut self) -> Vec<BuildError> {
        let mut errs = Vec::new();
        if self.ip_wait_timeout.is_zero() {
            errs.push(BuildError::InvalidField(
                "'ip_wait_timeout' 必须大于 0".to_string(),
            ));
        }
        errs
    }
}

/// 关机配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 等待关机完成的超时
    #[serde(with = "humantime_serde", default = "default_shutdown_timeout")]
    pub shutdown_timeout: Duration,

    /// 不发送关机请求，等待客户机自行关机
    #[serde(default)]
    pub disable_shutdown: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: default_shutdown_timeout(),
            disable_shutdown: false,
        }
    }
}

/// 轮询配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub interval: Duration,

    #[serde(with = "humantime_serde", default = "default_poll_max_interval")]
    pub max_interval: Duration,

    #[serde(default = "default_poll_multiplier")]
    pub multiplier: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            max_interval: default_poll_max_interval(),
            multiplier: default_poll_multiplier(),
        }
    }
}

/// 退避倍数上限
const MAX_POLL_MULTIPLIER: f64 = 10.0;

impl PollConfig {
    pub fn prepare(&mut self) -> Vec<BuildError> {
        let mut errs = Vec::new();
        if self.interval.is_zero() {
            errs.push(BuildError::InvalidField("'poll.interval' 必须大于 0".to_string()));
        }
        if !(1.0..=MAX_POLL_MULTIPLIER).contains(&self.multiplier) {
            errs.push(BuildError::InvalidField(format!(
                "'poll.multiplier' 必须在 1 到 {} 之间",
                MAX_POLL_MULTIPLIER
            )));
        }
        if self.max_interval < self.interval {
            self.max_interval = self.interval;
        }
        errs
    }

    /// 以给定超时构造轮询策略
    pub fn policy(&self, timeout: Duration) -> PollPolicy {
        PollPolicy {
            interval: self.interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            timeout,
        }
    }
}

// ============================================
// 后处理
// ============================================

/// 导出清单算法
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestAlgorithm {
    None,
    Sha1,
    #[default]
    Sha256,
    Sha512,
}

impl ManifestAlgorithm {
    /// 清单中的算法标记
    pub fn label(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Sha1 => Some("SHA1"),
            Self::Sha256 => Some("SHA256"),
            Self::Sha512 => Some("SHA512"),
        }
    }
}

/// 导出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Ovf,
    Ova,
}

/// 导出配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportConfig {
    /// 导出文件名（不含扩展名），缺省为虚拟机名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// 输出目录已存在时覆盖
    #[serde(default)]
    pub force: bool,

    /// 输出目录，缺省为 `output-<vm_name>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<PathBuf>,

    #[serde(default)]
    pub manifest: ManifestAlgorithm,

    #[serde(default)]
    pub format: ExportFormat,
}

impl ExportConfig {
    pub fn prepare(&mut self, location: &LocationConfig) -> Vec<BuildError> {
        let mut errs = Vec::new();

        if self.name.is_none() {
            self.name = Some(location.vm_name.clone());
        }
        if let Some(name) = &self.name {
            if name.contains('/') || name.contains('\\') {
                errs.push(BuildError::InvalidField(format!(
                    "'export.name' 不能包含路径分隔符: {}",
                    name
                )));
            }
        }
        if self.output_directory.is_none() {
            self.output_directory = Some(PathBuf::from(format!("output-{}", location.vm_name)));
        }

        errs
    }

    /// 导出文件名
    pub fn file_name(&self) -> &str {
        self.name.as_deref().unwrap_or("vm")
    }
}

/// 内容库导入配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentLibraryDestinationConfig {
    /// 内容库名称
    #[serde(default)]
    pub library: String,

    /// 条目名称，缺省为虚拟机名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// 以 OVF 条目导入（否则导入为虚拟机模板）
    #[serde(default)]
    pub ovf: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_pool: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastore: Option<String>,
}

impl ContentLibraryDestinationConfig {
    pub fn prepare(&mut self, location: &LocationConfig) -> Vec<BuildError> {
        let mut errs = Vec::new();

        if self.library.trim().is_empty() {
            errs.push(required("content_library_destination.library"));
        }
        if self.name.is_none() {
            self.name = Some(location.vm_name.clone());
        }

        // 虚拟机模板条目需要放置位置，缺省沿用构建位置
        if !self.ovf {
            if self.cluster.is_none() && self.host.is_none() {
                self.cluster = location.cluster.clone();
                self.host = location.host.clone();
            }
            if self.folder.is_none() {
                self.folder = location.folder.clone();
            }
            if self.resource_pool.is_none() {
                self.resource_pool = location.resource_pool.clone();
            }
            if self.datastore.is_none() {
                self.datastore = location.datastore.clone();
            }
        }

        errs
    }
}

// ============================================
// 默认值函数
// ============================================

fn default_snapshot_name() -> String {
    "Created by vclone".to_string()
}
fn default_task_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}
fn default_customize_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}
fn default_ip_wait_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}
fn default_ip_settle_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_ip_wait_address() -> IpNet {
    IpNet::V4(Ipv4Net::default())
}
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}
fn default_poll_max_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_poll_multiplier() -> f64 {
    1.5
}
fn default_true() -> bool {
    true
}
fn default_full_name() -> String {
    "Administrator".to_string()
}
fn default_organization_name() -> String {
    "Built by vclone".to_string()
}
fn default_windows_time_zone() -> i32 {
    85
}
fn default_auto_logon_count() -> i32 {
    1
}

fn required(field: &str) -> BuildError {
    BuildError::InvalidField(format!("'{}' 不能为空", field))
}

// ============================================
// 配置加载与校验
// ============================================

impl Config {
    /// 从文件加载并应用环境变量覆盖
    pub fn load(path: &Path) -> AnyResult<Self> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_vars()?;
        Ok(config)
    }

    /// 从指定文件加载配置
    pub fn load_from_file(path: &Path) -> AnyResult<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;

        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("解析 TOML 配置失败: {:?}", path))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("解析 YAML 配置失败: {:?}", path))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("解析 JSON 配置失败: {:?}", path))?,
            _ => anyhow::bail!("不支持的配置文件格式: {:?}", path),
        };

        Ok(config)
    }

    /// 查找默认配置文件
    pub fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("VCLONE_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        let mut candidates = vec![
            PathBuf::from("./vclone.toml"),
            PathBuf::from("./vclone.yaml"),
            PathBuf::from("./vclone.json"),
        ];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("vclone/config.toml"));
            candidates.push(config_dir.join("vclone/config.yaml"));
        }

        candidates.into_iter().find(|p| p.exists())
    }

    /// 从环境变量覆盖连接配置
    pub fn apply_env_vars(&mut self) -> AnyResult<()> {
        if let Ok(server) = env::var("VCLONE_VCENTER_SERVER") {
            self.connect.vcenter_server = server;
        }
        if let Ok(username) = env::var("VCLONE_USERNAME") {
            self.connect.username = username;
        }
        if let Ok(password) = env::var("VCLONE_PASSWORD") {
            self.connect.password = password;
        }
        if let Ok(insecure) = env::var("VCLONE_INSECURE") {
            self.connect.insecure_connection = insecure
                .parse()
                .context("VCLONE_INSECURE 取值无效")?;
        }
        if let Ok(datacenter) = env::var("VCLONE_DATACENTER") {
            self.connect.datacenter = Some(datacenter);
        }
        Ok(())
    }

    /// 补全默认值并校验全部配置段
    ///
    /// 所有错误一次性收集到 [`BuildError::InvalidConfig`] 中。
    pub fn prepare(&mut self) -> Result<()> {
        let mut errs = Vec::new();

        errs.extend(self.connect.prepare());
        errs.extend(self.clone.prepare());
        errs.extend(self.location.prepare());
        errs.extend(self.hardware.prepare());
        errs.extend(self.cdrom.prepare());
        errs.extend(self.floppy.prepare());
        errs.extend(self.boot.prepare());
        errs.extend(self.wait_ip.prepare());
        errs.extend(self.poll.prepare());

        if let Some(customize) = self.customize.as_mut() {
            errs.extend(customize.prepare());
        }
        if let Some(export) = self.export.as_mut() {
            errs.extend(export.prepare(&self.location));
        }
        if let Some(library) = self.content_library_destination.as_mut() {
            errs.extend(library.prepare(&self.location));
        }
        if self.create_snapshot && self.snapshot_name.trim().is_empty() {
            errs.push(required("snapshot_name"));
        }

        errs.extend(StageSet::from_config(self).validate());

        if errs.is_empty() {
            Ok(())
        } else {
            Err(BuildError::InvalidConfig(errs))
        }
    }
}
