//! 驱动层数据模型
//!
//! 描述管理平面中的清单对象、虚拟机配置、克隆请求、任务状态、
//! 导出租约以及内容库导入请求。REST 适配器与模拟器共用这些类型。

pub mod customization;

pub use customization::{
    AdapterMapping, CustomizationSpec, CustomizationStatus, GlobalIpSettings, Identity, IpSetting,
    LinuxPrep, Sysprep,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

// ============================================
// 清单对象
// ============================================

/// 清单对象类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InventoryKind {
    Datacenter,
    Cluster,
    Host,
    Datastore,
    ResourcePool,
    Folder,
    Network,
    VirtualMachine,
    Snapshot,
    Task,
    Library,
    LibraryItem,
}

impl InventoryKind {
    /// 管理平面中的类型名称（用于对象引用的字符串形式）
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Datacenter => "Datacenter",
            Self::Cluster => "ClusterComputeResource",
            Self::Host => "HostSystem",
            Self::Datastore => "Datastore",
            Self::ResourcePool => "ResourcePool",
            Self::Folder => "Folder",
            Self::Network => "Network",
            Self::VirtualMachine => "VirtualMachine",
            Self::Snapshot => "VirtualMachineSnapshot",
            Self::Task => "Task",
            Self::Library => "ContentLibrary",
            Self::LibraryItem => "ContentLibraryItem",
        }
    }

    /// 获取中文显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Datacenter => "数据中心",
            Self::Cluster => "集群",
            Self::Host => "主机",
            Self::Datastore => "数据存储",
            Self::ResourcePool => "资源池",
            Self::Folder => "文件夹",
            Self::Network => "网络",
            Self::VirtualMachine => "虚拟机",
            Self::Snapshot => "快照",
            Self::Task => "任务",
            Self::Library => "内容库",
            Self::LibraryItem => "内容库条目",
        }
    }
}

impl fmt::Display for InventoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// 管理平面对象引用
///
/// 字符串形式为 `类型:标识`，例如 `Network:network-7`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: InventoryKind,
    pub value: String,
}

impl ObjectRef {
    pub fn new(kind: InventoryKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn vm(value: impl Into<String>) -> Self {
        Self::new(InventoryKind::VirtualMachine, value)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.type_name(), self.value)
    }
}

/// 清单对象（引用 + 名称 + 清单路径）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryObject {
    pub reference: ObjectRef,
    pub name: String,

    /// 清单路径，例如 `/DC0/host/DC0_C0`
    #[serde(default)]
    pub path: String,
}

/// 清单查找条件
///
/// 名称中包含 `/` 时按清单路径匹配，否则按对象名称匹配；名称为空时返回该类型的全部对象。
#[derive(Debug, Clone, Default)]
pub struct Lookup {
    /// 名称或路径
    pub name: String,

    /// 限定的数据中心
    pub datacenter: Option<ObjectRef>,
}

impl Lookup {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            datacenter: None,
        }
    }

    pub fn within(mut self, datacenter: &ObjectRef) -> Self {
        self.datacenter = Some(datacenter.clone());
        self
    }

    pub fn is_path(&self) -> bool {
        self.name.contains('/')
    }
}

// ============================================
// 虚拟机
// ============================================

/// 虚拟机查询条件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmQuery {
    /// 按名称
    Name(String),
    /// 按清单路径
    Path(String),
    /// 按 BIOS/实例 UUID
    Uuid(String),
}

impl fmt::Display for VmQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "名称 '{}'", name),
            Self::Path(path) => write!(f, "路径 '{}'", path),
            Self::Uuid(uuid) => write!(f, "UUID '{}'", uuid),
        }
    }
}

/// 电源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

impl PowerState {
    pub fn is_on(&self) -> bool {
        matches!(self, Self::PoweredOn)
    }
}

/// 虚拟机概要信息（查询结果）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmSummary {
    pub reference: ObjectRef,
    pub name: String,
    pub uuid: String,
    pub path: String,
    pub is_template: bool,
    pub power_state: PowerState,
}

/// 虚拟磁盘信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub key: i32,
    pub label: String,
    pub capacity_mb: u64,
}

/// 虚拟机实时配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmConfig {
    pub name: String,
    pub uuid: String,

    /// 备注
    #[serde(default)]
    pub annotation: String,

    /// vCPU 数量
    pub num_cpu: u32,

    /// 每插槽核心数
    pub num_cores_per_socket: u32,

    /// 内存大小 (MB)
    pub memory_mb: u64,

    /// 虚拟机目录，例如 `[LocalDS_0] vm-name`
    pub vm_dir: String,

    /// 所在主机
    pub host: Option<InventoryObject>,

    /// 使用的数据存储
    #[serde(default)]
    pub datastores: Vec<InventoryObject>,

    /// 网络适配器所连接的网络
    #[serde(default)]
    pub networks: Vec<ObjectRef>,

    /// 虚拟磁盘
    #[serde(default)]
    pub disks: Vec<DiskInfo>,

    pub is_template: bool,
    pub power_state: PowerState,
}

impl VmConfig {
    /// 主磁盘容量 (MB)
    pub fn primary_disk_mb(&self) -> Option<u64> {
        self.disks.first().map(|d| d.capacity_mb)
    }
}

/// 快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub reference: ObjectRef,
    pub name: String,
}

// ============================================
// 克隆与重配置
// ============================================

/// 克隆请求（提交给管理平面的线上格式）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneRequest {
    /// 克隆源（虚拟机或模板）
    pub source: ObjectRef,

    /// 新虚拟机名称
    pub name: String,

    /// 目标文件夹
    pub folder: ObjectRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_pool: Option<ObjectRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<ObjectRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datastore: Option<ObjectRef>,

    /// 链接克隆时基于的快照
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_snapshot: Option<ObjectRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_cpus: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores_per_socket: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,

    /// 主磁盘新容量 (MB)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size_mb: Option<u64>,

    /// 第一块网卡连接的网络
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<ObjectRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

/// 硬件重配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmReconfigure {
    pub cpu_reservation: Option<i64>,
    pub cpu_limit: Option<i64>,
    pub ram_reservation: Option<i64>,
    pub ram_reserve_all: Option<bool>,
    pub cpu_hot_add: Option<bool>,
    pub mem_hot_add: Option<bool>,
    pub nested_hv: Option<bool>,
    pub boot_order: Option<Vec<String>>,

    /// 扩展配置参数
    #[serde(default)]
    pub extra_config: BTreeMap<String, String>,
}

impl VmReconfigure {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ============================================
// 可移动设备
// ============================================

/// 光驱控制器
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CdromController {
    #[default]
    Ide,
    Sata,
}

/// 虚拟光驱
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdromDevice {
    pub controller: CdromController,

    /// 挂载的 ISO 文件（数据存储路径），`None` 表示空光驱
    pub iso_path: Option<String>,
}

// ============================================
// 任务
// ============================================

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Error,
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// 任务信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub reference: ObjectRef,
    pub state: TaskState,

    /// 进度百分比
    pub progress: Option<u8>,

    /// 任务结果（克隆任务为新虚拟机引用，失败时可能指向残留的半成品）
    pub result: Option<ObjectRef>,

    /// 失败原因
    pub error: Option<String>,
}

// ============================================
// 客户机
// ============================================

/// 客户机网络信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuestNetInfo {
    /// VMware Tools 是否运行
    pub tools_running: bool,

    /// 客户机上报的 IP 地址
    pub ip_addresses: Vec<IpAddr>,
}

// ============================================
// 导出与内容库
// ============================================

/// 导出租约中的单个文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseItem {
    /// 文件名（例如 `disk-0.vmdk`）
    pub name: String,

    /// 下载地址
    pub url: String,

    /// 预估大小（字节）
    pub size: u64,
}

/// 导出租约
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportLease {
    /// OVF 描述符
    pub descriptor: String,

    /// 需要下载的磁盘文件
    pub items: Vec<LeaseItem>,
}

/// 内容库导入请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryImportRequest {
    pub library: ObjectRef,
    pub name: String,
    pub description: Option<String>,

    /// 以 OVF 条目导入（否则导入为虚拟机模板）
    pub ovf: bool,

    pub folder: Option<ObjectRef>,
    pub resource_pool: Option<ObjectRef>,
    pub host: Option<ObjectRef>,
    pub cluster: Option<ObjectRef>,
    pub datastore: Option<ObjectRef>,
}

// ============================================
// 会话
// ============================================

/// 登录凭据
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,

    /// 跳过证书校验
    pub insecure: bool,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"******")
            .field("insecure", &self.insecure)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_display() {
        let net = ObjectRef::new(InventoryKind::Network, "network-7");
        assert_eq!(net.to_string(), "Network:network-7");

        let vm = ObjectRef::vm("vm-42");
        assert_eq!(vm.to_string(), "VirtualMachine:vm-42");
    }

    #[test]
    fn test_lookup_path_detection() {
        assert!(Lookup::named("/DC0/vm/folder").is_path());
        assert!(!Lookup::named("DC0_C0").is_path());
    }

    #[test]
    fn test_reconfigure_is_empty() {
        assert!(VmReconfigure::default().is_empty());

        let mut update = VmReconfigure::default();
        update.extra_config.insert("disk.EnableUUID".into(), "TRUE".into());
        assert!(!update.is_empty());
    }

    #[test]
    fn test_credentials_debug_masks_password() {
        let creds = Credentials {
            username: "admin".into(),
            password: "secret".into(),
            insecure: false,
        };
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("secret"));
    }
}
