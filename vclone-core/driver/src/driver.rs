//! 驱动能力接口
//!
//! 构建流水线只依赖这里定义的契约。实现方有两个：
//! - [`crate::VsphereClient`]：面向真实 vCenter 的 REST 适配器
//! - [`crate::Simulator`]：确定性的内存模拟器

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{
    CdromDevice, CloneRequest, Credentials, CustomizationSpec, CustomizationStatus, ExportLease,
    GuestNetInfo, InventoryKind, InventoryObject, LeaseItem, LibraryImportRequest, Lookup,
    ObjectRef, PowerState, Snapshot, TaskInfo, VmConfig, VmQuery, VmReconfigure, VmSummary,
};

/// 管理平面驱动
///
/// 所有方法都可能访问远端，需在会话建立后调用（`login` 除外）。
#[async_trait]
pub trait Driver: Send + Sync {
    // ---------- 会话 ----------

    /// 建立会话
    async fn login(&self, credentials: &Credentials) -> Result<()>;

    /// 释放会话
    async fn logout(&self) -> Result<()>;

    /// 会话是否有效
    async fn session_active(&self) -> bool;

    // ---------- 清单 ----------

    /// 按名称或路径查找清单对象
    async fn find_objects(&self, kind: InventoryKind, lookup: &Lookup)
        -> Result<Vec<InventoryObject>>;

    /// 查找虚拟机或模板
    async fn find_vms(&self, query: &VmQuery) -> Result<Vec<VmSummary>>;

    /// 读取虚拟机实时配置
    async fn vm_config(&self, vm: &ObjectRef) -> Result<VmConfig>;

    /// 按名称查找快照
    async fn find_snapshot(&self, vm: &ObjectRef, name: &str) -> Result<Option<Snapshot>>;

    /// 当前快照
    async fn current_snapshot(&self, vm: &ObjectRef) -> Result<Option<Snapshot>>;

    // ---------- 克隆与任务 ----------

    /// 提交克隆任务，返回任务引用
    async fn clone_vm(&self, request: &CloneRequest) -> Result<ObjectRef>;

    /// 查询任务状态
    async fn task_info(&self, task: &ObjectRef) -> Result<TaskInfo>;

    /// 取消任务
    async fn cancel_task(&self, task: &ObjectRef) -> Result<()>;

    /// 删除虚拟机（从清单注销并删除磁盘）
    async fn destroy_vm(&self, vm: &ObjectRef) -> Result<()>;

    /// 修改硬件配置
    async fn reconfigure(&self, vm: &ObjectRef, update: &VmReconfigure) -> Result<()>;

    // ---------- 可移动设备（要求虚拟机关机） ----------

    /// 添加光驱
    async fn add_cdrom(&self, vm: &ObjectRef, device: &CdromDevice) -> Result<()>;

    /// 删除全部光驱，返回删除的数量
    async fn remove_cdroms(&self, vm: &ObjectRef) -> Result<usize>;

    /// 添加软驱并挂载镜像（数据存储路径）
    async fn add_floppy(&self, vm: &ObjectRef, image_path: &str) -> Result<()>;

    /// 删除全部软驱，返回删除的数量
    async fn remove_floppies(&self, vm: &ObjectRef) -> Result<usize>;

    // ---------- 客户机 ----------

    /// 下发客户机定制规范
    async fn customize(&self, vm: &ObjectRef, spec: &CustomizationSpec) -> Result<()>;

    /// 客户机定制状态
    async fn customization_status(&self, vm: &ObjectRef) -> Result<CustomizationStatus>;

    /// 客户机网络信息
    async fn guest_net(&self, vm: &ObjectRef) -> Result<GuestNetInfo>;

    // ---------- 电源 ----------

    async fn power_on(&self, vm: &ObjectRef) -> Result<()>;

    /// 通过客户机工具关机
    async fn shutdown_guest(&self, vm: &ObjectRef) -> Result<()>;

    /// 强制断电
    async fn power_off(&self, vm: &ObjectRef) -> Result<()>;

    async fn power_state(&self, vm: &ObjectRef) -> Result<PowerState>;

    // ---------- 后处理 ----------

    async fn create_snapshot(
        &self,
        vm: &ObjectRef,
        name: &str,
        description: &str,
    ) -> Result<Snapshot>;

    /// 转换为模板
    async fn mark_as_template(&self, vm: &ObjectRef) -> Result<()>;

    /// 申请导出租约
    async fn export_lease(&self, vm: &ObjectRef) -> Result<ExportLease>;

    /// 下载租约中的文件，返回写入的字节数
    async fn download(&self, item: &LeaseItem, dest: &Path) -> Result<u64>;

    /// 结束导出租约
    async fn complete_export(&self, vm: &ObjectRef) -> Result<()>;

    /// 导入内容库，返回内容库条目引用
    async fn import_to_library(
        &self,
        vm: &ObjectRef,
        request: &LibraryImportRequest,
    ) -> Result<ObjectRef>;
}

/// 管理端点
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// vCenter 地址（主机名或 URL）
    pub server: String,

    /// 跳过证书校验
    pub insecure: bool,
}

/// 驱动工厂
///
/// 每次流水线运行都通过工厂获得独立的驱动实例（独立会话），
/// 并发运行之间不共享可变状态。
pub trait DriverFactory: Send + Sync {
    fn new_session(&self, endpoint: &Endpoint) -> Result<Arc<dyn Driver>>;
}
