//! vSphere 管理平面驱动
//!
//! 定义构建流水线所需的驱动能力接口，并提供两个实现：
//!
//! - **REST 适配器** (`VsphereClient`): 通过 vCenter REST API 操作真实环境
//! - **模拟器** (`Simulator`): 确定性的内存清单，支持故障注入与调用记录
//!
//! # 示例
//!
//! ```ignore
//! use vclone_driver::{Credentials, Driver, InventoryKind, Lookup, Simulator};
//!
//! let sim = Simulator::new();
//! sim.login(&Credentials {
//!     username: "admin".into(),
//!     password: "secret".into(),
//!     insecure: true,
//! })
//! .await?;
//!
//! let clusters = sim
//!     .find_objects(InventoryKind::Cluster, &Lookup::named("DC0_C0"))
//!     .await?;
//! ```

pub mod api;
pub mod client;
pub mod driver;
pub mod error;
mod live;
pub mod models;
pub mod simulator;

pub use client::{ClientConfig, VsphereClient, VsphereClientFactory};
pub use driver::{Driver, DriverFactory, Endpoint};
pub use error::{DriverError, Result};
pub use simulator::{CustomizationOutcome, GuestIpBehavior, SimBehavior, Simulator};

pub use models::{
    // 清单
    InventoryKind, InventoryObject, Lookup, ObjectRef,

    // 虚拟机
    DiskInfo, PowerState, Snapshot, VmConfig, VmQuery, VmSummary,

    // 克隆与任务
    CloneRequest, TaskInfo, TaskState, VmReconfigure,

    // 可移动设备
    CdromController, CdromDevice,

    // 客户机
    AdapterMapping, CustomizationSpec, CustomizationStatus, GlobalIpSettings, GuestNetInfo,
    Identity, IpSetting, LinuxPrep, Sysprep,

    // 导出与内容库
    ExportLease, LeaseItem, LibraryImportRequest,

    Credentials,
};
