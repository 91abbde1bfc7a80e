//! 模拟器行为开关

use std::net::IpAddr;
use std::time::Duration;

/// 客户机定制结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomizationOutcome {
    /// 开机后第 n 次查询时成功
    SucceedAfter(u32),
    /// 开机后第 n 次查询时失败
    FailAfter(u32, String),
    /// 永远不会完成
    Never,
}

/// 客户机 IP 上报行为
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestIpBehavior {
    /// 第 n 次查询时上报该地址
    After(u32, IpAddr),
    /// 第 n 次查询时按顺序上报一组地址（每次查询前进一项）
    Sequence(Vec<Vec<IpAddr>>),
    /// 永远不上报地址
    Never,
}

/// 模拟器行为
#[derive(Debug, Clone)]
pub struct SimBehavior {
    /// 克隆任务需要的轮询次数
    pub clone_polls: u32,

    /// 克隆任务失败原因
    pub clone_fault: Option<String>,

    /// 克隆失败时是否遗留半成品虚拟机
    pub clone_leaves_partial: bool,

    /// 删除虚拟机失败原因
    pub destroy_fault: Option<String>,

    pub customization: CustomizationOutcome,

    pub guest_ip: GuestIpBehavior,

    /// 服务端证书不受信任（非 insecure 登录将失败）
    pub untrusted_certificate: bool,

    /// 允许登录的密码，`None` 表示接受任意密码
    pub password: Option<String>,

    /// 客户机关机所需的电源状态查询次数
    pub shutdown_polls: u32,

    /// 客户机忽略关机请求
    pub ignore_shutdown: bool,

    pub snapshot_fault: Option<String>,
    pub template_fault: Option<String>,
    pub export_fault: Option<String>,
    pub import_fault: Option<String>,

    /// 光驱/软驱操作失败原因
    pub device_fault: Option<String>,

    /// 每个磁盘文件的下载耗时
    pub download_delay: Duration,

    /// 覆盖导出租约中的磁盘文件名
    pub lease_item_name: Option<String>,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            clone_polls: 1,
            clone_fault: None,
            clone_leaves_partial: false,
            destroy_fault: None,
            customization: CustomizationOutcome::SucceedAfter(1),
            guest_ip: GuestIpBehavior::After(1, IpAddr::from([192, 168, 1, 100])),
            untrusted_certificate: false,
            password: None,
            shutdown_polls: 1,
            ignore_shutdown: false,
            snapshot_fault: None,
            template_fault: None,
            export_fault: None,
            import_fault: None,
            device_fault: None,
            download_delay: Duration::ZERO,
            lease_item_name: None,
        }
    }
}
