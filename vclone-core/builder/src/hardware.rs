//! 硬件配置（克隆后、开机前）

use tracing::{debug, info};
use vclone_driver::{Driver, VmReconfigure};

use crate::clone::VmHandle;
use crate::config::HardwareConfig;
use crate::error::Result;

impl HardwareConfig {
    /// 转换为重配置请求（CPU/内存数量已随克隆请求下发）
    pub fn to_reconfigure(&self) -> VmReconfigure {
        VmReconfigure {
            cpu_reservation: self.cpu_reservation,
            cpu_limit: self.cpu_limit,
            ram_reservation: self.ram_reservation,
            ram_reserve_all: self.ram_reserve_all.then_some(true),
            cpu_hot_add: self.cpu_hot_plug.then_some(true),
            mem_hot_add: self.ram_hot_plug.then_some(true),
            nested_hv: self.nested_hv.then_some(true),
            boot_order: None,
            extra_config: self.configuration_parameters.clone(),
        }
    }
}

/// 应用硬件配置，返回是否有变更
pub async fn configure(
    driver: &dyn Driver,
    vm: &VmHandle,
    config: &HardwareConfig,
) -> Result<bool> {
    let update = config.to_reconfigure();
    if update.is_empty() {
        debug!("无硬件变更: {}", vm.name);
        return Ok(false);
    }

    info!("修改硬件配置: {}", vm.name);
    driver.reconfigure(&vm.reference, &update).await?;
    Ok(true)
}
