//! 转换为模板

use tracing::info;
use vclone_driver::Driver;

use crate::clone::{VmHandle, VmState};
use crate::error::Result;

/// 转换为模板，句柄随之变为不可变
pub async fn convert(driver: &dyn Driver, vm: &mut VmHandle) -> Result<()> {
    info!("转换为模板: {}", vm.name);
    driver.mark_as_template(&vm.reference).await?;
    vm.state = VmState::Template;
    Ok(())
}
