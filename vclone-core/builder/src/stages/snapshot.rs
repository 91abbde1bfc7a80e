//! 快照阶段

use tracing::info;
use vclone_driver::{Driver, Snapshot};

use crate::clone::VmHandle;
use crate::error::Result;

/// 创建构建快照
pub async fn create(driver: &dyn Driver, vm: &VmHandle, name: &str) -> Result<Snapshot> {
    info!("创建快照 '{}': {}", name, vm.name);
    let snapshot = driver
        .create_snapshot(&vm.reference, name, "vclone 构建完成时创建")
        .await?;
    info!("快照已创建: {}", snapshot.reference);
    Ok(snapshot)
}
