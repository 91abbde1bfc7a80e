//! 电源控制：开机（含启动顺序与启动等待）、客户机关机、强制断电

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vclone_driver::{Driver, PowerState, VmReconfigure};

use crate::clone::VmHandle;
use crate::config::{BootConfig, ShutdownConfig};
use crate::error::{BuildError, Result};
use crate::poll::{poll_until, sleep_cancellable, Poll, PollPolicy};

/// 开机
pub async fn power_on(
    driver: &dyn Driver,
    vm: &VmHandle,
    boot: &BootConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    if !boot.boot_order.is_empty() {
        debug!("设置启动顺序: {:?}", boot.boot_order);
        let update = VmReconfigure {
            boot_order: Some(boot.boot_order.clone()),
            ..Default::default()
        };
        driver.reconfigure(&vm.reference, &update).await?;
    }

    info!("开机: {}", vm.name);
    driver.power_on(&vm.reference).await?;

    if !boot.boot_wait.is_zero() {
        info!("等待启动 {:?}", boot.boot_wait);
        sleep_cancellable(boot.boot_wait, cancel)
            .await
            .map_err(|e| e.into_build("启动等待"))?;
    }
    Ok(())
}

/// 关机并等待电源状态变为关闭
pub async fn shutdown(
    driver: &dyn Driver,
    vm: &VmHandle,
    config: &ShutdownConfig,
    poll: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<()> {
    if driver.power_state(&vm.reference).await? == PowerState::PoweredOff {
        debug!("虚拟机已关机: {}", vm.name);
        return Ok(());
    }

    if config.disable_shutdown {
        info!("等待客户机自行关机: {}", vm.name);
    } else {
        info!("客户机关机: {}", vm.name);
        driver.shutdown_guest(&vm.reference).await?;
    }

    let reference = &vm.reference;
    poll_until(&poll.with_timeout(config.shutdown_timeout), cancel, || async move {
        let state = driver.power_state(reference).await?;
        debug!("电源状态 {}: {:?}", reference, state);
        Ok::<_, BuildError>(match state {
            PowerState::PoweredOff => Poll::Ready(()),
            _ => Poll::Pending,
        })
    })
    .await
    .map_err(|e| e.into_build("关机"))?;

    info!("虚拟机已关机: {}", vm.name);
    Ok(())
}

/// 强制断电（清理时使用，忽略已关机的情况）
pub async fn force_off(driver: &dyn Driver, vm: &VmHandle) -> Result<()> {
    match driver.power_state(&vm.reference).await {
        Ok(PowerState::PoweredOff) => Ok(()),
        Ok(_) => {
            warn!("强制断电: {}", vm.name);
            driver.power_off(&vm.reference).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
