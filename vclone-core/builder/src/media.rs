//! 光驱与软驱（克隆后挂载，关机后移除）

use tracing::{debug, info};
use vclone_driver::{CdromController, CdromDevice, Driver};

use crate::clone::VmHandle;
use crate::config::{CdromConfig, CdromType, FloppyConfig};
use crate::error::Result;

impl From<CdromType> for CdromController {
    fn from(value: CdromType) -> Self {
        match value {
            CdromType::Ide => Self::Ide,
            CdromType::Sata => Self::Sata,
        }
    }
}

impl CdromConfig {
    /// 每个 ISO 对应一个新光驱
    pub fn devices(&self) -> Vec<CdromDevice> {
        self.iso_paths
            .iter()
            .map(|iso| CdromDevice {
                controller: self.cdrom_type.into(),
                iso_path: Some(iso.clone()),
            })
            .collect()
    }
}

/// 是否需要挂载阶段
pub fn needs_attach(cdrom: &CdromConfig, floppy: &FloppyConfig) -> bool {
    !cdrom.iso_paths.is_empty() || floppy.floppy_img_path.is_some()
}

/// 是否需要移除阶段
pub fn needs_detach(cdrom: &CdromConfig, floppy: &FloppyConfig) -> bool {
    cdrom.remove_cdrom || floppy.floppy_img_path.is_some()
}

/// 挂载 ISO 与软盘镜像，返回新增设备数
pub async fn attach(
    driver: &dyn Driver,
    vm: &VmHandle,
    cdrom: &CdromConfig,
    floppy: &FloppyConfig,
) -> Result<usize> {
    let devices = cdrom.devices();
    for device in &devices {
        info!("挂载 ISO: {} {:?}", vm.name, device.iso_path);
        driver.add_cdrom(&vm.reference, device).await?;
    }

    let mut added = devices.len();
    if let Some(image) = floppy.floppy_img_path.as_deref() {
        info!("挂载软盘镜像: {} {}", vm.name, image);
        driver.add_floppy(&vm.reference, image).await?;
        added += 1;
    }
    Ok(added)
}

/// 移除光驱（按 `remove_cdrom`）与软驱（挂载过镜像时），返回移除的设备数
pub async fn detach(
    driver: &dyn Driver,
    vm: &VmHandle,
    cdrom: &CdromConfig,
    floppy: &FloppyConfig,
) -> Result<usize> {
    let mut removed = 0;
    if cdrom.remove_cdrom {
        let count = driver.remove_cdroms(&vm.reference).await?;
        debug!("移除光驱 {} 个: {}", count, vm.name);
        removed += count;
    }
    if floppy.floppy_img_path.is_some() {
        let count = driver.remove_floppies(&vm.reference).await?;
        debug!("移除软驱 {} 个: {}", count, vm.name);
        removed += count;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_device_per_iso() {
        let config = CdromConfig {
            cdrom_type: CdromType::Sata,
            iso_paths: vec![
                "[LocalDS_0] iso/os.iso".into(),
                "[LocalDS_0] iso/tools.iso".into(),
            ],
            remove_cdrom: false,
        };
        let devices = config.devices();
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(|d| d.controller == CdromController::Sata));
        assert_eq!(devices[1].iso_path.as_deref(), Some("[LocalDS_0] iso/tools.iso"));
    }

    #[test]
    fn test_stage_need() {
        let none = CdromConfig::default();
        let no_floppy = FloppyConfig::default();
        assert!(!needs_attach(&none, &no_floppy));
        assert!(!needs_detach(&none, &no_floppy));

        let remove_only = CdromConfig {
            remove_cdrom: true,
            ..Default::default()
        };
        assert!(!needs_attach(&remove_only, &no_floppy));
        assert!(needs_detach(&remove_only, &no_floppy));

        let floppy = FloppyConfig {
            floppy_img_path: Some("[LocalDS_0] floppy/answer.flp".into()),
        };
        assert!(needs_attach(&none, &floppy));
        assert!(needs_detach(&none, &floppy));
    }
}
