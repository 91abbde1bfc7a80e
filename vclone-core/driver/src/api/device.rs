//! 可移动设备 API（光驱、软驱）

use reqwest::Method;
use serde_json::json;
use tracing::info;

use super::str_field;
use crate::client::VsphereClient;
use crate::error::Result;
use crate::models::{CdromController, CdromDevice};

/// 可移动设备类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Cdrom,
    Floppy,
}

impl DeviceKind {
    /// REST 路径段，同时也是列表响应中的标识字段名
    fn segment(&self) -> &'static str {
        match self {
            Self::Cdrom => "cdrom",
            Self::Floppy => "floppy",
        }
    }
}

/// 可移动设备 API
pub struct DeviceApi<'a> {
    client: &'a VsphereClient,
}

impl<'a> DeviceApi<'a> {
    pub(crate) fn new(client: &'a VsphereClient) -> Self {
        Self { client }
    }

    /// 列出设备标识
    pub async fn list(&self, vm_id: &str, kind: DeviceKind) -> Result<Vec<String>> {
        let items: Vec<serde_json::Value> = self
            .client
            .request(
                Method::GET,
                &format!("/api/vcenter/vm/{}/hardware/{}", vm_id, kind.segment()),
                None::<()>,
            )
            .await?;
        items
            .iter()
            .map(|item| str_field(item, kind.segment()))
            .collect()
    }

    /// 删除设备
    pub async fn delete(&self, vm_id: &str, kind: DeviceKind, device_id: &str) -> Result<()> {
        info!("删除{}: {} / {}", kind.segment(), vm_id, device_id);
        self.client
            .execute(
                Method::DELETE,
                &format!(
                    "/api/vcenter/vm/{}/hardware/{}/{}",
                    vm_id,
                    kind.segment(),
                    device_id
                ),
                None::<()>,
            )
            .await
    }

    /// 添加光驱；SATA 光驱在缺少 SATA 控制器时先创建控制器
    pub async fn add_cdrom(&self, vm_id: &str, device: &CdromDevice) -> Result<()> {
        if device.controller == CdromController::Sata {
            self.ensure_sata_adapter(vm_id).await?;
        }
        info!("添加光驱: {} {:?}", vm_id, device.iso_path);
        self.client
            .execute(
                Method::POST,
                &format!("/api/vcenter/vm/{}/hardware/cdrom", vm_id),
                Some(cdrom_body(device)),
            )
            .await
    }

    /// 添加软驱
    pub async fn add_floppy(&self, vm_id: &str, image_path: &str) -> Result<()> {
        info!("添加软驱: {} {}", vm_id, image_path);
        self.client
            .execute(
                Method::POST,
                &format!("/api/vcenter/vm/{}/hardware/floppy", vm_id),
                Some(floppy_body(image_path)),
            )
            .await
    }

    async fn ensure_sata_adapter(&self, vm_id: &str) -> Result<()> {
        let path = format!("/api/vcenter/vm/{}/hardware/adapter/sata", vm_id);
        let adapters: Vec<serde_json::Value> =
            self.client.request(Method::GET, &path, None::<()>).await?;
        if adapters.is_empty() {
            info!("添加 SATA 控制器: {}", vm_id);
            self.client
                .execute(Method::POST, &path, Some(json!({})))
                .await?;
        }
        Ok(())
    }
}

pub(crate) fn cdrom_body(device: &CdromDevice) -> serde_json::Value {
    let mut body = json!({
        "type": match device.controller {
            CdromController::Ide => "IDE",
            CdromController::Sata => "SATA",
        },
        "start_connected": true,
        "allow_guest_control": true,
    });
    body["backing"] = match &device.iso_path {
        Some(iso) => json!({ "type": "ISO_FILE", "iso_file": iso }),
        None => json!({ "type": "CLIENT_DEVICE" }),
    };
    body
}

pub(crate) fn floppy_body(image_path: &str) -> serde_json::Value {
    json!({
        "backing": { "type": "IMAGE_FILE", "image_file": image_path },
        "start_connected": true,
        "allow_guest_control": true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cdrom_body_with_iso() {
        let body = cdrom_body(&CdromDevice {
            controller: CdromController::Sata,
            iso_path: Some("[LocalDS_0] iso/tools.iso".into()),
        });
        assert_eq!(body["type"], "SATA");
        assert_eq!(body["backing"]["type"], "ISO_FILE");
        assert_eq!(body["backing"]["iso_file"], "[LocalDS_0] iso/tools.iso");
    }

    #[test]
    fn test_empty_cdrom_body() {
        let body = cdrom_body(&CdromDevice {
            controller: CdromController::Ide,
            iso_path: None,
        });
        assert_eq!(body["type"], "IDE");
        assert_eq!(body["backing"]["type"], "CLIENT_DEVICE");
    }

    #[test]
    fn test_floppy_body() {
        let body = floppy_body("[LocalDS_0] floppy/answer.flp");
        assert_eq!(body["backing"]["image_file"], "[LocalDS_0] floppy/answer.flp");
    }
}
