//! 内容库 API

use reqwest::Method;
use serde_json::json;
use tracing::info;

use crate::client::VsphereClient;
use crate::error::{DriverError, Result};
use crate::models::{InventoryKind, InventoryObject, LibraryImportRequest, ObjectRef};

/// 内容库 API
pub struct LibraryApi<'a> {
    client: &'a VsphereClient,
}

impl<'a> LibraryApi<'a> {
    pub(crate) fn new(client: &'a VsphereClient) -> Self {
        Self { client }
    }

    /// 按名称查找内容库
    pub async fn find(&self, name: &str) -> Result<Vec<InventoryObject>> {
        let ids: Vec<String> = self
            .client
            .request(
                Method::POST,
                "/api/content/library?action=find",
                Some(json!({ "name": name })),
            )
            .await?;

        Ok(ids
            .into_iter()
            .map(|id| InventoryObject {
                reference: ObjectRef::new(InventoryKind::Library, id),
                name: name.to_string(),
                path: String::new(),
            })
            .collect())
    }

    /// 导入为 OVF 条目
    pub async fn import_ovf(&self, vm_id: &str, req: &LibraryImportRequest) -> Result<ObjectRef> {
        info!("导入内容库 (OVF): {} -> {}", vm_id, req.name);
        let value: serde_json::Value = self
            .client
            .request(
                Method::POST,
                "/api/vcenter/ovf/library-item",
                Some(json!({
                    "source": { "type": "VirtualMachine", "id": vm_id },
                    "target": { "library_id": req.library.value },
                    "create_spec": {
                        "name": req.name,
                        "description": req.description,
                    },
                })),
            )
            .await?;

        if value["succeeded"].as_bool() == Some(false) {
            return Err(DriverError::OperationFailed(format!(
                "OVF 导入失败: {}",
                value["error"]
            )));
        }

        value["ovf_library_item_id"]
            .as_str()
            .map(|id| ObjectRef::new(InventoryKind::LibraryItem, id))
            .ok_or_else(|| DriverError::ParseError("响应缺少 ovf_library_item_id".to_string()))
    }

    /// 导入为虚拟机模板
    pub async fn import_template(
        &self,
        vm_id: &str,
        req: &LibraryImportRequest,
    ) -> Result<ObjectRef> {
        info!("导入内容库 (模板): {} -> {}", vm_id, req.name);
        let id: String = self
            .client
            .request(
                Method::POST,
                "/api/vcenter/vm-template/library-items",
                Some(json!({
                    "source_vm": vm_id,
                    "name": req.name,
                    "description": req.description,
                    "library": req.library.value,
                    "placement": {
                        "folder": req.folder.as_ref().map(|r| &r.value),
                        "resource_pool": req.resource_pool.as_ref().map(|r| &r.value),
                        "host": req.host.as_ref().map(|r| &r.value),
                        "cluster": req.cluster.as_ref().map(|r| &r.value),
                    },
                    "disk_storage": {
                        "datastore": req.datastore.as_ref().map(|r| &r.value),
                    },
                })),
            )
            .await?;

        Ok(ObjectRef::new(InventoryKind::LibraryItem, id))
    }
}
