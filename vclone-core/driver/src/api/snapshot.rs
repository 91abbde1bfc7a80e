//! 快照管理 API

use reqwest::Method;
use tracing::info;

use super::str_field;
use crate::client::VsphereClient;
use crate::error::Result;
use crate::models::{InventoryKind, ObjectRef, Snapshot};

/// 快照管理 API
pub struct SnapshotApi<'a> {
    client: &'a VsphereClient,
}

impl<'a> SnapshotApi<'a> {
    pub(crate) fn new(client: &'a VsphereClient) -> Self {
        Self { client }
    }

    /// 列出快照，第二项表示是否为当前快照
    pub async fn list(&self, vm_id: &str) -> Result<Vec<(Snapshot, bool)>> {
        let items: Vec<serde_json::Value> = self
            .client
            .request(
                Method::GET,
                &format!("/api/vcenter/vm/{}/snapshots", vm_id),
                None::<()>,
            )
            .await?;

        items
            .iter()
            .map(|item| {
                let id = str_field(item, "snapshot")?;
                let snapshot = Snapshot {
                    reference: ObjectRef::new(InventoryKind::Snapshot, id),
                    name: str_field(item, "name")?,
                };
                Ok((snapshot, item["current"].as_bool().unwrap_or(false)))
            })
            .collect()
    }

    /// 创建快照
    pub async fn create(&self, vm_id: &str, name: &str, description: &str) -> Result<Snapshot> {
        info!("创建快照: {} -> {}", vm_id, name);
        let id: String = self
            .client
            .request(
                Method::POST,
                &format!("/api/vcenter/vm/{}/snapshots", vm_id),
                Some(serde_json::json!({
                    "name": name,
                    "description": description,
                    "memory": false,
                    "quiesce": false,
                })),
            )
            .await?;

        Ok(Snapshot {
            reference: ObjectRef::new(InventoryKind::Snapshot, id),
            name: name.to_string(),
        })
    }
}
