//! 虚拟机管理 API
//!
//! 提供克隆、删除、硬件修改、电源操作、模板转换与导出租约。

use reqwest::Method;
use serde_json::json;
use tracing::info;

use super::inventory::Filter;
use super::str_field;
use crate::client::VsphereClient;
use crate::error::Result;
use crate::models::{
    CloneRequest, ExportLease, InventoryKind, LeaseItem, PowerState, VmReconfigure,
};

/// 虚拟机管理 API
pub struct VmApi<'a> {
    client: &'a VsphereClient,
}

impl<'a> VmApi<'a> {
    pub(crate) fn new(client: &'a VsphereClient) -> Self {
        Self { client }
    }

    /// 查询虚拟机列表
    pub async fn list(&self, filter: &Filter<'_>) -> Result<Vec<serde_json::Value>> {
        self.client
            .inventory()
            .raw_list("/api/vcenter/vm", &filter.pairs(InventoryKind::VirtualMachine))
            .await
    }

    /// 查询虚拟机详情
    pub async fn get(&self, vm_id: &str) -> Result<serde_json::Value> {
        self.client
            .request(
                Method::GET,
                &format!("/api/vcenter/vm/{}", vm_id),
                None::<()>,
            )
            .await
    }

    /// 提交克隆任务，返回任务标识
    pub async fn clone(&self, req: &CloneRequest) -> Result<String> {
        info!("克隆虚拟机: {} -> {}", req.source.value, req.name);
        self.client
            .request(
                Method::POST,
                "/api/vcenter/vm?action=clone&vmw-task=true",
                Some(clone_body(req)),
            )
            .await
    }

    /// 删除虚拟机
    pub async fn delete(&self, vm_id: &str) -> Result<()> {
        info!("删除虚拟机: {}", vm_id);
        self.client
            .execute(
                Method::DELETE,
                &format!("/api/vcenter/vm/{}", vm_id),
                None::<()>,
            )
            .await
    }

    /// 修改 CPU 配置
    pub async fn update_cpu(&self, vm_id: &str, body: serde_json::Value) -> Result<()> {
        self.client
            .execute(
                Method::PATCH,
                &format!("/api/vcenter/vm/{}/hardware/cpu", vm_id),
                Some(body),
            )
            .await
    }

    /// 修改内存配置
    pub async fn update_memory(&self, vm_id: &str, body: serde_json::Value) -> Result<()> {
        self.client
            .execute(
                Method::PATCH,
                &format!("/api/vcenter/vm/{}/hardware/memory", vm_id),
                Some(body),
            )
            .await
    }

    /// 设置启动顺序
    pub async fn set_boot_order(&self, vm_id: &str, order: &[String]) -> Result<()> {
        info!("设置启动顺序: {} -> {:?}", vm_id, order);
        let devices: Vec<_> = order
            .iter()
            .map(|device| json!({ "type": boot_device_type(device) }))
            .collect();
        self.client
            .execute(
                Method::PUT,
                &format!("/api/vcenter/vm/{}/hardware/boot/device", vm_id),
                Some(json!({ "devices": devices })),
            )
            .await
    }

    /// 写入扩展配置与资源分配
    pub async fn update_advanced(&self, vm_id: &str, update: &VmReconfigure) -> Result<()> {
        self.client
            .execute(
                Method::PATCH,
                &format!("/api/vcenter/vm/{}/hardware/advanced", vm_id),
                Some(json!({
                    "cpu_allocation": {
                        "reservation": update.cpu_reservation,
                        "limit": update.cpu_limit,
                    },
                    "memory_allocation": {
                        "reservation": update.ram_reservation,
                        "reserve_all": update.ram_reserve_all,
                    },
                    "nested_hv_enabled": update.nested_hv,
                    "extra_config": update.extra_config,
                })),
            )
            .await
    }

    /// 启动虚拟机
    pub async fn start(&self, vm_id: &str) -> Result<()> {
        info!("启动虚拟机: {}", vm_id);
        self.power_action(vm_id, "start").await
    }

    /// 强制关闭虚拟机
    pub async fn stop(&self, vm_id: &str) -> Result<()> {
        info!("强制关闭虚拟机: {}", vm_id);
        self.power_action(vm_id, "stop").await
    }

    async fn power_action(&self, vm_id: &str, action: &str) -> Result<()> {
        self.client
            .execute(
                Method::POST,
                &format!("/api/vcenter/vm/{}/power?action={}", vm_id, action),
                None::<()>,
            )
            .await
    }

    /// 查询电源状态
    pub async fn power_state(&self, vm_id: &str) -> Result<PowerState> {
        let value: serde_json::Value = self
            .client
            .request(
                Method::GET,
                &format!("/api/vcenter/vm/{}/power", vm_id),
                None::<()>,
            )
            .await?;
        Ok(parse_power_state(value["state"].as_str().unwrap_or_default()))
    }

    /// 转换为模板
    pub async fn mark_as_template(&self, vm_id: &str) -> Result<()> {
        info!("转换为模板: {}", vm_id);
        self.client
            .execute(
                Method::POST,
                &format!("/api/vcenter/vm/{}?action=mark-as-template", vm_id),
                None::<()>,
            )
            .await
    }

    /// 申请导出租约
    pub async fn create_export_lease(&self, vm_id: &str) -> Result<ExportLease> {
        info!("申请导出租约: {}", vm_id);
        let value: serde_json::Value = self
            .client
            .request(
                Method::POST,
                &format!("/api/vcenter/vm/{}/export?action=create-lease", vm_id),
                None::<()>,
            )
            .await?;

        let items = value["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        Ok(LeaseItem {
                            name: str_field(item, "name")?,
                            url: str_field(item, "url")?,
                            size: item["size"].as_u64().unwrap_or(0),
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(ExportLease {
            descriptor: str_field(&value, "descriptor")?,
            items,
        })
    }

    /// 结束导出租约
    pub async fn complete_export_lease(&self, vm_id: &str) -> Result<()> {
        self.client
            .execute(
                Method::POST,
                &format!("/api/vcenter/vm/{}/export?action=complete", vm_id),
                None::<()>,
            )
            .await
    }
}

/// 构造克隆请求体
pub(crate) fn clone_body(req: &CloneRequest) -> serde_json::Value {
    let mut placement = json!({ "folder": req.folder.value });
    if let Some(pool) = &req.resource_pool {
        placement["resource_pool"] = json!(pool.value);
    }
    if let Some(host) = &req.host {
        placement["host"] = json!(host.value);
    }
    if let Some(ds) = &req.datastore {
        placement["datastore"] = json!(ds.value);
    }

    let mut body = json!({
        "source": req.source.value,
        "name": req.name,
        "placement": placement,
        "power_on": false,
    });

    if let Some(snapshot) = &req.linked_snapshot {
        body["linked_clone"] = json!({ "snapshot": snapshot.value });
    }

    let mut hardware = serde_json::Map::new();
    if let Some(cpus) = req.num_cpus {
        hardware.insert(
            "cpu".into(),
            json!({ "count": cpus, "cores_per_socket": req.cores_per_socket }),
        );
    }
    if let Some(memory) = req.memory_mb {
        hardware.insert("memory".into(), json!({ "size_MiB": memory }));
    }
    if let Some(disk) = req.disk_size_mb {
        hardware.insert("primary_disk_MiB".into(), json!(disk));
    }
    if let Some(network) = &req.network {
        hardware.insert(
            "nic".into(),
            json!({ "network": network.value, "mac_address": req.mac_address }),
        );
    }
    if !hardware.is_empty() {
        body["hardware"] = serde_json::Value::Object(hardware);
    }
    if let Some(annotation) = &req.annotation {
        body["annotation"] = json!(annotation);
    }

    body
}

pub(crate) fn parse_power_state(state: &str) -> PowerState {
    match state {
        "POWERED_ON" => PowerState::PoweredOn,
        "SUSPENDED" => PowerState::Suspended,
        _ => PowerState::PoweredOff,
    }
}

fn boot_device_type(device: &str) -> &'static str {
    match device.to_lowercase().as_str() {
        "disk" => "DISK",
        "cdrom" => "CDROM",
        "floppy" => "FLOPPY",
        _ => "ETHERNET",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InventoryKind, ObjectRef};

    fn request() -> CloneRequest {
        CloneRequest {
            source: ObjectRef::vm("vm-10"),
            name: "build-1".into(),
            folder: ObjectRef::new(InventoryKind::Folder, "group-v3"),
            resource_pool: Some(ObjectRef::new(InventoryKind::ResourcePool, "resgroup-8")),
            host: None,
            datastore: None,
            linked_snapshot: None,
            num_cpus: None,
            cores_per_socket: None,
            memory_mb: None,
            disk_size_mb: None,
            network: None,
            mac_address: None,
            annotation: None,
        }
    }

    #[test]
    fn test_clone_body_minimal() {
        let body = clone_body(&request());
        assert_eq!(body["source"], "vm-10");
        assert_eq!(body["placement"]["folder"], "group-v3");
        assert_eq!(body["placement"]["resource_pool"], "resgroup-8");
        assert!(body.get("hardware").is_none());
        assert!(body.get("linked_clone").is_none());
    }

    #[test]
    fn test_clone_body_linked_with_hardware() {
        let mut req = request();
        req.linked_snapshot = Some(ObjectRef::new(InventoryKind::Snapshot, "snapshot-3"));
        req.num_cpus = Some(4);
        req.cores_per_socket = Some(2);
        req.network = Some(ObjectRef::new(InventoryKind::Network, "network-7"));

        let body = clone_body(&req);
        assert_eq!(body["linked_clone"]["snapshot"], "snapshot-3");
        assert_eq!(body["hardware"]["cpu"]["count"], 4);
        assert_eq!(body["hardware"]["nic"]["network"], "network-7");
    }

    #[test]
    fn test_boot_device_type() {
        assert_eq!(boot_device_type("disk"), "DISK");
        assert_eq!(boot_device_type("CDROM"), "CDROM");
        assert_eq!(boot_device_type("net"), "ETHERNET");
    }
}
