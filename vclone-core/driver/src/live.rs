//! REST 客户端的驱动实现

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use tracing::debug;

use crate::api::device::DeviceKind;
use crate::api::inventory::Filter;
use crate::api::str_field;
use crate::api::vm::parse_power_state;
use crate::client::VsphereClient;
use crate::driver::Driver;
use crate::error::{DriverError, Result};
use crate::models::{
    CdromDevice, CloneRequest, Credentials, CustomizationSpec, CustomizationStatus, DiskInfo,
    ExportLease, GuestNetInfo, InventoryKind, InventoryObject, LeaseItem, LibraryImportRequest,
    Lookup, ObjectRef, PowerState, Snapshot, TaskInfo, VmConfig, VmQuery, VmReconfigure,
    VmSummary,
};

#[async_trait]
impl Driver for VsphereClient {
    async fn login(&self, credentials: &Credentials) -> Result<()> {
        self.create_session(&credentials.username, &credentials.password)
            .await
    }

    async fn logout(&self) -> Result<()> {
        self.delete_session().await
    }

    async fn session_active(&self) -> bool {
        self.has_session().await
    }

    async fn find_objects(
        &self,
        kind: InventoryKind,
        lookup: &Lookup,
    ) -> Result<Vec<InventoryObject>> {
        if kind == InventoryKind::Library {
            return self.library().find(&lookup.name).await;
        }
        if lookup.is_path() {
            return self.find_by_path(kind, &lookup.name).await;
        }

        let filter = Filter {
            name: (!lookup.name.is_empty()).then_some(lookup.name.as_str()),
            datacenter: lookup.datacenter.as_ref().map(|dc| dc.value.as_str()),
            ..Default::default()
        };
        self.inventory().list(kind, &filter).await
    }

    async fn find_vms(&self, query: &VmQuery) -> Result<Vec<VmSummary>> {
        let (items, full_path) = match query {
            VmQuery::Name(name) => (self.vm().list(&Filter::named(name)).await?, None),
            VmQuery::Path(path) => {
                let Some(parsed) = InventoryPath::parse(path) else {
                    return Ok(Vec::new());
                };
                let Some(leaf) = parsed.leaf() else {
                    return Ok(Vec::new());
                };
                let Some(scope) = self.parent_scope(&parsed).await? else {
                    return Ok(Vec::new());
                };
                let items = self.vm().list(&scope.filter(leaf)).await?;
                (items, Some(parsed.to_string()))
            }
            VmQuery::Uuid(uuid) => {
                let mut matched = Vec::new();
                for item in self.vm().list(&Filter::default()).await? {
                    let id = str_field(&item, "vm")?;
                    let detail = self.vm().get(&id).await?;
                    let identity = &detail["identity"];
                    if identity["instance_uuid"].as_str() == Some(uuid.as_str())
                        || identity["bios_uuid"].as_str() == Some(uuid.as_str())
                    {
                        matched.push(item);
                    }
                }
                (matched, None)
            }
        };

        items
            .iter()
            .map(|item| {
                let name = str_field(item, "name")?;
                let state = item["power_state"].as_str().unwrap_or_default();
                Ok(VmSummary {
                    reference: ObjectRef::vm(str_field(item, "vm")?),
                    path: full_path.clone().unwrap_or_else(|| name.clone()),
                    name,
                    uuid: String::new(),
                    is_template: false,
                    power_state: parse_power_state(state),
                })
            })
            .collect()
    }

    async fn vm_config(&self, vm: &ObjectRef) -> Result<VmConfig> {
        let value = self.vm().get(&vm.value).await?;
        let mut config = parse_vm_config(&value)?;

        let mut datastores = Vec::new();
        for name in datastore_names(&value) {
            let found = self
                .inventory()
                .list(InventoryKind::Datastore, &Filter::named(&name))
                .await?;
            datastores.extend(found);
        }
        config.datastores = datastores;

        let hosts = self
            .inventory()
            .list(InventoryKind::Host, &Filter::default())
            .await?;
        for host in hosts {
            let filter = Filter {
                vm: Some(&vm.value),
                host: Some(&host.reference.value),
                ..Default::default()
            };
            let hits = self.vm().list(&filter).await?;
            if !hits.is_empty() {
                config.host = Some(host);
                break;
            }
        }

        Ok(config)
    }

    async fn find_snapshot(&self, vm: &ObjectRef, name: &str) -> Result<Option<Snapshot>> {
        Ok(self
            .snapshot()
            .list(&vm.value)
            .await?
            .into_iter()
            .map(|(snapshot, _)| snapshot)
            .find(|s| s.name == name))
    }

    async fn current_snapshot(&self, vm: &ObjectRef) -> Result<Option<Snapshot>> {
        Ok(self
            .snapshot()
            .list(&vm.value)
            .await?
            .into_iter()
            .find(|(_, current)| *current)
            .map(|(snapshot, _)| snapshot))
    }

    async fn clone_vm(&self, request: &CloneRequest) -> Result<ObjectRef> {
        let task_id = self.vm().clone(request).await?;
        Ok(ObjectRef::new(InventoryKind::Task, task_id))
    }

    async fn task_info(&self, task: &ObjectRef) -> Result<TaskInfo> {
        self.task().get(&task.value).await
    }

    async fn cancel_task(&self, task: &ObjectRef) -> Result<()> {
        self.task().cancel(&task.value).await
    }

    async fn destroy_vm(&self, vm: &ObjectRef) -> Result<()> {
        self.vm().delete(&vm.value).await
    }

    async fn reconfigure(&self, vm: &ObjectRef, update: &VmReconfigure) -> Result<()> {
        if let Some(hot_add) = update.cpu_hot_add {
            self.vm()
                .update_cpu(&vm.value, serde_json::json!({ "hot_add_enabled": hot_add }))
                .await?;
        }
        if let Some(hot_add) = update.mem_hot_add {
            self.vm()
                .update_memory(&vm.value, serde_json::json!({ "hot_add_enabled": hot_add }))
                .await?;
        }
        if let Some(order) = &update.boot_order {
            self.vm().set_boot_order(&vm.value, order).await?;
        }

        let advanced = VmReconfigure {
            cpu_hot_add: None,
            mem_hot_add: None,
            boot_order: None,
            ..update.clone()
        };
        if !advanced.is_empty() {
            self.vm().update_advanced(&vm.value, &advanced).await?;
        }
        Ok(())
    }

    async fn add_cdrom(&self, vm: &ObjectRef, device: &CdromDevice) -> Result<()> {
        self.device().add_cdrom(&vm.value, device).await
    }

    async fn remove_cdroms(&self, vm: &ObjectRef) -> Result<usize> {
        self.remove_devices(vm, DeviceKind::Cdrom).await
    }

    async fn add_floppy(&self, vm: &ObjectRef, image_path: &str) -> Result<()> {
        self.device().add_floppy(&vm.value, image_path).await
    }

    async fn remove_floppies(&self, vm: &ObjectRef) -> Result<usize> {
        self.remove_devices(vm, DeviceKind::Floppy).await
    }

    async fn customize(&self, vm: &ObjectRef, spec: &CustomizationSpec) -> Result<()> {
        self.guest().customize(&vm.value, spec).await
    }

    async fn customization_status(&self, vm: &ObjectRef) -> Result<CustomizationStatus> {
        self.guest().customization_status(&vm.value).await
    }

    async fn guest_net(&self, vm: &ObjectRef) -> Result<GuestNetInfo> {
        self.guest().networking(&vm.value).await
    }

    async fn power_on(&self, vm: &ObjectRef) -> Result<()> {
        self.vm().start(&vm.value).await
    }

    async fn shutdown_guest(&self, vm: &ObjectRef) -> Result<()> {
        self.guest().shutdown(&vm.value).await
    }

    async fn power_off(&self, vm: &ObjectRef) -> Result<()> {
        self.vm().stop(&vm.value).await
    }

    async fn power_state(&self, vm: &ObjectRef) -> Result<PowerState> {
        self.vm().power_state(&vm.value).await
    }

    async fn create_snapshot(
        &self,
        vm: &ObjectRef,
        name: &str,
        description: &str,
    ) -> Result<Snapshot> {
        self.snapshot().create(&vm.value, name, description).await
    }

    async fn mark_as_template(&self, vm: &ObjectRef) -> Result<()> {
        self.vm().mark_as_template(&vm.value).await
    }

    async fn export_lease(&self, vm: &ObjectRef) -> Result<ExportLease> {
        self.vm().create_export_lease(&vm.value).await
    }

    async fn download(&self, item: &LeaseItem, dest: &Path) -> Result<u64> {
        debug!("下载导出文件: {} -> {}", item.url, dest.display());
        self.download_to(&item.url, dest).await
    }

    async fn complete_export(&self, vm: &ObjectRef) -> Result<()> {
        self.vm().complete_export_lease(&vm.value).await
    }

    async fn import_to_library(
        &self,
        vm: &ObjectRef,
        request: &LibraryImportRequest,
    ) -> Result<ObjectRef> {
        if request.ovf {
            self.library().import_ovf(&vm.value, request).await
        } else {
            self.library().import_template(&vm.value, request).await
        }
    }
}

/// 资源池路径中集群根资源池的名称
const ROOT_POOL: &str = "Resources";

/// 清单路径，例如 `/DC0/vm/templates/base`、`/DC0/host/DC0_C0/Resources`
#[derive(Debug, PartialEq, Eq)]
struct InventoryPath<'a> {
    datacenter: &'a str,

    /// 根文件夹名称：`vm`、`host`、`datastore` 或 `network`
    root: &'a str,

    /// 根文件夹之下的各段，最后一段为目标对象
    segments: Vec<&'a str>,
}

impl<'a> InventoryPath<'a> {
    fn parse(path: &'a str) -> Option<Self> {
        let mut parts = path.split('/').filter(|s| !s.is_empty());
        let datacenter = parts.next()?;
        let root = parts.next()?;
        Some(Self {
            datacenter,
            root,
            segments: parts.collect(),
        })
    }

    fn leaf(&self) -> Option<&'a str> {
        self.segments.last().copied()
    }

    fn parents(&self) -> &[&'a str] {
        &self.segments[..self.segments.len().saturating_sub(1)]
    }
}

impl fmt::Display for InventoryPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.datacenter, self.root)?;
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

/// 路径上的容器对象
#[derive(Debug, Clone, PartialEq, Eq)]
enum Scope {
    Folder(String),
    Cluster(String),
    Pool(String),
}

impl Scope {
    /// 在该容器内按名称查找的过滤条件
    fn filter<'a>(&'a self, name: &'a str) -> Filter<'a> {
        let base = Filter::named(name);
        match self {
            Self::Folder(id) => Filter {
                folder: Some(id),
                ..base
            },
            Self::Cluster(id) => Filter {
                cluster: Some(id),
                ..base
            },
            Self::Pool(id) => Filter {
                resource_pool: Some(id),
                ..base
            },
        }
    }
}

fn single(mut found: Vec<InventoryObject>) -> Option<InventoryObject> {
    (found.len() == 1).then(|| found.remove(0))
}

impl VsphereClient {
    /// 按完整路径逐级查找，同名对象分属不同容器时不会混淆
    async fn find_by_path(
        &self,
        kind: InventoryKind,
        path: &str,
    ) -> Result<Vec<InventoryObject>> {
        let Some(parsed) = InventoryPath::parse(path) else {
            return Ok(Vec::new());
        };
        let full_path = parsed.to_string();

        let Some(leaf) = parsed.leaf() else {
            // 路径指向根文件夹本身
            if kind != InventoryKind::Folder {
                return Ok(Vec::new());
            }
            let root = self.root_folder(&parsed).await?;
            return Ok(root
                .map(|id| InventoryObject {
                    reference: ObjectRef::new(InventoryKind::Folder, id),
                    name: parsed.root.to_string(),
                    path: full_path,
                })
                .into_iter()
                .collect());
        };

        let Some(scope) = self.parent_scope(&parsed).await? else {
            return Ok(Vec::new());
        };
        let mut found = match &scope {
            Scope::Cluster(cluster) if kind == InventoryKind::ResourcePool && leaf == ROOT_POOL =>
            {
                let pool = self.inventory().cluster_root_pool(cluster).await?;
                vec![InventoryObject {
                    reference: ObjectRef::new(InventoryKind::ResourcePool, pool),
                    name: leaf.to_string(),
                    path: String::new(),
                }]
            }
            _ => self.inventory().list(kind, &scope.filter(leaf)).await?,
        };
        for object in &mut found {
            object.path = full_path.clone();
        }
        debug!("按路径查找{} {}: {} 个结果", kind, full_path, found.len());
        Ok(found)
    }

    async fn remove_devices(&self, vm: &ObjectRef, kind: DeviceKind) -> Result<usize> {
        let devices = self.device().list(&vm.value, kind).await?;
        for id in &devices {
            self.device().delete(&vm.value, kind, id).await?;
        }
        Ok(devices.len())
    }

    async fn root_folder(&self, path: &InventoryPath<'_>) -> Result<Option<String>> {
        let datacenters = self
            .inventory()
            .list(InventoryKind::Datacenter, &Filter::named(path.datacenter))
            .await?;
        let Some(dc) = single(datacenters) else {
            return Ok(None);
        };
        let roots = self.inventory().root_folders(&dc.reference.value).await?;
        Ok(roots.get(path.root).map(str::to_string))
    }

    /// 目标对象所在的容器，路径中任一段无法唯一确定时返回 `None`
    async fn parent_scope(&self, path: &InventoryPath<'_>) -> Result<Option<Scope>> {
        let Some(root) = self.root_folder(path).await? else {
            return Ok(None);
        };

        let mut scope = Scope::Folder(root);
        for segment in path.parents() {
            let next = match &scope {
                Scope::Folder(_) => {
                    let filter = scope.filter(segment);
                    let folders = self.inventory().list(InventoryKind::Folder, &filter).await?;
                    match single(folders) {
                        Some(folder) => Some(Scope::Folder(folder.reference.value)),
                        None => {
                            let clusters =
                                self.inventory().list(InventoryKind::Cluster, &filter).await?;
                            single(clusters).map(|cluster| Scope::Cluster(cluster.reference.value))
                        }
                    }
                }
                Scope::Cluster(cluster) if *segment == ROOT_POOL => Some(Scope::Pool(
                    self.inventory().cluster_root_pool(cluster).await?,
                )),
                Scope::Cluster(_) => None,
                Scope::Pool(_) => {
                    let filter = scope.filter(segment);
                    let pools = self.inventory().list(InventoryKind::ResourcePool, &filter).await?;
                    single(pools).map(|pool| Scope::Pool(pool.reference.value))
                }
            };
            match next {
                Some(next) => scope = next,
                None => {
                    debug!("路径 {} 在 '{}' 处无法唯一确定", path, segment);
                    return Ok(None);
                }
            }
        }
        Ok(Some(scope))
    }
}

/// 解析虚拟机详情（主机与数据存储由调用方补全）
fn parse_vm_config(value: &serde_json::Value) -> Result<VmConfig> {
    let cpu = &value["cpu"];
    let identity = &value["identity"];

    let mut disks: Vec<DiskInfo> = value["disks"]
        .as_object()
        .map(|disks| {
            disks
                .iter()
                .map(|(key, disk)| DiskInfo {
                    key: key.parse().unwrap_or_default(),
                    label: disk["label"].as_str().unwrap_or_default().to_string(),
                    capacity_mb: disk["capacity"].as_u64().unwrap_or(0) / (1024 * 1024),
                })
                .collect()
        })
        .unwrap_or_default();
    disks.sort_by_key(|d| d.key);

    let mut nics: Vec<(i32, ObjectRef)> = value["nics"]
        .as_object()
        .map(|nics| {
            nics.iter()
                .filter_map(|(key, nic)| {
                    nic["backing"]["network"].as_str().map(|net| {
                        (
                            key.parse().unwrap_or_default(),
                            ObjectRef::new(InventoryKind::Network, net),
                        )
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    nics.sort_by_key(|(key, _)| *key);

    Ok(VmConfig {
        name: str_field(value, "name")?,
        uuid: identity["instance_uuid"]
            .as_str()
            .or_else(|| identity["bios_uuid"].as_str())
            .unwrap_or_default()
            .to_string(),
        annotation: value["annotation"].as_str().unwrap_or_default().to_string(),
        num_cpu: cpu["count"]
            .as_u64()
            .ok_or_else(|| DriverError::ParseError("响应缺少 cpu.count".to_string()))?
            as u32,
        num_cores_per_socket: cpu["cores_per_socket"].as_u64().unwrap_or(1) as u32,
        memory_mb: value["memory"]["size_MiB"].as_u64().unwrap_or(0),
        vm_dir: vm_dir(value).unwrap_or_default(),
        host: None,
        datastores: Vec::new(),
        networks: nics.into_iter().map(|(_, net)| net).collect(),
        disks,
        is_template: false,
        power_state: parse_power_state(value["power_state"].as_str().unwrap_or_default()),
    })
}

fn vmdk_files(value: &serde_json::Value) -> Vec<String> {
    value["disks"]
        .as_object()
        .map(|disks| {
            disks
                .values()
                .filter_map(|d| d["backing"]["vmdk_file"].as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// `[ds] dir/file.vmdk` -> `[ds] dir`
fn vm_dir(value: &serde_json::Value) -> Option<String> {
    vmdk_files(value)
        .into_iter()
        .next()
        .and_then(|file| file.rsplit_once('/').map(|(dir, _)| dir.to_string()))
}

fn datastore_names(value: &serde_json::Value) -> Vec<String> {
    let mut names: Vec<String> = vmdk_files(value)
        .iter()
        .filter_map(|file| {
            let rest = file.strip_prefix('[')?;
            rest.split_once(']').map(|(ds, _)| ds.to_string())
        })
        .collect();
    names.sort();
    names.dedup();
    names
}
