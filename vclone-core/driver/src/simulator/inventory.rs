//! 模拟器内存清单

use std::collections::{BTreeMap, HashMap};

use crate::models::{
    CdromDevice, CustomizationSpec, DiskInfo, InventoryKind, InventoryObject, LibraryImportRequest,
    ObjectRef, PowerState, Snapshot, VmConfig, VmReconfigure,
};

use super::behavior::SimBehavior;

/// 模拟清单中的对象
#[derive(Debug, Clone)]
pub(crate) struct SimObject {
    pub object: InventoryObject,
    /// 所属数据中心标识
    pub datacenter: Option<String>,
}

/// 模拟虚拟机
#[derive(Debug, Clone)]
pub(crate) struct SimVm {
    pub reference: ObjectRef,
    pub path: String,
    pub config: VmConfig,
    pub snapshots: Vec<Snapshot>,
    pub current_snapshot: Option<usize>,
    pub customization: Option<CustomizationSpec>,
    pub customization_polls: u32,
    pub ip_polls: u32,
    pub shutdown_pending: Option<u32>,
    pub reconfigured: Vec<VmReconfigure>,
    pub export_open: bool,
    pub cdroms: Vec<CdromDevice>,

    /// 软驱挂载的镜像
    pub floppies: Vec<String>,
}

/// 模拟任务
#[derive(Debug, Clone)]
pub(crate) struct SimTask {
    pub polls_left: u32,
    pub total_polls: u32,
    pub outcome: std::result::Result<PendingClone, String>,
    pub finished: Option<std::result::Result<ObjectRef, String>>,
    /// 失败后留在清单中的半成品虚拟机
    pub partial: Option<ObjectRef>,
}

/// 等待任务完成时落地的克隆结果
#[derive(Debug, Clone)]
pub(crate) struct PendingClone {
    pub vm: SimVm,
}

/// 模拟器全局状态
#[derive(Debug)]
pub(crate) struct SimState {
    pub behavior: SimBehavior,
    pub objects: Vec<SimObject>,
    pub vms: BTreeMap<String, SimVm>,
    pub tasks: HashMap<String, SimTask>,
    pub library_items: Vec<(ObjectRef, ObjectRef, LibraryImportRequest)>,
    pub calls: Vec<String>,
    pub sessions_opened: u32,
    pub active_sessions: u32,
    next_id: u64,
}

pub(crate) const DATACENTER_ID: &str = "datacenter-2";
pub(crate) const HOST_ID: &str = "host-21";
pub(crate) const DATASTORE_ID: &str = "datastore-25";
pub(crate) const NETWORK_ID: &str = "network-7";

impl SimState {
    pub fn new(behavior: SimBehavior) -> Self {
        let mut state = Self {
            behavior,
            objects: Vec::new(),
            vms: BTreeMap::new(),
            tasks: HashMap::new(),
            library_items: Vec::new(),
            calls: Vec::new(),
            sessions_opened: 0,
            active_sessions: 0,
            next_id: 100,
        };
        state.populate();
        state
    }

    /// 预置一个小型 vCenter 清单
    fn populate(&mut self) {
        let dc = Some(DATACENTER_ID.to_string());
        let entries = [
            (InventoryKind::Datacenter, DATACENTER_ID, "DC0", "/DC0", None),
            (InventoryKind::Folder, "group-v3", "vm", "/DC0/vm", dc.clone()),
            (InventoryKind::Cluster, "domain-c7", "DC0_C0", "/DC0/host/DC0_C0", dc.clone()),
            (InventoryKind::Host, HOST_ID, "DC0_C0_H0", "/DC0/host/DC0_C0/DC0_C0_H0", dc.clone()),
            (
                InventoryKind::ResourcePool,
                "resgroup-8",
                "Resources",
                "/DC0/host/DC0_C0/Resources",
                dc.clone(),
            ),
            (
                InventoryKind::Datastore,
                DATASTORE_ID,
                "LocalDS_0",
                "/DC0/datastore/LocalDS_0",
                dc.clone(),
            ),
            (
                InventoryKind::Network,
                NETWORK_ID,
                "VM Network",
                "/DC0/network/VM Network",
                dc.clone(),
            ),
            (InventoryKind::Library, "library-1", "vclone-library", "", None),
        ];

        for (kind, id, name, path, datacenter) in entries {
            self.objects.push(SimObject {
                object: InventoryObject {
                    reference: ObjectRef::new(kind, id),
                    name: name.to_string(),
                    path: path.to_string(),
                },
                datacenter,
            });
        }

        for name in ["DC0_C0_RP0_VM0", "DC0_C0_RP0_VM1"] {
            self.insert_vm(name, 1, 1, 32, false);
        }
    }

    pub fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    pub fn object(&self, reference: &ObjectRef) -> Option<&InventoryObject> {
        self.objects
            .iter()
            .map(|o| &o.object)
            .find(|o| &o.reference == reference)
    }

    pub fn default_host(&self) -> Option<InventoryObject> {
        self.object(&ObjectRef::new(InventoryKind::Host, HOST_ID)).cloned()
    }

    pub fn datastore(&self, reference: &ObjectRef) -> Option<InventoryObject> {
        self.object(reference).cloned()
    }

    /// 构造一台新虚拟机（不加入清单）
    pub fn build_vm(
        &mut self,
        name: &str,
        num_cpu: u32,
        cores: u32,
        memory_mb: u64,
        is_template: bool,
    ) -> SimVm {
        let id = self.next_id("vm");
        let datastore = self
            .datastore(&ObjectRef::new(InventoryKind::Datastore, DATASTORE_ID))
            .into_iter()
            .collect::<Vec<_>>();

        SimVm {
            reference: ObjectRef::vm(id),
            path: format!("/DC0/vm/{}", name),
            config: VmConfig {
                name: name.to_string(),
                uuid: uuid::Uuid::new_v4().to_string(),
                annotation: String::new(),
                num_cpu,
                num_cores_per_socket: cores,
                memory_mb,
                vm_dir: format!("[LocalDS_0] {}", name),
                host: self.default_host(),
                datastores: datastore,
                networks: vec![ObjectRef::new(InventoryKind::Network, NETWORK_ID)],
                disks: vec![DiskInfo {
                    key: 2000,
                    label: "Hard disk 1".to_string(),
                    capacity_mb: 1024,
                }],
                is_template,
                power_state: PowerState::PoweredOff,
            },
            snapshots: Vec::new(),
            current_snapshot: None,
            customization: None,
            customization_polls: 0,
            ip_polls: 0,
            shutdown_pending: None,
            reconfigured: Vec::new(),
            export_open: false,
            cdroms: Vec::new(),
            floppies: Vec::new(),
        }
    }

    pub fn insert_vm(
        &mut self,
        name: &str,
        num_cpu: u32,
        cores: u32,
        memory_mb: u64,
        is_template: bool,
    ) -> ObjectRef {
        let vm = self.build_vm(name, num_cpu, cores, memory_mb, is_template);
        let reference = vm.reference.clone();
        self.vms.insert(reference.value.clone(), vm);
        reference
    }

    pub fn vm_by_name(&self, name: &str) -> Option<&SimVm> {
        self.vms.values().find(|vm| vm.config.name == name)
    }
}
