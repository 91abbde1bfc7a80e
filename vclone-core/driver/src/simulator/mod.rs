//! 内存模拟器
//!
//! 预置一个小型 vCenter 清单（一个数据中心、集群、主机、资源池、数据存储、
//! 网络、虚拟机文件夹以及两台虚拟机），通过 [`SimBehavior`] 控制任务耗时、
//! 故障注入与客户机行为。所有调用都会被记录，便于测试断言。
//!
//! 同一个 [`Simulator`] 的多个句柄共享清单，但各自持有独立会话。

mod behavior;
mod inventory;

pub use behavior::{CustomizationOutcome, GuestIpBehavior, SimBehavior};

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use crate::driver::{Driver, DriverFactory, Endpoint};
use crate::error::{DriverError, Result};
use crate::models::{
    CdromDevice, CloneRequest, Credentials, CustomizationSpec, CustomizationStatus, ExportLease,
    GuestNetInfo, InventoryKind, InventoryObject, LeaseItem, LibraryImportRequest, Lookup,
    ObjectRef, PowerState, Snapshot, TaskInfo, TaskState, VmConfig, VmQuery, VmReconfigure,
    VmSummary,
};
use inventory::{PendingClone, SimObject, SimState, SimTask, SimVm};

/// 内存模拟器
#[derive(Clone)]
pub struct Simulator {
    state: Arc<Mutex<SimState>>,
    session: Arc<RwLock<Option<String>>>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self::with_behavior(SimBehavior::default())
    }

    pub fn with_behavior(behavior: SimBehavior) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(behavior))),
            session: Arc::new(RwLock::new(None)),
        }
    }

    /// 共享清单、独立会话的新句柄
    pub fn handle(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            session: Arc::new(RwLock::new(None)),
        }
    }

    /// 修改行为开关
    pub async fn update_behavior(&self, f: impl FnOnce(&mut SimBehavior)) {
        f(&mut self.state.lock().await.behavior);
    }

    // ---------- 清单维护 ----------

    /// 添加虚拟机
    pub async fn add_vm(&self, name: &str, num_cpu: u32, cores: u32, memory_mb: u64) -> ObjectRef {
        self.state
            .lock()
            .await
            .insert_vm(name, num_cpu, cores, memory_mb, false)
    }

    /// 添加内容库（允许重名）
    pub async fn add_library(&self, name: &str) -> ObjectRef {
        let mut state = self.state.lock().await;
        let reference = ObjectRef::new(InventoryKind::Library, state.next_id("library"));
        state.objects.push(SimObject {
            object: InventoryObject {
                reference: reference.clone(),
                name: name.to_string(),
                path: String::new(),
            },
            datacenter: None,
        });
        reference
    }

    /// 添加模板
    pub async fn add_template(&self, name: &str) -> ObjectRef {
        self.state.lock().await.insert_vm(name, 1, 1, 32, true)
    }

    /// 给虚拟机添加快照并设为当前快照
    pub async fn add_snapshot(&self, vm_name: &str, snapshot_name: &str) -> Option<Snapshot> {
        let mut state = self.state.lock().await;
        let id = state.next_id("snapshot");
        let vm = state.vms.values_mut().find(|vm| vm.config.name == vm_name)?;
        let snapshot = Snapshot {
            reference: ObjectRef::new(InventoryKind::Snapshot, id),
            name: snapshot_name.to_string(),
        };
        vm.snapshots.push(snapshot.clone());
        vm.current_snapshot = Some(vm.snapshots.len() - 1);
        Some(snapshot)
    }

    /// 设置虚拟机备注
    pub async fn set_annotation(&self, vm_name: &str, annotation: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.vms.values_mut().find(|vm| vm.config.name == vm_name) {
            Some(vm) => {
                vm.config.annotation = annotation.to_string();
                true
            }
            None => false,
        }
    }

    // ---------- 观察 ----------

    /// 已记录的调用（按发生顺序）
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    /// 某个操作被调用的次数
    pub async fn count_calls(&self, op: &str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.as_str() == op)
            .count()
    }

    /// 按名称读取虚拟机配置
    pub async fn vm_by_name(&self, name: &str) -> Option<VmConfig> {
        self.state
            .lock()
            .await
            .vm_by_name(name)
            .map(|vm| vm.config.clone())
    }

    /// 按名称读取虚拟机引用
    pub async fn vm_ref(&self, name: &str) -> Option<ObjectRef> {
        self.state
            .lock()
            .await
            .vm_by_name(name)
            .map(|vm| vm.reference.clone())
    }

    /// 虚拟机上记录的重配置
    pub async fn reconfigurations(&self, vm_name: &str) -> Vec<VmReconfigure> {
        self.state
            .lock()
            .await
            .vm_by_name(vm_name)
            .map(|vm| vm.reconfigured.clone())
            .unwrap_or_default()
    }

    /// 虚拟机上的光驱
    pub async fn cdroms(&self, vm_name: &str) -> Vec<CdromDevice> {
        self.state
            .lock()
            .await
            .vm_by_name(vm_name)
            .map(|vm| vm.cdroms.clone())
            .unwrap_or_default()
    }

    /// 虚拟机软驱挂载的镜像
    pub async fn floppies(&self, vm_name: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .vm_by_name(vm_name)
            .map(|vm| vm.floppies.clone())
            .unwrap_or_default()
    }

    /// 虚拟机上下发的定制规范
    pub async fn customization_spec(&self, vm_name: &str) -> Option<CustomizationSpec> {
        self.state
            .lock()
            .await
            .vm_by_name(vm_name)
            .and_then(|vm| vm.customization.clone())
    }

    /// 虚拟机快照名称
    pub async fn snapshot_names(&self, vm_name: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .vm_by_name(vm_name)
            .map(|vm| vm.snapshots.iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default()
    }

    /// 内容库中的条目（名称, 是否 OVF）
    pub async fn library_items(&self) -> Vec<(String, bool)> {
        self.state
            .lock()
            .await
            .library_items
            .iter()
            .map(|(_, _, req)| (req.name.clone(), req.ovf))
            .collect()
    }

    /// 当前打开的会话数
    pub async fn active_sessions(&self) -> u32 {
        self.state.lock().await.active_sessions
    }

    /// 累计打开过的会话数
    pub async fn sessions_opened(&self) -> u32 {
        self.state.lock().await.sessions_opened
    }

    // ---------- 内部 ----------

    /// 校验会话并记录调用
    async fn enter(&self, op: &str) -> Result<MutexGuard<'_, SimState>> {
        if self.session.read().await.is_none() {
            return Err(DriverError::AuthError("未认证，请先登录".to_string()));
        }
        let mut state = self.state.lock().await;
        state.calls.push(op.to_string());
        debug!("模拟器调用: {}", op);
        Ok(state)
    }
}

impl DriverFactory for Simulator {
    fn new_session(&self, _endpoint: &Endpoint) -> Result<Arc<dyn Driver>> {
        Ok(Arc::new(self.handle()))
    }
}

fn vm_mut<'s>(state: &'s mut SimState, vm: &ObjectRef) -> Result<&'s mut SimVm> {
    state
        .vms
        .get_mut(&vm.value)
        .ok_or_else(|| DriverError::NotFound(vm.to_string()))
}

fn fault(fault: &Option<String>) -> Result<()> {
    match fault {
        Some(reason) => Err(DriverError::OperationFailed(reason.clone())),
        None => Ok(()),
    }
}

fn require_powered_off(vm: &SimVm, op: &str) -> Result<()> {
    if vm.config.power_state.is_on() {
        return Err(DriverError::OperationFailed(format!(
            "{} 要求虚拟机处于关机状态: {}",
            op, vm.config.name
        )));
    }
    Ok(())
}

fn customization_status_of(vm: &SimVm, outcome: &CustomizationOutcome) -> CustomizationStatus {
    if vm.customization.is_none() {
        return CustomizationStatus::Idle;
    }
    if vm.customization_polls == 0 {
        return CustomizationStatus::Pending;
    }
    match outcome {
        CustomizationOutcome::SucceedAfter(n) if vm.customization_polls >= *n => {
            CustomizationStatus::Succeeded
        }
        CustomizationOutcome::FailAfter(n, reason) if vm.customization_polls >= *n => {
            CustomizationStatus::Failed(reason.clone())
        }
        _ => CustomizationStatus::Running,
    }
}

#[async_trait]
impl Driver for Simulator {
    async fn login(&self, credentials: &Credentials) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push("login".to_string());

        if state.behavior.untrusted_certificate && !credentials.insecure {
            return Err(DriverError::CertificateError(
                "x509: certificate signed by unknown authority".to_string(),
            ));
        }
        if let Some(expected) = &state.behavior.password {
            if expected != &credentials.password {
                return Err(DriverError::AuthError(format!(
                    "vCenter 登录失败: 用户 {} 认证被拒绝",
                    credentials.username
                )));
            }
        }

        let token = uuid::Uuid::new_v4().to_string();
        let mut session = self.session.write().await;
        if session.is_none() {
            state.sessions_opened += 1;
            state.active_sessions += 1;
        }
        *session = Some(token);
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push("logout".to_string());
        if self.session.write().await.take().is_some() {
            state.active_sessions = state.active_sessions.saturating_sub(1);
        }
        Ok(())
    }

    async fn session_active(&self) -> bool {
        self.session.read().await.is_some()
    }

    async fn find_objects(
        &self,
        kind: InventoryKind,
        lookup: &Lookup,
    ) -> Result<Vec<InventoryObject>> {
        let state = self.enter("find_objects").await?;
        let wanted = lookup.name.trim_end_matches('/');

        Ok(state
            .objects
            .iter()
            .filter(|o| o.object.reference.kind == kind)
            .filter(|o| match &lookup.datacenter {
                Some(dc) if kind != InventoryKind::Datacenter && kind != InventoryKind::Library => {
                    o.datacenter.as_deref() == Some(dc.value.as_str())
                }
                _ => true,
            })
            .filter(|o| {
                if wanted.is_empty() {
                    true
                } else if lookup.is_path() {
                    o.object.path == wanted
                } else {
                    o.object.name == wanted
                }
            })
            .map(|o| o.object.clone())
            .collect())
    }

    async fn find_vms(&self, query: &VmQuery) -> Result<Vec<VmSummary>> {
        let state = self.enter("find_vms").await?;

        Ok(state
            .vms
            .values()
            .filter(|vm| match query {
                VmQuery::Name(name) => &vm.config.name == name,
                VmQuery::Path(path) => vm.path == path.trim_end_matches('/'),
                VmQuery::Uuid(uuid) => vm.config.uuid.eq_ignore_ascii_case(uuid),
            })
            .map(|vm| VmSummary {
                reference: vm.reference.clone(),
                name: vm.config.name.clone(),
                uuid: vm.config.uuid.clone(),
                path: vm.path.clone(),
                is_template: vm.config.is_template,
                power_state: vm.config.power_state,
            })
            .collect())
    }

    async fn vm_config(&self, vm: &ObjectRef) -> Result<VmConfig> {
        let mut state = self.enter("vm_config").await?;
        Ok(vm_mut(&mut state, vm)?.config.clone())
    }

    async fn find_snapshot(&self, vm: &ObjectRef, name: &str) -> Result<Option<Snapshot>> {
        let mut state = self.enter("find_snapshot").await?;
        let vm = vm_mut(&mut state, vm)?;
        Ok(vm.snapshots.iter().find(|s| s.name == name).cloned())
    }

    async fn current_snapshot(&self, vm: &ObjectRef) -> Result<Option<Snapshot>> {
        let mut state = self.enter("current_snapshot").await?;
        let vm = vm_mut(&mut state, vm)?;
        Ok(vm.current_snapshot.map(|i| vm.snapshots[i].clone()))
    }

    async fn clone_vm(&self, request: &CloneRequest) -> Result<ObjectRef> {
        let mut state = self.enter("clone_vm").await?;

        let source = vm_mut(&mut state, &request.source)?.clone();
        if state.object(&request.folder).is_none() {
            return Err(DriverError::NotFound(request.folder.to_string()));
        }
        if let Some(snapshot) = &request.linked_snapshot {
            if !source.snapshots.iter().any(|s| &s.reference == snapshot) {
                return Err(DriverError::OperationFailed(format!(
                    "快照不属于克隆源: {}",
                    snapshot
                )));
            }
        }
        if state.vm_by_name(&request.name).is_some() {
            return Err(DriverError::OperationFailed(format!(
                "名称 '{}' 已存在",
                request.name
            )));
        }

        let mut vm = state.build_vm(
            &request.name,
            request.num_cpus.unwrap_or(source.config.num_cpu),
            request
                .cores_per_socket
                .unwrap_or(source.config.num_cores_per_socket),
            request.memory_mb.unwrap_or(source.config.memory_mb),
            false,
        );
        vm.config.annotation = request
            .annotation
            .clone()
            .unwrap_or_else(|| source.config.annotation.clone());
        vm.config.disks = source.config.disks.clone();
        vm.cdroms = source.cdroms.clone();
        vm.floppies = source.floppies.clone();
        vm.config.networks = source.config.networks.clone();
        if let Some(size) = request.disk_size_mb {
            if let Some(disk) = vm.config.disks.first_mut() {
                disk.capacity_mb = size;
            }
        }
        if let Some(network) = &request.network {
            match vm.config.networks.first_mut() {
                Some(first) => *first = network.clone(),
                None => vm.config.networks.push(network.clone()),
            }
        }
        if let Some(host) = &request.host {
            vm.config.host = state.object(host).cloned();
        }
        if let Some(datastore) = &request.datastore {
            let ds = state
                .datastore(datastore)
                .ok_or_else(|| DriverError::NotFound(datastore.to_string()))?;
            vm.config.vm_dir = format!("[{}] {}", ds.name, request.name);
            vm.config.datastores = vec![ds];
        }

        let behavior = state.behavior.clone();
        let mut partial = None;
        let outcome = match &behavior.clone_fault {
            Some(reason) => {
                if behavior.clone_leaves_partial {
                    partial = Some(vm.reference.clone());
                    state.vms.insert(vm.reference.value.clone(), vm);
                }
                Err(reason.clone())
            }
            None => Ok(PendingClone { vm }),
        };

        let task_id = state.next_id("task");
        state.tasks.insert(
            task_id.clone(),
            SimTask {
                polls_left: behavior.clone_polls,
                total_polls: behavior.clone_polls.max(1),
                outcome,
                finished: None,
                partial,
            },
        );

        Ok(ObjectRef::new(InventoryKind::Task, task_id))
    }

    async fn task_info(&self, task: &ObjectRef) -> Result<TaskInfo> {
        let mut guard = self.enter("task_info").await?;
        let state = &mut *guard;

        let sim_task = state
            .tasks
            .get_mut(&task.value)
            .ok_or_else(|| DriverError::NotFound(task.to_string()))?;

        if sim_task.finished.is_none() {
            if sim_task.polls_left <= 1 {
                sim_task.polls_left = 0;
                let done = match sim_task.outcome.clone() {
                    Ok(pending) => {
                        let reference = pending.vm.reference.clone();
                        state.vms.insert(reference.value.clone(), pending.vm);
                        Ok(reference)
                    }
                    Err(reason) => Err(reason),
                };
                sim_task.finished = Some(done);
            } else {
                sim_task.polls_left -= 1;
            }
        }

        let info = match &sim_task.finished {
            Some(Ok(vm)) => TaskInfo {
                reference: task.clone(),
                state: TaskState::Success,
                progress: Some(100),
                result: Some(vm.clone()),
                error: None,
            },
            Some(Err(reason)) => TaskInfo {
                reference: task.clone(),
                state: TaskState::Error,
                progress: None,
                result: sim_task.partial.clone(),
                error: Some(reason.clone()),
            },
            None => {
                let done = sim_task.total_polls - sim_task.polls_left;
                TaskInfo {
                    reference: task.clone(),
                    state: TaskState::Running,
                    progress: Some(((done * 100) / sim_task.total_polls) as u8),
                    result: None,
                    error: None,
                }
            }
        };
        Ok(info)
    }

    async fn cancel_task(&self, task: &ObjectRef) -> Result<()> {
        let mut state = self.enter("cancel_task").await?;
        let sim_task = state
            .tasks
            .get_mut(&task.value)
            .ok_or_else(|| DriverError::NotFound(task.to_string()))?;
        if sim_task.finished.is_none() {
            sim_task.finished = Some(Err("任务已取消".to_string()));
        }
        Ok(())
    }

    async fn destroy_vm(&self, vm: &ObjectRef) -> Result<()> {
        let mut state = self.enter("destroy_vm").await?;
        fault(&state.behavior.destroy_fault)?;
        require_powered_off(vm_mut(&mut state, vm)?, "删除")?;
        state.vms.remove(&vm.value);
        Ok(())
    }

    async fn reconfigure(&self, vm: &ObjectRef, update: &VmReconfigure) -> Result<()> {
        let mut state = self.enter("reconfigure").await?;
        vm_mut(&mut state, vm)?.reconfigured.push(update.clone());
        Ok(())
    }

    async fn add_cdrom(&self, vm: &ObjectRef, device: &CdromDevice) -> Result<()> {
        let mut state = self.enter("add_cdrom").await?;
        fault(&state.behavior.device_fault)?;
        let vm = vm_mut(&mut state, vm)?;
        require_powered_off(vm, "添加光驱")?;
        vm.cdroms.push(device.clone());
        Ok(())
    }

    async fn remove_cdroms(&self, vm: &ObjectRef) -> Result<usize> {
        let mut state = self.enter("remove_cdroms").await?;
        fault(&state.behavior.device_fault)?;
        let vm = vm_mut(&mut state, vm)?;
        require_powered_off(vm, "删除光驱")?;
        Ok(vm.cdroms.drain(..).count())
    }

    async fn add_floppy(&self, vm: &ObjectRef, image_path: &str) -> Result<()> {
        let mut state = self.enter("add_floppy").await?;
        fault(&state.behavior.device_fault)?;
        let vm = vm_mut(&mut state, vm)?;
        require_powered_off(vm, "添加软驱")?;
        vm.floppies.push(image_path.to_string());
        Ok(())
    }

    async fn remove_floppies(&self, vm: &ObjectRef) -> Result<usize> {
        let mut state = self.enter("remove_floppies").await?;
        fault(&state.behavior.device_fault)?;
        let vm = vm_mut(&mut state, vm)?;
        require_powered_off(vm, "删除软驱")?;
        Ok(vm.floppies.drain(..).count())
    }

    async fn customize(&self, vm: &ObjectRef, spec: &CustomizationSpec) -> Result<()> {
        let mut state = self.enter("customize").await?;
        let vm = vm_mut(&mut state, vm)?;
        require_powered_off(vm, "客户机定制")?;
        vm.customization = Some(spec.clone());
        vm.customization_polls = 0;
        Ok(())
    }

    async fn customization_status(&self, vm: &ObjectRef) -> Result<CustomizationStatus> {
        let mut state = self.enter("customization_status").await?;
        let outcome = state.behavior.customization.clone();
        let vm = vm_mut(&mut state, vm)?;
        if vm.customization.is_some() && vm.config.power_state.is_on() {
            vm.customization_polls += 1;
        }
        Ok(customization_status_of(vm, &outcome))
    }

    async fn guest_net(&self, vm: &ObjectRef) -> Result<GuestNetInfo> {
        let mut state = self.enter("guest_net").await?;
        let behavior = state.behavior.clone();
        let vm = vm_mut(&mut state, vm)?;

        if !vm.config.power_state.is_on() {
            return Ok(GuestNetInfo::default());
        }
        if vm.customization.is_some()
            && customization_status_of(vm, &behavior.customization)
                != CustomizationStatus::Succeeded
        {
            return Ok(GuestNetInfo {
                tools_running: true,
                ip_addresses: Vec::new(),
            });
        }

        vm.ip_polls += 1;
        let ip_addresses = match &behavior.guest_ip {
            GuestIpBehavior::After(n, ip) if vm.ip_polls >= *n => vec![*ip],
            GuestIpBehavior::Sequence(seq) if !seq.is_empty() => {
                let index = (vm.ip_polls as usize - 1).min(seq.len() - 1);
                seq[index].clone()
            }
            _ => Vec::new(),
        };

        Ok(GuestNetInfo {
            tools_running: true,
            ip_addresses,
        })
    }

    async fn power_on(&self, vm: &ObjectRef) -> Result<()> {
        let mut state = self.enter("power_on").await?;
        let vm = vm_mut(&mut state, vm)?;
        if vm.config.is_template {
            return Err(DriverError::OperationFailed(format!(
                "模板无法开机: {}",
                vm.config.name
            )));
        }
        vm.config.power_state = PowerState::PoweredOn;
        Ok(())
    }

    async fn shutdown_guest(&self, vm: &ObjectRef) -> Result<()> {
        let mut state = self.enter("shutdown_guest").await?;
        let behavior = state.behavior.clone();
        let vm = vm_mut(&mut state, vm)?;
        if !vm.config.power_state.is_on() {
            return Err(DriverError::OperationFailed(format!(
                "虚拟机未开机: {}",
                vm.config.name
            )));
        }
        if !behavior.ignore_shutdown {
            vm.shutdown_pending = Some(behavior.shutdown_polls);
        }
        Ok(())
    }

    async fn power_off(&self, vm: &ObjectRef) -> Result<()> {
        let mut state = self.enter("power_off").await?;
        let vm = vm_mut(&mut state, vm)?;
        vm.config.power_state = PowerState::PoweredOff;
        vm.shutdown_pending = None;
        Ok(())
    }

    async fn power_state(&self, vm: &ObjectRef) -> Result<PowerState> {
        let mut state = self.enter("power_state").await?;
        let vm = vm_mut(&mut state, vm)?;
        if let Some(left) = vm.shutdown_pending {
            if left <= 1 {
                vm.shutdown_pending = None;
                vm.config.power_state = PowerState::PoweredOff;
            } else {
                vm.shutdown_pending = Some(left - 1);
            }
        }
        Ok(vm.config.power_state)
    }

    async fn create_snapshot(
        &self,
        vm: &ObjectRef,
        name: &str,
        _description: &str,
    ) -> Result<Snapshot> {
        let mut state = self.enter("create_snapshot").await?;
        fault(&state.behavior.snapshot_fault)?;
        let id = state.next_id("snapshot");
        let vm = vm_mut(&mut state, vm)?;
        let snapshot = Snapshot {
            reference: ObjectRef::new(InventoryKind::Snapshot, id),
            name: name.to_string(),
        };
        vm.snapshots.push(snapshot.clone());
        vm.current_snapshot = Some(vm.snapshots.len() - 1);
        Ok(snapshot)
    }

    async fn mark_as_template(&self, vm: &ObjectRef) -> Result<()> {
        let mut state = self.enter("mark_as_template").await?;
        fault(&state.behavior.template_fault)?;
        let vm = vm_mut(&mut state, vm)?;
        require_powered_off(vm, "转换模板")?;
        vm.config.is_template = true;
        Ok(())
    }

    async fn export_lease(&self, vm: &ObjectRef) -> Result<ExportLease> {
        let mut state = self.enter("export_lease").await?;
        fault(&state.behavior.export_fault)?;
        let override_name = state.behavior.lease_item_name.clone();
        let vm = vm_mut(&mut state, vm)?;
        require_powered_off(vm, "导出")?;
        vm.export_open = true;

        let items: Vec<LeaseItem> = vm
            .config
            .disks
            .iter()
            .enumerate()
            .map(|(i, disk)| LeaseItem {
                name: override_name
                    .clone()
                    .unwrap_or_else(|| format!("{}-disk{}.vmdk", vm.config.name, i)),
                url: format!("sim://{}/disk-{}", vm.reference.value, disk.key),
                size: disk.capacity_mb,
            })
            .collect();

        let files: String = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                format!(
                    "    <File ovf:href=\"{}\" ovf:id=\"file{}\"/>\n",
                    item.name,
                    i + 1
                )
            })
            .collect();

        let descriptor = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <Envelope xmlns=\"http://schemas.dmtf.org/ovf/envelope/1\" \
             xmlns:ovf=\"http://schemas.dmtf.org/ovf/envelope/1\">\n  \
             <References>\n{}  </References>\n  \
             <VirtualSystem ovf:id=\"{}\">\n    \
             <Info>{} vCPU, {} MB</Info>\n  \
             </VirtualSystem>\n</Envelope>\n",
            files, vm.config.name, vm.config.num_cpu, vm.config.memory_mb
        );

        Ok(ExportLease { descriptor, items })
    }

    async fn download(&self, item: &LeaseItem, dest: &Path) -> Result<u64> {
        let delay = self.enter("download").await?.behavior.download_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let content = format!("simulated disk content: {}\n", item.url).repeat(8);
        tokio::fs::write(dest, content.as_bytes()).await?;
        Ok(content.len() as u64)
    }

    async fn complete_export(&self, vm: &ObjectRef) -> Result<()> {
        let mut state = self.enter("complete_export").await?;
        vm_mut(&mut state, vm)?.export_open = false;
        Ok(())
    }

    async fn import_to_library(
        &self,
        vm: &ObjectRef,
        request: &LibraryImportRequest,
    ) -> Result<ObjectRef> {
        let mut state = self.enter("import_to_library").await?;
        fault(&state.behavior.import_fault)?;
        vm_mut(&mut state, vm)?;
        if state.object(&request.library).is_none() {
            return Err(DriverError::NotFound(request.library.to_string()));
        }
        let item = ObjectRef::new(InventoryKind::LibraryItem, state.next_id("item"));
        state
            .library_items
            .push((item.clone(), vm.clone(), request.clone()));
        Ok(item)
    }
}
