//! 克隆执行
//!
//! 提交克隆任务并轮询至完成。任务失败、超时或取消时删除任务结果指向的残留虚拟机，
//! 无法删除或无法确认归属的对象在错误中报告以便人工清理。

use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vclone_driver::{
    CloneRequest, InventoryKind, InventoryObject, ObjectRef, Snapshot, TaskState, VmQuery,
    VmSummary,
};

use crate::config::Config;
use crate::connection::{Connection, Placement};
use crate::error::{BuildError, Result};
use crate::poll::{poll_until, Poll, PollPolicy, WaitError};

/// 克隆规范
#[derive(Debug, Clone)]
pub struct CloneSpec {
    pub vm_name: String,
    pub linked_clone: bool,

    /// 链接克隆使用的快照名称，`None` 表示使用当前快照
    pub snapshot: Option<String>,

    pub num_cpus: Option<u32>,
    pub cores_per_socket: Option<u32>,
    pub memory_mb: Option<u64>,
    pub disk_size_mb: Option<u64>,
    pub network: Option<String>,
    pub mac_address: Option<String>,
    pub notes: Option<String>,
    pub task_timeout: Duration,
}

impl CloneSpec {
    pub fn from_config(config: &Config) -> Self {
        Self {
            vm_name: config.location.vm_name.clone(),
            linked_clone: config.clone.linked_clone,
            snapshot: config.clone.snapshot.clone(),
            num_cpus: config.hardware.cpus,
            cores_per_socket: config.hardware.cpu_cores,
            memory_mb: config.hardware.ram,
            disk_size_mb: config.clone.disk_size,
            network: config.clone.network.clone(),
            mac_address: config.clone.mac_address.clone(),
            notes: config.clone.notes.clone(),
            task_timeout: config.clone.task_timeout,
        }
    }

    /// 本地校验（不访问远端）
    pub fn validate(&self) -> Result<()> {
        if self.vm_name.trim().is_empty() {
            return Err(BuildError::InvalidCloneSpec("虚拟机名称不能为空".to_string()));
        }
        if self.linked_clone && self.disk_size_mb.is_some() {
            return Err(BuildError::InvalidCloneSpec(
                "链接克隆不能修改磁盘大小".to_string(),
            ));
        }
        Ok(())
    }
}

/// 虚拟机可变性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Mutable,
    Template,
    Destroyed,
}

/// 新虚拟机句柄
#[derive(Debug, Clone)]
pub struct VmHandle {
    pub reference: ObjectRef,
    pub name: String,
    pub state: VmState,
}

impl VmHandle {
    pub fn is_mutable(&self) -> bool {
        self.state == VmState::Mutable
    }
}

/// 克隆结果
#[derive(Debug, Clone)]
pub struct CloneOutcome {
    pub vm: VmHandle,

    /// 任务耗时
    pub duration: Duration,
}

/// 克隆执行器
pub struct CloneExecutor<'a> {
    conn: &'a Connection,
    poll: PollPolicy,
    cancel: &'a CancellationToken,
}

impl<'a> CloneExecutor<'a> {
    pub fn new(conn: &'a Connection, poll: PollPolicy, cancel: &'a CancellationToken) -> Self {
        Self { conn, poll, cancel }
    }

    pub async fn execute(
        &self,
        source: &VmSummary,
        spec: &CloneSpec,
        placement: &Placement,
    ) -> Result<CloneOutcome> {
        spec.validate()?;
        let driver = self.conn.driver();

        // 链接克隆必须在提交任务之前确定快照
        let linked_snapshot = if spec.linked_clone {
            Some(self.resolve_snapshot(source, spec.snapshot.as_deref()).await?)
        } else {
            None
        };

        if let Some(size) = spec.disk_size_mb {
            let current = driver.vm_config(&source.reference).await?.primary_disk_mb();
            if let Some(current) = current {
                if size < current {
                    return Err(BuildError::InvalidCloneSpec(format!(
                        "磁盘只能扩大: 当前 {} MB，请求 {} MB",
                        current, size
                    )));
                }
            }
        }

        let network = match &spec.network {
            Some(name) => Some(self.conn.find(InventoryKind::Network, name).await?.reference),
            None => None,
        };

        let request = CloneRequest {
            source: source.reference.clone(),
            name: spec.vm_name.clone(),
            folder: placement.folder.reference.clone(),
            resource_pool: placement.resource_pool.as_ref().map(|o| o.reference.clone()),
            host: placement.host.as_ref().map(|o| o.reference.clone()),
            datastore: placement.datastore.as_ref().map(|o| o.reference.clone()),
            linked_snapshot: linked_snapshot.map(|s| s.reference),
            num_cpus: spec.num_cpus,
            cores_per_socket: spec.cores_per_socket,
            memory_mb: spec.memory_mb,
            disk_size_mb: spec.disk_size_mb,
            network,
            mac_address: spec.mac_address.clone(),
            annotation: spec.notes.clone(),
        };

        // 提交前已存在的同名虚拟机不属于本次构建
        let existing = self.same_name_refs(&spec.vm_name).await;

        info!("提交克隆任务: {} -> {}", source.name, spec.vm_name);
        let started = Instant::now();
        let task = driver.clone_vm(&request).await?;
        debug!("克隆任务: {}", task);

        let policy = self.poll.with_timeout(spec.task_timeout);
        let waited = poll_until(&policy, self.cancel, || async {
            let info = driver.task_info(&task).await?;
            debug!("克隆任务 {} 状态: {:?} {:?}%", task, info.state, info.progress);
            match info.state {
                TaskState::Success => info
                    .result
                    .map(|vm| Poll::Ready(TaskEnd::Created(vm)))
                    .ok_or_else(|| BuildError::CloneTask {
                        fault: "任务成功但未返回虚拟机引用".to_string(),
                        orphan: None,
                    }),
                TaskState::Error => Ok(Poll::Ready(TaskEnd::Failed {
                    fault: info.error.unwrap_or_else(|| "未知错误".to_string()),
                    partial: info.result,
                })),
                TaskState::Queued | TaskState::Running => Ok(Poll::Pending),
            }
        })
        .await;

        let leftovers = Leftovers {
            name: &spec.vm_name,
            folder: &placement.folder,
            existing: &existing,
        };

        match waited {
            Ok(TaskEnd::Created(vm)) => {
                let duration = started.elapsed();
                info!("克隆完成: {} ({:?})", spec.vm_name, duration);
                Ok(CloneOutcome {
                    vm: VmHandle {
                        reference: vm,
                        name: spec.vm_name.clone(),
                        state: VmState::Mutable,
                    },
                    duration,
                })
            }
            Ok(TaskEnd::Failed { fault, partial }) => {
                warn!("克隆任务失败: {}", fault);
                let orphan = self.cleanup_partial(partial.as_ref(), &leftovers).await;
                Err(BuildError::CloneTask { fault, orphan })
            }
            Err(WaitError::Failed(err)) => Err(err),
            Err(abort) => {
                if let Err(e) = driver.cancel_task(&task).await {
                    warn!("取消克隆任务失败: {}", e);
                }
                let partial = match driver.task_info(&task).await {
                    Ok(info) => info.result,
                    Err(e) => {
                        warn!("查询已取消的克隆任务失败: {}", e);
                        None
                    }
                };
                if let Some(orphan) = self.cleanup_partial(partial.as_ref(), &leftovers).await {
                    warn!("残留虚拟机需手动清理: {}", orphan);
                }
                Err(abort.into_build("克隆任务"))
            }
        }
    }

    async fn resolve_snapshot(&self, source: &VmSummary, name: Option<&str>) -> Result<Snapshot> {
        let driver = self.conn.driver();
        let snapshot = match name {
            Some(name) => driver.find_snapshot(&source.reference, name).await?,
            None => driver.current_snapshot(&source.reference).await?,
        };

        snapshot.ok_or_else(|| {
            BuildError::InvalidCloneSpec(match name {
                Some(name) => format!("克隆源 '{}' 不存在快照 '{}'", source.name, name),
                None => format!("链接克隆要求克隆源 '{}' 存在快照", source.name),
            })
        })
    }

    async fn same_name_refs(&self, name: &str) -> HashSet<ObjectRef> {
        match self.conn.driver().find_vms(&VmQuery::Name(name.to_string())).await {
            Ok(found) => found.into_iter().map(|vm| vm.reference).collect(),
            Err(e) => {
                warn!("查找同名虚拟机失败: {}", e);
                HashSet::new()
            }
        }
    }

    /// 清理克隆失败后的残留，返回需人工处理的对象
    ///
    /// 只删除任务结果指向的虚拟机。任务未返回引用时，目标文件夹中新出现的同名
    /// 虚拟机无法确认归属，只报告不删除。
    async fn cleanup_partial(
        &self,
        partial: Option<&ObjectRef>,
        leftovers: &Leftovers<'_>,
    ) -> Option<String> {
        let driver = self.conn.driver();
        let query = match partial {
            Some(_) => VmQuery::Name(leftovers.name.to_string()),
            None => VmQuery::Path(leftovers.path()),
        };
        let found = match driver.find_vms(&query).await {
            Ok(found) => found,
            Err(e) => {
                warn!("查找残留虚拟机失败: {}", e);
                return partial.map(|vm| vm.to_string());
            }
        };

        let mut orphans = Vec::new();
        for vm in found.iter().filter(|vm| !vm.is_template) {
            if Some(&vm.reference) == partial {
                info!("删除残留虚拟机: {}", vm.reference);
                if vm.power_state.is_on() {
                    if let Err(e) = driver.power_off(&vm.reference).await {
                        warn!("关闭残留虚拟机失败: {}", e);
                    }
                }
                if let Err(e) = driver.destroy_vm(&vm.reference).await {
                    warn!("删除残留虚拟机失败: {}", e);
                    orphans.push(format!("{} ({})", vm.path, vm.reference));
                }
            } else if partial.is_none() && !leftovers.existing.contains(&vm.reference) {
                warn!("无法确认归属的同名虚拟机，未删除: {} ({})", vm.path, vm.reference);
                orphans.push(format!("{} ({}, 未确认)", vm.path, vm.reference));
            }
        }

        (!orphans.is_empty()).then(|| orphans.join(", "))
    }
}

/// 克隆任务的终态
enum TaskEnd {
    Created(ObjectRef),
    Failed {
        fault: String,
        partial: Option<ObjectRef>,
    },
}

/// 残留虚拟机的查找范围
struct Leftovers<'a> {
    name: &'a str,
    folder: &'a InventoryObject,

    /// 提交任务前已存在的同名虚拟机
    existing: &'a HashSet<ObjectRef>,
}

impl Leftovers<'_> {
    /// 目标文件夹中的虚拟机路径
    fn path(&self) -> String {
        format!("{}/{}", self.folder.path.trim_end_matches('/'), self.name)
    }
}
