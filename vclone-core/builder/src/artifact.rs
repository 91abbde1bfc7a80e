//! 构建产物
//!
//! 产物只在全部阶段成功后生成。标签由组装时查询到的虚拟机实时配置计算，
//! 反映后处理之后的最终状态；使用有序映射，重复组装结果逐字节一致。

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use vclone_common::{RegistryImage, ARTIFACT_STATE_URI};
use vclone_driver::{Credentials, Driver, DriverFactory, Endpoint, PowerState, VmConfig};

use crate::clone::{VmHandle, VmState};
use crate::error::{BuildError, Result};

/// 构建器标识
pub const BUILDER_ID: &str = "vclone.vsphere-clone";

/// 溯源元数据中的提供方名称
pub const PROVIDER_NAME: &str = "vsphere";

/// 构建时解析到的放置位置名称
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocationLabels {
    pub cluster: Option<String>,
    pub host: Option<String>,
    pub datastore: Option<String>,
}

impl LocationLabels {
    /// 提供方区域：集群名称，未使用集群时退回主机名称
    pub fn region(&self) -> String {
        self.cluster
            .clone()
            .or_else(|| self.host.clone())
            .unwrap_or_default()
    }
}

/// 由实时配置计算标签
pub fn compute_labels(config: &VmConfig, location: &LocationLabels) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("vm_dir".to_string(), config.vm_dir.clone());
    labels.insert("annotation".to_string(), config.annotation.clone());
    labels.insert("num_cpu".to_string(), config.num_cpu.to_string());
    labels.insert(
        "num_cores_per_socket".to_string(),
        config.num_cores_per_socket.to_string(),
    );
    labels.insert("memory_mb".to_string(), config.memory_mb.to_string());

    let host = config
        .host
        .as_ref()
        .map(|h| h.name.clone())
        .or_else(|| location.host.clone())
        .unwrap_or_default();
    labels.insert("host".to_string(), host);

    let datastore = config
        .datastores
        .first()
        .map(|d| d.name.clone())
        .or_else(|| location.datastore.clone())
        .unwrap_or_default();
    labels.insert("datastore".to_string(), datastore);

    for (i, network) in config.networks.iter().enumerate() {
        labels.insert(format!("network_{}", i), network.to_string());
    }

    labels
}

/// 产物组装器
pub struct ArtifactAssembler<'a> {
    driver: &'a dyn Driver,
}

impl<'a> ArtifactAssembler<'a> {
    pub fn new(driver: &'a dyn Driver) -> Self {
        Self { driver }
    }

    /// 查询实时配置并生成溯源元数据
    pub async fn provenance(
        &self,
        vm: &VmHandle,
        location: &LocationLabels,
        source: Option<&str>,
    ) -> Result<RegistryImage> {
        let config = self.driver.vm_config(&vm.reference).await?;
        let labels = compute_labels(&config, location);

        let mut image =
            RegistryImage::new(&vm.name, PROVIDER_NAME, &location.region()).with_labels(labels);
        if let Some(source) = source {
            image = image.with_source(source);
        }
        Ok(image)
    }
}

/// 构建产物
pub struct Artifact {
    name: String,
    location: LocationLabels,
    vm: VmHandle,
    source: Option<String>,
    files: Vec<PathBuf>,
    state_data: BTreeMap<String, Value>,
    provenance: RegistryImage,
    factory: Arc<dyn DriverFactory>,
    endpoint: Endpoint,
    credentials: Credentials,
}

/// 产物的可序列化视图
#[derive(Debug, Serialize)]
struct ArtifactView<'a> {
    builder_id: &'static str,
    id: &'a str,
    vm: String,
    template: bool,
    location: &'a LocationLabels,
    files: &'a [PathBuf],
    state: &'a BTreeMap<String, Value>,
    provenance: &'a RegistryImage,
}

impl Artifact {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        vm: VmHandle,
        location: LocationLabels,
        source: Option<String>,
        files: Vec<PathBuf>,
        state_data: BTreeMap<String, Value>,
        provenance: RegistryImage,
        factory: Arc<dyn DriverFactory>,
        endpoint: Endpoint,
        credentials: Credentials,
    ) -> Self {
        Self {
            name: vm.name.clone(),
            location,
            vm,
            source,
            files,
            state_data,
            provenance,
            factory,
            endpoint,
            credentials,
        }
    }

    pub fn builder_id(&self) -> &'static str {
        BUILDER_ID
    }

    /// 产物标识（虚拟机名称）
    pub fn id(&self) -> &str {
        &self.name
    }

    pub fn vm(&self) -> &VmHandle {
        &self.vm
    }

    pub fn location(&self) -> &LocationLabels {
        &self.location
    }

    /// 导出生成的文件
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// 按键读取产物状态
    ///
    /// [`ARTIFACT_STATE_URI`] 返回溯源元数据，其余键返回阶段输出。
    pub fn state(&self, key: &str) -> Option<Value> {
        if key == ARTIFACT_STATE_URI {
            return serde_json::to_value(&self.provenance).ok();
        }
        self.state_data.get(key).cloned()
    }

    /// 溯源元数据
    pub fn provenance(&self) -> &RegistryImage {
        &self.provenance
    }

    /// 重新查询虚拟机实时状态并更新溯源元数据（使用独立的短会话）
    pub async fn refresh_provenance(&mut self) -> Result<&RegistryImage> {
        if self.vm.state == VmState::Destroyed {
            return Err(BuildError::SourceNotFound(format!(
                "虚拟机 {} 已删除",
                self.name
            )));
        }

        let driver = self.session().await?;
        let refreshed = ArtifactAssembler::new(driver.as_ref())
            .provenance(&self.vm, &self.location, self.source.as_deref())
            .await;
        release(driver.as_ref()).await;

        self.provenance = refreshed?;
        Ok(&self.provenance)
    }

    /// 删除产物：删除虚拟机（模板同样删除）以及导出的本地文件
    pub async fn destroy(&mut self) -> Result<()> {
        if self.vm.state == VmState::Destroyed {
            return Ok(());
        }

        info!("删除产物: {}", self.name);
        let driver = self.session().await?;
        let result = destroy_vm(driver.as_ref(), &self.vm).await;
        release(driver.as_ref()).await;
        result?;
        self.vm.state = VmState::Destroyed;

        for file in &self.files {
            match tokio::fs::remove_file(file).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// 导出为 JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&ArtifactView {
            builder_id: BUILDER_ID,
            id: &self.name,
            vm: self.vm.reference.to_string(),
            template: self.vm.state == VmState::Template,
            location: &self.location,
            files: &self.files,
            state: &self.state_data,
            provenance: &self.provenance,
        })
    }

    async fn session(&self) -> Result<Arc<dyn Driver>> {
        let driver = self
            .factory
            .new_session(&self.endpoint)
            .map_err(BuildError::Connection)?;
        driver
            .login(&self.credentials)
            .await
            .map_err(BuildError::Connection)?;
        Ok(driver)
    }
}

async fn destroy_vm(driver: &dyn Driver, vm: &VmHandle) -> Result<()> {
    if vm.state == VmState::Mutable
        && driver.power_state(&vm.reference).await? != PowerState::PoweredOff
    {
        driver.power_off(&vm.reference).await?;
    }
    driver.destroy_vm(&vm.reference).await?;
    Ok(())
}

async fn release(driver: &dyn Driver) {
    if let Err(e) = driver.logout().await {
        warn!("释放会话失败: {}", e);
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vm.state {
            VmState::Template => write!(f, "模板: {}", self.name)?,
            _ => write!(f, "虚拟机: {}", self.name)?,
        }
        if !self.files.is_empty() {
            write!(f, " (导出文件 {} 个)", self.files.len())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("name", &self.name)
            .field("vm", &self.vm)
            .field("location", &self.location)
            .field("files", &self.files)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vclone_driver::{InventoryKind, InventoryObject, ObjectRef};

    fn live_config() -> VmConfig {
        VmConfig {
            name: "build-1".into(),
            uuid: "4223a1b2-0c3d-4e5f-8a9b-0123456789ab".into(),
            annotation: "simple vm description".into(),
            num_cpu: 2,
            num_cores_per_socket: 1,
            memory_mb: 4096,
            vm_dir: "[LocalDS_0] build-1".into(),
            host: Some(InventoryObject {
                reference: ObjectRef::new(InventoryKind::Host, "host-21"),
                name: "DC0_C0_H0".into(),
                path: String::new(),
            }),
            datastores: Vec::new(),
            networks: vec![ObjectRef::new(InventoryKind::Network, "network-7")],
            disks: Vec::new(),
            is_template: false,
            power_state: PowerState::PoweredOff,
        }
    }

    #[test]
    fn test_labels_from_live_config() {
        let location = LocationLabels {
            cluster: Some("DC0_C0".into()),
            host: Some("ignored".into()),
            datastore: Some("LocalDS_0".into()),
        };
        let labels = compute_labels(&live_config(), &location);

        assert_eq!(labels["num_cpu"], "2");
        assert_eq!(labels["num_cores_per_socket"], "1");
        assert_eq!(labels["memory_mb"], "4096");
        assert_eq!(labels["annotation"], "simple vm description");
        assert_eq!(labels["host"], "DC0_C0_H0");
        // 实时配置中没有数据存储时使用放置位置
        assert_eq!(labels["datastore"], "LocalDS_0");
        assert_eq!(labels["network_0"], "Network:network-7");
        assert_eq!(labels.len(), 8);
    }

    #[test]
    fn test_region_falls_back_to_host() {
        let location = LocationLabels {
            cluster: None,
            host: Some("DC0_C0_H0".into()),
            datastore: None,
        };
        assert_eq!(location.region(), "DC0_C0_H0");
    }
}
