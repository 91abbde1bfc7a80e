//! 清单查询 API

use reqwest::Method;
use tracing::debug;

use super::{query_string, str_field};
use crate::client::VsphereClient;
use crate::error::{DriverError, Result};
use crate::models::{InventoryKind, InventoryObject, ObjectRef};

/// 清单查询范围
///
/// 各字段均为对象标识。`folder` 对文件夹类型表示父文件夹，
/// `resource_pool` 对资源池类型表示父资源池。
#[derive(Debug, Clone, Copy, Default)]
pub struct Filter<'a> {
    pub name: Option<&'a str>,
    pub datacenter: Option<&'a str>,
    pub folder: Option<&'a str>,
    pub cluster: Option<&'a str>,
    pub host: Option<&'a str>,
    pub resource_pool: Option<&'a str>,
    pub vm: Option<&'a str>,
}

impl<'a> Filter<'a> {
    pub fn named(name: &'a str) -> Self {
        Self {
            name: Some(name),
            ..Default::default()
        }
    }

    /// 转换为 REST 过滤参数
    pub(crate) fn pairs(&self, kind: InventoryKind) -> Vec<(&'static str, &'a str)> {
        let mut pairs = Vec::new();
        if let Some(name) = self.name {
            pairs.push(("names", name));
        }
        if let Some(dc) = self.datacenter {
            if kind != InventoryKind::Datacenter {
                pairs.push(("datacenters", dc));
            }
        }
        match (kind, self.folder) {
            (InventoryKind::Folder, Some(parent)) => pairs.push(("parent_folders", parent)),
            (InventoryKind::Folder, None) => pairs.push(("type", "VIRTUAL_MACHINE")),
            (_, Some(folder)) => pairs.push(("folders", folder)),
            (_, None) => {}
        }
        if let Some(cluster) = self.cluster {
            pairs.push(("clusters", cluster));
        }
        if let Some(host) = self.host {
            pairs.push(("hosts", host));
        }
        if let Some(pool) = self.resource_pool {
            let key = if kind == InventoryKind::ResourcePool {
                "parent_resource_pools"
            } else {
                "resource_pools"
            };
            pairs.push((key, pool));
        }
        if let Some(vm) = self.vm {
            pairs.push(("vms", vm));
        }
        pairs
    }
}

/// 数据中心下的根文件夹
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootFolders {
    pub vm: String,
    pub host: String,
    pub datastore: String,
    pub network: String,
}

impl RootFolders {
    /// 按路径中的根目录名取文件夹标识
    pub fn get(&self, root: &str) -> Option<&str> {
        match root {
            "vm" => Some(&self.vm),
            "host" => Some(&self.host),
            "datastore" => Some(&self.datastore),
            "network" => Some(&self.network),
            _ => None,
        }
    }
}

/// 清单查询 API
pub struct InventoryApi<'a> {
    client: &'a VsphereClient,
}

impl<'a> InventoryApi<'a> {
    pub(crate) fn new(client: &'a VsphereClient) -> Self {
        Self { client }
    }

    /// 列出满足过滤条件的对象
    pub async fn list(
        &self,
        kind: InventoryKind,
        filter: &Filter<'_>,
    ) -> Result<Vec<InventoryObject>> {
        let (endpoint, id_field) = endpoint_of(kind)?;
        let items = self.raw_list(endpoint, &filter.pairs(kind)).await?;
        debug!("查询{}: {:?} -> {} 个结果", kind, filter.name, items.len());

        items
            .iter()
            .map(|item| {
                Ok(InventoryObject {
                    reference: ObjectRef::new(kind, str_field(item, id_field)?),
                    name: str_field(item, "name")?,
                    path: String::new(),
                })
            })
            .collect()
    }

    /// 未经转换的列表响应
    pub(crate) async fn raw_list(
        &self,
        endpoint: &str,
        pairs: &[(&str, &str)],
    ) -> Result<Vec<serde_json::Value>> {
        let path = if pairs.is_empty() {
            endpoint.to_string()
        } else {
            format!("{}?{}", endpoint, query_string(pairs))
        };
        self.client.request(Method::GET, &path, None::<()>).await
    }

    /// 数据中心的根文件夹
    pub async fn root_folders(&self, datacenter: &str) -> Result<RootFolders> {
        let value: serde_json::Value = self
            .client
            .request(
                Method::GET,
                &format!("/api/vcenter/datacenter/{}", datacenter),
                None::<()>,
            )
            .await?;

        Ok(RootFolders {
            vm: str_field(&value, "vm_folder")?,
            host: str_field(&value, "host_folder")?,
            datastore: str_field(&value, "datastore_folder")?,
            network: str_field(&value, "network_folder")?,
        })
    }

    /// 集群的根资源池
    pub async fn cluster_root_pool(&self, cluster: &str) -> Result<String> {
        let value: serde_json::Value = self
            .client
            .request(
                Method::GET,
                &format!("/api/vcenter/cluster/{}", cluster),
                None::<()>,
            )
            .await?;
        str_field(&value, "resource_pool")
    }
}

pub(crate) fn endpoint_of(kind: InventoryKind) -> Result<(&'static str, &'static str)> {
    let pair = match kind {
        InventoryKind::Datacenter => ("/api/vcenter/datacenter", "datacenter"),
        InventoryKind::Cluster => ("/api/vcenter/cluster", "cluster"),
        InventoryKind::Host => ("/api/vcenter/host", "host"),
        InventoryKind::Datastore => ("/api/vcenter/datastore", "datastore"),
        InventoryKind::ResourcePool => ("/api/vcenter/resource-pool", "resource_pool"),
        InventoryKind::Folder => ("/api/vcenter/folder", "folder"),
        InventoryKind::Network => ("/api/vcenter/network", "network"),
        InventoryKind::VirtualMachine => ("/api/vcenter/vm", "vm"),
        other => {
            return Err(DriverError::OperationFailed(format!(
                "不支持的清单查询类型: {}",
                other
            )))
        }
    };
    Ok(pair)
}
