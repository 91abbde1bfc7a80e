//! 连接管理
//!
//! 每次流水线运行通过驱动工厂获得独立会话，并缓存已解析的放置对象。

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use vclone_driver::{
    Credentials, Driver, DriverFactory, Endpoint, InventoryKind, InventoryObject, Lookup,
};

use crate::config::{ConnectConfig, LocationConfig};
use crate::error::{BuildError, Result};

/// 已解析的放置位置
#[derive(Debug, Clone)]
pub struct Placement {
    pub datacenter: InventoryObject,
    pub folder: InventoryObject,
    pub cluster: Option<InventoryObject>,
    pub host: Option<InventoryObject>,
    pub resource_pool: Option<InventoryObject>,
    pub datastore: Option<InventoryObject>,
}

/// 已认证的会话及放置对象缓存
pub struct Connection {
    driver: Arc<dyn Driver>,
    credentials: Credentials,
    endpoint: Endpoint,
    datacenter: InventoryObject,
    cache: RwLock<HashMap<(InventoryKind, String), InventoryObject>>,
}

impl Connection {
    /// 建立会话并确定数据中心
    pub async fn open(factory: &dyn DriverFactory, config: &ConnectConfig) -> Result<Self> {
        let endpoint = Endpoint {
            server: config.vcenter_server.clone(),
            insecure: config.insecure_connection,
        };
        let credentials = Credentials {
            username: config.username.clone(),
            password: config.password.clone(),
            insecure: config.insecure_connection,
        };

        info!("连接 vCenter: {}", endpoint.server);
        let driver = factory
            .new_session(&endpoint)
            .map_err(BuildError::Connection)?;
        driver
            .login(&credentials)
            .await
            .map_err(BuildError::Connection)?;

        let resolved = resolve_datacenter(driver.as_ref(), config.datacenter.as_deref()).await;
        let datacenter = match resolved {
            Ok(dc) => dc,
            Err(e) => {
                if let Err(logout_err) = driver.logout().await {
                    warn!("登出失败: {}", logout_err);
                }
                return Err(e);
            }
        };
        info!("使用数据中心: {}", datacenter.name);

        Ok(Self {
            driver,
            credentials,
            endpoint,
            datacenter,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn datacenter(&self) -> &InventoryObject {
        &self.datacenter
    }

    /// 在当前数据中心内按名称或路径查找唯一对象（带缓存）
    pub async fn find(&self, kind: InventoryKind, name: &str) -> Result<InventoryObject> {
        let key = (kind, name.to_string());
        if let Some(hit) = self.cache.read().await.get(&key) {
            return Ok(hit.clone());
        }

        let lookup = Lookup::named(name).within(&self.datacenter.reference);
        let mut found = self.driver.find_objects(kind, &lookup).await?;
        debug!("查找{} '{}': {} 个结果", kind, name, found.len());

        let object = match found.len() {
            0 => {
                return Err(BuildError::PlacementNotFound {
                    kind,
                    name: name.to_string(),
                    reason: "对象不存在".to_string(),
                })
            }
            1 => found.remove(0),
            _ => {
                return Err(BuildError::PlacementNotFound {
                    kind,
                    name: name.to_string(),
                    reason: format!(
                        "匹配到多个对象: {}",
                        found
                            .iter()
                            .map(|o| o.path.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                })
            }
        };

        self.cache.write().await.insert(key, object.clone());
        Ok(object)
    }

    async fn find_opt(
        &self,
        kind: InventoryKind,
        name: Option<&str>,
    ) -> Result<Option<InventoryObject>> {
        match name {
            Some(name) => Ok(Some(self.find(kind, name).await?)),
            None => Ok(None),
        }
    }

    /// 解析放置位置
    ///
    /// 未指定文件夹时使用数据中心的虚拟机根文件夹；
    /// 只指定集群时使用集群的根资源池。
    pub async fn resolve_placement(&self, location: &LocationConfig) -> Result<Placement> {
        let dc = self.datacenter.name.clone();

        let folder = match &location.folder {
            Some(folder) if folder.contains('/') => self.find(InventoryKind::Folder, folder).await?,
            Some(folder) => {
                self.find(
                    InventoryKind::Folder,
                    &format!("/{}/vm/{}", dc, folder.trim_matches('/')),
                )
                .await?
            }
            None => self.find(InventoryKind::Folder, &format!("/{}/vm", dc)).await?,
        };

        let cluster = self.find_opt(InventoryKind::Cluster, location.cluster.as_deref()).await?;
        let host = self.find_opt(InventoryKind::Host, location.host.as_deref()).await?;
        let datastore = self
            .find_opt(InventoryKind::Datastore, location.datastore.as_deref())
            .await?;

        let resource_pool = match (&location.resource_pool, &cluster) {
            (Some(pool), _) => Some(self.find(InventoryKind::ResourcePool, pool).await?),
            (None, Some(cluster)) => Some(
                self.find(
                    InventoryKind::ResourcePool,
                    &format!("/{}/host/{}/Resources", dc, cluster.name),
                )
                .await?,
            ),
            (None, None) => None,
        };

        Ok(Placement {
            datacenter: self.datacenter.clone(),
            folder,
            cluster,
            host,
            resource_pool,
            datastore,
        })
    }

    /// 释放会话
    pub async fn close(&self) {
        if let Err(e) = self.driver.logout().await {
            warn!("释放会话失败: {}", e);
        } else {
            debug!("会话已释放");
        }
    }
}

async fn resolve_datacenter(driver: &dyn Driver, name: Option<&str>) -> Result<InventoryObject> {
    match name {
        Some(name) => {
            let mut found = driver
                .find_objects(InventoryKind::Datacenter, &Lookup::named(name))
                .await?;
            match found.len() {
                1 => Ok(found.remove(0)),
                0 => Err(BuildError::PlacementNotFound {
                    kind: InventoryKind::Datacenter,
                    name: name.to_string(),
                    reason: "对象不存在".to_string(),
                }),
                n => Err(BuildError::PlacementNotFound {
                    kind: InventoryKind::Datacenter,
                    name: name.to_string(),
                    reason: format!("匹配到 {} 个对象", n),
                }),
            }
        }
        None => {
            // 名称为空时列出全部数据中心
            let mut all = driver
                .find_objects(InventoryKind::Datacenter, &Lookup::default())
                .await?;
            if all.len() == 1 {
                Ok(all.remove(0))
            } else {
                Err(BuildError::PlacementNotFound {
                    kind: InventoryKind::Datacenter,
                    name: String::new(),
                    reason: format!("存在 {} 个数据中心，需要指定 'datacenter'", all.len()),
                })
            }
        }
    }
}
