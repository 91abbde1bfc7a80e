//! 内容库导入阶段

use tracing::info;
use vclone_driver::{InventoryKind, LibraryImportRequest, Lookup, ObjectRef};

use crate::clone::VmHandle;
use crate::config::ContentLibraryDestinationConfig;
use crate::connection::Connection;
use crate::error::{BuildError, Result};

/// 导入内容库，返回条目引用
pub async fn import(
    conn: &Connection,
    vm: &VmHandle,
    config: &ContentLibraryDestinationConfig,
) -> Result<ObjectRef> {
    let driver = conn.driver();

    // 内容库不属于数据中心
    let mut found = driver
        .find_objects(InventoryKind::Library, &Lookup::named(&config.library))
        .await?;
    let library = match found.len() {
        1 => found.remove(0),
        n => {
            return Err(BuildError::PlacementNotFound {
                kind: InventoryKind::Library,
                name: config.library.clone(),
                reason: if n == 0 {
                    "对象不存在".to_string()
                } else {
                    format!("匹配到 {} 个同名内容库", n)
                },
            })
        }
    };

    let request = LibraryImportRequest {
        library: library.reference,
        name: config.name.clone().unwrap_or_else(|| vm.name.clone()),
        description: config.description.clone(),
        ovf: config.ovf,
        folder: find_ref(conn, InventoryKind::Folder, config.folder.as_deref()).await?,
        resource_pool: find_ref(conn, InventoryKind::ResourcePool, config.resource_pool.as_deref())
            .await?,
        host: find_ref(conn, InventoryKind::Host, config.host.as_deref()).await?,
        cluster: find_ref(conn, InventoryKind::Cluster, config.cluster.as_deref()).await?,
        datastore: find_ref(conn, InventoryKind::Datastore, config.datastore.as_deref()).await?,
    };

    info!(
        "导入内容库 '{}' ({}): {}",
        config.library,
        if request.ovf { "OVF" } else { "虚拟机模板" },
        request.name
    );
    let item = driver.import_to_library(&vm.reference, &request).await?;
    info!("内容库条目: {}", item);
    Ok(item)
}

async fn find_ref(
    conn: &Connection,
    kind: InventoryKind,
    name: Option<&str>,
) -> Result<Option<ObjectRef>> {
    match name {
        Some(name) => Ok(Some(conn.find(kind, name).await?.reference)),
        None => Ok(None),
    }
}
