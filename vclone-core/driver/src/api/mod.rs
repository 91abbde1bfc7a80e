//! vCenter REST API 模块
//!
//! - 清单查询 (InventoryApi)
//! - 虚拟机管理 (VmApi)
//! - 客户机定制与网络 (GuestApi)
//! - 任务跟踪 (TaskApi)
//! - 快照管理 (SnapshotApi)
//! - 内容库 (LibraryApi)
//! - 可移动设备 (DeviceApi)

pub mod device;
pub mod guest;
pub mod inventory;
pub mod library;
pub mod snapshot;
pub mod task;
pub mod vm;

pub use device::DeviceApi;
pub use guest::GuestApi;
pub use inventory::InventoryApi;
pub use library::LibraryApi;
pub use snapshot::SnapshotApi;
pub use task::TaskApi;
pub use vm::VmApi;

use crate::error::{DriverError, Result};

/// 读取字符串字段
pub(crate) fn str_field(value: &serde_json::Value, key: &str) -> Result<String> {
    value[key]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| DriverError::ParseError(format!("响应缺少字段: {}", key)))
}

/// 构造查询参数
pub(crate) fn query_string(pairs: &[(&str, &str)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string_encodes_names() {
        assert_eq!(
            query_string(&[("names", "VM Network"), ("datacenters", "datacenter-2")]),
            "names=VM+Network&datacenters=datacenter-2"
        );
    }

    #[test]
    fn test_str_field_missing() {
        let value = serde_json::json!({ "name": "DC0" });
        assert_eq!(str_field(&value, "name").unwrap(), "DC0");
        assert!(matches!(
            str_field(&value, "datacenter"),
            Err(DriverError::ParseError(_))
        ));
    }
}
