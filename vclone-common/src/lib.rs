//! vclone 通用类型定义
//!
//! 此 crate 包含构建器与外部镜像仓库（registry）之间共享的类型。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 产物状态中镜像溯源元数据对应的键
pub const ARTIFACT_STATE_URI: &str = "par.artifact.metadata";

/// 镜像溯源元数据
///
/// 由构建产物导出，供外部镜像仓库记录使用。标签使用有序映射，
/// 同一份虚拟机状态多次序列化得到的字节完全一致。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryImage {
    /// 镜像标识（虚拟机名称）
    pub image_id: String,

    /// 提供方名称
    pub provider_name: String,

    /// 提供方区域（集群名称）
    pub provider_region: String,

    /// 源镜像标识（克隆源模板）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image_id: Option<String>,

    /// 标签
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl RegistryImage {
    pub fn new(image_id: &str, provider_name: &str, provider_region: &str) -> Self {
        Self {
            image_id: image_id.to_string(),
            provider_name: provider_name.to_string(),
            provider_region: provider_region.to_string(),
            source_image_id: None,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source_image_id = Some(source.to_string());
        self
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// 导出为 JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// 从 JSON 解析
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
