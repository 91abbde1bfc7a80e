//! 后处理阶段
//!
//! 固定顺序：快照 → 转换为模板 → 导出 → 内容库导入。
//! 每个阶段由配置是否存在决定是否启用；失败不回滚之前阶段的效果。

pub mod export;
pub mod library;
pub mod snapshot;
pub mod template;

use std::path::PathBuf;
use vclone_driver::{ObjectRef, Snapshot};

use crate::config::Config;
use crate::error::BuildError;
use crate::report::Stage;

/// 启用的后处理阶段
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSet {
    pub snapshot: bool,
    pub convert_to_template: bool,
    pub export: bool,
    pub content_library: bool,
}

impl StageSet {
    pub fn from_config(config: &Config) -> Self {
        Self {
            snapshot: config.create_snapshot,
            convert_to_template: config.convert_to_template,
            export: config.export.is_some(),
            content_library: config.content_library_destination.is_some(),
        }
    }

    /// 阶段组合预检（在任何远端调用之前执行）
    pub fn validate(&self) -> Vec<BuildError> {
        let mut errs = Vec::new();
        if self.convert_to_template && self.content_library {
            errs.push(BuildError::InvalidStageCombination(
                "'convert_to_template' 与 'content_library_destination' 不能同时启用".to_string(),
            ));
        }
        errs
    }

    /// 按执行顺序列出启用的阶段
    pub fn enabled(&self) -> Vec<Stage> {
        [
            (self.snapshot, Stage::Snapshot),
            (self.convert_to_template, Stage::ConvertToTemplate),
            (self.export, Stage::Export),
            (self.content_library, Stage::ContentLibraryImport),
        ]
        .into_iter()
        .filter(|(on, _)| *on)
        .map(|(_, stage)| stage)
        .collect()
    }
}

/// 后处理阶段的输出
#[derive(Debug, Clone, Default)]
pub struct StageOutputs {
    pub snapshot: Option<Snapshot>,
    pub template: bool,
    pub export_dir: Option<PathBuf>,
    pub export_files: Vec<PathBuf>,
    pub library_item: Option<ObjectRef>,
}

impl StageOutputs {
    /// 已生效的远端/本地效果描述，用于失败时提示人工处理
    pub fn retained_effects(&self, vm_name: &str) -> Vec<String> {
        let mut effects = vec![format!("虚拟机 '{}' 已保留", vm_name)];
        if let Some(snapshot) = &self.snapshot {
            effects.push(format!("已创建快照 '{}' ({})", snapshot.name, snapshot.reference));
        }
        if self.template {
            effects.push("已转换为模板".to_string());
        }
        if let Some(dir) = &self.export_dir {
            effects.push(format!(
                "已导出 {} 个文件到 {}",
                self.export_files.len(),
                dir.display()
            ));
        }
        if let Some(item) = &self.library_item {
            effects.push(format!("已导入内容库条目 {}", item));
        }
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vclone_driver::InventoryKind;

    #[test]
    fn test_convert_and_library_conflict() {
        let set = StageSet {
            convert_to_template: true,
            content_library: true,
            ..Default::default()
        };
        let errs = set.validate();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].kind(), "InvalidStageCombinationError");
    }

    #[test]
    fn test_convert_and_export_allowed() {
        let set = StageSet {
            convert_to_template: true,
            export: true,
            ..Default::default()
        };
        assert!(set.validate().is_empty());
        assert_eq!(set.enabled(), vec![Stage::ConvertToTemplate, Stage::Export]);
    }

    #[test]
    fn test_enabled_order() {
        let set = StageSet {
            snapshot: true,
            convert_to_template: false,
            export: true,
            content_library: true,
        };
        assert_eq!(
            set.enabled(),
            vec![Stage::Snapshot, Stage::Export, Stage::ContentLibraryImport]
        );
    }

    #[test]
    fn test_retained_effects() {
        let outputs = StageOutputs {
            snapshot: Some(Snapshot {
                reference: ObjectRef::new(InventoryKind::Snapshot, "snapshot-3"),
                name: "Created by vclone".into(),
            }),
            template: true,
            ..Default::default()
        };
        let effects = outputs.retained_effects("build-1");
        assert_eq!(effects.len(), 3);
        assert!(effects[1].contains("Created by vclone"));
    }
}
