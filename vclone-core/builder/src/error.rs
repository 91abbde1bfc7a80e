//! 构建错误定义

use std::time::Duration;
use thiserror::Error;
use vclone_driver::{DriverError, InventoryKind};

use crate::report::{BuildReport, Stage};

/// 构建错误类型
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("连接失败: {0}")]
    Connection(#[source] DriverError),

    #[error("未找到{kind} '{name}': {reason}")]
    PlacementNotFound {
        kind: InventoryKind,
        name: String,
        reason: String,
    },

    #[error("未找到克隆源: {0}")]
    SourceNotFound(String),

    #[error("克隆源 '{reference}' 不唯一，匹配到: {}", .candidates.join(", "))]
    AmbiguousSource {
        reference: String,
        candidates: Vec<String>,
    },

    #[error("克隆规范无效: {0}")]
    InvalidCloneSpec(String),

    #[error("克隆任务失败: {fault}")]
    CloneTask {
        fault: String,
        /// 删除失败、需手动清理的虚拟机
        orphan: Option<String>,
    },

    #[error("虚拟机 {vm} 的客户机定制在 {waited:?} 内未确认")]
    CustomizationTimeout { vm: String, waited: Duration },

    #[error("虚拟机 {vm} 的客户机定制失败: {reason}")]
    CustomizationFailed { vm: String, reason: String },

    #[error("虚拟机 {vm} 的客户机网络在 {waited:?} 内未就绪")]
    GuestUnreachable { vm: String, waited: Duration },

    #[error("阶段组合无效: {0}")]
    InvalidStageCombination(String),

    #[error("{stage}执行失败: {reason}")]
    StageExecution { stage: Stage, reason: String },

    #[error("配置项无效: {0}")]
    InvalidField(String),

    #[error("{operation}超时 ({waited:?})")]
    Timeout { operation: String, waited: Duration },

    #[error("{operation}已取消")]
    Cancelled { operation: String },

    #[error("配置无效 (共 {} 项):\n{}", .0.len(), join_errors(.0))]
    InvalidConfig(Vec<BuildError>),

    #[error("驱动错误: {0}")]
    Driver(#[from] DriverError),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

fn join_errors(errors: &[BuildError]) -> String {
    errors
        .iter()
        .map(|e| format!("  * {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

impl BuildError {
    /// 错误类别名称
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "ConnectionError",
            Self::PlacementNotFound { .. } => "PlacementNotFoundError",
            Self::SourceNotFound(_) => "SourceNotFoundError",
            Self::AmbiguousSource { .. } => "AmbiguousSourceError",
            Self::InvalidCloneSpec(_) => "InvalidCloneSpecError",
            Self::CloneTask { .. } => "CloneTaskError",
            Self::CustomizationTimeout { .. } => "CustomizationTimeoutError",
            Self::CustomizationFailed { .. } => "CustomizationFailedError",
            Self::GuestUnreachable { .. } => "GuestUnreachableError",
            Self::InvalidStageCombination(_) => "InvalidStageCombinationError",
            Self::StageExecution { .. } => "StageExecutionError",
            Self::InvalidField(_) => "InvalidFieldError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Cancelled { .. } => "CancelledError",
            Self::InvalidConfig(_) => "InvalidConfigError",
            Self::Driver(_) => "DriverError",
            Self::Io(_) => "IoError",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// 将后处理阶段的失败包装为阶段执行错误（取消保持原样）
    pub fn into_stage(self, stage: Stage) -> Self {
        match self {
            Self::Cancelled { .. } | Self::StageExecution { .. } => self,
            other => Self::StageExecution {
                stage,
                reason: other.to_string(),
            },
        }
    }
}

/// 构建结果类型
pub type Result<T> = std::result::Result<T, BuildError>;

/// 流水线失败
///
/// 携带失败阶段、根因、清理过程中的警告，以及后处理失败时保留下来的远端效果。
#[derive(Error, Debug)]
#[error("阶段 [{stage}] 失败: {source}")]
pub struct PipelineError {
    pub stage: Stage,

    #[source]
    pub source: BuildError,

    /// 清理警告（不会覆盖根因）
    pub warnings: Vec<String>,

    /// 已生效且未回滚的远端变更
    pub retained: Vec<String>,

    pub report: BuildReport,
}
