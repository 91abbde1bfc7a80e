//! 构建报告

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 流水线阶段（按执行顺序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    Connect,
    ResolveSource,
    Clone,
    ConfigureHardware,
    AttachMedia,
    Customize,
    PowerOn,
    WaitCustomization,
    WaitForIp,
    Shutdown,
    DetachMedia,
    Snapshot,
    ConvertToTemplate,
    Export,
    ContentLibraryImport,
    Assemble,
}

impl Stage {
    /// 中文名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Validate => "配置校验",
            Self::Connect => "连接",
            Self::ResolveSource => "解析克隆源",
            Self::Clone => "克隆",
            Self::ConfigureHardware => "硬件配置",
            Self::AttachMedia => "挂载光驱/软驱",
            Self::Customize => "客户机定制",
            Self::PowerOn => "开机",
            Self::WaitCustomization => "等待定制完成",
            Self::WaitForIp => "等待 IP",
            Self::Shutdown => "关机",
            Self::DetachMedia => "移除可移动设备",
            Self::Snapshot => "创建快照",
            Self::ConvertToTemplate => "转换模板",
            Self::Export => "导出",
            Self::ContentLibraryImport => "导入内容库",
            Self::Assemble => "组装产物",
        }
    }

    /// 是否属于后处理阶段
    pub fn is_post_processing(&self) -> bool {
        matches!(
            self,
            Self::Snapshot | Self::ConvertToTemplate | Self::Export | Self::ContentLibraryImport
        )
    }

    /// 失败时是否需要删除已克隆的虚拟机
    pub fn destroys_on_failure(&self) -> bool {
        *self <= Self::DetachMedia
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// 构建报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    /// 虚拟机名称
    pub name: String,

    /// 开始时间
    pub start_time: DateTime<Utc>,

    /// 结束时间
    pub end_time: Option<DateTime<Utc>>,

    /// 总耗时
    #[serde(skip)]
    pub duration: Duration,

    pub total_steps: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,

    /// 阶段结果列表
    pub steps: Vec<StepReport>,
}

impl BuildReport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start_time: Utc::now(),
            end_time: None,
            duration: Duration::from_secs(0),
            total_steps: 0,
            success_count: 0,
            failed_count: 0,
            skipped_count: 0,
            steps: Vec::new(),
        }
    }

    /// 添加阶段结果
    pub fn add_step(&mut self, step: StepReport) {
        match step.status {
            StepStatus::Success => self.success_count += 1,
            StepStatus::Failed => self.failed_count += 1,
            StepStatus::Skipped => self.skipped_count += 1,
        }
        self.total_steps += 1;
        self.steps.push(step);
    }

    /// 完成报告
    pub fn finalize(&mut self) {
        let end_time = Utc::now();
        self.end_time = Some(end_time);
        self.duration = (end_time - self.start_time)
            .to_std()
            .unwrap_or(Duration::from_secs(0));
    }

    pub fn is_success(&self) -> bool {
        self.failed_count == 0 && self.total_steps > 0
    }

    /// 查找阶段结果
    pub fn step(&self, stage: Stage) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.stage == stage)
    }

    /// 导出为 JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// 导出为 YAML
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// 阶段结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub stage: Stage,
    pub status: StepStatus,
    pub error: Option<String>,

    /// 耗时 (毫秒)
    pub duration_ms: u64,

    pub output: Option<String>,
}

impl StepReport {
    pub fn success(stage: Stage, duration: Duration, output: Option<String>) -> Self {
        Self {
            stage,
            status: StepStatus::Success,
            error: None,
            duration_ms: duration.as_millis() as u64,
            output,
        }
    }

    pub fn failed(stage: Stage, duration: Duration, error: String) -> Self {
        Self {
            stage,
            status: StepStatus::Failed,
            error: Some(error),
            duration_ms: duration.as_millis() as u64,
            output: None,
        }
    }

    pub fn skipped(stage: Stage) -> Self {
        Self {
            stage,
            status: StepStatus::Skipped,
            error: None,
            duration_ms: 0,
            output: None,
        }
    }
}

/// 阶段状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let mut report = BuildReport::new("vm-1");
        report.add_step(StepReport::success(Stage::Connect, Duration::from_millis(5), None));
        report.add_step(StepReport::skipped(Stage::Customize));
        report.finalize();

        assert_eq!(report.total_steps, 2);
        assert_eq!(report.success_count, 1);
        assert_eq!(report.skipped_count, 1);
        assert!(report.is_success());
        assert!(report.end_time.is_some());
    }

    #[test]
    fn test_failed_report() {
        let mut report = BuildReport::new("vm-1");
        report.add_step(StepReport::failed(
            Stage::Clone,
            Duration::from_secs(1),
            "boom".into(),
        ));
        assert!(!report.is_success());
        assert_eq!(report.step(Stage::Clone).unwrap().error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::Shutdown.destroys_on_failure());
        assert!(Stage::Clone.destroys_on_failure());
        assert!(Stage::DetachMedia.destroys_on_failure());
        assert!(Stage::AttachMedia < Stage::Customize);
        assert!(!Stage::DetachMedia.is_post_processing());
        assert!(!Stage::Snapshot.destroys_on_failure());
        assert!(Stage::Export.is_post_processing());
        assert!(!Stage::Assemble.is_post_processing());
    }

    #[test]
    fn test_report_json() {
        let mut report = BuildReport::new("vm-1");
        report.add_step(StepReport::success(Stage::WaitForIp, Duration::ZERO, None));
        let json = report.to_json().unwrap();
        assert!(json.contains("\"wait_for_ip\""));
    }
}
