//! CLI 通用输出格式化模块
//!
//! 提供 table/json 两种输出格式

use anyhow::Result;
use serde::Serialize;
use vclone_builder::{StepReport, StepStatus};

/// 可输出为表格行的数据 trait
pub trait TableRow {
    /// 返回表格列标题
    fn headers() -> Vec<&'static str>;

    /// 返回该项的表格行数据
    fn row(&self) -> Vec<String>;
}

/// 表格格式输出
pub fn print_table<T: TableRow>(items: &[T]) {
    let header_line: String = T::headers()
        .iter()
        .map(|h| format!("{:<16}", h))
        .collect::<Vec<_>>()
        .join(" ");
    println!("{}", header_line);
    println!("{}", "-".repeat(header_line.len()));

    for item in items {
        let row_line: String = item
            .row()
            .iter()
            .map(|c| format!("{:<16}", c))
            .collect::<Vec<_>>()
            .join(" ");
        println!("{}", row_line);
    }
}

/// JSON 格式输出
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

impl TableRow for StepReport {
    fn headers() -> Vec<&'static str> {
        vec!["阶段", "状态", "耗时(ms)", "输出"]
    }

    fn row(&self) -> Vec<String> {
        let status = match self.status {
            StepStatus::Success => "成功",
            StepStatus::Failed => "失败",
            StepStatus::Skipped => "跳过",
        };
        let detail = self
            .error
            .clone()
            .or_else(|| self.output.clone())
            .unwrap_or_default();
        vec![
            self.stage.to_string(),
            status.to_string(),
            self.duration_ms.to_string(),
            detail,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vclone_builder::Stage;

    #[test]
    fn test_step_row() {
        let step =
            StepReport::success(Stage::Clone, Duration::from_millis(1500), Some("vm-42".into()));
        assert_eq!(step.row(), vec!["克隆", "成功", "1500", "vm-42"]);

        let failed = StepReport::failed(Stage::Export, Duration::ZERO, "磁盘已满".into());
        assert_eq!(failed.row()[1], "失败");
        assert_eq!(failed.row()[3], "磁盘已满");
    }
}
