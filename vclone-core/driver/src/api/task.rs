//! 任务跟踪 API

use reqwest::Method;
use tracing::info;

use crate::client::VsphereClient;
use crate::error::Result;
use crate::models::{InventoryKind, ObjectRef, TaskInfo, TaskState};

/// 任务跟踪 API
pub struct TaskApi<'a> {
    client: &'a VsphereClient,
}

impl<'a> TaskApi<'a> {
    pub(crate) fn new(client: &'a VsphereClient) -> Self {
        Self { client }
    }

    /// 查询任务
    pub async fn get(&self, task_id: &str) -> Result<TaskInfo> {
        let value: serde_json::Value = self
            .client
            .request(
                Method::GET,
                &format!("/api/cis/tasks/{}", task_id),
                None::<()>,
            )
            .await?;

        Ok(parse_task(task_id, &value))
    }

    /// 取消任务
    pub async fn cancel(&self, task_id: &str) -> Result<()> {
        info!("取消任务: {}", task_id);
        self.client
            .execute(
                Method::POST,
                &format!("/api/cis/tasks/{}?action=cancel", task_id),
                None::<()>,
            )
            .await
    }
}

fn parse_task(task_id: &str, value: &serde_json::Value) -> TaskInfo {
    let state = match value["status"].as_str().unwrap_or("PENDING") {
        "SUCCEEDED" => TaskState::Success,
        "FAILED" => TaskState::Error,
        "RUNNING" => TaskState::Running,
        _ => TaskState::Queued,
    };

    let progress = match (
        value["progress"]["completed"].as_u64(),
        value["progress"]["total"].as_u64(),
    ) {
        (Some(done), Some(total)) if total > 0 => Some(((done * 100) / total).min(100) as u8),
        _ => None,
    };

    let result = value["result"]
        .as_str()
        .map(|id| ObjectRef::vm(id.to_string()));

    let error = value["error"]["messages"][0]["default_message"]
        .as_str()
        .or_else(|| value["error"].as_str())
        .map(|s| s.to_string())
        .or_else(|| {
            (state == TaskState::Error).then(|| "任务失败，未返回原因".to_string())
        });

    TaskInfo {
        reference: ObjectRef::new(InventoryKind::Task, task_id),
        state,
        progress,
        result,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_running_task() {
        let value = serde_json::json!({
            "status": "RUNNING",
            "progress": { "completed": 30, "total": 60 }
        });
        let info = parse_task("task-1", &value);
        assert_eq!(info.state, TaskState::Running);
        assert_eq!(info.progress, Some(50));
        assert!(info.error.is_none());
    }

    #[test]
    fn test_parse_failed_task() {
        let value = serde_json::json!({
            "status": "FAILED",
            "error": { "messages": [ { "default_message": "Insufficient disk space" } ] }
        });
        let info = parse_task("task-2", &value);
        assert_eq!(info.state, TaskState::Error);
        assert_eq!(info.error.as_deref(), Some("Insufficient disk space"));
    }

    #[test]
    fn test_parse_succeeded_task_result() {
        let value = serde_json::json!({ "status": "SUCCEEDED", "result": "vm-1001" });
        let info = parse_task("task-3", &value);
        assert_eq!(info.result, Some(ObjectRef::vm("vm-1001")));
    }
}
