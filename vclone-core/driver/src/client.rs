//! vCenter REST 客户端核心实现

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, Response};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::api::{
    DeviceApi, GuestApi, InventoryApi, LibraryApi, SnapshotApi, TaskApi, VmApi,
};
use crate::driver::{Driver, DriverFactory, Endpoint};
use crate::error::{DriverError, Result};

/// 会话令牌请求头
const SESSION_HEADER: &str = "vmware-api-session-id";

/// 客户端配置
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 连接超时（秒）
    pub connect_timeout: u64,

    /// 请求超时（秒），不作用于磁盘下载
    pub request_timeout: u64,

    /// 下载时两段数据之间的最长间隔（秒）
    pub read_timeout: u64,

    /// 是否验证 SSL 证书
    pub verify_ssl: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 10,
            request_timeout: 60,
            read_timeout: 120,
            verify_ssl: true,
        }
    }
}

/// vCenter REST 客户端
pub struct VsphereClient {
    /// API 基础 URL
    base_url: String,

    /// HTTP 客户端
    http_client: Client,

    /// 下载专用客户端（无整体超时）
    download_client: Client,

    /// 下载空闲超时
    read_timeout: Duration,

    /// 会话令牌
    session: Arc<RwLock<Option<String>>>,
}

impl VsphereClient {
    /// 创建新的客户端
    ///
    /// `server` 可以是主机名，也可以是完整 URL；未指定协议时使用 https。
    pub fn new(server: &str, config: ClientConfig) -> Result<Self> {
        let base_url = normalize_server(server)?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| DriverError::HttpError(e.to_string()))?;

        // 磁盘文件可能很大，只限制连接和空闲时间
        let download_client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| DriverError::HttpError(e.to_string()))?;

        Ok(Self {
            base_url,
            http_client,
            download_client,
            read_timeout: Duration::from_secs(config.read_timeout),
            session: Arc::new(RwLock::new(None)),
        })
    }

    /// 基础 URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 获取清单 API
    pub fn inventory(&self) -> InventoryApi<'_> {
        InventoryApi::new(self)
    }

    /// 获取虚拟机 API
    pub fn vm(&self) -> VmApi<'_> {
        VmApi::new(self)
    }

    /// 获取客户机 API
    pub fn guest(&self) -> GuestApi<'_> {
        GuestApi::new(self)
    }

    /// 获取任务 API
    pub fn task(&self) -> TaskApi<'_> {
        TaskApi::new(self)
    }

    /// 获取快照 API
    pub fn snapshot(&self) -> SnapshotApi<'_> {
        SnapshotApi::new(self)
    }

    /// 获取内容库 API
    pub fn library(&self) -> LibraryApi<'_> {
        LibraryApi::new(self)
    }

    /// 获取可移动设备 API
    pub fn device(&self) -> DeviceApi<'_> {
        DeviceApi::new(self)
    }

    /// 建立会话
    pub async fn create_session(&self, username: &str, password: &str) -> Result<()> {
        info!("vCenter 登录: {} @ {}", username, self.base_url);

        let response = self
            .http_client
            .post(format!("{}/api/session", self.base_url))
            .basic_auth(username, Some(password))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(DriverError::AuthError(format!(
                "vCenter 登录失败: 用户 {} 认证被拒绝",
                username
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DriverError::ApiError(status.as_u16(), text));
        }

        let token: String = response
            .json()
            .await
            .map_err(|e| DriverError::ParseError(e.to_string()))?;

        *self.session.write().await = Some(token);

        info!("vCenter 登录成功");
        Ok(())
    }

    /// 删除会话
    pub async fn delete_session(&self) -> Result<()> {
        let token = self.session.write().await.take();
        if let Some(token) = token {
            info!("vCenter 登出");
            let response = self
                .http_client
                .delete(format!("{}/api/session", self.base_url))
                .header(SESSION_HEADER, token)
                .send()
                .await
                .map_err(map_transport_error)?;

            if !response.status().is_success() {
                warn!("登出请求失败: {}", response.status());
            }
        }
        Ok(())
    }

    pub(crate) async fn has_session(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// 发送请求并返回原始响应
    async fn send<T: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<T>,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!("vCenter API 请求: {} {}", method, url);

        let token = self.session.read().await;
        let token_str = token
            .as_ref()
            .ok_or_else(|| DriverError::AuthError("未认证，请先登录".to_string()))?;

        let mut request = self
            .http_client
            .request(method, &url)
            .header(SESSION_HEADER, token_str);

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(map_transport_error)?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(DriverError::NotFound(path.to_string()));
        }
        if status.as_u16() == 401 {
            return Err(DriverError::AuthError("会话已失效".to_string()));
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "无法读取错误响应".to_string());
            warn!("API 请求失败: {} - {}", status, error_text);
            return Err(DriverError::ApiError(status.as_u16(), error_text));
        }

        Ok(response)
    }

    /// 发送请求并解析 JSON 响应
    pub(crate) async fn request<T: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<T>,
    ) -> Result<R> {
        let response = self.send(method, path, body).await?;
        response
            .json::<R>()
            .await
            .map_err(|e| DriverError::ParseError(e.to_string()))
    }

    /// 发送请求并忽略响应体
    pub(crate) async fn execute<T: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<T>,
    ) -> Result<()> {
        self.send(method, path, body).await?;
        Ok(())
    }

    /// 以流方式下载文件
    pub(crate) async fn download_to(&self, url: &str, dest: &Path) -> Result<u64> {
        let token = self.session.read().await.clone();
        let mut request = self.download_client.get(url);
        if let Some(token) = token {
            request = request.header(SESSION_HEADER, token);
        }

        let mut response = within_idle(self.read_timeout, url, request.send())
            .await?
            .map_err(map_transport_error)?;
        if !response.status().is_success() {
            return Err(DriverError::ApiError(
                response.status().as_u16(),
                format!("下载失败: {}", url),
            ));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = within_idle(self.read_timeout, url, response.chunk())
            .await?
            .map_err(|e| DriverError::HttpError(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

/// 等待下载的下一步进展，超过空闲时间视为连接中断
async fn within_idle<T>(idle: Duration, url: &str, next: impl Future<Output = T>) -> Result<T> {
    tokio::time::timeout(idle, next)
        .await
        .map_err(|_| DriverError::HttpError(format!("下载 {} 超过 {:?} 未收到数据", url, idle)))
}

/// 规范化服务器地址
fn normalize_server(server: &str) -> Result<String> {
    let raw = if server.contains("://") {
        server.to_string()
    } else {
        format!("https://{}", server)
    };

    let url = url::Url::parse(&raw)
        .map_err(|e| DriverError::ConfigError(format!("无效的 vCenter 地址 {}: {}", server, e)))?;

    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// 将传输层错误归类，证书问题单独区分
fn map_transport_error(e: reqwest::Error) -> DriverError {
    let text = e.to_string();
    let lower = text.to_lowercase();
    if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
        DriverError::CertificateError(text)
    } else {
        DriverError::HttpError(text)
    }
}

/// REST 客户端工厂
#[derive(Debug, Clone, Default)]
pub struct VsphereClientFactory {
    pub config: ClientConfig,
}

impl DriverFactory for VsphereClientFactory {
    fn new_session(&self, endpoint: &Endpoint) -> Result<Arc<dyn Driver>> {
        let config = ClientConfig {
            verify_ssl: !endpoint.insecure,
            ..self.config.clone()
        };
        Ok(Arc::new(VsphereClient::new(&endpoint.server, config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = VsphereClient::new("vcenter.local", ClientConfig::default());
        assert!(client.is_ok());
        assert_eq!(client.unwrap().base_url(), "https://vcenter.local");
    }

    #[test]
    fn test_normalize_keeps_scheme() {
        assert_eq!(
            normalize_server("http://10.0.0.5:8080/").unwrap(),
            "http://10.0.0.5:8080"
        );
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(matches!(
            normalize_server("https://"),
            Err(DriverError::ConfigError(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_idle_timeout() {
        let idle = Duration::from_secs(120);

        let ready = within_idle(idle, "https://esx/disk-0.vmdk", async { 42 }).await;
        assert_eq!(ready.unwrap(), 42);

        // 空闲时间内有进展即可
        let slow = within_idle(idle, "https://esx/disk-0.vmdk", async {
            tokio::time::sleep(Duration::from_secs(119)).await;
            7
        })
        .await;
        assert_eq!(slow.unwrap(), 7);

        let stalled =
            within_idle(idle, "https://esx/disk-0.vmdk", std::future::pending::<()>()).await;
        assert!(matches!(stalled, Err(DriverError::HttpError(msg)) if msg.contains("disk-0.vmdk")));
    }

    #[test]
    fn test_default_read_timeout() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout, 60);
        assert_eq!(config.read_timeout, 120);
    }

    #[tokio::test]
    async fn test_request_without_session() {
        let client = VsphereClient::new("vcenter.local", ClientConfig::default()).unwrap();
        let result: Result<serde_json::Value> =
            client.request(Method::GET, "/api/vcenter/vm", None::<()>).await;
        assert!(matches!(result, Err(DriverError::AuthError(_))));
    }
}
