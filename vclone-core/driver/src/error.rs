//! 驱动层错误定义

use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("HTTP 错误: {0}")]
    HttpError(String),

    #[error("认证错误: {0}")]
    AuthError(String),

    #[error("证书校验失败: {0}")]
    CertificateError(String),

    #[error("API 错误 [{0}]: {1}")]
    ApiError(u16, String),

    #[error("解析错误: {0}")]
    ParseError(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("资源不存在: {0}")]
    NotFound(String),

    #[error("操作失败: {0}")]
    OperationFailed(String),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),
}

impl DriverError {
    /// 是否属于会话/连接层面的失败（认证、网络、证书）
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::HttpError(_) | Self::AuthError(_) | Self::CertificateError(_)
        )
    }
}

/// 驱动层结果类型
pub type Result<T> = std::result::Result<T, DriverError>;
