//! 统一错误类型模块
//!
//! 提供 magiclink 库中所有操作的错误类型定义。
//!
//! 错误分为两类处理策略：
//!
//! - **签发错误**（[`Error::InvalidUser`] 等）以结构化失败返回给管理端调用方，可重试
//! - **兑换错误**（[`Error::UnknownUser`]、[`Error::InvalidToken`]、
//!   [`Error::AlreadyAuthenticated`]）对当前请求是致命的
//! - **拒绝访问**（[`Error::Forbidden`]）由签发端点转换为 403 响应

use thiserror::Error;

use crate::user::UserId;

/// magiclink 库的统一结果类型
pub type Result<T> = std::result::Result<T, Error>;

/// magiclink 库的错误类型
#[derive(Debug, Error)]
pub enum Error {
    /// 签发时用户无法解析
    #[error("invalid user: {0}")]
    InvalidUser(String),

    /// 兑换目标用户不存在
    #[error("unknown user: {0}")]
    UnknownUser(UserId),

    /// 没有任何已存储的摘要与提交的 token 匹配
    #[error("invalid magic link token")]
    InvalidToken,

    /// 当前请求已持有有效会话
    #[error("already authenticated")]
    AlreadyAuthenticated,

    /// 兑换请求缺少参数，调用方应按普通请求继续处理
    #[error("missing magic link parameters")]
    MissingParameters,

    /// 防伪 nonce 或权限校验失败
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// 存储错误
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// 加密错误
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// 配置错误
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 内部错误
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 创建一个内部错误
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// 创建一个拒绝访问错误
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Error::Forbidden(msg.into())
    }
}

/// 存储相关错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// 序列化/反序列化失败
    #[error("serialization failed: {0}")]
    Serialization(String),
    /// 操作失败
    #[error("storage operation failed: {0}")]
    OperationFailed(String),
}

/// 加密相关错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// 随机数生成失败
    #[error("random number generation failed: {0}")]
    RngFailed(String),
    /// 密钥无效
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// 配置相关错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// 缺少必需的配置
    #[error("missing required configuration: {0}")]
    MissingRequired(String),
    /// 无效的配置值
    #[error("invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::InvalidToken.to_string(), "invalid magic link token");
        assert_eq!(
            Error::UnknownUser(UserId(999)).to_string(),
            "unknown user: 999"
        );
    }

    #[test]
    fn test_error_from_storage() {
        let err: Error = StorageError::OperationFailed("meta write".into()).into();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(
            err.to_string(),
            "storage error: storage operation failed: meta write"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            key: "secret".into(),
            message: "too short".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration value for 'secret': too short"
        );
    }

    #[test]
    fn test_forbidden_display() {
        assert_eq!(
            Error::forbidden("no active session").to_string(),
            "forbidden: no active session"
        );
    }
}
