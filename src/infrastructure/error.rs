use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 资源层错误类型
///
/// 所有公开操作要么返回值，要么返回这里的某个变体；协作方（工厂、执行器、
/// 命令运行器）返回的 `anyhow::Error` 都在组件边界被转换成这里的类型。
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResourceError {
    #[error("acquire timed out after {timeout_ms}ms ({waiting} callers waiting)")]
    AcquireTimeout { timeout_ms: u64, waiting: usize },

    #[error("connection {connection_id} failed validation: {message}")]
    ResourceInvalid { connection_id: u64, message: String },

    #[error("failed to create connection: {message}")]
    ConnectionFailed { message: String },

    #[error("batch of {batch_size} items failed: {message}")]
    BatchExecutionFailed { batch_size: usize, message: String },

    #[error("item {item_id} rejected after {attempts} retries: {last_error}")]
    RetriesExhausted {
        item_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("connection pool is shutting down")]
    PoolShuttingDown,

    #[error("batch processor is shutting down")]
    ProcessorShuttingDown,

    #[error("invalid configuration: {message}")]
    Validation { message: String, field: Option<String> },

    #[error("cache codec error for key {key}: {message}")]
    CacheCodec { key: String, message: String },

    #[error("command {operation} failed: {message}")]
    CommandFailed { operation: String, message: String },
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Capacity,
    Resource,
    Execution,
    Lifecycle,
    Configuration,
    Data,
}

impl ResourceError {
    /// 检查调用方是否值得重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResourceError::AcquireTimeout { .. }
                | ResourceError::ConnectionFailed { .. }
                | ResourceError::BatchExecutionFailed { .. }
                | ResourceError::ResourceInvalid { .. }
        )
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            ResourceError::AcquireTimeout { .. } => ErrorCategory::Capacity,
            ResourceError::ResourceInvalid { .. } | ResourceError::ConnectionFailed { .. } => {
                ErrorCategory::Resource
            }
            ResourceError::BatchExecutionFailed { .. }
            | ResourceError::RetriesExhausted { .. }
            | ResourceError::CommandFailed { .. } => ErrorCategory::Execution,
            ResourceError::PoolShuttingDown | ResourceError::ProcessorShuttingDown => {
                ErrorCategory::Lifecycle
            }
            ResourceError::Validation { .. } => ErrorCategory::Configuration,
            ResourceError::CacheCodec { .. } => ErrorCategory::Data,
        }
    }

    /// 创建配置错误
    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        ResourceError::Validation {
            message: message.into(),
            field: field.map(str::to_string),
        }
    }

    /// 创建批处理失败错误
    pub fn batch_failed(batch_size: usize, message: impl Into<String>) -> Self {
        ResourceError::BatchExecutionFailed {
            batch_size,
            message: message.into(),
        }
    }

    /// 创建命令失败错误
    pub fn command_failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        ResourceError::CommandFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Shorthand used across the public API.
pub type ResourceResult<T> = Result<T, ResourceError>;

// 实现从常见错误类型的转换
impl From<toml::de::Error> for ResourceError {
    fn from(error: toml::de::Error) -> Self {
        ResourceError::validation(format!("TOML parse error: {}", error), None)
    }
}

impl From<serde_yaml::Error> for ResourceError {
    fn from(error: serde_yaml::Error) -> Self {
        ResourceError::validation(format!("YAML parse error: {}", error), None)
    }
}

impl From<serde_json::Error> for ResourceError {
    fn from(error: serde_json::Error) -> Self {
        ResourceError::validation(format!("JSON parse error: {}", error), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let timeout = ResourceError::AcquireTimeout {
            timeout_ms: 100,
            waiting: 2,
        };
        assert_eq!(timeout.category(), ErrorCategory::Capacity);
        assert!(timeout.is_retryable());

        assert_eq!(
            ResourceError::PoolShuttingDown.category(),
            ErrorCategory::Lifecycle
        );
        assert!(!ResourceError::ProcessorShuttingDown.is_retryable());

        let exhausted = ResourceError::RetriesExhausted {
            item_id: "a".to_string(),
            attempts: 3,
            last_error: "boom".to_string(),
        };
        assert!(!exhausted.is_retryable());
        assert_eq!(exhausted.category(), ErrorCategory::Execution);
    }

    #[test]
    fn test_error_display() {
        let err = ResourceError::validation("maxEntries must be positive", Some("cache.maxEntries"));
        assert_eq!(
            err.to_string(),
            "invalid configuration: maxEntries must be positive"
        );

        let err = ResourceError::RetriesExhausted {
            item_id: "item-1".to_string(),
            attempts: 2,
            last_error: "executor down".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "item item-1 rejected after 2 retries: executor down"
        );
    }
}
