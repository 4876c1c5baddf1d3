//! RealmHost 错误处理系统
//!
//! 统一的错误类型和错误处理机制

use thiserror::Error;

/// 单个监听组的失败记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFailure {
    /// 监听组名称
    pub group: String,
    /// 失败原因
    pub reason: String,
}

impl GroupFailure {
    pub fn new(group: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for GroupFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.group, self.reason)
    }
}

fn join_failures(failures: &[GroupFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// 框架统一错误类型
#[derive(Error, Debug)]
pub enum RealmError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Plug-in '{identity}' is already registered for capability '{capability}'")]
    DuplicateIdentity { capability: String, identity: String },

    #[error("Plug-in '{identity}' not found for capability '{capability}'")]
    NotFound { capability: String, identity: String },

    #[error("Capability '{capability}' already holds the maximum of {limit} plug-ins")]
    RegistryFull { capability: String, limit: usize },

    #[error("Invalid configuration for plug-in '{identity}': {message}")]
    InvalidConfiguration { identity: String, message: String },

    #[error("Failed to start listener groups: {}", join_failures(.failed))]
    PartialStartFailure { failed: Vec<GroupFailure> },

    #[error("Failed to stop listener groups: {}", join_failures(.failed))]
    PartialStopFailure { failed: Vec<GroupFailure> },

    #[error("Operation '{operation}' was cancelled")]
    Cancelled { operation: String },

    #[error("A restart of container '{container}' is already in progress")]
    AlreadyRestarting { container: String },

    #[error("Restart fault: {message}")]
    RestartFault { message: String },

    #[error("Endpoint error: {message}")]
    Endpoint { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl RealmError {
    /// 创建配置相关错误
    pub fn config(message: &str) -> Self {
        Self::Config {
            message: message.to_string(),
        }
    }

    /// 创建端点相关错误
    pub fn endpoint(message: &str) -> Self {
        Self::Endpoint {
            message: message.to_string(),
        }
    }

    pub fn cancelled(operation: &str) -> Self {
        Self::Cancelled {
            operation: operation.to_string(),
        }
    }

    pub fn not_found(capability: &str, identity: &str) -> Self {
        Self::NotFound {
            capability: capability.to_string(),
            identity: identity.to_string(),
        }
    }

    /// 是否为取消导致的错误
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
