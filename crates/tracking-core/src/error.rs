//! 错误定义模块

use thiserror::Error;

/// 责任追踪系统统一错误类型
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("参与者解析失败: {0}")]
    Resolution(String),

    #[error("持久化错误: {0}")]
    Persistence(String),

    #[error("并发冲突: {0}")]
    Conflict(String),

    #[error("无效引用: {0}")]
    InvalidReference(String),

    #[error("无效规则表: {0}")]
    InvalidRuleTable(String),

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidStateTransition { from: String, event: String },

    #[error("解析错误: {0}")]
    Parse(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Config(String),
}

impl TrackingError {
    /// 是否为"未找到"类错误
    pub fn is_not_found(&self) -> bool {
        matches!(self, TrackingError::NotFound(_))
    }
}

/// 责任追踪系统统一结果类型
pub type Result<T> = std::result::Result<T, TrackingError>;
