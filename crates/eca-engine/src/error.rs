//! ECA 引擎错误类型

use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EcaError {
    #[error("规则解析失败: {0}")]
    Parse(String),

    #[error("表达式求值失败: {expression} - {reason}")]
    Evaluation { expression: String, reason: String },

    #[error("动作执行失败: {action} - {reason}")]
    Action { action: String, reason: String },

    #[error("节点存储错误: {0}")]
    Store(#[from] StoreError),

    #[error("JSON 序列化错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EcaError>;

impl EcaError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse(_) => "PARSE_ERROR",
            Self::Evaluation { .. } => "EVALUATION_FAILURE",
            Self::Action { .. } => "ACTION_FAILURE",
            Self::Store(_) => "STORE_FAILURE",
            Self::Json(_) => "JSON_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// 是否为解析错误
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse(_))
    }
}
