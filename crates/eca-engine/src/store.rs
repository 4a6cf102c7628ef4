//! 节点存储边界
//!
//! 协调服务客户端（会话、watch 重注册、网络重试）位于引擎之外，引擎只依赖
//! [`NodeStore`] 与 [`NodeListener`] 两个接口。

use crate::models::{ChangeKind, Node, NodeType};
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// 节点存储错误
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("无效的路径模式 '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("无效的节点路径: {0}")]
    InvalidPath(String),

    #[error("节点不存在: {0}")]
    NodeNotFound(String),

    #[error("节点 '{path}' 解码失败: {reason}")]
    Decode { path: String, reason: String },

    #[error("节点存储不可用: {0}")]
    Unavailable(String),
}

/// 监听器注册句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(pub u64);

impl fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// 节点变更回调
///
/// 节点存储在自己的线程上调用回调，不同回调可能并发执行。
pub trait NodeListener: Send + Sync {
    fn on_created(&self, node: &Node);
    fn on_updated(&self, node: &Node);
    fn on_deleted(&self, node: &Node);
}

/// 按变更类型分派到对应回调
pub fn notify_listener(listener: &dyn NodeListener, kind: ChangeKind, node: &Node) {
    match kind {
        ChangeKind::Created => listener.on_created(node),
        ChangeKind::Updated => listener.on_updated(node),
        ChangeKind::Deleted => listener.on_deleted(node),
    }
}

/// 层级协调存储
#[cfg_attr(test, mockall::automock)]
pub trait NodeStore: Send + Sync {
    /// 按路径模式注册监听器，节点数据按 `node_type` 解码后投递
    fn add_listener(
        &self,
        pattern: &str,
        node_type: NodeType,
        listener: Arc<dyn NodeListener>,
    ) -> Result<ListenerHandle, StoreError>;

    fn remove_listener(&self, pattern: &str, handle: ListenerHandle) -> Result<(), StoreError>;

    /// 开始投递变更通知，可重复调用
    fn start_listening(&self) -> Result<(), StoreError>;

    fn read(&self, path: &str) -> Result<Option<Node>, StoreError>;

    /// 直接子节点路径（排序）
    fn children(&self, path: &str) -> Result<Vec<String>, StoreError>;

    /// 创建或更新节点
    fn write(&self, path: &str, content: &str) -> Result<(), StoreError>;

    /// 删除节点，返回节点此前是否存在
    fn delete(&self, path: &str) -> Result<bool, StoreError>;
}

/// 路径匹配模式
///
/// `*` 匹配单个路径段内的任意字符，`**` 匹配任意深度，`?` 匹配单个字符。
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    regex: Regex,
}

impl PathPattern {
    pub fn compile(pattern: &str) -> Result<Self, StoreError> {
        if pattern.is_empty() {
            return Err(StoreError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "模式不能为空".to_string(),
            });
        }

        let segments: Vec<String> = pattern
            .split('/')
            .map(|segment| {
                if segment == "**" {
                    return ".*".to_string();
                }
                let mut out = String::new();
                for ch in segment.chars() {
                    match ch {
                        '*' => out.push_str("[^/]*"),
                        '?' => out.push_str("[^/]"),
                        other => out.push_str(&regex::escape(&other.to_string())),
                    }
                }
                out
            })
            .collect();

        let regex = Regex::new(&format!("^{}$", segments.join("/"))).map_err(|e| {
            StoreError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}
