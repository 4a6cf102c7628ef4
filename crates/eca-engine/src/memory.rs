//! 内存节点存储
//!
//! 不依赖外部协调服务的 [`NodeStore`] 实现，用于单机运行与测试。
//! 变更通知在写入线程上同步投递，投递时不持有任何存储锁，
//! 因此动作可以在回调中再次写入存储。

use crate::models::{ChangeKind, Node, NodeData, NodeType};
use crate::store::{
    ListenerHandle, NodeListener, NodeStore, PathPattern, StoreError, notify_listener,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct StoredNode {
    content: String,
    version: u64,
}

#[derive(Clone)]
struct ListenerEntry {
    handle: ListenerHandle,
    pattern: PathPattern,
    node_type: NodeType,
    listener: Arc<dyn NodeListener>,
}

/// 内存节点存储
pub struct MemoryNodeStore {
    nodes: DashMap<String, StoredNode>,
    listeners: RwLock<Vec<ListenerEntry>>,
    next_handle: AtomicU64,
    listening: AtomicBool,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            next_handle: AtomicU64::new(1),
            listening: AtomicBool::new(false),
        }
    }

    /// 是否已开始投递通知
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// 已注册的监听器总数
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// 指定模式下注册的监听器数量
    pub fn listener_count_for(&self, pattern: &str) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|entry| entry.pattern.as_str() == pattern)
            .count()
    }

    /// 节点总数
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn validate_path(path: &str) -> Result<(), StoreError> {
        if !path.starts_with('/') || (path.len() > 1 && path.ends_with('/')) {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(())
    }

    /// 向匹配的监听器投递变更
    fn notify(&self, kind: ChangeKind, path: &str, content: &str, version: u64) {
        if !self.is_listening() {
            debug!(path = %path, kind = %kind, "通知投递尚未启动，忽略变更");
            return;
        }

        // 先复制匹配的监听器快照，回调期间不持有锁
        let targets: Vec<ListenerEntry> = self
            .listeners
            .read()
            .iter()
            .filter(|entry| entry.pattern.matches(path))
            .cloned()
            .collect();

        for entry in targets {
            let data = match entry.node_type.decode(content) {
                Ok(data) => data,
                Err(reason) => {
                    warn!(
                        path = %path,
                        listener = %entry.handle,
                        node_type = %entry.node_type,
                        error = %reason,
                        "节点数据解码失败，跳过该监听器"
                    );
                    continue;
                }
            };

            let node = Node {
                path: path.to_string(),
                data,
                version,
            };
            notify_listener(entry.listener.as_ref(), kind, &node);
        }
    }
}

impl Default for MemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore for MemoryNodeStore {
    fn add_listener(
        &self,
        pattern: &str,
        node_type: NodeType,
        listener: Arc<dyn NodeListener>,
    ) -> Result<ListenerHandle, StoreError> {
        let compiled = PathPattern::compile(pattern)?;
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));

        self.listeners.write().push(ListenerEntry {
            handle,
            pattern: compiled,
            node_type,
            listener,
        });

        debug!(pattern = %pattern, listener = %handle, "监听器已注册");
        Ok(handle)
    }

    fn remove_listener(&self, pattern: &str, handle: ListenerHandle) -> Result<(), StoreError> {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|entry| !(entry.handle == handle && entry.pattern.as_str() == pattern));

        if listeners.len() == before {
            debug!(pattern = %pattern, listener = %handle, "监听器不存在，忽略注销");
        } else {
            debug!(pattern = %pattern, listener = %handle, "监听器已注销");
        }
        Ok(())
    }

    fn start_listening(&self) -> Result<(), StoreError> {
        if !self.listening.swap(true, Ordering::AcqRel) {
            debug!("开始投递节点变更通知");
        }
        Ok(())
    }

    fn read(&self, path: &str) -> Result<Option<Node>, StoreError> {
        Ok(self.nodes.get(path).map(|stored| Node {
            path: path.to_string(),
            data: NodeData::Text(stored.content.clone()),
            version: stored.version,
        }))
    }

    fn children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        let prefix = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{}/", path)
        };

        let mut children: Vec<String> = self
            .nodes
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| {
                key.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .collect();
        children.sort();
        Ok(children)
    }

    fn write(&self, path: &str, content: &str) -> Result<(), StoreError> {
        Self::validate_path(path)?;

        let (kind, version) = match self.nodes.entry(path.to_string()) {
            Entry::Occupied(mut occupied) => {
                let stored = occupied.get_mut();
                stored.content = content.to_string();
                stored.version += 1;
                (ChangeKind::Updated, stored.version)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredNode {
                    content: content.to_string(),
                    version: 0,
                });
                (ChangeKind::Created, 0)
            }
        };

        self.notify(kind, path, content, version);
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<bool, StoreError> {
        match self.nodes.remove(path) {
            Some((_, stored)) => {
                self.notify(ChangeKind::Deleted, path, &stored.content, stored.version);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
