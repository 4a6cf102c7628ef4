//! ECA 规则引擎
//!
//! 监听层级协调存储中的节点变更，按事件-条件-动作规则做出响应：
//! - JSON 规则文档解析与序列化
//! - 规则注册表（添加、替换、移除、原子重载）
//! - 函数组合表达式求值
//! - 绑定 → 条件 → 动作的分发流水线
//! - 可插拔的函数、谓词、动作目录

pub mod catalog;
pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod evaluator;
pub mod memory;
pub mod models;
pub mod registry;
pub mod store;

pub use catalog::{ActionContext, Arity, Catalog, EvalContext, Effect, Function, Predicate};
pub use codec::RuleCodec;
pub use dispatcher::{DispatchReport, DispatchSettings, Dispatcher};
pub use error::{EcaError, Result};
pub use evaluator::ExpressionEvaluator;
pub use memory::MemoryNodeStore;
pub use models::{
    Action, Binding, Bindings, ChangeKind, Condition, Event, EventType, Expression, Node,
    NodeData, NodeType, Rule,
};
pub use registry::RuleRegistry;
pub use store::{ListenerHandle, NodeListener, NodeStore, PathPattern, StoreError};
