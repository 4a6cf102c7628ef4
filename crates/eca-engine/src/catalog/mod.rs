//! 能力目录
//!
//! 函数、谓词、效果三类可插拔能力，按类型标签注册。规则解析时一次性解析标签，
//! 未知标签在解析阶段即失败。

pub mod effects;
pub mod functions;
pub mod predicates;

use crate::models::{Bindings, Node};
use crate::store::NodeStore;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use predicates::Comparison;

/// 参数个数约束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Range(usize, usize),
    Any,
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Self::Exact(n) => count == n,
            Self::AtLeast(n) => count >= n,
            Self::Range(min, max) => count >= min && count <= max,
            Self::Any => true,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(n) => write!(f, "{}", n),
            Self::AtLeast(n) => write!(f, "至少 {}", n),
            Self::Range(min, max) => write!(f, "{}~{}", min, max),
            Self::Any => write!(f, "任意"),
        }
    }
}

/// 表达式求值上下文：节点存储 + 触发节点
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub store: &'a dyn NodeStore,
    pub node: &'a Node,
}

/// 动作执行上下文：节点存储 + 本次分发的绑定表
#[derive(Clone, Copy)]
pub struct ActionContext<'a> {
    pub rule_id: &'a str,
    pub store: &'a dyn NodeStore,
    pub bindings: &'a Bindings,
}

impl ActionContext<'_> {
    /// 按名称获取绑定值
    pub fn binding(&self, name: &str) -> Result<&Value, String> {
        self.bindings
            .get(name)
            .ok_or_else(|| format!("绑定不存在: {}", name))
    }

    /// 按名称获取绑定值的文本形式
    pub fn binding_text(&self, name: &str) -> Result<String, String> {
        self.binding(name).map(as_text)
    }
}

/// 求值函数
pub trait Function: Send + Sync {
    fn arity(&self) -> Arity {
        Arity::Any
    }

    fn call(&self, args: &[Value], ctx: &EvalContext<'_>) -> Result<Value, String>;
}

/// 条件谓词，左右参数已从绑定表取出
pub trait Predicate: Send + Sync {
    fn test(&self, left: &Value, right: &Value) -> Result<bool, String>;
}

/// 动作效果，参数为绑定名
pub trait Effect: Send + Sync {
    fn arity(&self) -> Arity {
        Arity::Any
    }

    fn execute(&self, params: &[String], ctx: &ActionContext<'_>) -> Result<(), String>;
}

/// 能力目录
#[derive(Clone, Default)]
pub struct Catalog {
    functions: HashMap<String, Arc<dyn Function>>,
    predicates: HashMap<String, Arc<dyn Predicate>>,
    effects: HashMap<String, Arc<dyn Effect>>,
}

impl Catalog {
    /// 创建空目录
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建包含内置能力的目录
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        functions::register_builtin(&mut catalog);
        predicates::register_builtin(&mut catalog);
        effects::register_builtin(&mut catalog);
        catalog
    }

    pub fn register_function(
        &mut self,
        name: impl Into<String>,
        function: impl Function + 'static,
    ) -> &mut Self {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    pub fn register_predicate(
        &mut self,
        name: impl Into<String>,
        predicate: impl Predicate + 'static,
    ) -> &mut Self {
        self.predicates.insert(name.into(), Arc::new(predicate));
        self
    }

    pub fn register_effect(
        &mut self,
        name: impl Into<String>,
        effect: impl Effect + 'static,
    ) -> &mut Self {
        self.effects.insert(name.into(), Arc::new(effect));
        self
    }

    pub fn function(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.functions.get(name).cloned()
    }

    pub fn predicate(&self, name: &str) -> Option<Arc<dyn Predicate>> {
        self.predicates.get(name).cloned()
    }

    pub fn effect(&self, name: &str) -> Option<Arc<dyn Effect>> {
        self.effects.get(name).cloned()
    }

    /// 已注册的全部标签（排序后），用于日志与诊断
    pub fn tags(&self) -> CatalogTags {
        let sorted = |keys: Vec<&String>| {
            let mut keys: Vec<String> = keys.into_iter().cloned().collect();
            keys.sort();
            keys
        };

        CatalogTags {
            functions: sorted(self.functions.keys().collect()),
            predicates: sorted(self.predicates.keys().collect()),
            effects: sorted(self.effects.keys().collect()),
        }
    }
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags = self.tags();
        f.debug_struct("Catalog")
            .field("functions", &tags.functions)
            .field("predicates", &tags.predicates)
            .field("effects", &tags.effects)
            .finish()
    }
}

/// 目录中的标签清单
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTags {
    pub functions: Vec<String>,
    pub predicates: Vec<String>,
    pub effects: Vec<String>,
}

/// 值的文本形式：字符串原样返回，null 为空串，其余按 JSON 输出
pub fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
