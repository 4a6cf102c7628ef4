//! ECA 规则领域模型
//!
//! 规则由事件、绑定、条件、动作四部分组成。函数、谓词、效果在构造时即从
//! [`Catalog`] 解析为具体能力，分发时不再按字符串查找。

use crate::catalog::{Catalog, Effect, Function, Predicate};
use crate::error::{EcaError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// 单次分发计算出的绑定表
pub type Bindings = HashMap<String, Value>;

/// 规则定义
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: String,
    pub event: Event,
    pub bindings: Vec<Binding>,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
}

impl Rule {
    pub fn new(id: impl Into<String>, event: Event) -> Self {
        Self {
            id: id.into(),
            event,
            bindings: Vec::new(),
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// 生成人类可读的规则描述
    pub fn describe(&self) -> String {
        let mut out = format!("rule {}\n", self.id);
        out.push_str(&format!(
            "  on {} {} ({})\n",
            self.event.event_type, self.event.pattern, self.event.node_type
        ));
        for binding in &self.bindings {
            out.push_str(&format!("  bind {} = {}", binding.name, binding.expression));
            if binding.strict {
                out.push_str(" [strict]");
            }
            out.push('\n');
        }
        for condition in &self.conditions {
            out.push_str(&format!("  when {}\n", condition));
        }
        for action in &self.actions {
            out.push_str(&format!("  then {}\n", action));
        }
        out
    }
}

/// 触发事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_type: EventType,
    /// 路径匹配模式，如 `/jobs/*`
    pub pattern: String,
    /// 节点负载格式，节点存储按此格式解码后再投递
    pub node_type: NodeType,
}

impl Event {
    pub fn new(event_type: EventType, pattern: impl Into<String>) -> Self {
        Self {
            event_type,
            pattern: pattern.into(),
            node_type: NodeType::default(),
        }
    }

    pub fn with_node_type(mut self, node_type: NodeType) -> Self {
        self.node_type = node_type;
        self
    }
}

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Created,
    Updated,
    CreatedOrUpdated,
    Deleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::CreatedOrUpdated => "created_or_updated",
            Self::Deleted => "deleted",
        }
    }

    /// 该事件类型是否响应给定的节点变更
    pub fn accepts(&self, kind: ChangeKind) -> bool {
        matches!(
            (self, kind),
            (Self::Created | Self::CreatedOrUpdated, ChangeKind::Created)
                | (Self::Updated | Self::CreatedOrUpdated, ChangeKind::Updated)
                | (Self::Deleted, ChangeKind::Deleted)
        )
    }
}

impl FromStr for EventType {
    type Err = EcaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" | "nodeCreated" => Ok(Self::Created),
            "updated" | "nodeUpdated" => Ok(Self::Updated),
            "created_or_updated" | "nodeCreatedUpdated" => Ok(Self::CreatedOrUpdated),
            "deleted" | "nodeDeleted" => Ok(Self::Deleted),
            other => Err(EcaError::Parse(format!("不支持的事件类型: '{}'", other))),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 节点变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// 节点负载格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeType {
    #[default]
    Text,
    Json,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }

    /// 将原始内容解码为该格式的节点数据
    pub fn decode(&self, raw: &str) -> std::result::Result<NodeData, String> {
        match self {
            Self::Text => Ok(NodeData::Text(raw.to_string())),
            Self::Json => serde_json::from_str(raw)
                .map(NodeData::Json)
                .map_err(|e| e.to_string()),
        }
    }
}

impl FromStr for NodeType {
    type Err = EcaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" | "string" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(EcaError::Parse(format!("不支持的节点类型: '{}'", other))),
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 节点数据（已按 [`NodeType`] 解码）
#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Text(String),
    Json(Value),
}

impl NodeData {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Json(v) => v.clone(),
        }
    }
}

/// 协调存储中的节点
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub path: String,
    pub data: NodeData,
    pub version: u64,
}

impl Node {
    pub fn new(path: impl Into<String>, data: NodeData) -> Self {
        Self {
            path: path.into(),
            data,
            version: 0,
        }
    }

    pub fn text(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(path, NodeData::Text(content.into()))
    }

    /// 路径最后一段
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    /// 父节点路径，根节点的父路径为 `/`
    pub fn parent_path(&self) -> &str {
        match self.path.rfind('/') {
            Some(0) | None => "/",
            Some(idx) => &self.path[..idx],
        }
    }
}

/// 命名绑定
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub expression: Expression,
    /// 严格绑定求值失败时中止整个分发
    pub strict: bool,
}

impl Binding {
    pub fn new(name: impl Into<String>, expression: Expression) -> Self {
        Self {
            name: name.into(),
            expression,
            strict: false,
        }
    }

    pub fn literal(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, Expression::literal(text))
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

/// 函数组合表达式树
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(String),
    Call(FunctionCall),
}

impl Expression {
    pub fn literal(text: impl Into<String>) -> Self {
        Self::Literal(text.into())
    }

    /// 从目录解析函数并构造调用节点，未知函数或参数个数不符时返回解析错误
    pub fn call(catalog: &Catalog, name: &str, args: Vec<Expression>) -> Result<Self> {
        let function = catalog
            .function(name)
            .ok_or_else(|| EcaError::Parse(format!("未知函数类型: '{}'", name)))?;

        let arity = function.arity();
        if !arity.accepts(args.len()) {
            return Err(EcaError::Parse(format!(
                "函数 '{}' 需要 {} 个参数，实际 {} 个",
                name,
                arity,
                args.len()
            )));
        }

        Ok(Self::Call(FunctionCall {
            name: name.to_string(),
            function,
            args,
        }))
    }

    /// 表达式树深度，字面量为 1
    pub fn depth(&self) -> usize {
        match self {
            Self::Literal(_) => 1,
            Self::Call(call) => 1 + call.args.iter().map(Self::depth).max().unwrap_or(0),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(text) => write!(f, "{:?}", text),
            Self::Call(call) => {
                write!(f, "{}(", call.name)?;
                for (i, arg) in call.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// 函数调用节点
#[derive(Clone)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<Expression>,
    function: Arc<dyn Function>,
}

impl FunctionCall {
    pub fn function(&self) -> &dyn Function {
        self.function.as_ref()
    }
}

impl fmt::Debug for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionCall")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish()
    }
}

impl PartialEq for FunctionCall {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.args == other.args
    }
}

/// 条件：对两个绑定名应用谓词
#[derive(Clone)]
pub struct Condition {
    pub kind: String,
    pub left: String,
    pub right: String,
    predicate: Arc<dyn Predicate>,
}

impl Condition {
    pub fn new(
        catalog: &Catalog,
        kind: &str,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Result<Self> {
        let predicate = catalog
            .predicate(kind)
            .ok_or_else(|| EcaError::Parse(format!("未知条件类型: '{}'", kind)))?;

        Ok(Self {
            kind: kind.to_string(),
            left: left.into(),
            right: right.into(),
            predicate,
        })
    }

    pub fn predicate(&self) -> &dyn Predicate {
        self.predicate.as_ref()
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("kind", &self.kind)
            .field("left", &self.left)
            .field("right", &self.right)
            .finish()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, {})", self.kind, self.left, self.right)
    }
}

impl PartialEq for Condition {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.left == other.left && self.right == other.right
    }
}

/// 动作：带有序参数的效果
#[derive(Clone)]
pub struct Action {
    pub kind: String,
    pub params: Vec<String>,
    effect: Arc<dyn Effect>,
}

impl Action {
    pub fn new(catalog: &Catalog, kind: &str, params: Vec<String>) -> Result<Self> {
        let effect = catalog
            .effect(kind)
            .ok_or_else(|| EcaError::Parse(format!("未知动作类型: '{}'", kind)))?;

        let arity = effect.arity();
        if !arity.accepts(params.len()) {
            return Err(EcaError::Parse(format!(
                "动作 '{}' 需要 {} 个参数，实际 {} 个",
                kind,
                arity,
                params.len()
            )));
        }

        Ok(Self {
            kind: kind.to_string(),
            params,
            effect,
        })
    }

    pub fn effect(&self) -> &dyn Effect {
        self.effect.as_ref()
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("kind", &self.kind)
            .field("params", &self.params)
            .finish()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.params.join(", "))
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.params == other.params
    }
}
