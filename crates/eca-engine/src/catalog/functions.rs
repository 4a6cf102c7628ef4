//! 内置求值函数

use super::{Arity, Catalog, EvalContext, Function, as_text};
use crate::models::NodeData;
use regex::Regex;
use serde_json::Value;

pub(super) fn register_builtin(catalog: &mut Catalog) {
    catalog
        .register_function("node_path", NodePath)
        .register_function("node_name", NodeName)
        .register_function("parent_path", ParentPath)
        .register_function("path_segment", PathSegment)
        .register_function("node_data", NodeDataOf)
        .register_function("json_field", JsonField)
        .register_function("read_node", ReadNode)
        .register_function("concat", Concat)
        .register_function("upper", Upper)
        .register_function("lower", Lower)
        .register_function("replace", Replace)
        .register_function("regex_extract", RegexExtract);
}

/// 触发节点的完整路径
pub struct NodePath;

impl Function for NodePath {
    fn arity(&self) -> Arity {
        Arity::Exact(0)
    }

    fn call(&self, _args: &[Value], ctx: &EvalContext<'_>) -> Result<Value, String> {
        Ok(Value::String(ctx.node.path.clone()))
    }
}

/// 触发节点路径的最后一段
pub struct NodeName;

impl Function for NodeName {
    fn arity(&self) -> Arity {
        Arity::Exact(0)
    }

    fn call(&self, _args: &[Value], ctx: &EvalContext<'_>) -> Result<Value, String> {
        Ok(Value::String(ctx.node.name().to_string()))
    }
}

/// 触发节点的父路径
pub struct ParentPath;

impl Function for ParentPath {
    fn arity(&self) -> Arity {
        Arity::Exact(0)
    }

    fn call(&self, _args: &[Value], ctx: &EvalContext<'_>) -> Result<Value, String> {
        Ok(Value::String(ctx.node.parent_path().to_string()))
    }
}

/// 触发节点路径的第 N 段（从 0 开始，忽略开头的 `/`）
pub struct PathSegment;

impl Function for PathSegment {
    fn arity(&self) -> Arity {
        Arity::Exact(1)
    }

    fn call(&self, args: &[Value], ctx: &EvalContext<'_>) -> Result<Value, String> {
        let raw = as_text(&args[0]);
        let index: usize = raw
            .trim()
            .parse()
            .map_err(|_| format!("路径段索引无效: '{}'", raw))?;

        ctx.node
            .path
            .split('/')
            .filter(|s| !s.is_empty())
            .nth(index)
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(|| format!("路径 '{}' 没有第 {} 段", ctx.node.path, index))
    }
}

/// 触发节点的数据
pub struct NodeDataOf;

impl Function for NodeDataOf {
    fn arity(&self) -> Arity {
        Arity::Exact(0)
    }

    fn call(&self, _args: &[Value], ctx: &EvalContext<'_>) -> Result<Value, String> {
        Ok(ctx.node.data.to_value())
    }
}

/// 按 JSON Pointer（如 `/meta/size`）读取触发节点的 JSON 字段
pub struct JsonField;

impl Function for JsonField {
    fn arity(&self) -> Arity {
        Arity::Exact(1)
    }

    fn call(&self, args: &[Value], ctx: &EvalContext<'_>) -> Result<Value, String> {
        let pointer = as_text(&args[0]);
        let data = match &ctx.node.data {
            NodeData::Json(value) => value,
            NodeData::Text(_) => {
                return Err(format!("节点 '{}' 的数据不是 JSON", ctx.node.path));
            }
        };

        data.pointer(&pointer)
            .cloned()
            .ok_or_else(|| format!("字段不存在: {}", pointer))
    }
}

/// 从节点存储读取任意节点的内容
pub struct ReadNode;

impl Function for ReadNode {
    fn arity(&self) -> Arity {
        Arity::Exact(1)
    }

    fn call(&self, args: &[Value], ctx: &EvalContext<'_>) -> Result<Value, String> {
        let path = as_text(&args[0]);
        match ctx.store.read(&path) {
            Ok(Some(node)) => Ok(node.data.to_value()),
            Ok(None) => Err(format!("节点不存在: {}", path)),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// 拼接所有参数的文本形式
pub struct Concat;

impl Function for Concat {
    fn call(&self, args: &[Value], _ctx: &EvalContext<'_>) -> Result<Value, String> {
        Ok(Value::String(args.iter().map(as_text).collect()))
    }
}

pub struct Upper;

impl Function for Upper {
    fn arity(&self) -> Arity {
        Arity::Exact(1)
    }

    fn call(&self, args: &[Value], _ctx: &EvalContext<'_>) -> Result<Value, String> {
        Ok(Value::String(as_text(&args[0]).to_uppercase()))
    }
}

pub struct Lower;

impl Function for Lower {
    fn arity(&self) -> Arity {
        Arity::Exact(1)
    }

    fn call(&self, args: &[Value], _ctx: &EvalContext<'_>) -> Result<Value, String> {
        Ok(Value::String(as_text(&args[0]).to_lowercase()))
    }
}

/// `replace(input, from, to)`
pub struct Replace;

impl Function for Replace {
    fn arity(&self) -> Arity {
        Arity::Exact(3)
    }

    fn call(&self, args: &[Value], _ctx: &EvalContext<'_>) -> Result<Value, String> {
        let input = as_text(&args[0]);
        let from = as_text(&args[1]);
        let to = as_text(&args[2]);
        Ok(Value::String(input.replace(&from, &to)))
    }
}

/// `regex_extract(pattern, input[, group])`，默认取第 1 个捕获组，无捕获组时取整个匹配
pub struct RegexExtract;

impl Function for RegexExtract {
    fn arity(&self) -> Arity {
        Arity::Range(2, 3)
    }

    fn call(&self, args: &[Value], _ctx: &EvalContext<'_>) -> Result<Value, String> {
        let pattern = as_text(&args[0]);
        let input = as_text(&args[1]);

        // 编译正则表达式（生产环境应使用 LRU 缓存避免重复编译）
        let regex = Regex::new(&pattern)
            .map_err(|e| format!("无效的正则表达式 '{}': {}", pattern, e))?;

        let group = match args.get(2) {
            Some(raw) => {
                let raw = as_text(raw);
                raw.trim()
                    .parse::<usize>()
                    .map_err(|_| format!("捕获组索引无效: '{}'", raw))?
            }
            None if regex.captures_len() > 1 => 1,
            None => 0,
        };

        let captures = regex
            .captures(&input)
            .ok_or_else(|| format!("'{}' 不匹配 '{}'", input, pattern))?;

        captures
            .get(group)
            .map(|m| Value::String(m.as_str().to_string()))
            .ok_or_else(|| format!("捕获组 {} 不存在", group))
    }
}
