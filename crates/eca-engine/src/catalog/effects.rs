//! 内置动作效果
//!
//! 动作参数均为绑定名，执行时从绑定表取值。

use super::{ActionContext, Arity, Catalog, Effect, as_text};
use tracing::info;

pub(super) fn register_builtin(catalog: &mut Catalog) {
    catalog
        .register_effect("log", Log)
        .register_effect("set_node", SetNode)
        .register_effect("delete_node", DeleteNode)
        .register_effect("copy_node", CopyNode);
}

/// 以 `name=value` 形式输出绑定，缺失的绑定输出 `<unbound>`
pub struct Log;

impl Log {
    pub fn render(params: &[String], ctx: &ActionContext<'_>) -> String {
        params
            .iter()
            .map(|name| match ctx.bindings.get(name) {
                Some(value) => format!("{}={}", name, as_text(value)),
                None => format!("{}=<unbound>", name),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Effect for Log {
    fn execute(&self, params: &[String], ctx: &ActionContext<'_>) -> Result<(), String> {
        info!(rule_id = %ctx.rule_id, "{}", Self::render(params, ctx));
        Ok(())
    }
}

/// `set_node(path, content)`：创建或更新节点
pub struct SetNode;

impl Effect for SetNode {
    fn arity(&self) -> Arity {
        Arity::Exact(2)
    }

    fn execute(&self, params: &[String], ctx: &ActionContext<'_>) -> Result<(), String> {
        let path = ctx.binding_text(&params[0])?;
        let content = ctx.binding_text(&params[1])?;
        ctx.store.write(&path, &content).map_err(|e| e.to_string())
    }
}

/// `delete_node(path)`：节点不存在时视为成功
pub struct DeleteNode;

impl Effect for DeleteNode {
    fn arity(&self) -> Arity {
        Arity::Exact(1)
    }

    fn execute(&self, params: &[String], ctx: &ActionContext<'_>) -> Result<(), String> {
        let path = ctx.binding_text(&params[0])?;
        ctx.store.delete(&path).map(|_| ()).map_err(|e| e.to_string())
    }
}

/// `copy_node(from, to)`：复制节点内容
pub struct CopyNode;

impl Effect for CopyNode {
    fn arity(&self) -> Arity {
        Arity::Exact(2)
    }

    fn execute(&self, params: &[String], ctx: &ActionContext<'_>) -> Result<(), String> {
        let from = ctx.binding_text(&params[0])?;
        let to = ctx.binding_text(&params[1])?;

        let node = ctx
            .store
            .read(&from)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("源节点不存在: {}", from))?;

        ctx.store
            .write(&to, &as_text(&node.data.to_value()))
            .map_err(|e| e.to_string())
    }
}
