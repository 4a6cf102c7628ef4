//! 表达式求值器
//!
//! 对函数组合表达式树做深度优先求值：参数自左向右求值后再调用函数。
//! 任一子表达式失败即中止，错误携带最内层失败表达式的文本。

use crate::catalog::EvalContext;
use crate::error::{EcaError, Result};
use crate::models::Expression;
use serde_json::Value;

/// 表达式求值器
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    /// 求值表达式，字面量原样返回字符串
    pub fn evaluate(expression: &Expression, ctx: &EvalContext<'_>) -> Result<Value> {
        match expression {
            Expression::Literal(text) => Ok(Value::String(text.clone())),
            Expression::Call(call) => {
                let args = call
                    .args
                    .iter()
                    .map(|arg| Self::evaluate(arg, ctx))
                    .collect::<Result<Vec<_>>>()?;

                call.function()
                    .call(&args, ctx)
                    .map_err(|reason| EcaError::Evaluation {
                        expression: expression.to_string(),
                        reason,
                    })
            }
        }
    }
}
