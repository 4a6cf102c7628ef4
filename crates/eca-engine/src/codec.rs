//! 规则文档编解码
//!
//! 规则以 JSON 文档定义，解析时一次性完成结构校验与能力标签解析，
//! 任何错误都会使整个文档解析失败。

use crate::catalog::Catalog;
use crate::error::{EcaError, Result};
use crate::models::{Action, Binding, Condition, Event, EventType, Expression, NodeType, Rule};
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use std::collections::HashSet;
use std::io::{Read, Write};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDocument {
    #[serde(default)]
    rules: Vec<RuleDto>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDto {
    #[serde(alias = "name")]
    id: String,
    #[serde(default)]
    event: Option<EventDto>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    bindings: Vec<BindingDto>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    conditions: Vec<ConditionDto>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    actions: Vec<ActionDto>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct EventDto {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    node_type: Option<String>,
    #[serde(default)]
    params: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct BindingDto {
    name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    strict: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    params: Vec<ParamDto>,
}

/// 函数参数：字符串为字面量，对象为嵌套调用
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ParamDto {
    Literal(String),
    Call(CallDto),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CallDto {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    params: Vec<ParamDto>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConditionDto {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    params: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActionDto {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    params: Vec<String>,
}

/// 规则编解码器
#[derive(Debug, Clone)]
pub struct RuleCodec {
    catalog: Arc<Catalog>,
}

impl RuleCodec {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// 从输入流解析规则，保持文档顺序
    pub fn parse<R: Read>(&self, reader: R) -> Result<Vec<Rule>> {
        let document: RuleDocument = serde_json::from_reader(reader).map_err(document_error)?;
        self.build_rules(document)
    }

    pub fn parse_str(&self, document: &str) -> Result<Vec<Rule>> {
        let document: RuleDocument = serde_json::from_str(document).map_err(document_error)?;
        self.build_rules(document)
    }

    /// 序列化规则，仅保证语义等价
    pub fn serialize<W: Write>(&self, rules: &[Rule], writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, &to_document(rules))?;
        Ok(())
    }

    pub fn serialize_to_string(&self, rules: &[Rule]) -> Result<String> {
        Ok(serde_json::to_string_pretty(&to_document(rules))?)
    }

    fn build_rules(&self, document: RuleDocument) -> Result<Vec<Rule>> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(document.rules.len());

        for (index, dto) in document.rules.into_iter().enumerate() {
            if dto.id.trim().is_empty() {
                return Err(EcaError::Parse(format!("第 {} 条规则的 ID 不能为空", index + 1)));
            }
            if !seen.insert(dto.id.clone()) {
                return Err(EcaError::Parse(format!("规则 ID 重复: '{}'", dto.id)));
            }

            let id = dto.id.clone();
            let rule = self
                .build_rule(dto)
                .map_err(|e| match e {
                    EcaError::Parse(reason) => EcaError::Parse(format!("规则 '{}': {}", id, reason)),
                    other => other,
                })?;
            rules.push(rule);
        }

        Ok(rules)
    }

    fn build_rule(&self, dto: RuleDto) -> Result<Rule> {
        let event = dto
            .event
            .ok_or_else(|| EcaError::Parse("缺少 event 定义".to_string()))?;
        let mut rule = Rule::new(dto.id, build_event(event)?);

        for binding in dto.bindings {
            rule.bindings.push(self.build_binding(binding)?);
        }

        for condition in dto.conditions {
            let kind = condition.kind;
            let [left, right]: [String; 2] =
                condition.params.try_into().map_err(|params: Vec<String>| {
                    EcaError::Parse(format!(
                        "条件 '{}' 需要 2 个参数，实际 {} 个",
                        kind,
                        params.len()
                    ))
                })?;
            rule.conditions
                .push(Condition::new(&self.catalog, &kind, left, right)?);
        }

        for action in dto.actions {
            rule.actions
                .push(Action::new(&self.catalog, &action.kind, action.params)?);
        }

        Ok(rule)
    }

    fn build_binding(&self, dto: BindingDto) -> Result<Binding> {
        if dto.name.trim().is_empty() {
            return Err(EcaError::Parse("绑定名称不能为空".to_string()));
        }

        let expression = match dto.kind.as_deref().map(str::trim) {
            None | Some("") => {
                if !dto.params.is_empty() {
                    return Err(EcaError::Parse(format!(
                        "字面量绑定 '{}' 不能包含 params",
                        dto.name
                    )));
                }
                Expression::literal(dto.value.unwrap_or_default())
            }
            Some(kind) => {
                if dto.value.is_some() {
                    return Err(EcaError::Parse(format!(
                        "函数绑定 '{}' 不能同时包含 value",
                        dto.name
                    )));
                }
                self.build_call(kind, dto.params)?
            }
        };

        Ok(Binding {
            name: dto.name,
            expression,
            strict: dto.strict,
        })
    }

    fn build_call(&self, kind: &str, params: Vec<ParamDto>) -> Result<Expression> {
        if kind.trim().is_empty() {
            return Err(EcaError::Parse(
                "嵌套调用缺少函数类型，字面量参数请直接写字符串".to_string(),
            ));
        }

        let args = params
            .into_iter()
            .map(|param| match param {
                ParamDto::Literal(text) => Ok(Expression::literal(text)),
                ParamDto::Call(call) => self.build_call(&call.kind, call.params),
            })
            .collect::<Result<Vec<_>>>()?;

        Expression::call(&self.catalog, kind, args)
    }
}

fn document_error(e: serde_json::Error) -> EcaError {
    match e.classify() {
        Category::Io => EcaError::Io(e.into()),
        _ => EcaError::Parse(format!("文档格式错误: {}", e)),
    }
}

fn build_event(dto: EventDto) -> Result<Event> {
    let event_type: EventType = dto.event_type.parse()?;
    let node_type = match dto.node_type.as_deref() {
        None => NodeType::default(),
        Some(raw) => raw.parse()?,
    };

    let pattern = match dto.params.as_slice() {
        [pattern] if !pattern.trim().is_empty() => pattern.trim().to_string(),
        [_] => return Err(EcaError::Parse("event 的路径模式不能为空".to_string())),
        params => {
            return Err(EcaError::Parse(format!(
                "event 需要 1 个参数，实际 {} 个",
                params.len()
            )));
        }
    };

    Ok(Event::new(event_type, pattern).with_node_type(node_type))
}

fn to_document(rules: &[Rule]) -> RuleDocument {
    RuleDocument {
        rules: rules.iter().map(to_dto).collect(),
    }
}

fn to_dto(rule: &Rule) -> RuleDto {
    RuleDto {
        id: rule.id.clone(),
        event: Some(EventDto {
            event_type: rule.event.event_type.to_string(),
            node_type: match rule.event.node_type {
                NodeType::Text => None,
                other => Some(other.to_string()),
            },
            params: vec![rule.event.pattern.clone()],
        }),
        bindings: rule
            .bindings
            .iter()
            .map(|binding| match &binding.expression {
                Expression::Literal(text) => BindingDto {
                    name: binding.name.clone(),
                    kind: None,
                    strict: binding.strict,
                    value: Some(text.clone()),
                    params: Vec::new(),
                },
                Expression::Call(call) => BindingDto {
                    name: binding.name.clone(),
                    kind: Some(call.name.clone()),
                    strict: binding.strict,
                    value: None,
                    params: call.args.iter().map(to_param).collect(),
                },
            })
            .collect(),
        conditions: rule
            .conditions
            .iter()
            .map(|condition| ConditionDto {
                kind: condition.kind.clone(),
                params: vec![condition.left.clone(), condition.right.clone()],
            })
            .collect(),
        actions: rule
            .actions
            .iter()
            .map(|action| ActionDto {
                kind: action.kind.clone(),
                params: action.params.clone(),
            })
            .collect(),
    }
}

fn to_param(expression: &Expression) -> ParamDto {
    match expression {
        Expression::Literal(text) => ParamDto::Literal(text.clone()),
        Expression::Call(call) => ParamDto::Call(CallDto {
            kind: call.name.clone(),
            params: call.args.iter().map(to_param).collect(),
        }),
    }
}
