//! 内置条件谓词
//!
//! 实现各种比较的评估逻辑，支持字符串、数值、数组与时间的比较。

use super::{Catalog, Predicate};
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde_json::Value;
use std::fmt;

pub(super) fn register_builtin(catalog: &mut Catalog) {
    for comparison in Comparison::ALL {
        catalog.register_predicate(comparison.to_string(), comparison);
    }
}

/// 比较谓词
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    // 通用比较
    Equals,
    NotEquals,

    // 数值比较
    Gt,
    Gte,
    Lt,
    Lte,

    // 包含检查
    Contains,

    // 字符串操作
    StartsWith,
    EndsWith,
    Regex,

    // 时间操作
    Before,
    After,
}

impl Comparison {
    pub const ALL: [Comparison; 12] = [
        Self::Equals,
        Self::NotEquals,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::Contains,
        Self::StartsWith,
        Self::EndsWith,
        Self::Regex,
        Self::Before,
        Self::After,
    ];
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::Regex => "regex",
            Self::Before => "before",
            Self::After => "after",
        };
        write!(f, "{}", s)
    }
}

impl Predicate for Comparison {
    fn test(&self, left: &Value, right: &Value) -> Result<bool, String> {
        match self {
            Self::Equals => Ok(eq(left, right)),
            Self::NotEquals => Ok(!eq(left, right)),
            Self::Gt => compare(left, right, |a, b| a > b),
            Self::Gte => compare(left, right, |a, b| a >= b),
            Self::Lt => compare(left, right, |a, b| a < b),
            Self::Lte => compare(left, right, |a, b| a <= b),
            Self::Contains => contains(left, right),
            Self::StartsWith => Ok(text(left)?.starts_with(text(right)?)),
            Self::EndsWith => Ok(text(left)?.ends_with(text(right)?)),
            Self::Regex => regex_match(left, right),
            Self::Before => time_compare(left, right, |a, b| a < b),
            Self::After => time_compare(left, right, |a, b| a > b),
        }
    }
}

/// 相等比较
fn eq(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }

    // 整数按整数比较，超过 2^53 的 ID 转为浮点会丢失精度
    if let (Some(a), Some(b)) = (as_integer(left), as_integer(right)) {
        return a == b;
    }

    // 其余数值统一转为浮点数，避免 "10" 与 10.0 比较失败
    match (as_f64(left), as_f64(right)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// 数值比较
fn compare<F>(left: &Value, right: &Value, cmp: F) -> Result<bool, String>
where
    F: Fn(f64, f64) -> bool,
{
    let a = as_f64(left).ok_or_else(|| mismatch("number", left))?;
    let b = as_f64(right).ok_or_else(|| mismatch("number", right))?;
    Ok(cmp(a, b))
}

/// 字符串/数组包含检查
fn contains(left: &Value, right: &Value) -> Result<bool, String> {
    match left {
        Value::String(s) => Ok(s.contains(text(right)?)),
        Value::Array(arr) => Ok(arr.iter().any(|item| eq(item, right))),
        _ => Err(mismatch("string or array", left)),
    }
}

/// 正则表达式匹配，右值为模式
fn regex_match(left: &Value, right: &Value) -> Result<bool, String> {
    let s = text(left)?;
    let pattern = text(right)?;

    let regex =
        Regex::new(pattern).map_err(|e| format!("无效的正则表达式 '{}': {}", pattern, e))?;

    Ok(regex.is_match(s))
}

/// 时间比较
fn time_compare<F>(left: &Value, right: &Value, cmp: F) -> Result<bool, String>
where
    F: Fn(DateTime<Utc>, DateTime<Utc>) -> bool,
{
    Ok(cmp(parse_datetime(left)?, parse_datetime(right)?))
}

/// 解析日期时间
fn parse_datetime(value: &Value) -> Result<DateTime<Utc>, String> {
    let s = value
        .as_str()
        .ok_or_else(|| mismatch("datetime string", value))?;

    // 尝试解析 ISO 8601 格式
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // 尝试解析纯日期格式
    if let Some(dt) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(dt.and_utc());
    }

    Err(format!("无法解析日期时间: '{}'", s))
}

fn text(value: &Value) -> Result<&str, String> {
    value.as_str().ok_or_else(|| mismatch("string", value))
}

/// 尝试将 Value 转换为有限的 f64，`NaN` 与 `inf` 不视为数值
fn as_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    number.filter(|n: &f64| n.is_finite())
}

fn as_integer(value: &Value) -> Option<i128> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn mismatch(expected: &str, actual: &Value) -> String {
    format!("类型不匹配: 期望 {}, 实际 {}", expected, type_name(actual))
}

/// 获取值的类型名称
fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
