//! ECA 引擎集成测试
//!
//! 通过内存节点存储驱动完整的 加载 → 激活 → 变更通知 → 分发 工作流。

use eca_engine::{
    ActionContext, Catalog, EcaError, Effect, EvalContext, Expression, ExpressionEvaluator,
    MemoryNodeStore, Node, NodeStore, RuleRegistry,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

/// 一次动作执行的记录：规则 ID + 参数名到绑定值的映射
#[derive(Debug, Clone, PartialEq)]
struct Fired {
    rule_id: String,
    values: HashMap<String, Option<Value>>,
}

#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<Fired>>>);

impl Journal {
    fn fired(&self) -> Vec<Fired> {
        self.0.lock().clone()
    }

    fn count(&self, rule_id: &str) -> usize {
        self.0.lock().iter().filter(|f| f.rule_id == rule_id).count()
    }
}

/// 把执行记录写入 Journal 的测试动作
struct Record(Journal);

impl Effect for Record {
    fn execute(&self, params: &[String], ctx: &ActionContext<'_>) -> Result<(), String> {
        let values = params
            .iter()
            .map(|name| (name.clone(), ctx.bindings.get(name).cloned()))
            .collect();
        (self.0).0.lock().push(Fired {
            rule_id: ctx.rule_id.to_string(),
            values,
        });
        Ok(())
    }
}

struct Fail;

impl Effect for Fail {
    fn execute(&self, _params: &[String], _ctx: &ActionContext<'_>) -> Result<(), String> {
        Err("intentional failure".to_string())
    }
}

struct Harness {
    store: Arc<MemoryNodeStore>,
    registry: RuleRegistry,
    journal: Journal,
}

fn harness() -> Harness {
    let journal = Journal::default();
    let mut catalog = Catalog::builtin();
    catalog
        .register_effect("record", Record(journal.clone()))
        .register_effect("fail", Fail);

    let store = Arc::new(MemoryNodeStore::new());
    let registry = RuleRegistry::new(store.clone(), Arc::new(catalog));
    Harness {
        store,
        registry,
        journal,
    }
}

const R1: &str = r#"{
    "rules": [{
        "id": "r1",
        "event": { "type": "created", "params": ["/jobs/*"] },
        "bindings": [ { "name": "size", "value": "10" } ],
        "actions": [ { "type": "record", "params": ["size"] } ]
    }]
}"#;

// ==================== 场景测试 ====================

#[test]
fn test_literal_binding_dispatches_once() {
    let h = harness();
    h.registry.reload_str(R1).unwrap();

    h.store.write("/jobs/1", "payload").unwrap();

    let fired = h.journal.fired();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].rule_id, "r1");
    assert_eq!(fired[0].values["size"], Some(json!("10")));

    // 更新事件不触发 created 规则
    h.store.write("/jobs/1", "changed").unwrap();
    // 不匹配的路径不触发
    h.store.write("/queue/1", "x").unwrap();
    h.store.write("/jobs/1/status", "x").unwrap();
    assert_eq!(h.journal.count("r1"), 1);
}

#[test]
fn test_failed_binding_makes_condition_false() {
    let h = harness();
    h.registry
        .reload_str(
            r#"{"rules": [{
                "id": "r2",
                "event": { "type": "created", "params": ["/jobs/*"] },
                "bindings": [
                    { "name": "a", "type": "read_node", "params": ["/missing/node"] },
                    { "name": "b", "value": "x" }
                ],
                "conditions": [ { "type": "equals", "params": ["a", "b"] } ],
                "actions": [ { "type": "record", "params": ["a", "b"] } ]
            }]}"#,
        )
        .unwrap();

    h.store.write("/jobs/1", "").unwrap();
    assert!(h.journal.fired().is_empty());
}

#[test]
fn test_rejected_reload_keeps_previous_rules() {
    let h = harness();
    h.registry.reload_str(R1).unwrap();
    let before = h.registry.list_ids();

    let err = h
        .registry
        .reload_str(
            r#"{"rules": [{
                "id": "r9",
                "event": { "type": "created" },
                "actions": [ { "type": "record", "params": [] } ]
            }]}"#,
        )
        .unwrap_err();
    assert!(matches!(err, EcaError::Parse(_)));
    assert_eq!(err.code(), "PARSE_ERROR");

    assert_eq!(h.registry.list_ids(), before);
    h.store.write("/jobs/1", "").unwrap();
    assert_eq!(h.journal.count("r1"), 1);
    assert_eq!(h.journal.count("r9"), 0);
}

#[test]
fn test_overlapping_rules_dispatch_independently() {
    let h = harness();
    h.registry
        .reload_str(
            r#"{"rules": [
                { "id": "r1", "event": { "type": "created", "params": ["/jobs/*"] },
                  "bindings": [ { "name": "who", "value": "first" } ],
                  "actions": [ { "type": "record", "params": ["who"] } ] },
                { "id": "r2", "event": { "type": "created_or_updated", "params": ["/jobs/**"] },
                  "bindings": [ { "name": "who", "value": "second" } ],
                  "actions": [ { "type": "record", "params": ["who"] } ] }
            ]}"#,
        )
        .unwrap();

    h.store.write("/jobs/1", "").unwrap();

    assert_eq!(h.journal.count("r1"), 1);
    assert_eq!(h.journal.count("r2"), 1);
    for fired in h.journal.fired() {
        let expected = if fired.rule_id == "r1" { "first" } else { "second" };
        assert_eq!(fired.values["who"], Some(json!(expected)));
    }
}

#[test]
fn test_nested_expression_evaluation() {
    let catalog = Catalog::builtin();
    let store = MemoryNodeStore::new();
    let node = Node::text("/jobs/1", "");
    let ctx = EvalContext {
        store: &store,
        node: &node,
    };

    let expr = Expression::call(
        &catalog,
        "concat",
        vec![
            Expression::literal("a"),
            Expression::call(&catalog, "upper", vec![Expression::literal("b")]).unwrap(),
        ],
    )
    .unwrap();

    assert_eq!(ExpressionEvaluator::evaluate(&expr, &ctx).unwrap(), json!("aB"));
}

#[test]
fn test_removed_rule_no_longer_dispatches() {
    let h = harness();
    h.registry.reload_str(R1).unwrap();

    h.registry.remove("r1");
    h.store.write("/jobs/1", "").unwrap();

    assert!(h.journal.fired().is_empty());
    assert_eq!(h.store.listener_count(), 0);
}

// ==================== 性质测试 ====================

#[test]
fn test_repeated_add_keeps_single_listener() {
    let h = harness();
    let rule = h.registry.codec().parse_str(R1).unwrap().remove(0);

    for _ in 0..3 {
        h.registry.add(rule.clone()).unwrap();
    }
    assert_eq!(h.store.listener_count(), 1);

    h.store.write("/jobs/1", "").unwrap();
    assert_eq!(h.journal.count("r1"), 1);
}

#[test]
fn test_remove_unknown_rule_has_no_effect() {
    let h = harness();
    h.registry.reload_str(R1).unwrap();

    assert!(h.registry.remove("unknown").is_none());
    assert_eq!(h.registry.list_ids(), vec!["r1"]);
    assert_eq!(h.store.listener_count(), 1);
}

#[test]
fn test_literal_fidelity() {
    let store = MemoryNodeStore::new();
    let node = Node::text("/a", "");
    let ctx = EvalContext {
        store: &store,
        node: &node,
    };

    for text in ["", " ", "10", "/jobs/*", "多字节文本", "quote \" inside"] {
        let value = ExpressionEvaluator::evaluate(&Expression::literal(text), &ctx).unwrap();
        assert_eq!(value, Value::String(text.to_string()));
    }
}

#[test]
fn test_partial_binding_isolation() {
    let h = harness();
    h.registry
        .reload_str(
            r#"{"rules": [{
                "id": "r1",
                "event": { "type": "created", "params": ["/jobs/*"] },
                "bindings": [
                    { "name": "name", "type": "node_name" },
                    { "name": "broken", "type": "path_segment", "params": ["9"] },
                    { "name": "path", "type": "node_path" }
                ],
                "actions": [ { "type": "record", "params": ["name", "broken", "path"] } ]
            }]}"#,
        )
        .unwrap();

    h.store.write("/jobs/42", "").unwrap();

    let fired = h.journal.fired();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].values["name"], Some(json!("42")));
    assert_eq!(fired[0].values["broken"], None);
    assert_eq!(fired[0].values["path"], Some(json!("/jobs/42")));
}

#[test]
fn test_condition_on_missing_name_is_false() {
    let h = harness();
    h.registry
        .reload_str(
            r#"{"rules": [{
                "id": "r1",
                "event": { "type": "created", "params": ["/jobs/*"] },
                "bindings": [ { "name": "a", "value": "1" } ],
                "conditions": [ { "type": "equals", "params": ["a", "never_bound"] } ],
                "actions": [ { "type": "record", "params": ["a"] } ]
            }]}"#,
        )
        .unwrap();

    h.store.write("/jobs/1", "").unwrap();
    assert!(h.journal.fired().is_empty());
}

#[test]
fn test_failing_action_does_not_stop_later_actions() {
    let h = harness();
    h.registry
        .reload_str(
            r#"{"rules": [{
                "id": "r1",
                "event": { "type": "created", "params": ["/jobs/*"] },
                "bindings": [ { "name": "target", "value": "/done/1" }, { "name": "v", "value": "ok" } ],
                "actions": [
                    { "type": "fail", "params": [] },
                    { "type": "set_node", "params": ["target", "v"] },
                    { "type": "record", "params": ["v"] }
                ]
            }]}"#,
        )
        .unwrap();

    h.store.write("/jobs/1", "").unwrap();

    assert_eq!(h.journal.count("r1"), 1);
    let done = h.store.read("/done/1").unwrap().unwrap();
    assert_eq!(done.data.to_value(), json!("ok"));
}

// ==================== 综合场景 ====================

#[test]
fn test_json_payload_and_cascading_rules() {
    let h = harness();
    h.registry
        .reload_str(
            r#"{"rules": [
                {
                    "id": "promote",
                    "event": { "type": "created_or_updated", "node_type": "json", "params": ["/jobs/*"] },
                    "bindings": [
                        { "name": "priority", "type": "json_field", "params": ["/priority"] },
                        { "name": "threshold", "value": "5" },
                        { "name": "target", "type": "concat", "params": ["/urgent/", { "type": "node_name" }] },
                        { "name": "content", "type": "upper", "params": [{ "type": "json_field", "params": ["/owner"] }] }
                    ],
                    "conditions": [ { "type": "gt", "params": ["priority", "threshold"] } ],
                    "actions": [ { "type": "set_node", "params": ["target", "content"] } ]
                },
                {
                    "id": "audit",
                    "event": { "type": "created", "params": ["/urgent/*"] },
                    "bindings": [ { "name": "owner", "type": "node_data" } ],
                    "actions": [ { "type": "record", "params": ["owner"] } ]
                }
            ]}"#,
        )
        .unwrap();

    h.store.write("/jobs/a", r#"{"priority": 3, "owner": "ann"}"#).unwrap();
    h.store.write("/jobs/b", r#"{"priority": 9, "owner": "bob"}"#).unwrap();
    // JSON 解码失败时跳过该规则
    h.store.write("/jobs/c", "not json").unwrap();

    assert!(h.store.read("/urgent/a").unwrap().is_none());
    assert_eq!(
        h.store.read("/urgent/b").unwrap().unwrap().data.to_value(),
        json!("BOB")
    );
    let fired = h.journal.fired();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].rule_id, "audit");
    assert_eq!(fired[0].values["owner"], Some(json!("BOB")));
}

#[test]
fn test_deleted_event_sees_last_content() {
    let h = harness();
    h.registry
        .reload_str(
            r#"{"rules": [{
                "id": "gone",
                "event": { "type": "deleted", "params": ["/locks/*"] },
                "bindings": [ { "name": "holder", "type": "node_data" } ],
                "actions": [ { "type": "record", "params": ["holder"] } ]
            }]}"#,
        )
        .unwrap();

    h.store.write("/locks/l1", "worker-3").unwrap();
    assert!(h.journal.fired().is_empty());

    h.store.delete("/locks/l1").unwrap();
    let fired = h.journal.fired();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].values["holder"], Some(json!("worker-3")));
}

#[test]
fn test_concurrent_notifications() {
    let h = harness();
    h.registry.reload_str(R1).unwrap();

    let store = h.store.clone();
    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    store.write(&format!("/jobs/{}-{}", worker, i), "").unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(h.journal.count("r1"), 200);
}

#[test]
fn test_write_rules_round_trip_through_reload() {
    let h = harness();
    h.registry
        .reload_str(
            r#"{"rules": [
                { "id": "b", "event": { "type": "updated", "params": ["/b/*"] },
                  "bindings": [ { "name": "x", "type": "replace", "strict": true,
                                  "params": [{ "type": "node_path" }, "/", "."] } ],
                  "conditions": [ { "type": "starts_with", "params": ["x", "x"] } ],
                  "actions": [ { "type": "log", "params": ["x"] } ] },
                { "id": "a", "event": { "type": "created", "params": ["/a/*"] } }
            ]}"#,
        )
        .unwrap();

    let mut buffer = Vec::new();
    h.registry.write_rules(&mut buffer).unwrap();
    let before: Vec<_> = h.registry.rules().iter().map(|r| r.as_ref().clone()).collect();

    let other = harness();
    let ids = other.registry.reload(buffer.as_slice()).unwrap();
    assert_eq!(ids, vec!["a", "b"]);
    let after: Vec<_> = other.registry.rules().iter().map(|r| r.as_ref().clone()).collect();
    assert_eq!(before, after);
}
