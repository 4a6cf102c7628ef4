//! 规则分发器
//!
//! 每条激活的规则对应一个分发器，持有激活时的规则快照。节点变更到达时按
//! 绑定 → 条件 → 动作的顺序执行，各阶段失败相互隔离。

use crate::catalog::{ActionContext, EvalContext};
use crate::error::EcaError;
use crate::evaluator::ExpressionEvaluator;
use crate::models::{Bindings, ChangeKind, Node, Rule};
use crate::store::{NodeListener, NodeStore};
use nodekeeper_shared::observability::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// 分发参数
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// 超过该耗时的分发输出告警，不会中断分发
    pub slow_dispatch_threshold: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            slow_dispatch_threshold: Duration::from_secs(1),
        }
    }
}

/// 单次分发结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub rule_id: String,
    pub node_path: String,
    /// 求值成功的绑定
    pub bindings: Bindings,
    /// 求值失败的绑定名
    pub failed_bindings: Vec<String>,
    /// 严格绑定失败导致分发中止
    pub aborted: bool,
    pub conditions_passed: bool,
    pub actions_executed: usize,
    /// 执行失败的动作
    pub failed_actions: Vec<String>,
    pub elapsed_ms: u64,
}

impl DispatchReport {
    fn new(rule_id: &str, node_path: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            node_path: node_path.to_string(),
            ..Default::default()
        }
    }

    /// 分发结果分类，用于指标标签
    pub fn outcome(&self) -> &'static str {
        if self.aborted {
            "aborted"
        } else if self.conditions_passed {
            "executed"
        } else {
            "skipped"
        }
    }
}

/// 规则分发器
pub struct Dispatcher {
    rule: Arc<Rule>,
    store: Arc<dyn NodeStore>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(rule: Arc<Rule>, store: Arc<dyn NodeStore>, settings: DispatchSettings) -> Self {
        Self {
            rule,
            store,
            settings,
        }
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// 按事件类型过滤后分发，不响应的变更返回 `None`
    pub fn handle(&self, kind: ChangeKind, node: &Node) -> Option<DispatchReport> {
        if !self.rule.event.event_type.accepts(kind) {
            debug!(
                rule_id = %self.rule.id,
                path = %node.path,
                kind = %kind,
                "事件类型不匹配，忽略"
            );
            return None;
        }
        Some(self.dispatch(node))
    }

    /// 对节点执行一次完整分发
    #[instrument(skip(self, node), fields(rule_id = %self.rule.id, path = %node.path))]
    pub fn dispatch(&self, node: &Node) -> DispatchReport {
        let start = Instant::now();
        let mut report = DispatchReport::new(&self.rule.id, &node.path);

        match self.bind_variables(node, &mut report) {
            Ok(bindings) => {
                report.conditions_passed = self.check_conditions(&bindings);
                if report.conditions_passed {
                    self.execute_actions(&bindings, &mut report);
                }
                report.bindings = bindings;
            }
            Err(e) => {
                report.aborted = true;
                warn!(error = %e, "严格绑定求值失败，中止分发");
            }
        }

        let elapsed = start.elapsed();
        report.elapsed_ms = elapsed.as_millis() as u64;

        if elapsed > self.settings.slow_dispatch_threshold {
            warn!(
                elapsed_ms = report.elapsed_ms,
                threshold_ms = self.settings.slow_dispatch_threshold.as_millis() as u64,
                "分发耗时过长"
            );
        }

        metrics::record_dispatch(&self.rule.id, report.outcome(), elapsed.as_secs_f64());

        debug!(
            outcome = report.outcome(),
            actions_executed = report.actions_executed,
            elapsed_ms = report.elapsed_ms,
            "分发完成"
        );

        report
    }

    /// 按声明顺序求值绑定
    ///
    /// 非严格绑定失败时记录日志并从绑定表中省略；严格绑定失败时返回错误。
    fn bind_variables(
        &self,
        node: &Node,
        report: &mut DispatchReport,
    ) -> Result<Bindings, EcaError> {
        let ctx = EvalContext {
            store: self.store.as_ref(),
            node,
        };

        let mut bindings = Bindings::with_capacity(self.rule.bindings.len());
        for binding in &self.rule.bindings {
            match ExpressionEvaluator::evaluate(&binding.expression, &ctx) {
                Ok(value) => {
                    bindings.insert(binding.name.clone(), value);
                }
                Err(e) => {
                    metrics::record_binding_failure(&self.rule.id, &binding.name);
                    report.failed_bindings.push(binding.name.clone());
                    if binding.strict {
                        return Err(e);
                    }
                    warn!(binding = %binding.name, error = %e, "绑定求值失败，已忽略");
                }
            }
        }

        Ok(bindings)
    }

    /// 短路与：任一条件不满足即返回 false，缺失的绑定视为不满足
    fn check_conditions(&self, bindings: &Bindings) -> bool {
        for condition in &self.rule.conditions {
            let (Some(left), Some(right)) =
                (bindings.get(&condition.left), bindings.get(&condition.right))
            else {
                debug!(condition = %condition, "条件引用的绑定不存在，视为不满足");
                return false;
            };

            match condition.predicate().test(left, right) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(condition = %condition, "条件不满足");
                    return false;
                }
                Err(reason) => {
                    warn!(condition = %condition, error = %reason, "条件求值失败，视为不满足");
                    return false;
                }
            }
        }
        true
    }

    /// 按声明顺序执行动作，单个动作失败不影响后续动作
    fn execute_actions(&self, bindings: &Bindings, report: &mut DispatchReport) {
        let ctx = ActionContext {
            rule_id: &self.rule.id,
            store: self.store.as_ref(),
            bindings,
        };

        for action in &self.rule.actions {
            report.actions_executed += 1;

            if let Err(reason) = action.effect().execute(&action.params, &ctx) {
                let e = EcaError::Action {
                    action: action.to_string(),
                    reason,
                };
                warn!(error = %e, "动作执行失败，继续执行后续动作");
                metrics::record_action_failure(&self.rule.id, &action.kind);
                report.failed_actions.push(action.to_string());
            }
        }
    }
}

impl NodeListener for Dispatcher {
    fn on_created(&self, node: &Node) {
        self.handle(ChangeKind::Created, node);
    }

    fn on_updated(&self, node: &Node) {
        self.handle(ChangeKind::Updated, node);
    }

    fn on_deleted(&self, node: &Node) {
        self.handle(ChangeKind::Deleted, node);
    }
}
