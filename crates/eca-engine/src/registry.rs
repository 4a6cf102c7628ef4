//! 规则注册表
//!
//! 持有全部已激活规则。规则在注册表中存在当且仅当其监听器已在节点存储注册。
//! 变更操作（add/remove/reload）在同一把锁内完成，正在执行的分发使用激活时的
//! 规则快照，不受后续变更影响。

use crate::catalog::Catalog;
use crate::codec::RuleCodec;
use crate::dispatcher::{DispatchSettings, Dispatcher};
use crate::error::Result;
use crate::models::Rule;
use crate::store::{ListenerHandle, NodeStore};
use nodekeeper_shared::observability::metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

struct RegisteredRule {
    rule: Arc<Rule>,
    handle: ListenerHandle,
}

/// 规则注册表
pub struct RuleRegistry {
    store: Arc<dyn NodeStore>,
    codec: RuleCodec,
    settings: DispatchSettings,
    rules: Mutex<HashMap<String, RegisteredRule>>,
}

impl RuleRegistry {
    pub fn new(store: Arc<dyn NodeStore>, catalog: Arc<Catalog>) -> Self {
        Self {
            store,
            codec: RuleCodec::new(catalog),
            settings: DispatchSettings::default(),
            rules: Mutex::new(HashMap::new()),
        }
    }

    /// 设置分发参数，仅对之后激活的规则生效
    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn codec(&self) -> &RuleCodec {
        &self.codec
    }

    pub fn len(&self) -> usize {
        self.rules.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.lock().is_empty()
    }

    pub fn contains(&self, rule_id: &str) -> bool {
        self.rules.lock().contains_key(rule_id)
    }

    /// 规则的监听器是否已注册
    pub fn is_active(&self, rule_id: &str) -> bool {
        self.listener_handle(rule_id).is_some()
    }

    pub fn listener_handle(&self, rule_id: &str) -> Option<ListenerHandle> {
        self.rules.lock().get(rule_id).map(|entry| entry.handle)
    }

    /// 获取规则快照
    pub fn get(&self, rule_id: &str) -> Option<Arc<Rule>> {
        self.rules.lock().get(rule_id).map(|entry| entry.rule.clone())
    }

    /// 获取所有规则 ID（排序）
    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rules.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 获取所有规则快照（按 ID 排序）
    pub fn rules(&self) -> Vec<Arc<Rule>> {
        let mut rules: Vec<Arc<Rule>> = self
            .rules
            .lock()
            .values()
            .map(|entry| entry.rule.clone())
            .collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    /// 添加或替换规则
    ///
    /// 同 ID 的旧规则先注销监听器；新规则激活失败时旧规则也不再保留。
    #[instrument(skip(self, rule), fields(rule_id = %rule.id))]
    pub fn add(&self, rule: Rule) -> Result<()> {
        let mut rules = self.rules.lock();
        let result = self.add_locked(&mut rules, rule);
        metrics::set_active_rules(rules.len());
        result
    }

    /// 注销并移除规则，未知 ID 不做任何事
    #[instrument(skip(self))]
    pub fn remove(&self, rule_id: &str) -> Option<Arc<Rule>> {
        let mut rules = self.rules.lock();
        let removed = rules.remove(rule_id).map(|entry| {
            self.deactivate(&entry);
            info!("规则已移除: {}", rule_id);
            entry.rule
        });

        if removed.is_none() {
            debug!("移除不存在的规则，忽略: {}", rule_id);
        }
        metrics::set_active_rules(rules.len());
        removed
    }

    /// 从文档整体重载规则
    ///
    /// 先完整解析，解析失败时注册表保持不变；成功后注销全部旧规则，
    /// 再按文档顺序添加新规则。返回已激活的规则 ID。
    #[instrument(skip(self, reader))]
    pub fn reload<R: Read>(&self, reader: R) -> Result<Vec<String>> {
        let parsed = self.codec.parse(reader).inspect_err(|e| {
            warn!(error = %e, "规则文档解析失败，保留当前规则");
            metrics::record_rule_reload("rejected");
        })?;
        self.replace_all(parsed)
    }

    pub fn reload_str(&self, document: &str) -> Result<Vec<String>> {
        self.reload(document.as_bytes())
    }

    /// 从文件重载规则
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn reload_file(&self, path: impl AsRef<Path>) -> Result<Vec<String>> {
        let file = File::open(path.as_ref()).inspect_err(|e| {
            warn!(error = %e, "规则文件读取失败，保留当前规则");
            metrics::record_rule_reload("rejected");
        })?;
        self.reload(BufReader::new(file))
    }

    /// 序列化全部规则（按 ID 排序）
    pub fn write_rules<W: Write>(&self, writer: W) -> Result<()> {
        let rules: Vec<Rule> = self.rules().iter().map(|rule| rule.as_ref().clone()).collect();
        self.codec.serialize(&rules, writer)
    }

    /// 全部规则的可读描述
    pub fn describe(&self) -> String {
        self.rules()
            .iter()
            .map(|rule| rule.describe())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 注销并清空全部规则
    #[instrument(skip(self))]
    pub fn shutdown(&self) {
        let mut rules = self.rules.lock();
        let count = rules.len();
        for (_, entry) in rules.drain() {
            self.deactivate(&entry);
        }
        metrics::set_active_rules(0);
        info!("规则注册表已关闭，注销 {} 条规则", count);
    }

    fn replace_all(&self, parsed: Vec<Rule>) -> Result<Vec<String>> {
        let mut rules = self.rules.lock();

        let previous = rules.len();
        for (_, entry) in rules.drain() {
            self.deactivate(&entry);
        }

        let mut activated = Vec::with_capacity(parsed.len());
        for rule in parsed {
            let rule_id = rule.id.clone();
            if let Err(e) = self.add_locked(&mut rules, rule) {
                warn!(
                    rule_id = %rule_id,
                    activated = activated.len(),
                    error = %e,
                    "规则激活失败，重载中止"
                );
                metrics::set_active_rules(rules.len());
                metrics::record_rule_reload("partial");
                return Err(e);
            }
            activated.push(rule_id);
        }

        metrics::set_active_rules(rules.len());
        metrics::record_rule_reload("success");
        info!("规则重载完成: 注销 {} 条, 激活 {} 条", previous, activated.len());
        Ok(activated)
    }

    fn add_locked(&self, rules: &mut HashMap<String, RegisteredRule>, rule: Rule) -> Result<()> {
        let rule = Arc::new(rule);

        if let Some(existing) = rules.remove(&rule.id) {
            self.deactivate(&existing);
            debug!("已注销旧规则: {}", rule.id);
        }

        let handle = self.activate(&rule)?;
        info!("规则已激活: {} ({} {})", rule.id, rule.event.event_type, rule.event.pattern);
        rules.insert(rule.id.clone(), RegisteredRule { rule, handle });
        Ok(())
    }

    /// 为规则创建分发器并注册到节点存储
    fn activate(&self, rule: &Arc<Rule>) -> Result<ListenerHandle> {
        let dispatcher = Arc::new(Dispatcher::new(
            rule.clone(),
            self.store.clone(),
            self.settings.clone(),
        ));

        let handle =
            self.store
                .add_listener(&rule.event.pattern, rule.event.node_type, dispatcher)?;

        if let Err(e) = self.store.start_listening() {
            if let Err(cleanup) = self.store.remove_listener(&rule.event.pattern, handle) {
                warn!(error = %cleanup, "回滚监听器注册失败");
            }
            return Err(e.into());
        }

        Ok(handle)
    }

    fn deactivate(&self, entry: &RegisteredRule) {
        if let Err(e) = self
            .store
            .remove_listener(&entry.rule.event.pattern, entry.handle)
        {
            warn!(rule_id = %entry.rule.id, error = %e, "注销监听器失败");
        }
    }
}
