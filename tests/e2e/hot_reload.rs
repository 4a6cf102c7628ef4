//! 规则文件热重载
//!
//! 修改规则文件后，监听器回调重载注册表；无效文档被拒绝，当前规则继续生效。

use eca_engine::{Catalog, MemoryNodeStore, NodeStore, RuleRegistry};
use nodekeeper_shared::rules_watcher::{FileRulesWatcher, RulesWatcher};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const STAMP_RULES: &str = r#"{
    "rules": [{
        "id": "stamp",
        "event": { "type": "created", "params": ["/jobs/*"] },
        "bindings": [
            { "name": "target", "type": "concat", "params": ["/stamped/", { "type": "node_name" }] },
            { "name": "mark", "value": "v1" }
        ],
        "actions": [ { "type": "set_node", "params": ["target", "mark"] } ]
    }]
}"#;

const ARCHIVE_RULES: &str = r#"{
    "rules": [{
        "id": "archive",
        "event": { "type": "created", "params": ["/jobs/*"] },
        "bindings": [
            { "name": "source", "type": "node_path" },
            { "name": "target", "type": "concat", "params": ["/archive/", { "type": "node_name" }] }
        ],
        "actions": [ { "type": "copy_node", "params": ["source", "target"] } ]
    }]
}"#;

struct Service {
    dir: PathBuf,
    rules_path: PathBuf,
    store: Arc<MemoryNodeStore>,
    registry: Arc<RuleRegistry>,
    watcher: FileRulesWatcher,
}

impl Service {
    /// 写入初始规则文件并启动注册表与文件监听
    async fn start(name: &str, rules: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("nodekeeper-e2e-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let rules_path = dir.join("rules.json");
        fs::write(&rules_path, rules).unwrap();

        let store = Arc::new(MemoryNodeStore::new());
        let registry = Arc::new(RuleRegistry::new(store.clone(), Arc::new(Catalog::builtin())));
        registry.reload_file(&rules_path).unwrap();

        let callback_registry = registry.clone();
        let watcher = FileRulesWatcher::new(
            &rules_path,
            Duration::from_millis(50),
            Arc::new(move |path: &Path| {
                let _ = callback_registry.reload_file(path);
            }),
        );
        watcher.start().await.unwrap();

        Self {
            dir,
            rules_path,
            store,
            registry,
            watcher,
        }
    }

    async fn stop(self) {
        self.watcher.stop().await.unwrap();
        self.registry.shutdown();
        fs::remove_dir_all(&self.dir).unwrap();
    }
}

/// 轮询直到条件成立或超时
async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let mut waited = Duration::ZERO;
    while waited < Duration::from_secs(5) {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += Duration::from_millis(50);
    }
    condition()
}

#[tokio::test]
async fn test_rules_file_change_replaces_rules() {
    let service = Service::start("replace", STAMP_RULES).await;

    service.store.write("/jobs/1", "first").unwrap();
    let stamped = service.store.read("/stamped/1").unwrap().unwrap();
    assert_eq!(stamped.data.to_value(), serde_json::json!("v1"));

    fs::write(&service.rules_path, ARCHIVE_RULES).unwrap();
    let registry = service.registry.clone();
    assert!(wait_until(|| registry.list_ids() == vec!["archive"]).await);

    service.store.write("/jobs/2", "second").unwrap();
    assert!(service.store.read("/stamped/2").unwrap().is_none());
    let archived = service.store.read("/archive/2").unwrap().unwrap();
    assert_eq!(archived.data.to_value(), serde_json::json!("second"));
    assert_eq!(service.store.listener_count(), 1);

    service.stop().await;
}

#[tokio::test]
async fn test_invalid_rules_file_keeps_active_rules() {
    let service = Service::start("invalid", STAMP_RULES).await;

    fs::write(&service.rules_path, r#"{"rules": [{"id": "broken", "event": {"type": "moved", "params": ["/x"]}}]}"#)
        .unwrap();
    // 给监听器留出防抖与重载的时间
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(service.registry.list_ids(), vec!["stamp"]);
    service.store.write("/jobs/7", "").unwrap();
    assert!(service.store.read("/stamped/7").unwrap().is_some());

    service.stop().await;
}
