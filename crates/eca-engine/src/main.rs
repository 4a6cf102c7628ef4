//! ECA 规则引擎服务
//!
//! 加载规则文档，监听节点变更并执行规则，规则文件变更时自动重载。

use anyhow::Result;
use eca_engine::{Catalog, DispatchSettings, MemoryNodeStore, RuleRegistry};
use nodekeeper_shared::config::AppConfig;
use nodekeeper_shared::observability;
use nodekeeper_shared::rules_watcher::{FileRulesWatcher, RulesWatcher};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "eca-engine";

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig {
            service_name: SERVICE_NAME.to_string(),
            ..AppConfig::default()
        }
    });

    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!("Starting {} service...", config.service_name);

    let catalog = Arc::new(Catalog::builtin());
    let tags = catalog.tags();
    info!(
        functions = tags.functions.len(),
        predicates = tags.predicates.len(),
        effects = tags.effects.len(),
        "Capability catalog initialized"
    );

    let store = Arc::new(MemoryNodeStore::new());
    let registry = Arc::new(
        RuleRegistry::new(store, catalog).with_settings(DispatchSettings {
            slow_dispatch_threshold: config.engine.slow_dispatch_threshold(),
        }),
    );

    let rules_path = config.engine.rules_path.clone();
    match registry.reload_file(&rules_path) {
        Ok(ids) => info!("Loaded {} rules from {}", ids.len(), rules_path),
        Err(e) => warn!("Failed to load rules from {}: {}, starting with empty registry", rules_path, e),
    }

    let watcher = if config.engine.watch_rules {
        let callback_registry = registry.clone();
        let watcher = FileRulesWatcher::new(
            &rules_path,
            config.engine.reload_debounce(),
            Arc::new(move |path: &Path| match callback_registry.reload_file(path) {
                Ok(ids) => info!(rules = ?ids, "Rules reloaded"),
                Err(e) => error!(error = %e, "Rules reload failed, keeping active rules"),
            }),
        );

        match watcher.start().await {
            Ok(()) => Some(watcher),
            Err(e) => {
                warn!("Failed to watch {}: {}, hot reload disabled", rules_path, e);
                None
            }
        }
    } else {
        None
    };

    shutdown_signal().await;

    if let Some(watcher) = watcher {
        watcher.stop().await?;
    }
    registry.shutdown();

    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
