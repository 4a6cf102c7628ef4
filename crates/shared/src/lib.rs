//! 共享库
//!
//! 包含引擎进程共用的配置加载、可观测性初始化与规则文件监听等基础设施代码。

pub mod config;
pub mod observability;
pub mod rules_watcher;
