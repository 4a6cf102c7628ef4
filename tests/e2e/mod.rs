//! NodeKeeper 端到端测试
//!
//! 按服务启动方式组装引擎：规则文件 → 注册表 → 文件监听热重载 → 节点变更分发。

pub mod hot_reload;
