//! 规则文件热更新模块
//!
//! 使用 `notify` 监听规则文件所在目录，文件写入后经去抖窗口合并，再调用重载回调。
//! 监听目录而非文件本身，编辑器以"写临时文件再重命名"方式保存时也能收到事件。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, warn};

/// 规则文件变更回调
pub type ReloadCallback = Arc<dyn Fn(&Path) + Send + Sync>;

/// 规则源监听器抽象
#[async_trait]
pub trait RulesWatcher: Send + Sync {
    /// 启动监听，规则源变更时触发回调
    async fn start(&self) -> Result<()>;

    /// 停止监听并释放资源
    async fn stop(&self) -> Result<()>;
}

/// 基于文件系统事件的规则监听器
pub struct FileRulesWatcher {
    path: PathBuf,
    debounce: Duration,
    on_change: ReloadCallback,
    /// 持有底层 watcher，drop 即停止系统监听
    watcher: Mutex<Option<notify::RecommendedWatcher>>,
    shutdown_tx: watch::Sender<bool>,
}

impl FileRulesWatcher {
    pub fn new(path: impl AsRef<Path>, debounce: Duration, on_change: ReloadCallback) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            path: path.as_ref().to_path_buf(),
            debounce,
            on_change,
            watcher: Mutex::new(None),
            shutdown_tx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.watcher.lock().is_some()
    }
}

#[async_trait]
impl RulesWatcher for FileRulesWatcher {
    async fn start(&self) -> Result<()> {
        use notify::{EventKind, RecursiveMode, Watcher};

        if self.is_running() {
            return Ok(());
        }

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| anyhow!("规则文件路径无效: {}", self.path.display()))?;
        let watch_dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        // notify 事件通过 channel 转发到 tokio 异步任务
        let (event_tx, mut event_rx) = tokio::sync::mpsc::channel::<()>(16);

        // 在阻塞线程中创建 watcher，因为 notify 使用系统原生 API
        let watcher = tokio::task::spawn_blocking({
            let watch_dir = watch_dir.clone();
            move || -> Result<notify::RecommendedWatcher> {
                let mut watcher = notify::recommended_watcher(
                    move |res: Result<notify::Event, notify::Error>| match res {
                        Ok(event) => {
                            let relevant = matches!(
                                event.kind,
                                EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                            );
                            let ours = event
                                .paths
                                .iter()
                                .any(|p| p.file_name() == Some(file_name.as_os_str()));
                            if relevant && ours {
                                let _ = event_tx.try_send(());
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "文件监听器事件错误");
                        }
                    },
                )
                .context("创建文件监听器失败")?;

                watcher
                    .watch(&watch_dir, RecursiveMode::NonRecursive)
                    .context("启动文件监听失败")?;

                Ok(watcher)
            }
        })
        .await
        .context("文件监听线程异常退出")??;

        *self.watcher.lock() = Some(watcher);
        info!(path = %self.path.display(), "规则文件监听已启动");

        let path = self.path.clone();
        let debounce = self.debounce;
        let on_change = self.on_change.clone();
        // stop 之后重新 start 时复位关闭信号，新循环只响应之后的 stop
        self.shutdown_tx.send_replace(false);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        // 异步去抖循环：收到文件事件后等待窗口期再重载
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = event_rx.recv() => {
                        // watcher 已释放，事件通道关闭
                        if event.is_none() {
                            break;
                        }
                        tokio::time::sleep(debounce).await;
                        // 清空窗口内积压的重复事件
                        while event_rx.try_recv().is_ok() {}

                        info!(path = %path.display(), "规则文件变更，开始重载");
                        on_change(&path);
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("规则文件监听已停止");
                            break;
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown_tx.send_replace(true);
        self.watcher.lock().take();
        Ok(())
    }
}
