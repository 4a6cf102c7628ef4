//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    /// 停止指标 HTTP 服务器
    pub fn shutdown(self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    // 保存到全局，供其他地方获取指标快照
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_engine_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册引擎指标描述，出现在 /metrics 端点的 HELP 注释中
fn register_engine_metrics(service_name: &str) {
    metrics::describe_counter!("eca_dispatches_total", "Total number of rule dispatches");
    metrics::describe_histogram!(
        "eca_dispatch_duration_seconds",
        "Rule dispatch duration in seconds"
    );
    metrics::describe_counter!(
        "eca_binding_failures_total",
        "Total number of binding evaluation failures"
    );
    metrics::describe_counter!(
        "eca_action_failures_total",
        "Total number of action execution failures"
    );
    metrics::describe_counter!("eca_rule_reloads_total", "Total number of rule reloads");
    metrics::describe_gauge!("eca_active_rules", "Number of active rules");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录一次规则分发
///
/// `outcome` 取值：`executed`、`skipped`、`aborted`
#[inline]
pub fn record_dispatch(rule_id: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "eca_dispatches_total",
        "rule_id" => rule_id.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "eca_dispatch_duration_seconds",
        "rule_id" => rule_id.to_string()
    )
    .record(duration_secs);
}

/// 记录绑定求值失败
#[inline]
pub fn record_binding_failure(rule_id: &str, binding: &str) {
    metrics::counter!(
        "eca_binding_failures_total",
        "rule_id" => rule_id.to_string(),
        "binding" => binding.to_string()
    )
    .increment(1);
}

/// 记录动作执行失败
#[inline]
pub fn record_action_failure(rule_id: &str, action: &str) {
    metrics::counter!(
        "eca_action_failures_total",
        "rule_id" => rule_id.to_string(),
        "action" => action.to_string()
    )
    .increment(1);
}

/// 记录规则重载
#[inline]
pub fn record_rule_reload(status: &str) {
    metrics::counter!("eca_rule_reloads_total", "status" => status.to_string()).increment(1);
}

/// 更新活跃规则数
#[inline]
pub fn set_active_rules(count: usize) {
    metrics::gauge!("eca_active_rules").set(count as f64);
}
