// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::MetricsSettings;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

/// 初始化指标系统
///
/// 在配置的地址上启动 Prometheus 导出器并注册队列指标
pub fn init_metrics(settings: &MetricsSettings) {
    if !settings.enabled {
        info!("Metrics exporter disabled");
        return;
    }

    let addr: SocketAddr = match settings.listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Invalid metrics listen address {}: {}", settings.listen, e);
            return;
        }
    };

    // Ignore error if address is already in use (for development/testing)
    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        warn!("Failed to install Prometheus recorder: {}. This might happen if the port is already in use.", e);
        return;
    }

    describe_metrics();
    info!("Metrics exporter listening on {}", addr);
}

fn describe_metrics() {
    describe_counter!("jobs_enqueued_total", "Total number of jobs enqueued");
    describe_counter!("jobs_completed_total", "Total number of jobs completed");
    describe_counter!(
        "jobs_retried_total",
        "Total number of failed attempts scheduled for retry"
    );
    describe_counter!("jobs_failed_total", "Total number of jobs failed permanently");
    describe_counter!(
        "jobs_conflicts_total",
        "Total number of outcomes dropped because the job changed state while running"
    );
    describe_counter!(
        "jobs_reclaimed_total",
        "Total number of stale in-flight jobs reclaimed"
    );
    describe_counter!(
        "jobs_rate_limited_total",
        "Total number of ticks where a kind was held back by its rate ceiling"
    );
    describe_counter!("parents_finalized_total", "Total number of parents finalized");
    describe_counter!("dispatcher_ticks_total", "Total number of dispatcher ticks");
    describe_histogram!(
        "job_handler_duration_seconds",
        "Duration of handler calls in seconds"
    );
}
