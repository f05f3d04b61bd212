// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::parent::Reconciliation;
use crate::domain::repositories::job_repository::JobRepository;
use crate::domain::services::completion_service::CompletionTracker;
use crate::utils::errors::WorkerError;
use crate::workers::worker::Worker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// 一次维护运行的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub reclaimed: u64,
    pub exhausted: u64,
    pub finalized_parents: u64,
    pub purged: u64,
}

/// 保留与维护工作器
///
/// 定期回收所有通道的过期租约、补做父实体对账，并删除超过保留期的终态作业
pub struct RetentionWorker {
    repository: Arc<dyn JobRepository>,
    tracker: Arc<CompletionTracker>,
    retention: chrono::Duration,
    lease_timeout: chrono::Duration,
    interval: Duration,
}

impl RetentionWorker {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        tracker: Arc<CompletionTracker>,
        retention_days: u32,
        lease_timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            repository,
            tracker,
            retention: chrono::Duration::days(i64::from(retention_days)),
            lease_timeout: chrono::Duration::from_std(lease_timeout)
                .unwrap_or_else(|_| chrono::Duration::minutes(15)),
            interval,
        }
    }

    /// 执行一次维护
    ///
    /// # 参数
    ///
    /// * `now` - 当前时间
    ///
    /// # 返回值
    ///
    /// 返回本次维护的汇总
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<MaintenanceReport, WorkerError> {
        let reclaim = self
            .repository
            .reclaim_stale_in_flight(None, self.lease_timeout, now)
            .await?;

        let mut finalized_parents = 0;
        for parent in &reclaim.touched_parents {
            match self.tracker.reconcile(parent, now).await {
                Ok(Reconciliation::Finalized(_)) => finalized_parents += 1,
                Ok(_) => {}
                Err(e) => error!("Failed to reconcile parent {}: {}", parent, e),
            }
        }

        // Look back two intervals so a crash between runs is still covered
        let lookback = chrono::Duration::from_std(self.interval * 2)
            .unwrap_or_else(|_| chrono::Duration::hours(2));
        finalized_parents += self.tracker.sweep(now - lookback, now).await?;

        let purged = self
            .repository
            .purge_terminal_before(now - self.retention, None)
            .await?;

        Ok(MaintenanceReport {
            reclaimed: reclaim.requeued,
            exhausted: reclaim.exhausted,
            finalized_parents,
            purged,
        })
    }

    /// 启动后台运行
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                error!("{} stopped: {}", self.name(), e);
            }
        })
    }
}

#[async_trait]
impl Worker for RetentionWorker {
    async fn run(&self) -> Result<(), WorkerError> {
        info!("Retention worker started");

        let mut interval = tokio::time::interval(self.interval);

        loop {
            interval.tick().await;

            match self.run_once(Utc::now()).await {
                Ok(report) => {
                    if report != MaintenanceReport::default() {
                        info!(
                            "Maintenance: reclaimed {}, exhausted {}, finalized {} parent(s), purged {} job(s)",
                            report.reclaimed, report.exhausted, report.finalized_parents, report.purged
                        );
                    }
                }
                Err(e) => {
                    error!("Maintenance run failed: {}", e);
                }
            }
        }
    }

    fn name(&self) -> &str {
        "retention_worker"
    }
}
