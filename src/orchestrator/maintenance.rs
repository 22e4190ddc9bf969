//! 过期任务清理

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::StoreError;
use crate::infrastructure::JobStore;
use crate::models::{JobRecord, JobStatus};

/// 清理统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub completed: usize,
    pub failed: usize,
}

impl PruneReport {
    pub fn total(&self) -> usize {
        self.completed + self.failed
    }
}

fn finished_or_created(record: &JobRecord) -> DateTime<Utc> {
    record.finished_at.unwrap_or(record.created_at)
}

/// 按保留策略删除已结束的任务
///
/// - completed：超过保留时间，或者不在最新的 `completed_keep_count` 个之内
/// - failed / cancelled：超过保留时间
pub async fn prune_finished_jobs(
    store: &Arc<dyn JobStore>,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<PruneReport, StoreError> {
    let records = store.list().await?;
    let completed_cutoff = now - ChronoDuration::seconds(config.completed_retention_secs);
    let failed_cutoff = now - ChronoDuration::seconds(config.failed_retention_secs);

    let mut completed: Vec<&JobRecord> = records
        .iter()
        .filter(|r| r.status == JobStatus::Completed)
        .collect();
    completed.sort_by_key(|r| std::cmp::Reverse(finished_or_created(r)));

    let mut report = PruneReport::default();
    for (rank, record) in completed.iter().enumerate() {
        let expired =
            rank >= config.completed_keep_count || finished_or_created(record) < completed_cutoff;
        if expired && store.remove(&record.job_id).await? {
            debug!("[任务 {}] 已清理 (completed)", record.job_id);
            report.completed += 1;
        }
    }

    for record in records
        .iter()
        .filter(|r| matches!(r.status, JobStatus::Failed | JobStatus::Cancelled))
    {
        if finished_or_created(record) < failed_cutoff && store.remove(&record.job_id).await? {
            debug!("[任务 {}] 已清理 ({})", record.job_id, record.status);
            report.failed += 1;
        }
    }

    if report.total() > 0 {
        info!(
            "🧹 清理过期任务: completed {}, failed/cancelled {}",
            report.completed, report.failed
        );
    }
    Ok(report)
}
