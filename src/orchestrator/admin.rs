//! 管理操作
//!
//! 给运维使用：查看全部任务、按状态批量删除、强制删除、清空队列。
//! 强制删除只删除记录，不会动抽取锁；正在抽取的执行者在下一个检查点发现任务不存在后自行退出。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::Transition;
use crate::models::{JobRecord, JobStatus, ProgressView};
use crate::orchestrator::job_queue::JobQueue;
use crate::services::ProgressStage;

/// 单个任务的详细信息
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetail {
    pub job_id: String,
    pub user_id: String,
    pub status: JobStatus,
    pub progress: ProgressView,
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    pub attempts_made: u32,
    pub stalled_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
}

impl From<&JobRecord> for JobDetail {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id.clone(),
            user_id: record.user_id.clone(),
            status: record.status,
            progress: record.to_status_view().progress,
            urls: record.urls.clone(),
            current_url: record.current_url.clone(),
            attempts_made: record.attempts_made,
            stalled_count: record.stalled_count,
            created_at: record.created_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
            failed_reason: record.failed_reason.clone(),
        }
    }
}

/// 队列总览
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueOverview {
    pub counts: BTreeMap<JobStatus, usize>,
    pub jobs: Vec<JobDetail>,
    /// 当前持有抽取锁的任务
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_holder: Option<String>,
    pub extraction_waiting: Vec<String>,
}

/// 清空结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub removed: usize,
    pub by_status: BTreeMap<JobStatus, usize>,
    /// 被强制中断的执行中任务
    pub interrupted: Vec<String>,
}

impl JobQueue {
    /// 按状态统计并列出全部任务
    pub async fn list_all_jobs_detailed(&self) -> AppResult<QueueOverview> {
        let records = self.inner.store.list().await?;
        let mut counts: BTreeMap<JobStatus, usize> =
            JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for record in &records {
            *counts.entry(record.status).or_default() += 1;
        }

        Ok(QueueOverview {
            counts,
            jobs: records.iter().map(JobDetail::from).collect(),
            extraction_holder: self.inner.mutex.holder(),
            extraction_waiting: self.inner.mutex.waiting(),
        })
    }

    /// 删除某个状态下的全部任务
    ///
    /// processing 的任务需要逐个使用 `force_remove`。
    pub async fn remove_by_status(&self, status: JobStatus) -> AppResult<usize> {
        if status == JobStatus::Processing {
            return Err(AppError::Validation(
                "processing 状态的任务请使用 force_remove".to_string(),
            ));
        }

        let mut removed = 0;
        for record in self.inner.store.list().await? {
            if record.status == status && self.inner.store.remove(&record.job_id).await? {
                removed += 1;
            }
        }
        info!("🗑️ 删除 {} 状态的任务 {} 个", status, removed);
        Ok(removed)
    }

    /// 无论状态如何都删除任务，返回任务是否存在
    pub async fn force_remove(&self, job_id: &str) -> AppResult<bool> {
        let store = &self.inner.store;
        let transition = store
            .transition(
                job_id,
                &[JobStatus::Pending, JobStatus::Processing],
                JobStatus::Cancelled,
                Some("force removed".to_string()),
            )
            .await?;
        if transition == Transition::Missing {
            return Ok(false);
        }

        if transition == Transition::Applied(JobStatus::Processing) {
            warn!(
                "[任务 {}] ⚠️ 强制删除执行中的任务，执行者将在下一个检查点退出",
                job_id
            );
            self.inner
                .progress
                .emit(job_id, ProgressStage::Cancelled, "任务被强制删除");
        }

        let removed = store.remove(job_id).await?;
        info!("[任务 {}] 🗑️ 已强制删除", job_id);
        Ok(removed)
    }

    /// 删除所有状态的全部任务，执行中的任务按强制删除处理
    pub async fn drain_all(&self) -> AppResult<DrainReport> {
        let mut report = DrainReport::default();
        for record in self.inner.store.list().await? {
            let removed = if record.status == JobStatus::Processing {
                let removed = self.force_remove(&record.job_id).await?;
                if removed {
                    report.interrupted.push(record.job_id.clone());
                }
                removed
            } else {
                self.inner.store.remove(&record.job_id).await?
            };

            if removed {
                report.removed += 1;
                *report.by_status.entry(record.status).or_default() += 1;
            }
        }

        warn!(
            "🧨 队列已清空: 删除 {} 个任务，其中 {} 个执行中",
            report.removed,
            report.interrupted.len()
        );
        Ok(report)
    }
}
