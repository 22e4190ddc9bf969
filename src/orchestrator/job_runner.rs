//! 单个任务执行器 - 编排层
//!
//! ## 职责
//!
//! 负责一个任务的一次执行，是任务级别的编排器。
//!
//! ## 核心功能
//!
//! 1. **领取任务**：pending → processing，建立租约
//! 2. **心跳**：整个执行期间续约，并把取消信号写入内存标记
//! 3. **遍历 URL**：顺序执行 `UrlPipeline`，URL 之间按配置等待
//! 4. **失败隔离**：单个 URL 失败记录为失败结果，继续下一个
//! 5. **取消**：任何检查点发现取消，立即停止剩余全部 URL
//! 6. **收尾**：决定完成 / 取消 / 重试 / 失败

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{backoff_delay, Config};
use crate::coordination::{CancellationProbe, LockHeartbeat};
use crate::error::{AppError, AppResult};
use crate::infrastructure::{JobStore, Transition};
use crate::models::{JobRecord, JobStatus, StageResult};
use crate::services::{ProgressEmitter, ProgressStage};
use crate::utils::truncate_text;
use crate::workflow::{UrlCtx, UrlPipeline};

/// URL 处理统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UrlStats {
    pub succeeded: usize,
    pub failed: usize,
    /// 重试时已有结果而跳过的 URL
    pub skipped: usize,
}

/// 一次执行的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed(UrlStats),
    Cancelled,
    /// 稍后重新执行
    Retry { after: Duration },
    Failed { reason: String },
    /// 任务不存在或不处于 pending
    Skipped,
}

/// 执行参数
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub lock_duration: Duration,
    pub heartbeat_interval: Duration,
    pub retry_backoff_base_ms: u64,
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lock_duration: config.lock_duration(),
            heartbeat_interval: config.heartbeat_interval(),
            retry_backoff_base_ms: config.retry_backoff_base_ms,
        }
    }
}

/// 任务执行器
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    pipeline: Arc<UrlPipeline>,
    progress: ProgressEmitter,
    settings: RunnerSettings,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        pipeline: Arc<UrlPipeline>,
        progress: ProgressEmitter,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            store,
            pipeline,
            progress,
            settings,
        }
    }

    /// 执行一次任务
    pub async fn execute(&self, job_id: &str) -> ExecutionOutcome {
        let token = Uuid::new_v4().to_string();
        match self
            .store
            .mark_started(job_id, &token, self.settings.lock_duration)
            .await
        {
            Ok(Transition::Applied(_)) => {}
            Ok(Transition::Rejected(status)) => {
                info!("[任务 {}] 状态为 {}，跳过执行", job_id, status);
                return ExecutionOutcome::Skipped;
            }
            Ok(Transition::Missing) => {
                info!("[任务 {}] 任务已不存在，跳过执行", job_id);
                return ExecutionOutcome::Skipped;
            }
            Err(e) => {
                error!("[任务 {}] ❌ 无法领取任务: {}", job_id, e);
                return ExecutionOutcome::Skipped;
            }
        }

        let record = match self.store.get(job_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return ExecutionOutcome::Cancelled,
            Err(e) => {
                error!("[任务 {}] ❌ 无法读取任务: {}", job_id, e);
                return ExecutionOutcome::Skipped;
            }
        };

        log_job_start(&record);
        self.progress.emit(
            job_id,
            ProgressStage::Started,
            format!("第 {} 次执行，共 {} 个 URL", record.attempts_made, record.urls.len()),
        );

        let probe = CancellationProbe::new(self.store.clone(), job_id).with_lease(token.clone());
        let heartbeat = LockHeartbeat::spawn(
            self.store.clone(),
            job_id.to_string(),
            token.clone(),
            self.settings.heartbeat_interval,
            self.settings.lock_duration,
            probe.flag(),
        );

        let started = Instant::now();
        let result = self.process_urls(&record, &token, &probe).await;
        drop(heartbeat);

        let outcome = match result {
            Ok(stats) => self.finish_completed(job_id, &token, stats).await,
            Err(e) if e.is_cancellation() => self.finish_cancelled(job_id, &token).await,
            Err(AppError::LeaseLost { .. }) => {
                warn!("[任务 {}] ⚠️ 租约已被新的执行接管，本次执行退出", job_id);
                ExecutionOutcome::Skipped
            }
            Err(e) => self.finish_failed(&record, &token, e).await,
        };

        if let Err(e) = self.store.release_lease(job_id, &token).await {
            warn!("[任务 {}] 释放租约失败: {}", job_id, e);
        }
        log_job_complete(job_id, &outcome, started.elapsed());
        outcome
    }

    /// 顺序处理所有 URL
    ///
    /// 结果按 URL 顺序追加，所以已有结果的数量就是重试时应当跳过的前缀长度。
    async fn process_urls(
        &self,
        record: &JobRecord,
        token: &str,
        probe: &CancellationProbe,
    ) -> AppResult<UrlStats> {
        let job_id = record.job_id.as_str();
        let total = record.urls.len();
        let delay = Duration::from_millis(record.options.delay_between_urls_ms);
        let mut stats = UrlStats::default();
        let mut processed_any = false;

        for (index, url) in record.urls.iter().enumerate() {
            // 每次重新读取，重试时已有结果的 URL 不再处理
            let done = match self.store.get(job_id).await? {
                Some(fresh) => fresh.results.len(),
                None => return Err(AppError::cancelled(job_id)),
            };
            if index < done {
                info!("[任务 {}] URL {}/{} 已有结果，跳过", job_id, index + 1, total);
                stats.skipped += 1;
                continue;
            }

            if processed_any && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            processed_any = true;

            log_url_start(job_id, index + 1, total, url);
            if !self
                .store
                .set_current_url(job_id, token, Some(url.clone()))
                .await?
            {
                return Err(self.write_rejected(probe).await);
            }

            let ctx = UrlCtx::new(
                job_id.to_string(),
                url.clone(),
                index,
                total,
                record.configs.get(url).cloned().unwrap_or_default(),
            );
            let url_started = Instant::now();

            match self.pipeline.run(&ctx, probe).await {
                Ok(result) => {
                    info!("{} ✓ URL 处理成功", ctx);
                    let missing = result.missing_items.clone();
                    if !self.store.record_result(job_id, token, result, missing).await? {
                        return Err(self.write_rejected(probe).await);
                    }
                    stats.succeeded += 1;
                }
                Err(AppError::Stage(failure)) => {
                    error!("{} ❌ URL 处理失败: {}", ctx, failure);
                    self.progress.emit(
                        job_id,
                        ProgressStage::UrlFailed,
                        format!("{}: {}", url, truncate_text(&failure.to_string(), 200)),
                    );
                    let result = StageResult::failed(
                        url.clone(),
                        failure.to_string(),
                        url_started.elapsed().as_millis() as u64,
                    );
                    if !self.store.record_result(job_id, token, result, None).await? {
                        return Err(self.write_rejected(probe).await);
                    }
                    stats.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(stats)
    }

    /// 存储拒绝写入：任务已取消/删除，或者租约已被接管
    async fn write_rejected(&self, probe: &CancellationProbe) -> AppError {
        match probe.checkpoint("write_rejected").await {
            Err(e) => e,
            Ok(()) => AppError::LeaseLost {
                job_id: probe.job_id().to_string(),
            },
        }
    }

    async fn finish_completed(
        &self,
        job_id: &str,
        token: &str,
        stats: UrlStats,
    ) -> ExecutionOutcome {
        match self
            .store
            .finish(job_id, token, JobStatus::Completed, None)
            .await
        {
            Ok(Transition::Applied(_)) => {
                self.progress.emit(
                    job_id,
                    ProgressStage::Completed,
                    format!("成功 {}，失败 {}", stats.succeeded, stats.failed),
                );
                ExecutionOutcome::Completed(stats)
            }
            Ok(Transition::Rejected(JobStatus::Cancelled)) | Ok(Transition::Missing) => {
                self.progress
                    .emit(job_id, ProgressStage::Cancelled, "任务在结束前被取消");
                ExecutionOutcome::Cancelled
            }
            Ok(Transition::Rejected(status)) => {
                warn!("[任务 {}] 结束时租约已丢失（当前状态 {}）", job_id, status);
                ExecutionOutcome::Skipped
            }
            Err(e) => {
                error!("[任务 {}] ❌ 无法写入完成状态: {}", job_id, e);
                ExecutionOutcome::Skipped
            }
        }
    }

    async fn finish_cancelled(&self, job_id: &str, token: &str) -> ExecutionOutcome {
        // 通常管理操作已经写入 cancelled，这里只兜底仍在 processing 的情况
        match self
            .store
            .finish(job_id, token, JobStatus::Cancelled, None)
            .await
        {
            Ok(Transition::Applied(_))
            | Ok(Transition::Rejected(JobStatus::Cancelled))
            | Ok(Transition::Missing) => {}
            Ok(Transition::Rejected(status)) => {
                warn!("[任务 {}] 租约已丢失（当前状态 {}），不写入取消", job_id, status);
                return ExecutionOutcome::Skipped;
            }
            Err(e) => warn!("[任务 {}] 无法写入取消状态: {}", job_id, e),
        }
        self.progress
            .emit(job_id, ProgressStage::Cancelled, "任务已取消");
        ExecutionOutcome::Cancelled
    }

    /// 任务级失败：未超过次数则回到 pending 等待重试
    async fn finish_failed(
        &self,
        record: &JobRecord,
        token: &str,
        error: AppError,
    ) -> ExecutionOutcome {
        let job_id = record.job_id.as_str();
        let attempts = record.attempts_made;
        let reason = error.to_string();

        if attempts < record.options.max_retries {
            let after = backoff_delay(self.settings.retry_backoff_base_ms, attempts);
            warn!(
                "[任务 {}] ⚠️ 第 {} 次执行失败，{} ms 后重试: {}",
                job_id,
                attempts,
                after.as_millis(),
                reason
            );
            return match self
                .store
                .finish(job_id, token, JobStatus::Pending, Some(reason.clone()))
                .await
            {
                Ok(Transition::Applied(_)) => ExecutionOutcome::Retry { after },
                Ok(_) => ExecutionOutcome::Skipped,
                Err(e) => {
                    error!("[任务 {}] ❌ 无法安排重试，保持当前状态: {}", job_id, e);
                    ExecutionOutcome::Failed { reason }
                }
            };
        }

        error!(
            "[任务 {}] ❌ 已执行 {} 次，任务失败: {}",
            job_id, attempts, reason
        );
        match self
            .store
            .finish(job_id, token, JobStatus::Failed, Some(reason.clone()))
            .await
        {
            Ok(Transition::Applied(_)) => {}
            Ok(_) => {
                warn!("[任务 {}] 租约已丢失，不写入失败状态", job_id);
                return ExecutionOutcome::Skipped;
            }
            Err(e) => error!("[任务 {}] ❌ 无法写入失败状态: {}", job_id, e),
        }
        self.progress
            .emit(job_id, ProgressStage::Failed, reason.clone());
        ExecutionOutcome::Failed { reason }
    }
}

// ========== 日志辅助函数 ==========

fn log_job_start(record: &JobRecord) {
    info!("[任务 {}] 开始处理", record.job_id);
    info!("[任务 {}] 用户: {}", record.job_id, record.user_id);
    info!("[任务 {}] URL 总数: {}", record.job_id, record.urls.len());
    info!(
        "[任务 {}] 第 {}/{} 次执行",
        record.job_id, record.attempts_made, record.options.max_retries
    );
}

fn log_url_start(job_id: &str, index: usize, total: usize, url: &str) {
    info!("\n[任务 {}] {}", job_id, "─".repeat(30));
    info!("[任务 {}] 处理第 {}/{} 个 URL: {}", job_id, index, total, url);
}

fn log_job_complete(job_id: &str, outcome: &ExecutionOutcome, elapsed: Duration) {
    match outcome {
        ExecutionOutcome::Completed(stats) => {
            info!(
                "[任务 {}] URL 统计: 成功 {}, 失败 {}, 跳过 {}",
                job_id, stats.succeeded, stats.failed, stats.skipped
            );
            info!(
                "\n[任务 {}] ✅ 任务处理完成 ({} ms)\n",
                job_id,
                elapsed.as_millis()
            );
        }
        ExecutionOutcome::Cancelled => info!("[任务 {}] 🛑 任务已取消", job_id),
        ExecutionOutcome::Retry { after } => {
            info!("[任务 {}] 🔁 {} ms 后重试", job_id, after.as_millis())
        }
        ExecutionOutcome::Failed { reason } => error!("[任务 {}] ❌ 任务失败: {}", job_id, reason),
        ExecutionOutcome::Skipped => {}
    }
}
