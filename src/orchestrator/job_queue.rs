//! 任务队列 - 编排层
//!
//! ## 职责
//!
//! 整个系统的入口，负责任务的提交、调度和资源管理。
//!
//! ## 核心功能
//!
//! 1. **提交**：校验输入，每个 URL 一个任务（或整批一个任务）
//! 2. **并发控制**：使用 Semaphore 限制同时执行的任务数量
//! 3. **调度**：mpsc 通道按提交顺序分发，tokio::spawn 执行
//! 4. **重试**：任务级失败按指数退避重新入队，取消的任务不重试
//! 5. **卡死检查**：定期把租约过期的任务放回队列
//! 6. **维护**：定期清理过期任务和草稿
//!
//! ## 设计特点
//!
//! - **资源所有者**：唯一持有 `ExtractionMutex` 和 `JobRunner` 的模块
//! - **向下委托**：委托 `JobRunner` 执行单个任务

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::coordination::ExtractionMutex;
use crate::error::{AppError, AppResult};
use crate::infrastructure::{InMemoryJobStore, JobStore, StalledOutcome, Transition};
use crate::models::{
    BatchSubmission, JobFilters, JobOptions, JobPage, JobRecord, JobStatus, JobStatusView,
    JobSummary, PipelineOptions, UrlConfig,
};
use crate::orchestrator::job_runner::{ExecutionOutcome, JobRunner, RunnerSettings};
use crate::orchestrator::maintenance::prune_finished_jobs;
use crate::orchestrator::validation::validate_submission;
use crate::services::{DraftStore, ProgressEmitter, ProgressEvent, ProgressStage};
use crate::workflow::{Collaborators, PipelineSettings, UrlPipeline};

/// 队列共享状态，调度任务和后台任务都持有它
pub(crate) struct QueueInner {
    pub(crate) config: Config,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) mutex: Arc<ExtractionMutex>,
    pub(crate) progress: ProgressEmitter,
    drafts: Arc<dyn DraftStore>,
    runner: JobRunner,
    dispatch: mpsc::UnboundedSender<String>,
    seq: AtomicU64,
}

/// 任务队列
pub struct JobQueue {
    pub(crate) inner: Arc<QueueInner>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl JobQueue {
    /// 使用进程内存储启动队列
    pub fn start(config: Config, collaborators: Collaborators) -> Self {
        Self::start_with_store(config, collaborators, Arc::new(InMemoryJobStore::new()))
    }

    /// 使用指定的存储启动队列
    pub fn start_with_store(
        config: Config,
        collaborators: Collaborators,
        store: Arc<dyn JobStore>,
    ) -> Self {
        Self::start_with_settings(
            config.clone(),
            collaborators,
            store,
            PipelineSettings::from_config(&config),
        )
    }

    /// 启动队列并指定流程参数
    pub fn start_with_settings(
        config: Config,
        collaborators: Collaborators,
        store: Arc<dyn JobStore>,
        settings: PipelineSettings,
    ) -> Self {
        log_startup(&config);

        let mutex = ExtractionMutex::new();
        let progress = ProgressEmitter::default();
        let drafts = collaborators.drafts.clone();
        let pipeline = Arc::new(UrlPipeline::new(
            collaborators,
            mutex.clone(),
            progress.clone(),
            settings,
        ));
        let runner = JobRunner::new(
            store.clone(),
            pipeline,
            progress.clone(),
            RunnerSettings::from_config(&config),
        );

        let (dispatch, rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(QueueInner {
            config,
            store,
            mutex,
            progress,
            drafts,
            runner,
            dispatch,
            seq: AtomicU64::new(0),
        });

        let tasks = vec![
            tokio::spawn(dispatch_loop(inner.clone(), rx, shutdown_rx.clone())),
            tokio::spawn(stall_loop(inner.clone(), shutdown_rx.clone())),
            tokio::spawn(maintenance_loop(inner.clone(), shutdown_rx)),
        ];

        Self {
            inner,
            shutdown,
            tasks,
        }
    }

    // ========== 提交 ==========

    /// 每个 URL 创建一个任务
    pub async fn submit_batch(&self, submission: BatchSubmission) -> AppResult<Vec<String>> {
        validate_submission(&submission, &self.inner.config)?;
        let options = self.inner.resolve_options(&submission.options);

        let mut job_ids = Vec::with_capacity(submission.urls.len());
        for url in &submission.urls {
            let configs: BTreeMap<String, UrlConfig> = submission
                .configs
                .get(url)
                .map(|c| BTreeMap::from([(url.clone(), c.clone())]))
                .unwrap_or_default();
            let job_id = self
                .inner
                .create_job(&submission.user_id, vec![url.clone()], configs, options)
                .await?;
            job_ids.push(job_id);
        }

        info!(
            "✓ 用户 {} 提交 {} 个 URL，创建 {} 个任务",
            submission.user_id,
            submission.urls.len(),
            job_ids.len()
        );
        Ok(job_ids)
    }

    /// 整批一个任务，URL 顺序处理
    pub async fn submit_grouped(&self, submission: BatchSubmission) -> AppResult<String> {
        validate_submission(&submission, &self.inner.config)?;
        let options = self.inner.resolve_options(&submission.options);
        let job_id = self
            .inner
            .create_job(
                &submission.user_id,
                submission.urls.clone(),
                submission.configs.clone(),
                options,
            )
            .await?;
        info!(
            "[任务 {}] 用户 {} 提交 {} 个 URL",
            job_id,
            submission.user_id,
            submission.urls.len()
        );
        Ok(job_id)
    }

    // ========== 查询 ==========

    pub async fn get_status(&self, job_id: &str) -> AppResult<Option<JobStatusView>> {
        Ok(self
            .inner
            .store
            .get(job_id)
            .await?
            .map(|record| record.to_status_view()))
    }

    /// 按用户分页列出任务，创建时间倒序；`page` 从 1 开始
    pub async fn list_jobs(
        &self,
        user_id: &str,
        filters: &JobFilters,
        page: usize,
        limit: usize,
    ) -> AppResult<JobPage> {
        let mut records: Vec<JobRecord> = self
            .inner
            .store
            .list()
            .await?
            .into_iter()
            .filter(|r| r.user_id == user_id && filters.matches(r))
            .collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.job_id.cmp(&a.job_id))
        });

        let page = page.max(1);
        let total = records.len();
        let jobs = records
            .iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .map(JobSummary::from)
            .collect();
        Ok(JobPage {
            jobs,
            total,
            page,
            limit,
        })
    }

    // ========== 取消 ==========

    /// 取消任务
    ///
    /// pending 的任务直接删除；processing 的任务在下一个检查点停止。
    pub async fn cancel(&self, job_id: &str) -> AppResult<()> {
        let store = &self.inner.store;
        let record = store
            .get(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(job_id.to_string()))?;

        match record.status {
            JobStatus::Completed => {
                return Err(AppError::InvalidState {
                    job_id: job_id.to_string(),
                    reason: "cannot cancel completed job".to_string(),
                })
            }
            JobStatus::Failed => {
                return Err(AppError::InvalidState {
                    job_id: job_id.to_string(),
                    reason: "cannot cancel failed job".to_string(),
                })
            }
            JobStatus::Cancelled => return Ok(()),
            JobStatus::Pending | JobStatus::Processing => {}
        }

        let transition = store
            .transition(
                job_id,
                &[JobStatus::Pending, JobStatus::Processing],
                JobStatus::Cancelled,
                Some("cancelled by user".to_string()),
            )
            .await?;

        match transition {
            Transition::Applied(JobStatus::Pending) => {
                store.remove(job_id).await?;
                info!("[任务 {}] 🛑 排队中的任务已取消并删除", job_id);
                self.inner
                    .progress
                    .emit(job_id, ProgressStage::Cancelled, "排队中被取消");
                Ok(())
            }
            Transition::Applied(_) => {
                info!("[任务 {}] 🛑 已标记取消，将在下一个检查点停止", job_id);
                Ok(())
            }
            Transition::Rejected(JobStatus::Cancelled) => Ok(()),
            Transition::Rejected(status) => Err(AppError::InvalidState {
                job_id: job_id.to_string(),
                reason: format!("cannot cancel {} job", status),
            }),
            Transition::Missing => Err(AppError::NotFound(job_id.to_string())),
        }
    }

    // ========== 其他 ==========

    /// 订阅进度事件
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.progress.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.inner.store
    }

    pub fn extraction_mutex(&self) -> &Arc<ExtractionMutex> {
        &self.inner.mutex
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// 停止调度和后台任务
    ///
    /// 已经在执行的任务不会被打断，它们会按自己的节奏结束。
    pub async fn close(self) {
        info!("正在关闭任务队列...");
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("后台任务退出异常: {}", e);
            }
        }
        info!("✓ 任务队列已关闭");
    }
}

impl QueueInner {
    fn resolve_options(&self, options: &PipelineOptions) -> JobOptions {
        JobOptions {
            delay_between_urls_ms: options
                .delay_between_urls_ms
                .unwrap_or(self.config.default_delay_between_urls_ms),
            max_retries: options
                .max_retries
                .unwrap_or(self.config.default_max_retries)
                .max(1),
        }
    }

    /// `batch-<millis>-<userId>-<seq>`
    fn next_job_id(&self, user_id: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!(
            "batch-{}-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            user_id,
            seq
        )
    }

    async fn create_job(
        &self,
        user_id: &str,
        urls: Vec<String>,
        configs: BTreeMap<String, UrlConfig>,
        options: JobOptions,
    ) -> AppResult<String> {
        let job_id = self.next_job_id(user_id);
        let record = JobRecord::new(job_id.clone(), user_id.to_string(), urls, configs, options);
        self.store.insert(record).await?;
        self.enqueue(job_id.clone());
        Ok(job_id)
    }

    fn enqueue(&self, job_id: String) {
        if let Err(e) = self.dispatch.send(job_id) {
            warn!("[任务 {}] 调度通道已关闭，任务保持 pending", e.0);
        }
    }

    /// 退避后重新入队
    fn enqueue_after(self: &Arc<Self>, job_id: String, after: Duration) {
        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            inner.enqueue(job_id);
        });
    }

    async fn run_job(self: &Arc<Self>, job_id: String) {
        if let ExecutionOutcome::Retry { after } = self.runner.execute(&job_id).await {
            self.enqueue_after(job_id, after);
        }
    }

    async fn check_stalled(&self) {
        let stalled = match self.store.stalled_jobs().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("⚠️ 卡死检查失败: {}", e);
                return;
            }
        };

        for job_id in stalled {
            match self
                .store
                .mark_stalled(&job_id, self.config.max_stalled_count)
                .await
            {
                Ok(StalledOutcome::Requeued) => {
                    warn!("[任务 {}] ⚠️ 租约过期，重新排队", job_id);
                    self.enqueue(job_id);
                }
                Ok(StalledOutcome::Failed) => {
                    error!("[任务 {}] ❌ 卡死次数超过上限，任务失败", job_id);
                    self.progress.emit(
                        &job_id,
                        ProgressStage::Failed,
                        "job stalled more than allowable limit",
                    );
                }
                Ok(StalledOutcome::Skipped) => {}
                Err(e) => warn!("[任务 {}] 卡死处理失败: {}", job_id, e),
            }
        }
    }

    async fn run_maintenance(&self) {
        if let Err(e) = prune_finished_jobs(&self.store, &self.config, chrono::Utc::now()).await {
            warn!("⚠️ 清理过期任务失败: {}", e);
        }
        match self.drafts.delete_expired().await {
            Ok(0) => {}
            Ok(n) => info!("🧹 清理过期草稿 {} 个", n),
            Err(e) => warn!("⚠️ 清理过期草稿失败: {}", e),
        }
    }
}

// ========== 后台任务 ==========

async fn dispatch_loop(
    inner: Arc<QueueInner>,
    mut rx: mpsc::UnboundedReceiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(inner.config.max_concurrent_jobs.max(1)));

    loop {
        let job_id = tokio::select! {
            _ = shutdown.changed() => break,
            next = rx.recv() => match next {
                Some(job_id) => job_id,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        debug!("[任务 {}] 分配执行槽位", job_id);
        let inner = inner.clone();
        tokio::spawn(async move {
            let _permit = permit;
            inner.run_job(job_id).await;
        });
    }
    debug!("调度循环已退出");
}

async fn stall_loop(inner: Arc<QueueInner>, mut shutdown: watch::Receiver<bool>) {
    let period = inner.config.stalled_check_interval();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => inner.check_stalled().await,
        }
    }
    debug!("卡死检查已退出");
}

async fn maintenance_loop(inner: Arc<QueueInner>, mut shutdown: watch::Receiver<bool>) {
    let period = inner.config.maintenance_interval();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => inner.run_maintenance().await,
        }
    }
    debug!("维护任务已退出");
}

// ========== 日志辅助函数 ==========

fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 任务队列启动");
    info!("📊 最大并发任务数: {}", config.max_concurrent_jobs);
    info!(
        "⏱️ 租约 {} ms / 心跳 {} ms / 卡死检查 {} ms",
        config.lock_duration_ms, config.heartbeat_interval_ms, config.stalled_check_interval_ms
    );
    info!("{}", "=".repeat(60));
}
