//! 任务存储 - 基础设施层
//!
//! 共享的任务跟踪记录。任何执行者或管理员都可能修改 `status`，
//! 所以读取状态时必须每次从这里重新读取，不能跨挂起点缓存。
//!
//! 租约（lease）表示"某个执行者仍然活着"。处理中的任务如果租约过期，
//! 卡死检查会把它重新放回队列。写结果、写当前 URL 和结束任务都要求调用方
//! 仍持有租约令牌，被接管的旧执行写不进来。

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::models::{JobRecord, JobStatus, Progress, StageResult};

/// 状态切换结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// 已切换，携带切换前的状态
    Applied(JobStatus),
    /// 当前状态不允许切换
    Rejected(JobStatus),
    /// 任务不存在
    Missing,
}

impl Transition {
    pub fn applied(self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

/// 卡死处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalledOutcome {
    /// 重新放回 pending
    Requeued,
    /// 超过允许次数，任务失败
    Failed,
    /// 已不再卡死（租约被续上或状态已改变）
    Skipped,
}

/// 任务存储接口
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, record: JobRecord) -> Result<(), StoreError>;

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// 按创建时间升序列出所有任务
    async fn list(&self) -> Result<Vec<JobRecord>, StoreError>;

    async fn remove(&self, job_id: &str) -> Result<bool, StoreError>;

    /// 当前状态属于 `from` 时切换到 `to`
    ///
    /// 切换到终态时写入 `finished_at`；离开 processing 时释放租约。
    async fn transition(
        &self,
        job_id: &str,
        from: &[JobStatus],
        to: JobStatus,
        reason: Option<String>,
    ) -> Result<Transition, StoreError>;

    /// pending → processing，同时增加尝试次数并建立租约
    async fn mark_started(
        &self,
        job_id: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<Transition, StoreError>;

    /// 持有租约的执行结束任务：processing → `to`
    ///
    /// 任务不在 processing 或租约已不属于 `token` 时返回 `Rejected`。
    async fn finish(
        &self,
        job_id: &str,
        token: &str,
        to: JobStatus,
        reason: Option<String>,
    ) -> Result<Transition, StoreError>;

    /// 追加一个 URL 结果并重新计算进度（不改变状态）
    ///
    /// 只有持有租约的执行可以写入；任务不存在或租约不属于 `token` 时返回 false。
    async fn record_result(
        &self,
        job_id: &str,
        token: &str,
        result: StageResult,
        missing_items: Option<Vec<u32>>,
    ) -> Result<bool, StoreError>;

    async fn set_current_url(
        &self,
        job_id: &str,
        token: &str,
        url: Option<String>,
    ) -> Result<bool, StoreError>;

    /// 租约是否仍属于 `token`（不检查是否过期）
    async fn holds_lease(&self, job_id: &str, token: &str) -> Result<bool, StoreError>;

    /// 续约；任务不存在或令牌不匹配时返回 false
    async fn extend_lease(&self, job_id: &str, token: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    async fn release_lease(&self, job_id: &str, token: &str) -> Result<(), StoreError>;

    /// 租约已过期的处理中任务
    async fn stalled_jobs(&self) -> Result<Vec<String>, StoreError>;

    /// 处理一个卡死任务
    async fn mark_stalled(
        &self,
        job_id: &str,
        max_stalled_count: u32,
    ) -> Result<StalledOutcome, StoreError>;
}

#[derive(Debug, Clone)]
struct Lease {
    token: String,
    expires_at: Instant,
}

#[derive(Default)]
struct StoreState {
    records: HashMap<String, JobRecord>,
    leases: HashMap<String, Lease>,
}

impl StoreState {
    fn holds_lease(&self, job_id: &str, token: &str) -> bool {
        self.leases
            .get(job_id)
            .is_some_and(|lease| lease.token == token)
    }

    fn apply_transition(
        &mut self,
        job_id: &str,
        from: &[JobStatus],
        to: JobStatus,
        reason: Option<String>,
    ) -> Transition {
        let Some(record) = self.records.get_mut(job_id) else {
            return Transition::Missing;
        };

        let previous = record.status;
        if !from.contains(&previous) {
            return Transition::Rejected(previous);
        }

        record.status = to;
        if to.is_terminal() {
            record.finished_at = Some(Utc::now());
            record.current_url = None;
        }
        if reason.is_some() {
            record.failed_reason = reason;
        }
        if previous == JobStatus::Processing && to != JobStatus::Processing {
            self.leases.remove(job_id);
        }
        Transition::Applied(previous)
    }

    fn lease_expired(&self, job_id: &str, now: Instant) -> bool {
        self.leases
            .get(job_id)
            .map(|lease| lease.expires_at <= now)
            .unwrap_or(true)
    }
}

/// 进程内任务存储
#[derive(Default)]
pub struct InMemoryJobStore {
    state: RwLock<StoreState>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, record: JobRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.records.insert(record.job_id.clone(), record);
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.state.read().await.records.get(job_id).cloned())
    }

    async fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        let state = self.state.read().await;
        let mut records: Vec<JobRecord> = state.records.values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        Ok(records)
    }

    async fn remove(&self, job_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        state.leases.remove(job_id);
        Ok(state.records.remove(job_id).is_some())
    }

    async fn transition(
        &self,
        job_id: &str,
        from: &[JobStatus],
        to: JobStatus,
        reason: Option<String>,
    ) -> Result<Transition, StoreError> {
        let mut state = self.state.write().await;
        Ok(state.apply_transition(job_id, from, to, reason))
    }

    async fn mark_started(
        &self,
        job_id: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<Transition, StoreError> {
        let mut state = self.state.write().await;
        let Some(record) = state.records.get_mut(job_id) else {
            return Ok(Transition::Missing);
        };

        let previous = record.status;
        if previous != JobStatus::Pending {
            return Ok(Transition::Rejected(previous));
        }

        record.status = JobStatus::Processing;
        record.attempts_made += 1;
        record.failed_reason = None;
        if record.started_at.is_none() {
            record.started_at = Some(Utc::now());
        }
        state.leases.insert(
            job_id.to_string(),
            Lease {
                token: token.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(Transition::Applied(previous))
    }

    async fn finish(
        &self,
        job_id: &str,
        token: &str,
        to: JobStatus,
        reason: Option<String>,
    ) -> Result<Transition, StoreError> {
        let mut state = self.state.write().await;
        let Some(status) = state.records.get(job_id).map(|r| r.status) else {
            return Ok(Transition::Missing);
        };
        if !state.holds_lease(job_id, token) {
            return Ok(Transition::Rejected(status));
        }
        Ok(state.apply_transition(job_id, &[JobStatus::Processing], to, reason))
    }

    async fn record_result(
        &self,
        job_id: &str,
        token: &str,
        result: StageResult,
        missing_items: Option<Vec<u32>>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if !state.holds_lease(job_id, token) {
            return Ok(false);
        }
        let Some(record) = state.records.get_mut(job_id) else {
            return Ok(false);
        };
        if record.status != JobStatus::Processing {
            return Ok(false);
        }

        if let Some(missing) = missing_items.filter(|m| !m.is_empty()) {
            record.missing_items.insert(result.url.clone(), missing);
        }
        record.results.push(result);
        record.progress = Progress {
            total: record.urls.len(),
            completed: record.results.len(),
            failed: record.results.iter().filter(|r| !r.is_success()).count(),
        };
        record.current_url = None;
        Ok(true)
    }

    async fn set_current_url(
        &self,
        job_id: &str,
        token: &str,
        url: Option<String>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if !state.holds_lease(job_id, token) {
            return Ok(false);
        }
        match state.records.get_mut(job_id) {
            Some(record) => {
                record.current_url = url;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn holds_lease(&self, job_id: &str, token: &str) -> Result<bool, StoreError> {
        Ok(self.state.read().await.holds_lease(job_id, token))
    }

    async fn extend_lease(
        &self,
        job_id: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if !state.records.contains_key(job_id) {
            return Ok(false);
        }
        match state.leases.get_mut(job_id) {
            Some(lease) if lease.token == token => {
                lease.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lease(&self, job_id: &str, token: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state
            .leases
            .get(job_id)
            .is_some_and(|lease| lease.token == token)
        {
            state.leases.remove(job_id);
        }
        Ok(())
    }

    async fn stalled_jobs(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.read().await;
        let now = Instant::now();
        let mut stalled: Vec<String> = state
            .records
            .values()
            .filter(|r| r.status == JobStatus::Processing && state.lease_expired(&r.job_id, now))
            .map(|r| r.job_id.clone())
            .collect();
        stalled.sort();
        Ok(stalled)
    }

    async fn mark_stalled(
        &self,
        job_id: &str,
        max_stalled_count: u32,
    ) -> Result<StalledOutcome, StoreError> {
        let mut state = self.state.write().await;
        let now = Instant::now();
        if !state.lease_expired(job_id, now) {
            return Ok(StalledOutcome::Skipped);
        }
        let Some(record) = state.records.get_mut(job_id) else {
            return Ok(StalledOutcome::Skipped);
        };
        if record.status != JobStatus::Processing {
            return Ok(StalledOutcome::Skipped);
        }

        record.stalled_count += 1;
        let outcome = if record.stalled_count > max_stalled_count {
            record.status = JobStatus::Failed;
            record.finished_at = Some(Utc::now());
            record.failed_reason = Some("job stalled more than allowable limit".to_string());
            StalledOutcome::Failed
        } else {
            record.status = JobStatus::Pending;
            StalledOutcome::Requeued
        };
        record.current_url = None;
        state.leases.remove(job_id);
        Ok(outcome)
    }
}
