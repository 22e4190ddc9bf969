//! 协作式取消检查点
//!
//! 每个检查点都从任务存储重新读取状态，不缓存；
//! 心跳设置的内存标记只用于更快地发现取消。
//! 带租约令牌的探针还会确认租约仍属于本次执行，被接管时返回 `AppError::LeaseLost`。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::JobStore;
use crate::models::JobStatus;

/// 单个任务执行的取消探针
#[derive(Clone)]
pub struct CancellationProbe {
    store: Arc<dyn JobStore>,
    job_id: String,
    lease_token: Option<String>,
    flag: Arc<AtomicBool>,
}

impl CancellationProbe {
    pub fn new(store: Arc<dyn JobStore>, job_id: impl Into<String>) -> Self {
        Self {
            store,
            job_id: job_id.into(),
            lease_token: None,
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 检查点同时确认租约仍属于 `token`
    pub fn with_lease(mut self, token: impl Into<String>) -> Self {
        self.lease_token = Some(token.into());
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// 交给心跳共享的取消标记
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }

    pub fn is_flagged(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// 任务已取消（或已被删除）时返回 `AppError::Cancelled`，
    /// 租约已被接管时返回 `AppError::LeaseLost`
    pub async fn checkpoint(&self, stage: &str) -> AppResult<()> {
        let cancelled = match self.store.get(&self.job_id).await? {
            None => true,
            Some(record) => record.status == JobStatus::Cancelled,
        };
        if cancelled {
            self.flag.store(true, Ordering::SeqCst);
            info!("[任务 {}] ⚠️ 检查点 {}: 已取消", self.job_id, stage);
            return Err(AppError::cancelled(&self.job_id));
        }

        if let Some(token) = &self.lease_token {
            if !self.store.holds_lease(&self.job_id, token).await? {
                self.flag.store(true, Ordering::SeqCst);
                warn!("[任务 {}] ⚠️ 检查点 {}: 租约已被接管", self.job_id, stage);
                return Err(AppError::LeaseLost {
                    job_id: self.job_id.clone(),
                });
            }
        }

        if self.is_flagged() {
            info!("[任务 {}] ⚠️ 检查点 {}: 已取消 (标记)", self.job_id, stage);
            return Err(AppError::cancelled(&self.job_id));
        }
        Ok(())
    }
}
