//! 租约心跳
//!
//! 在任务执行期间定期续约，防止卡死检查把慢但仍活着的任务重新调度。
//! 续约时顺便读取任务状态：已取消、已被删除或租约已被其他执行接管，
//! 就设置停止标记并退出，本次执行在下一个检查点停止。
//! 心跳失败只记录日志，不影响正在进行的业务调用。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::infrastructure::JobStore;
use crate::models::JobStatus;

/// 心跳任务句柄，drop 时停止心跳
pub struct LockHeartbeat {
    handle: JoinHandle<()>,
}

impl LockHeartbeat {
    pub fn spawn(
        store: Arc<dyn JobStore>,
        job_id: String,
        token: String,
        interval: Duration,
        ttl: Duration,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                match store.get(&job_id).await {
                    Ok(Some(record)) if record.status == JobStatus::Cancelled => {
                        info!("[任务 {}] ⚠️ 心跳发现任务已取消", job_id);
                        cancelled.store(true, Ordering::SeqCst);
                        break;
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        info!("[任务 {}] ⚠️ 心跳发现任务已被删除", job_id);
                        cancelled.store(true, Ordering::SeqCst);
                        break;
                    }
                    Err(e) => {
                        warn!("[任务 {}] 心跳读取任务失败，停止心跳: {}", job_id, e);
                        break;
                    }
                }

                match store.extend_lease(&job_id, &token, ttl).await {
                    Ok(true) => debug!("[任务 {}] 💓 租约已续期", job_id),
                    Ok(false) => {
                        warn!("[任务 {}] 租约已不属于本次执行，停止心跳", job_id);
                        cancelled.store(true, Ordering::SeqCst);
                        break;
                    }
                    Err(e) => {
                        warn!("[任务 {}] 续约失败，停止心跳: {}", job_id, e);
                        break;
                    }
                }
            }
        });

        Self { handle }
    }

    /// 心跳是否已经自行停止
    pub fn is_stopped(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for LockHeartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::InMemoryJobStore;
    use crate::models::{JobOptions, JobRecord};
    use std::collections::BTreeMap;

    async fn started_store() -> Arc<InMemoryJobStore> {
        let store = Arc::new(InMemoryJobStore::new());
        store
            .insert(JobRecord::new(
                "j1".into(),
                "u".into(),
                vec!["https://x.test/prova/1".into()],
                BTreeMap::new(),
                JobOptions {
                    delay_between_urls_ms: 0,
                    max_retries: 1,
                },
            ))
            .await
            .unwrap();
        store
            .mark_started("j1", "tok", Duration::from_millis(100))
            .await
            .unwrap();
        store
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_lease_alive_past_its_duration() {
        let store = started_store().await;
        let flag = Arc::new(AtomicBool::new(false));
        let _hb = LockHeartbeat::spawn(
            store.clone(),
            "j1".into(),
            "tok".into(),
            Duration::from_millis(40),
            Duration::from_millis(100),
            flag.clone(),
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(store.stalled_jobs().await.unwrap().is_empty());
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn sets_flag_when_job_is_cancelled() {
        let store = started_store().await;
        let flag = Arc::new(AtomicBool::new(false));
        let hb = LockHeartbeat::spawn(
            store.clone(),
            "j1".into(),
            "tok".into(),
            Duration::from_millis(40),
            Duration::from_millis(100),
            flag.clone(),
        );

        store
            .transition("j1", &[JobStatus::Processing], JobStatus::Cancelled, None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(flag.load(Ordering::SeqCst));
        assert!(hb.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_stops_renewal() {
        let store = started_store().await;
        let hb = LockHeartbeat::spawn(
            store.clone(),
            "j1".into(),
            "tok".into(),
            Duration::from_millis(40),
            Duration::from_millis(100),
            Arc::new(AtomicBool::new(false)),
        );
        drop(hb);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.stalled_jobs().await.unwrap(), vec!["j1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn sets_flag_when_lease_belongs_to_another_execution() {
        let store = started_store().await;
        let flag = Arc::new(AtomicBool::new(false));
        let hb = LockHeartbeat::spawn(
            store.clone(),
            "j1".into(),
            "replaced".into(),
            Duration::from_millis(40),
            Duration::from_millis(100),
            flag.clone(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(flag.load(Ordering::SeqCst));
        assert!(hb.is_stopped());
        assert_eq!(
            store.get("j1").await.unwrap().unwrap().status,
            JobStatus::Processing
        );
    }
}
