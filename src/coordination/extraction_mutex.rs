//! 跨任务的抽取互斥锁
//!
//! 显式的持有者 + FIFO 等待队列，每个等待者一个 oneshot 唤醒信号。
//! 持有者通过 `ExtractionPermit` 表示，permit 被 drop 时一定释放，
//! 包括出错、取消以及 `acquire` 的 future 在等待中被丢弃的情况。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Debug)]
struct Holder {
    job_id: String,
    ticket: u64,
}

struct Waiter {
    job_id: String,
    ticket: u64,
    resume: oneshot::Sender<()>,
}

#[derive(Default)]
struct MutexState {
    holder: Option<Holder>,
    queue: VecDeque<Waiter>,
    next_ticket: u64,
}

impl MutexState {
    /// 交给下一个仍在等待的任务，没有则空闲
    fn hand_off(&mut self) {
        self.holder = None;
        while let Some(waiter) = self.queue.pop_front() {
            if waiter.resume.send(()).is_ok() {
                debug!("[任务 {}] 🔓 获得抽取锁（排队）", waiter.job_id);
                self.holder = Some(Holder {
                    job_id: waiter.job_id,
                    ticket: waiter.ticket,
                });
                return;
            }
        }
    }

    fn release_ticket(&mut self, ticket: u64) -> bool {
        if self.holder.as_ref().map(|h| h.ticket) == Some(ticket) {
            self.hand_off();
            true
        } else {
            false
        }
    }
}

/// 抽取互斥锁
///
/// 由编排器在启动时创建一次，通过 `Arc` 传给每个任务执行。
#[derive(Default)]
pub struct ExtractionMutex {
    state: Mutex<MutexState>,
}

impl ExtractionMutex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock_state(&self) -> MutexGuard<'_, MutexState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 等待直到成为唯一持有者
    pub async fn acquire(self: &Arc<Self>, job_id: &str) -> ExtractionPermit {
        loop {
            let (ticket, resume) = match self.try_enter(job_id) {
                Ok(permit) => return permit,
                Err(waiting) => waiting,
            };

            let mut pending = PendingAcquire {
                mutex: self.clone(),
                ticket,
                armed: true,
            };
            if resume.await.is_ok() {
                pending.armed = false;
                return ExtractionPermit::new(self.clone(), job_id, ticket);
            }

            // 发送端没有交接就被丢弃：清理旧票据后重新排队
            drop(pending);
            debug!("[任务 {}] 抽取锁唤醒信号丢失，重新排队", job_id);
        }
    }

    /// 空闲时直接成为持有者，否则排到队尾
    fn try_enter(
        self: &Arc<Self>,
        job_id: &str,
    ) -> Result<ExtractionPermit, (u64, oneshot::Receiver<()>)> {
        let mut state = self.lock_state();
        let ticket = state.next_ticket;
        state.next_ticket += 1;

        if state.holder.is_none() {
            state.holder = Some(Holder {
                job_id: job_id.to_string(),
                ticket,
            });
            debug!("[任务 {}] 🔓 获得抽取锁", job_id);
            return Ok(ExtractionPermit::new(self.clone(), job_id, ticket));
        }

        let (tx, rx) = oneshot::channel();
        state.queue.push_back(Waiter {
            job_id: job_id.to_string(),
            ticket,
            resume: tx,
        });
        debug!(
            "[任务 {}] ⏳ 等待抽取锁，前面还有 {} 个",
            job_id,
            state.queue.len() - 1
        );
        Err((ticket, rx))
    }

    /// 按任务 ID 释放；该任务不是当前持有者时返回 false
    pub fn release(&self, job_id: &str) -> bool {
        let mut state = self.lock_state();
        match state.holder.as_ref() {
            Some(holder) if holder.job_id == job_id => {
                debug!("[任务 {}] 🔒 释放抽取锁", job_id);
                state.hand_off();
                true
            }
            _ => false,
        }
    }

    /// 当前持有者
    pub fn holder(&self) -> Option<String> {
        self.lock_state().holder.as_ref().map(|h| h.job_id.clone())
    }

    /// 排队中的任务（按到达顺序）
    pub fn waiting(&self) -> Vec<String> {
        self.lock_state()
            .queue
            .iter()
            .map(|w| w.job_id.clone())
            .collect()
    }

    pub fn is_free(&self) -> bool {
        self.lock_state().holder.is_none()
    }
}

/// 等待中的 acquire 被丢弃时的清理：
/// 还在队列里就移除自己；已经被交接到就继续交给下一个。
struct PendingAcquire {
    mutex: Arc<ExtractionMutex>,
    ticket: u64,
    armed: bool,
}

impl Drop for PendingAcquire {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.mutex.lock_state();
        if !state.release_ticket(self.ticket) {
            state.queue.retain(|w| w.ticket != self.ticket);
        }
    }
}

/// 抽取锁的持有凭证，drop 时释放
pub struct ExtractionPermit {
    mutex: Arc<ExtractionMutex>,
    job_id: String,
    ticket: u64,
    released: bool,
}

impl std::fmt::Debug for ExtractionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionPermit")
            .field("job_id", &self.job_id)
            .field("ticket", &self.ticket)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl ExtractionPermit {
    fn new(mutex: Arc<ExtractionMutex>, job_id: &str, ticket: u64) -> Self {
        Self {
            mutex,
            job_id: job_id.to_string(),
            ticket,
            released: false,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// 显式释放
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.mutex.lock_state().release_ticket(self.ticket) {
            debug!("[任务 {}] 🔒 释放抽取锁", self.job_id);
        }
    }
}

impl Drop for ExtractionPermit {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::task;
    use tokio_test::{assert_pending, assert_ready};

    #[tokio::test]
    async fn uncontended_acquire_is_immediate() {
        let mutex = ExtractionMutex::new();
        let permit = mutex.acquire("a").await;
        assert_eq!(mutex.holder().as_deref(), Some("a"));
        drop(permit);
        assert!(mutex.is_free());
    }

    #[test]
    fn waiters_are_served_in_arrival_order() {
        let mutex = ExtractionMutex::new();
        let mut a = task::spawn(mutex.acquire("a"));
        let permit_a = assert_ready!(a.poll());

        let mut b = task::spawn(mutex.acquire("b"));
        let mut c = task::spawn(mutex.acquire("c"));
        let mut d = task::spawn(mutex.acquire("d"));
        assert_pending!(b.poll());
        assert_pending!(c.poll());
        assert_pending!(d.poll());
        assert_eq!(mutex.waiting(), vec!["b", "c", "d"]);

        permit_a.release();
        assert!(b.is_woken());
        assert!(!c.is_woken());
        assert_pending!(d.poll());
        assert_pending!(c.poll());
        let permit_b = assert_ready!(b.poll());
        assert_eq!(mutex.holder().as_deref(), Some("b"));

        drop(permit_b);
        let permit_c = assert_ready!(c.poll());
        assert_pending!(d.poll());
        drop(permit_c);
        let permit_d = assert_ready!(d.poll());
        assert_eq!(permit_d.job_id(), "d");
        drop(permit_d);
        assert!(mutex.is_free());
    }

    #[test]
    fn dropped_waiter_leaves_the_queue() {
        let mutex = ExtractionMutex::new();
        let permit_a = assert_ready!(task::spawn(mutex.acquire("a")).poll());

        let mut b = task::spawn(mutex.acquire("b"));
        let mut c = task::spawn(mutex.acquire("c"));
        assert_pending!(b.poll());
        assert_pending!(c.poll());

        drop(b);
        assert_eq!(mutex.waiting(), vec!["c"]);

        drop(permit_a);
        assert_ready!(c.poll());
    }

    #[test]
    fn granted_but_abandoned_waiter_passes_the_lock_on() {
        let mutex = ExtractionMutex::new();
        let permit_a = assert_ready!(task::spawn(mutex.acquire("a")).poll());

        let mut b = task::spawn(mutex.acquire("b"));
        let mut c = task::spawn(mutex.acquire("c"));
        assert_pending!(b.poll());
        assert_pending!(c.poll());

        drop(permit_a);
        assert_eq!(mutex.holder().as_deref(), Some("b"));
        // b 被交接后还没来得及运行就被丢弃
        drop(b);
        assert_eq!(mutex.holder().as_deref(), Some("c"));
        assert_ready!(c.poll());
    }

    #[test]
    fn release_by_job_id_only_affects_the_holder() {
        let mutex = ExtractionMutex::new();
        let permit_a = assert_ready!(task::spawn(mutex.acquire("a")).poll());
        let mut b = task::spawn(mutex.acquire("b"));
        assert_pending!(b.poll());

        assert!(!mutex.release("b"));
        assert!(mutex.release("a"));
        assert_eq!(mutex.holder().as_deref(), Some("b"));

        // 旧 permit 再释放不影响新的持有者
        drop(permit_a);
        assert_eq!(mutex.holder().as_deref(), Some("b"));
        drop(assert_ready!(b.poll()));
        assert!(mutex.is_free());
    }

    #[test]
    fn lost_wakeup_requeues_instead_of_granting() {
        let mutex = ExtractionMutex::new();
        let permit_a = assert_ready!(task::spawn(mutex.acquire("a")).poll());
        let mut b = task::spawn(mutex.acquire("b"));
        assert_pending!(b.poll());

        // 丢掉 b 的唤醒发送端，但不交接所有权
        mutex.lock_state().queue.clear();
        assert!(b.is_woken());
        assert_pending!(b.poll());
        assert_eq!(mutex.holder().as_deref(), Some("a"));
        assert_eq!(mutex.waiting(), vec!["b"]);

        drop(permit_a);
        let permit_b = assert_ready!(b.poll());
        assert_eq!(mutex.holder().as_deref(), Some("b"));
        drop(permit_b);
        assert!(mutex.is_free());
    }
}
