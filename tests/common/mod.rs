#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use question_batch_queue::error::{ExtractError, ServiceError, StoreError};
use question_batch_queue::infrastructure::{InMemoryJobStore, JobStore, StalledOutcome, Transition};
use question_batch_queue::models::{
    CategorizationResult, Draft, EnrichmentContext, ExtractedItem, ExtractionMetadata,
    ExtractionResult, JobRecord, JobStatus, QuestionItem, RewriteResult, StageResult,
};
use question_batch_queue::services::extractor::ProgressSink;
use question_batch_queue::services::{
    Categorizer, DraftStore, ExtractOptions, ExtractProgress, Extractor, MediaUploader, Rewriter,
};
use question_batch_queue::{Collaborators, Config, JobQueue, PipelineSettings};

// ========== 抽取器 ==========

/// 可控的抽取器
///
/// - 记录同时进行的抽取数量
/// - `fail` 中的 URL 返回 `NoResultsFound`
/// - `hold` 中的 URL 会等到 `release()` 才返回
/// - 每次开始抽取都会把 URL 发到 `started` 通道
pub struct FakeExtractor {
    delay: Duration,
    fail: HashSet<String>,
    hold: HashSet<String>,
    with_image: bool,
    gate: Notify,
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: Mutex<Vec<String>>,
    started: mpsc::UnboundedSender<String>,
}

pub struct FakeExtractorBuilder {
    delay: Duration,
    fail: HashSet<String>,
    hold: HashSet<String>,
    with_image: bool,
}

impl FakeExtractorBuilder {
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail(mut self, url: &str) -> Self {
        self.fail.insert(url.to_string());
        self
    }

    pub fn hold(mut self, url: &str) -> Self {
        self.hold.insert(url.to_string());
        self
    }

    /// 每道题目附带一张写在工作目录里的本地图片
    pub fn with_image(mut self) -> Self {
        self.with_image = true;
        self
    }

    pub fn build(self) -> (Arc<FakeExtractor>, mpsc::UnboundedReceiver<String>) {
        let (started, rx) = mpsc::unbounded_channel();
        let extractor = FakeExtractor {
            delay: self.delay,
            fail: self.fail,
            hold: self.hold,
            with_image: self.with_image,
            gate: Notify::new(),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            started,
        };
        (Arc::new(extractor), rx)
    }
}

impl FakeExtractor {
    pub fn builder() -> FakeExtractorBuilder {
        FakeExtractorBuilder {
            delay: Duration::from_millis(10),
            fail: HashSet::new(),
            hold: HashSet::new(),
            with_image: false,
        }
    }

    /// 放行一个被 hold 住的抽取
    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(
        &self,
        identifier: &str,
        options: &ExtractOptions,
        progress: ProgressSink<'_>,
    ) -> Result<ExtractionResult, ExtractError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.calls.lock().unwrap().push(identifier.to_string());
        let _ = self.started.send(identifier.to_string());
        progress(ExtractProgress::new("extracting", identifier));

        if self.hold.contains(identifier) {
            self.gate.notified().await;
        }
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail.contains(identifier) {
            return Err(ExtractError::NoResultsFound(identifier.to_string()));
        }

        let mut items = vec![
            item("1", "Questão um"),
            item("2", "Questão dois"),
        ];
        let mut working_files = Vec::new();
        if self.with_image {
            tokio::fs::create_dir_all(&options.work_dir).await?;
            for (i, it) in items.iter_mut().enumerate() {
                let path = options.work_dir.join(format!("q{}-1.png", i + 1));
                tokio::fs::write(&path, b"png").await?;
                it.images.push(path.to_string_lossy().into_owned());
                working_files.push(path);
            }
        }

        Ok(ExtractionResult {
            items,
            metadata: ExtractionMetadata {
                exam_name: Some("Prova Teste".to_string()),
                exam_year: Some(2024),
                ..Default::default()
            },
            working_files,
        })
    }
}

fn item(number: &str, statement: &str) -> ExtractedItem {
    ExtractedItem {
        number: Some(number.to_string()),
        statement: statement.to_string(),
        alternatives: vec!["A".into(), "B".into()],
        correct: Some(0),
        comment: format!("comentário {}", number),
        ..Default::default()
    }
}

// ========== AI 增强 ==========

pub struct FakeCategorizer;

#[async_trait]
impl Categorizer for FakeCategorizer {
    async fn categorize_batch(
        &self,
        items: &[QuestionItem],
    ) -> Result<Vec<CategorizationResult>, ServiceError> {
        Ok(items
            .iter()
            .rev()
            .map(|q| CategorizationResult {
                item_id: q.temp_id.clone(),
                tags: vec!["Clínica Médica".to_string()],
            })
            .collect())
    }
}

pub struct FakeRewriter;

#[async_trait]
impl Rewriter for FakeRewriter {
    async fn rewrite_batch(
        &self,
        items: &[QuestionItem],
        _context: &EnrichmentContext,
    ) -> Result<Vec<RewriteResult>, ServiceError> {
        Ok(items
            .iter()
            .map(|q| RewriteResult {
                item_id: q.temp_id.clone(),
                rewritten_text: format!("reescrito: {}", q.comment),
            })
            .collect())
    }
}

/// 超过增强超时才返回的改写器
pub struct SlowRewriter {
    pub delay: Duration,
}

#[async_trait]
impl Rewriter for SlowRewriter {
    async fn rewrite_batch(
        &self,
        items: &[QuestionItem],
        context: &EnrichmentContext,
    ) -> Result<Vec<RewriteResult>, ServiceError> {
        tokio::time::sleep(self.delay).await;
        FakeRewriter.rewrite_batch(items, context).await
    }
}

// ========== 媒体与草稿 ==========

/// 记录上传的对象 key，同一 key 返回同一 URL
#[derive(Default)]
pub struct FakeUploader {
    pub keys: Mutex<Vec<String>>,
}

#[async_trait]
impl MediaUploader for FakeUploader {
    async fn upload(&self, _local_path: &Path, key: &str) -> Result<String, ServiceError> {
        self.keys.lock().unwrap().push(key.to_string());
        Ok(format!("https://cdn.test/{}", key))
    }
}

#[derive(Default)]
pub struct MemoryDrafts {
    pub drafts: Mutex<HashMap<String, Draft>>,
}

#[async_trait]
impl DraftStore for MemoryDrafts {
    async fn create(&self, draft: &Draft) -> Result<String, ServiceError> {
        let mut drafts = self.drafts.lock().unwrap();
        let id = format!("draft-{}", drafts.len() + 1);
        drafts.insert(id.clone(), draft.clone());
        Ok(id)
    }

    async fn delete_expired(&self) -> Result<usize, ServiceError> {
        Ok(0)
    }
}

// ========== 存储 ==========

/// 前 N 次写入结果时报告存储不可用
pub struct FlakyStore {
    inner: InMemoryJobStore,
    failures_left: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_results(times: usize) -> Self {
        Self {
            inner: InMemoryJobStore::new(),
            failures_left: AtomicUsize::new(times),
        }
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn insert(&self, record: JobRecord) -> Result<(), StoreError> {
        self.inner.insert(record).await
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        self.inner.get(job_id).await
    }

    async fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        self.inner.list().await
    }

    async fn remove(&self, job_id: &str) -> Result<bool, StoreError> {
        self.inner.remove(job_id).await
    }

    async fn transition(
        &self,
        job_id: &str,
        from: &[JobStatus],
        to: JobStatus,
        reason: Option<String>,
    ) -> Result<Transition, StoreError> {
        self.inner.transition(job_id, from, to, reason).await
    }

    async fn mark_started(
        &self,
        job_id: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<Transition, StoreError> {
        self.inner.mark_started(job_id, token, ttl).await
    }

    async fn finish(
        &self,
        job_id: &str,
        token: &str,
        to: JobStatus,
        reason: Option<String>,
    ) -> Result<Transition, StoreError> {
        self.inner.finish(job_id, token, to, reason).await
    }

    async fn record_result(
        &self,
        job_id: &str,
        token: &str,
        result: StageResult,
        missing_items: Option<Vec<u32>>,
    ) -> Result<bool, StoreError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner
            .record_result(job_id, token, result, missing_items)
            .await
    }

    async fn set_current_url(
        &self,
        job_id: &str,
        token: &str,
        url: Option<String>,
    ) -> Result<bool, StoreError> {
        self.inner.set_current_url(job_id, token, url).await
    }

    async fn holds_lease(&self, job_id: &str, token: &str) -> Result<bool, StoreError> {
        self.inner.holds_lease(job_id, token).await
    }

    async fn extend_lease(
        &self,
        job_id: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.inner.extend_lease(job_id, token, ttl).await
    }

    async fn release_lease(&self, job_id: &str, token: &str) -> Result<(), StoreError> {
        self.inner.release_lease(job_id, token).await
    }

    async fn stalled_jobs(&self) -> Result<Vec<String>, StoreError> {
        self.inner.stalled_jobs().await
    }

    async fn mark_stalled(
        &self,
        job_id: &str,
        max_stalled_count: u32,
    ) -> Result<StalledOutcome, StoreError> {
        self.inner.mark_stalled(job_id, max_stalled_count).await
    }
}

// ========== 组装 ==========

pub struct Harness {
    pub queue: JobQueue,
    pub extractor: Arc<FakeExtractor>,
    pub uploader: Arc<FakeUploader>,
    pub drafts: Arc<MemoryDrafts>,
    pub started: mpsc::UnboundedReceiver<String>,
    _dir: tempfile::TempDir,
}

/// 测试用配置：无 URL 间隔，短退避
pub fn test_config() -> Config {
    Config {
        max_concurrent_jobs: 4,
        default_delay_between_urls_ms: 0,
        retry_backoff_base_ms: 100,
        ..Config::default()
    }
}

pub fn start(config: Config, builder: FakeExtractorBuilder) -> Harness {
    start_with_store(config, builder, Arc::new(InMemoryJobStore::new()))
}

pub fn start_with_store(
    config: Config,
    builder: FakeExtractorBuilder,
    store: Arc<dyn JobStore>,
) -> Harness {
    start_with_parts(config, builder, store, Arc::new(FakeRewriter))
}

pub fn start_with_rewriter(
    config: Config,
    builder: FakeExtractorBuilder,
    rewriter: Arc<dyn Rewriter>,
) -> Harness {
    start_with_parts(config, builder, Arc::new(InMemoryJobStore::new()), rewriter)
}

fn start_with_parts(
    config: Config,
    builder: FakeExtractorBuilder,
    store: Arc<dyn JobStore>,
    rewriter: Arc<dyn Rewriter>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let (extractor, started) = builder.build();
    let uploader = Arc::new(FakeUploader::default());
    let drafts = Arc::new(MemoryDrafts::default());

    let collaborators = Collaborators {
        extractor: extractor.clone(),
        categorizer: Arc::new(FakeCategorizer),
        rewriter,
        uploader: uploader.clone(),
        drafts: drafts.clone(),
    };
    let settings = PipelineSettings {
        work_dir: dir.path().join("work"),
        artifacts_dir: dir.path().join("artifacts"),
        ..PipelineSettings::from_config(&config)
    };

    let queue = JobQueue::start_with_settings(config, collaborators, store, settings);
    Harness {
        queue,
        extractor,
        uploader,
        drafts,
        started,
        _dir: dir,
    }
}

impl Harness {
    pub fn work_dir(&self) -> std::path::PathBuf {
        self._dir.path().join("work")
    }

    pub async fn record(&self, job_id: &str) -> Option<JobRecord> {
        self.queue.store().get(job_id).await.unwrap()
    }

    /// 等到任务进入终态，返回最终记录
    pub async fn wait_terminal(&self, job_id: &str) -> JobRecord {
        let store = self.queue.store().clone();
        tokio::time::timeout(Duration::from_secs(60), async move {
            loop {
                if let Some(record) = store.get(job_id).await.unwrap() {
                    if record.status.is_terminal() {
                        return record;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("任务没有在限定时间内结束")
    }

    /// 等待某个 URL 开始抽取
    pub async fn wait_started(&mut self, url: &str) {
        tokio::time::timeout(Duration::from_secs(60), async {
            while let Some(started) = self.started.recv().await {
                if started == url {
                    return;
                }
            }
        })
        .await
        .expect("抽取没有开始");
    }

    /// 等待抽取锁空闲
    pub async fn wait_mutex_free(&self) {
        let mutex = self.queue.extraction_mutex().clone();
        tokio::time::timeout(Duration::from_secs(60), async move {
            while !mutex.is_free() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("抽取锁没有被释放");
    }
}
