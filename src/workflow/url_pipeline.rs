//! URL 处理流程 - 流程层
//!
//! 核心职责：定义"一个 URL"的完整处理流程
//!
//! 流程顺序：
//! 1. 检查点 → 排队获取抽取锁 → 检查点 → 抽取 → 释放抽取锁 → 检查点
//! 2. 分类 ∥ 改写（各自超时，各自失败）→ 检查点
//! 3. 合并 → 媒体 → 检查点 → 草稿 → 归档 → 清理

use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::coordination::{CancellationProbe, ExtractionMutex};
use crate::error::{AppResult, ExtractError, StageFailure};
use crate::models::{
    CategorizationResult, Draft, EnrichmentContext, ExtractionResult, QuestionItem,
    RewriteResult, StageResult, UrlStatus,
};
use crate::services::{
    ArtifactWriter, Categorizer, DraftStore, ExtractOptions, ExtractProgress, Extractor,
    MediaUploader, ProgressEmitter, ProgressStage, Rewriter,
};
use crate::workflow::media_stage::{media_folder, process_media};
use crate::workflow::merge::merge_enrichment;
use crate::workflow::url_ctx::UrlCtx;

/// 流程依赖的外部协作者
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn Extractor>,
    pub categorizer: Arc<dyn Categorizer>,
    pub rewriter: Arc<dyn Rewriter>,
    pub uploader: Arc<dyn MediaUploader>,
    pub drafts: Arc<dyn DraftStore>,
}

/// 流程参数
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub extraction_timeout: Duration,
    pub enrichment_timeout: Duration,
    pub upload_timeout: Duration,
    pub draft_timeout: Duration,
    pub work_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub download_media: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            extraction_timeout: Duration::from_secs(config.extraction_timeout_secs),
            enrichment_timeout: Duration::from_secs(config.enrichment_timeout_secs),
            upload_timeout: Duration::from_secs(config.upload_timeout_secs),
            draft_timeout: Duration::from_secs(config.draft_timeout_secs),
            work_dir: PathBuf::from(&config.work_dir),
            artifacts_dir: PathBuf::from(&config.artifacts_dir),
            download_media: true,
        }
    }
}

/// URL 处理流程
///
/// - 编排单个 URL 的所有阶段
/// - 阶段失败以 `AppError::Stage` 返回，由上层记录为失败结果
/// - 取消以 `AppError::Cancelled` 返回，由上层终止整个任务
pub struct UrlPipeline {
    collaborators: Collaborators,
    mutex: Arc<ExtractionMutex>,
    progress: ProgressEmitter,
    artifacts: ArtifactWriter,
    settings: PipelineSettings,
}

impl UrlPipeline {
    pub fn new(
        collaborators: Collaborators,
        mutex: Arc<ExtractionMutex>,
        progress: ProgressEmitter,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            collaborators,
            mutex,
            progress,
            artifacts: ArtifactWriter::with_dir(&settings.artifacts_dir),
            settings,
        }
    }

    pub async fn run(&self, ctx: &UrlCtx, probe: &CancellationProbe) -> AppResult<StageResult> {
        let started = Instant::now();
        info!("{} 开始处理 {}", ctx, ctx.url);

        // ========== 抽取（全局串行） ==========
        probe.checkpoint("before_lock").await?;
        self.progress
            .emit(&ctx.job_id, ProgressStage::Waiting, "等待抽取锁");
        let permit = self.mutex.acquire(&ctx.job_id).await;
        probe.checkpoint("lock_acquired").await?;

        let work_dir = self.settings.work_dir.join(ctx.work_dir_name());
        self.progress
            .emit(&ctx.job_id, ProgressStage::Extracting, format!("抽取 {}", ctx.url));
        let extraction = self.extract(ctx, &work_dir).await;
        permit.release();

        let extraction = match extraction {
            Ok(extraction) => extraction,
            Err(e) => {
                remove_dir(&work_dir).await;
                return Err(StageFailure::from(e).into());
            }
        };
        let extraction_ms = started.elapsed().as_millis() as u64;
        info!(
            "{} ✓ 抽取完成，共 {} 道题目 ({} ms)",
            ctx,
            extraction.items.len(),
            extraction_ms
        );
        self.progress.emit(
            &ctx.job_id,
            ProgressStage::Extracted,
            format!("抽取到 {} 道题目", extraction.items.len()),
        );

        // 抽取之后无论结果如何都清理本 URL 的工作文件
        let working_files = extraction.working_files.clone();
        let outcome = self
            .after_extraction(ctx, probe, extraction, extraction_ms, started)
            .await;
        self.cleanup(ctx, &working_files, &work_dir).await;
        outcome
    }

    async fn extract(
        &self,
        ctx: &UrlCtx,
        work_dir: &Path,
    ) -> Result<ExtractionResult, ExtractError> {
        let options = ExtractOptions {
            timeout_secs: self.settings.extraction_timeout.as_secs(),
            download_media: self.settings.download_media,
            work_dir: work_dir.to_path_buf(),
        };
        let job_id = ctx.job_id.as_str();
        let sink = |p: ExtractProgress| {
            debug!("[任务 {}] 抽取进度 {}: {}", job_id, p.status, p.message);
            self.progress.emit(job_id, ProgressStage::Extracting, p.message);
        };

        tokio::time::timeout(
            self.settings.extraction_timeout,
            self.collaborators
                .extractor
                .extract(&ctx.url, &options, &sink),
        )
        .await
        .map_err(|_| ExtractError::Timeout {
            secs: self.settings.extraction_timeout.as_secs(),
        })?
    }

    async fn after_extraction(
        &self,
        ctx: &UrlCtx,
        probe: &CancellationProbe,
        extraction: ExtractionResult,
        extraction_ms: u64,
        started: Instant,
    ) -> AppResult<StageResult> {
        probe.checkpoint("after_extraction").await?;

        let metadata = extraction.metadata;
        let mut items: Vec<QuestionItem> = extraction
            .items
            .into_iter()
            .enumerate()
            .map(|(i, item)| QuestionItem::from_extracted(item, ctx.temp_id(i), i))
            .collect();
        let extracted_count = items.len();

        // ========== 分类 ∥ 改写 ==========
        let context = EnrichmentContext::from(&metadata);
        let (categories, rewrites) = self.enrich(ctx, &items, &context).await;
        probe.checkpoint("after_enrichment").await?;

        let stats = merge_enrichment(&mut items, &categories, &rewrites);
        debug!("{} 合并结果: {:?}", ctx, stats);

        // ========== 媒体 ==========
        let folder = media_folder(&ctx.url, &metadata);
        self.progress.emit(
            &ctx.job_id,
            ProgressStage::ProcessingMedia,
            format!("上传图片到 {}", folder),
        );
        let media = process_media(
            &mut items,
            self.collaborators.uploader.as_ref(),
            &folder,
            &ctx.work_dir_name(),
            self.settings.upload_timeout,
        )
        .await;
        info!(
            "{} ✓ 媒体处理完成: 上传 {}, 失败 {}",
            ctx, media.uploaded, media.failed
        );
        self.progress.emit(
            &ctx.job_id,
            ProgressStage::MediaProcessed,
            format!("上传 {} 张图片", media.uploaded),
        );

        // ========== 草稿 ==========
        probe.checkpoint("before_draft").await?;
        let exam_name = ctx
            .config
            .official_exam_data
            .as_ref()
            .map(|o| o.exam_name.clone())
            .or_else(|| metadata.exam_name.clone());
        let title = ctx
            .config
            .official_exam_data
            .as_ref()
            .map(|o| o.title.clone())
            .or_else(|| exam_name.clone())
            .unwrap_or_else(|| format!("Extração {}", ctx.url));

        let draft = Draft::build(
            &ctx.job_id,
            &ctx.url,
            title,
            items,
            categories,
            exam_name.clone(),
            extraction_ms,
        );
        let draft_id = self.persist_draft(&draft).await?;
        info!("{} ✓ 草稿已保存: {}", ctx, draft_id);
        self.progress
            .emit(&ctx.job_id, ProgressStage::DraftCreated, draft_id.clone());

        // ========== 归档（失败不影响结果） ==========
        let missing = missing_items(
            &draft.items,
            ctx.config.expected_items.or(metadata.expected_total),
        );
        let snapshot = json!({
            "jobId": ctx.job_id,
            "url": ctx.url,
            "draftId": draft_id,
            "metadata": metadata,
            "config": ctx.config,
            "draft": draft,
            "missingItems": missing,
        });
        let artifact_name = exam_name.as_deref().unwrap_or(&ctx.url);
        match self.artifacts.write(artifact_name, &snapshot).await {
            Ok(path) => {
                debug!("{} 归档已写入: {}", ctx, path.display());
                self.progress.emit(
                    &ctx.job_id,
                    ProgressStage::ArtifactWritten,
                    path.display().to_string(),
                );
            }
            Err(e) => warn!("{} ⚠️ 归档写入失败: {}", ctx, e),
        }

        if !missing.is_empty() {
            warn!("{} ⚠️ 缺少 {} 道题目: {:?}", ctx, missing.len(), missing);
        }

        Ok(StageResult {
            url: ctx.url.clone(),
            status: UrlStatus::Success,
            draft_id: Some(draft_id),
            extracted_count: Some(extracted_count),
            saved_count: Some(draft.items.len()),
            missing_items: (!missing.is_empty()).then_some(missing),
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// 分类和改写并发执行，任何一方失败只记录警告
    async fn enrich(
        &self,
        ctx: &UrlCtx,
        items: &[QuestionItem],
        context: &EnrichmentContext,
    ) -> (Vec<CategorizationResult>, Vec<RewriteResult>) {
        if items.is_empty() {
            return (Vec::new(), Vec::new());
        }
        self.progress.emit(
            &ctx.job_id,
            ProgressStage::Categorizing,
            format!("分类与改写 {} 道题目", items.len()),
        );

        let limit = self.settings.enrichment_timeout;
        let (categorized, rewritten) = tokio::join!(
            tokio::time::timeout(limit, self.collaborators.categorizer.categorize_batch(items)),
            tokio::time::timeout(limit, self.collaborators.rewriter.rewrite_batch(items, context)),
        );

        let categories = match categorized {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                warn!("{} ⚠️ 分类失败，继续处理: {}", ctx, e);
                Vec::new()
            }
            Err(_) => {
                warn!("{} ⚠️ 分类超时 ({} 秒)，继续处理", ctx, limit.as_secs());
                Vec::new()
            }
        };
        self.progress.emit(
            &ctx.job_id,
            ProgressStage::Categorized,
            format!("分类 {} 道题目", categories.len()),
        );

        let rewrites = match rewritten {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                warn!("{} ⚠️ 评论改写失败，保留原评论: {}", ctx, e);
                Vec::new()
            }
            Err(_) => {
                warn!("{} ⚠️ 评论改写超时 ({} 秒)，保留原评论", ctx, limit.as_secs());
                Vec::new()
            }
        };
        self.progress.emit(
            &ctx.job_id,
            ProgressStage::Rewritten,
            format!("改写 {} 条评论", rewrites.len()),
        );

        (categories, rewrites)
    }

    async fn persist_draft(&self, draft: &Draft) -> Result<String, StageFailure> {
        let limit = self.settings.draft_timeout;
        match tokio::time::timeout(limit, self.collaborators.drafts.create(draft)).await {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(e)) => Err(StageFailure::Draft(e)),
            Err(_) => Err(StageFailure::Timeout {
                stage: "persisting_draft",
                secs: limit.as_secs(),
            }),
        }
    }

    /// 只删除本 URL 创建的文件
    async fn cleanup(&self, ctx: &UrlCtx, working_files: &[PathBuf], work_dir: &Path) {
        for file in working_files {
            match tokio::fs::remove_file(file).await {
                Ok(()) => debug!("{} 🗑️ 已删除 {}", ctx, file.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("{} ⚠️ 无法删除 {}: {}", ctx, file.display(), e),
            }
        }
        remove_dir(work_dir).await;
    }
}

async fn remove_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("⚠️ 无法删除工作目录 {}: {}", dir.display(), e),
    }
}

/// 题号 `1..=expected` 中没有出现的
pub fn missing_items(items: &[QuestionItem], expected: Option<u32>) -> Vec<u32> {
    let Some(expected) = expected else {
        return Vec::new();
    };
    let present: std::collections::HashSet<u32> = items
        .iter()
        .filter_map(|q| {
            let digits: String = q.number.chars().filter(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        })
        .collect();
    (1..=expected).filter(|n| !present.contains(n)).collect()
}
