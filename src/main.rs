use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use question_batch_queue::models::{load_all_submissions, JobStatusView};
use question_batch_queue::services::{
    BrowserExtractor, ExtractorRouter, FileDraftStore, HttpMediaUploader, LlmCategorizer,
    LlmRewriter, SourceCliExtractor,
};
use question_batch_queue::utils::logging::{self, FinalStats};
use question_batch_queue::{BrowserSession, Collaborators, Config, JobQueue};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logging::init();

    // 加载配置
    let config = Config::from_env();
    logging::init_log_file(&config.output_log_file)?;
    logging::log_startup(config.max_concurrent_jobs, &config.submissions_folder);

    info!("\n📁 正在扫描待处理的提交...");
    let submissions = load_all_submissions(&config.submissions_folder).await?;
    if submissions.is_empty() {
        warn!("⚠️ 没有找到待处理的TOML文件，程序结束");
        return Ok(());
    }
    let url_count: usize = submissions.iter().map(|(_, s)| s.urls.len()).sum();
    logging::log_submissions_loaded(submissions.len(), url_count);

    // 连接浏览器并组装协作者
    let session = BrowserSession::connect(config.browser_debug_port, &config.target_url).await?;
    let collaborators = build_collaborators(&config, &session)?;

    let queue = JobQueue::start(config.clone(), collaborators);
    let mut events = queue.subscribe();
    let event_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    debug!("[任务 {}] {:?}: {}", event.job_id, event.stage, event.message)
                }
                Err(RecvError::Lagged(skipped)) => debug!("跳过 {} 条进度事件", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut job_ids = Vec::new();
    for (path, submission) in submissions {
        match queue.submit_batch(submission).await {
            Ok(ids) => job_ids.extend(ids),
            Err(e) => error!("❌ 提交失败 {}: {}", path.display(), e),
        }
    }
    info!("✓ 共创建 {} 个任务，等待处理完成...", job_ids.len());

    let views = wait_for_jobs(&queue, &job_ids).await?;
    logging::print_final_stats(&FinalStats::from_views(&views), &config.output_log_file);

    queue.close().await;
    event_logger.abort();
    Ok(())
}

fn build_collaborators(config: &Config, session: &BrowserSession) -> Result<Collaborators> {
    let source = SourceCliExtractor::new(config).context("无法创建 source:// 抽取器")?;
    let web = BrowserExtractor::new(session.executor());

    Ok(Collaborators {
        extractor: Arc::new(ExtractorRouter::new(Arc::new(source), Arc::new(web))),
        categorizer: Arc::new(LlmCategorizer::from_config(config)),
        rewriter: Arc::new(LlmRewriter::from_config(config)),
        uploader: Arc::new(HttpMediaUploader::new(config)),
        drafts: Arc::new(FileDraftStore::new(
            &config.drafts_dir,
            config.draft_retention_secs,
        )),
    })
}

/// 轮询直到所有任务结束；被删除的任务不再等待
async fn wait_for_jobs(queue: &JobQueue, job_ids: &[String]) -> Result<Vec<JobStatusView>> {
    let mut finished: BTreeMap<String, JobStatusView> = BTreeMap::new();
    let mut pending: Vec<String> = job_ids.to_vec();

    while !pending.is_empty() {
        tokio::time::sleep(POLL_INTERVAL).await;

        let mut still_running = Vec::with_capacity(pending.len());
        for job_id in pending {
            match queue.get_status(&job_id).await? {
                Some(view) if view.status.is_terminal() => {
                    finished.insert(job_id, view);
                }
                Some(view) => {
                    debug!(
                        "[任务 {}] {} {}%",
                        job_id, view.status, view.progress.percentage
                    );
                    still_running.push(job_id);
                }
                None => warn!("[任务 {}] 任务已被删除", job_id),
            }
        }
        pending = still_running;
    }

    Ok(finished.into_values().collect())
}
