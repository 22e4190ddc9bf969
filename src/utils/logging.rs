use anyhow::{Context, Result};
/// 日志工具模块
///
/// 提供日志初始化和格式化输出的辅助函数
use std::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::models::JobStatusView;

/// 初始化 tracing 订阅者
///
/// 默认 `info`，可通过 `RUST_LOG` 覆盖；重复调用不会报错。
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n批量抽取日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)
        .with_context(|| format!("无法写入日志文件: {}", log_file_path))?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(max_concurrent: usize, submissions_folder: &str) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 批量抽取模式");
    info!("📊 最大并发任务数: {}", max_concurrent);
    info!("📁 提交目录: {}", submissions_folder);
    info!("{}", "=".repeat(60));
}

/// 记录提交加载信息
pub fn log_submissions_loaded(files: usize, urls: usize) {
    info!("✓ 找到 {} 个提交文件，共 {} 个 URL", files, urls);
}

/// 最终统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FinalStats {
    pub jobs: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub urls_succeeded: usize,
    pub urls_failed: usize,
}

impl FinalStats {
    pub fn from_views(views: &[JobStatusView]) -> Self {
        use crate::models::JobStatus;

        let mut stats = Self {
            jobs: views.len(),
            ..Default::default()
        };
        for view in views {
            match view.status {
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
                _ => {}
            }
            stats.urls_succeeded += view.results.iter().filter(|r| r.is_success()).count();
            stats.urls_failed += view.results.iter().filter(|r| !r.is_success()).count();
        }
        stats
    }
}

/// 打印最终统计信息
pub fn print_final_stats(stats: &FinalStats, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 任务完成: {}/{}", stats.completed, stats.jobs);
    info!("❌ 任务失败: {}", stats.failed);
    info!("🛑 任务取消: {}", stats.cancelled);
    info!(
        "🔗 URL 成功 {} / 失败 {}",
        stats.urls_succeeded, stats.urls_failed
    );
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
