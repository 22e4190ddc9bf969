//! URL 处理上下文
//!
//! 封装"我正在处理哪个任务的第几个 URL"这一信息

use std::fmt::Display;

use crate::models::UrlConfig;

/// URL 处理上下文
#[derive(Debug, Clone)]
pub struct UrlCtx {
    /// 任务ID
    pub job_id: String,

    /// 当前 URL 或来源句柄
    pub url: String,

    /// URL 在任务中的索引（从0开始）
    pub url_index: usize,

    /// 任务中的 URL 总数（仅用于日志显示）
    pub total_urls: usize,

    /// 该 URL 的配置
    pub config: UrlConfig,
}

impl UrlCtx {
    pub fn new(
        job_id: String,
        url: String,
        url_index: usize,
        total_urls: usize,
        config: UrlConfig,
    ) -> Self {
        Self {
            job_id,
            url,
            url_index,
            total_urls,
            config,
        }
    }

    /// 第 `item_index` 道题的临时关联 ID
    pub fn temp_id(&self, item_index: usize) -> String {
        format!("tmp-{}-{}-{}", self.job_id, self.url_index, item_index)
    }

    /// 本 URL 专属的工作目录名
    pub fn work_dir_name(&self) -> String {
        format!("{}-{}", self.job_id, self.url_index)
    }
}

impl Display for UrlCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[任务 {} URL {}/{}]",
            self.job_id,
            self.url_index + 1,
            self.total_urls
        )
    }
}
