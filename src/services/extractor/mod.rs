//! 抽取能力 - 业务能力层
//!
//! `Extractor` 是对外部抽取源的唯一抽象。同一时刻全局只允许一个抽取在进行，
//! 这个约束由编排层的 `ExtractionMutex` 保证，抽取器本身不关心。

pub mod browser;
pub mod source_cli;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::ExtractError;
use crate::models::ExtractionResult;

pub use browser::BrowserExtractor;
pub use source_cli::SourceCliExtractor;

/// `source://N` 形式的来源句柄前缀
pub const SOURCE_SCHEME: &str = "source://";

/// 抽取参数
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub timeout_secs: u64,
    /// 是否把图片下载到工作目录
    pub download_media: bool,
    /// 本次抽取专属的工作目录
    pub work_dir: PathBuf,
}

/// 抽取过程中的增量进度
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractProgress {
    pub status: String,
    pub message: String,
}

impl ExtractProgress {
    pub fn new(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: message.into(),
        }
    }
}

/// 进度回调
pub type ProgressSink<'a> = &'a (dyn Fn(ExtractProgress) + Send + Sync);

/// 外部抽取器
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        identifier: &str,
        options: &ExtractOptions,
        progress: ProgressSink<'_>,
    ) -> Result<ExtractionResult, ExtractError>;
}

/// 是否是 `source://` 句柄
pub fn is_source_handle(identifier: &str) -> bool {
    identifier.starts_with(SOURCE_SCHEME)
}

/// 解析 `source://N` 中的序号
pub fn parse_source_index(identifier: &str) -> Option<usize> {
    identifier
        .strip_prefix(SOURCE_SCHEME)
        .and_then(|rest| rest.trim().parse().ok())
}

/// 按标识符类型分发到具体抽取器
pub struct ExtractorRouter {
    source: Arc<dyn Extractor>,
    web: Arc<dyn Extractor>,
}

impl ExtractorRouter {
    pub fn new(source: Arc<dyn Extractor>, web: Arc<dyn Extractor>) -> Self {
        Self { source, web }
    }
}

#[async_trait]
impl Extractor for ExtractorRouter {
    async fn extract(
        &self,
        identifier: &str,
        options: &ExtractOptions,
        progress: ProgressSink<'_>,
    ) -> Result<ExtractionResult, ExtractError> {
        if is_source_handle(identifier) {
            self.source.extract(identifier, options, progress).await
        } else {
            self.web.extract(identifier, options, progress).await
        }
    }
}
