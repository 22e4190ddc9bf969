//! 业务能力层（Services）
//!
//! 描述"我能做什么"，每个能力都是可替换的 trait：
//! - `Extractor` 抽取
//! - `Categorizer` / `Rewriter` AI 增强
//! - `MediaUploader` 媒体上传
//! - `DraftStore` 草稿存储
//!
//! 以及不需要替换的具体能力：`ArtifactWriter`、`ProgressEmitter`、`LlmService`。

pub mod artifact_writer;
pub mod draft_store;
pub mod enrichment;
pub mod extractor;
pub mod llm_service;
pub mod media_uploader;
pub mod progress;

pub use artifact_writer::ArtifactWriter;
pub use draft_store::{DraftStore, FileDraftStore};
pub use enrichment::{Categorizer, LlmCategorizer, LlmRewriter, Rewriter};
pub use extractor::{
    BrowserExtractor, ExtractOptions, ExtractProgress, Extractor, ExtractorRouter,
    SourceCliExtractor,
};
pub use llm_service::LlmService;
pub use media_uploader::{HttpMediaUploader, MediaUploader};
pub use progress::{ProgressEmitter, ProgressEvent, ProgressStage};
