//! 流程层（Workflow）
//!
//! 定义"一个 URL"的完整处理流程，不持有稀缺资源，只依赖能力层。

pub mod media_stage;
pub mod merge;
pub mod url_ctx;
pub mod url_pipeline;

pub use media_stage::{media_folder, process_media, MediaReport};
pub use merge::{merge_enrichment, MergeStats};
pub use url_ctx::UrlCtx;
pub use url_pipeline::{missing_items, Collaborators, PipelineSettings, UrlPipeline};
