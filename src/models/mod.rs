pub mod job;
pub mod loaders;
pub mod question;

pub use job::{
    BatchSubmission, JobFilters, JobOptions, JobPage, JobRecord, JobStatus, JobStatusView,
    JobSummary, OfficialExamData, PipelineOptions, Progress, ProgressView, StageResult, UrlConfig,
    UrlStatus,
};
pub use loaders::{load_all_submissions, load_toml_to_submission};
pub use question::{
    CategorizationResult, Draft, DraftMetadata, EnrichmentContext, ExtractedItem,
    ExtractionMetadata, ExtractionResult, QuestionItem, RewriteResult,
};
