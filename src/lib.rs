//! # Question Batch Queue
//!
//! 批量题目抽取任务编排：提交一批 URL，逐个抽取、AI 增强、上传媒体并生成草稿
//!
//! ## 架构设计
//!
//! 本系统采用分层架构，依赖只向下：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `JobStore` - 共享的任务记录与租约
//! - `JsExecutor` - 唯一的 page owner，提供 goto() / eval() 能力
//!
//! ### ② 业务能力层（Services）
//! - `Extractor` - 浏览器抽取 / `source://` 命令行抽取
//! - `Categorizer` / `Rewriter` - LLM 分类与评论改写
//! - `MediaUploader` / `DraftStore` / `ArtifactWriter` - 持久化
//! - `ProgressEmitter` - 进度事件
//!
//! ### ③ 协调层（Coordination）
//! - `ExtractionMutex` - 全局单抽取，FIFO
//! - `LockHeartbeat` - 长时间调用期间续约
//! - `CancellationProbe` - 阶段边界的取消检查
//!
//! ### ④ 流程层（Workflow）
//! - `UrlCtx` - 上下文封装（job_id + url_index）
//! - `UrlPipeline` - 单个 URL 的流程（抽取 → 分类 ∥ 改写 → 合并 → 媒体 → 草稿 → 归档）
//!
//! ### ⑤ 编排层（Orchestration）
//! - `orchestrator/job_queue` - 提交、并发、重试、卡死检查
//! - `orchestrator/job_runner` - 单个任务，遍历 URL 列表
//! - `orchestrator/admin` - 运维操作
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod coordination;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use browser::BrowserSession;
pub use config::Config;
pub use coordination::{CancellationProbe, ExtractionMutex, ExtractionPermit, LockHeartbeat};
pub use error::{AppError, AppResult, ExtractError, ServiceError, StageFailure, StoreError};
pub use infrastructure::{InMemoryJobStore, JobStore, JsExecutor};
pub use models::{BatchSubmission, JobFilters, JobRecord, JobStatus, JobStatusView, StageResult};
pub use orchestrator::{DrainReport, JobQueue, QueueOverview};
pub use workflow::{Collaborators, PipelineSettings, UrlCtx, UrlPipeline};
