//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责任务调度和生命周期，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `job_queue` - 任务队列
//! - 校验并接收提交，每个 URL 一个任务
//! - 控制并发数量（Semaphore）
//! - 重试、卡死检查、过期清理
//! - 查询、分页列表、取消
//!
//! ### `job_runner` - 单个任务执行器
//! - 领取任务、维持心跳
//! - 顺序遍历 URL，隔离单个 URL 的失败
//! - 决定完成 / 取消 / 重试 / 失败
//!
//! ### `admin` - 管理操作
//! - 总览、按状态删除、强制删除、清空
//!
//! ## 层次关系
//!
//! ```text
//! job_queue (处理 Vec<Job>)
//!     ↓
//! job_runner (处理 Vec<Url>)
//!     ↓
//! workflow::UrlPipeline (处理单个 URL)
//!     ↓
//! coordination (抽取锁 / 心跳 / 取消检查)
//!     ↓
//! services (能力层：extractor / llm / media / draft)
//!     ↓
//! infrastructure (基础设施：JobStore / JsExecutor)
//! ```

pub mod admin;
pub mod job_queue;
pub mod job_runner;
pub mod maintenance;
pub mod validation;

// 重新导出主要类型
pub use admin::{DrainReport, JobDetail, QueueOverview};
pub use job_queue::JobQueue;
pub use job_runner::{ExecutionOutcome, JobRunner, RunnerSettings, UrlStats};
pub use maintenance::{prune_finished_jobs, PruneReport};
pub use validation::{validate_identifier, validate_submission};
