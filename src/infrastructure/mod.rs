//! 基础设施层
//!
//! 持有稀缺资源，只暴露能力：
//! - `JsExecutor` 持有浏览器 Page
//! - `JobStore` 持有任务跟踪记录和租约

pub mod job_store;
pub mod js_executor;

pub use job_store::{InMemoryJobStore, JobStore, StalledOutcome, Transition};
pub use js_executor::JsExecutor;
