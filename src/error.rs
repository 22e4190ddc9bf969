//! 错误类型
//!
//! 按照处理方式划分：
//! - `AppError::Validation` 提交前拒绝，不进入队列
//! - `AppError::Stage` 只影响单个 URL，记录为 `StageResult` 后继续下一个
//! - `AppError::Cancelled` 不重试，终止整个任务剩余的 URL
//! - `AppError::LeaseLost` 本次执行已被接管，静默退出，不写状态
//! - `AppError::Infrastructure` 存储不可用，记录日志并交给调用方，任务保持最后已知状态

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 输入校验失败（调度前拒绝）
    #[error("参数校验失败: {0}")]
    Validation(String),

    /// 单个 URL 的阶段失败
    #[error("阶段失败: {0}")]
    Stage(#[from] StageFailure),

    /// 任务被取消
    #[error("任务 {job_id} 已被取消")]
    Cancelled { job_id: String },

    /// 租约已被其他执行接管（卡死后重新调度），本次执行不得再写入
    #[error("任务 {job_id} 的租约已丢失")]
    LeaseLost { job_id: String },

    /// 存储/队列不可用
    #[error("基础设施错误: {0}")]
    Infrastructure(#[from] StoreError),

    /// 任务不存在
    #[error("任务不存在: {0}")]
    NotFound(String),

    /// 当前状态不允许该操作
    #[error("任务 {job_id} 状态不允许此操作: {reason}")]
    InvalidState { job_id: String, reason: String },
}

impl AppError {
    /// 创建取消错误
    pub fn cancelled(job_id: impl Into<String>) -> Self {
        AppError::Cancelled {
            job_id: job_id.into(),
        }
    }

    /// 是否是取消（取消不是失败，不参与重试）
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AppError::Cancelled { .. })
    }

    /// 是否只影响单个 URL
    pub fn is_stage_failure(&self) -> bool {
        matches!(self, AppError::Stage(_))
    }
}

/// 单个 URL 流水线中的阶段失败
#[derive(Debug, Error)]
pub enum StageFailure {
    /// 抽取阶段失败
    #[error("抽取失败: {0}")]
    Extraction(#[from] ExtractError),

    /// 草稿保存失败
    #[error("草稿保存失败: {0}")]
    Draft(ServiceError),

    /// 阶段超时
    #[error("阶段 {stage} 超时 ({secs} 秒)")]
    Timeout { stage: &'static str, secs: u64 },
}

/// 抽取器错误
#[derive(Debug, Error)]
pub enum ExtractError {
    /// 抽取超时
    #[error("抽取超时 ({secs} 秒)")]
    Timeout { secs: u64 },

    /// 目标需要登录
    #[error("目标需要登录: {0}")]
    AuthRequired(String),

    /// 没有抽取到任何题目
    #[error("未找到题目: {0}")]
    NoResultsFound(String),

    /// 浏览器操作失败
    #[error("浏览器错误: {0}")]
    Browser(String),

    /// 外部抽取进程失败
    #[error("抽取进程失败: {0}")]
    Process(String),

    /// 抽取结果解析失败
    #[error("抽取结果解析失败: {0}")]
    Parse(#[from] serde_json::Error),

    /// 文件操作失败
    #[error("文件错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 外部协作服务（LLM / 上传 / 草稿）错误
#[derive(Debug, Error)]
pub enum ServiceError {
    /// LLM 调用失败
    #[error("LLM API 调用失败 (模型: {model}): {message}")]
    Llm { model: String, message: String },

    /// LLM 返回内容无法解析
    #[error("无法解析 LLM 响应: {0}")]
    ResponseParse(String),

    /// HTTP 请求失败
    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    /// 上传被拒绝
    #[error("上传失败 ({key}): HTTP {status}")]
    UploadRejected { key: String, status: u16 },

    /// 文件操作失败
    #[error("文件错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化失败
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 调用超时
    #[error("调用超时 ({secs} 秒)")]
    Timeout { secs: u64 },
}

/// 任务存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 存储不可达
    #[error("任务存储不可用: {0}")]
    Unavailable(String),

    /// 租约令牌不匹配
    #[error("任务 {job_id} 的租约已被其他执行者持有")]
    LeaseConflict { job_id: String },
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_distinguished_from_failures() {
        assert!(AppError::cancelled("batch-1").is_cancellation());
        assert!(!AppError::Validation("x".into()).is_cancellation());

        let stage: AppError = StageFailure::from(ExtractError::NoResultsFound("u".into())).into();
        assert!(stage.is_stage_failure());
        assert!(!stage.is_cancellation());
    }

    #[test]
    fn store_errors_become_infrastructure_errors() {
        let err: AppError = StoreError::Unavailable("redis down".into()).into();
        assert!(matches!(err, AppError::Infrastructure(_)));
        assert!(err.to_string().contains("redis down"));
    }
}
