//! 任务数据模型
//!
//! - `BatchSubmission`：提交时的不可变输入
//! - `JobRecord`：任务跟踪记录，只有执行者和管理操作会修改
//! - `StageResult`：单个 URL 的处理结果，只追加不删除

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 官方试卷信息（按 URL 配置）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficialExamData {
    pub exam_name: String,
    pub exam_year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_edition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(default)]
    pub exam_type: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// 单个 URL 的配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlConfig {
    #[serde(default)]
    pub save_as_official: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub official_exam_data: Option<OfficialExamData>,
    /// 预期题目数量，用于计算缺失题号
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_items: Option<u32>,
}

/// 提交时的可选流水线参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_between_urls_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// 批量提交（创建后不再修改）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSubmission {
    pub user_id: String,
    pub urls: Vec<String>,
    #[serde(default)]
    pub configs: BTreeMap<String, UrlConfig>,
    #[serde(default)]
    pub options: PipelineOptions,
}

impl BatchSubmission {
    pub fn new(user_id: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            urls,
            configs: BTreeMap::new(),
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_config(mut self, url: impl Into<String>, config: UrlConfig) -> Self {
        self.configs.insert(url.into(), config);
        self
    }
}

/// 提交时确定下来的执行参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    pub delay_between_urls_ms: u64,
    pub max_retries: u32,
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// 是否已经结束（不会再被执行）
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" | "waiting" => Some(JobStatus::Pending),
            "processing" | "active" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务进度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl Progress {
    pub fn percentage(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed as f64 / self.total as f64) * 100.0).round() as u32
    }
}

/// 单个 URL 的处理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlStatus {
    Success,
    Failed,
}

/// 单个 URL 的处理结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub url: String,
    pub status: UrlStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_items: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl StageResult {
    pub fn failed(url: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            url: url.into(),
            status: UrlStatus::Failed,
            draft_id: None,
            extracted_count: None,
            saved_count: None,
            missing_items: None,
            error: Some(error.into()),
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == UrlStatus::Success
    }
}

/// 任务跟踪记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: String,
    pub user_id: String,
    pub urls: Vec<String>,
    pub configs: BTreeMap<String, UrlConfig>,
    pub created_at: DateTime<Utc>,
    pub status: JobStatus,
    pub progress: Progress,
    pub results: Vec<StageResult>,
    pub missing_items: BTreeMap<String, Vec<u32>>,
    pub options: JobOptions,
    /// 已开始执行的次数
    pub attempts_made: u32,
    /// 被判定卡死的次数
    pub stalled_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
}

impl JobRecord {
    pub fn new(
        job_id: String,
        user_id: String,
        urls: Vec<String>,
        configs: BTreeMap<String, UrlConfig>,
        options: JobOptions,
    ) -> Self {
        let total = urls.len();
        Self {
            job_id,
            user_id,
            urls,
            configs,
            created_at: Utc::now(),
            status: JobStatus::Pending,
            progress: Progress {
                total,
                ..Default::default()
            },
            results: Vec::new(),
            missing_items: BTreeMap::new(),
            options,
            attempts_made: 0,
            stalled_count: 0,
            started_at: None,
            finished_at: None,
            current_url: None,
            failed_reason: None,
        }
    }

    pub fn to_status_view(&self) -> JobStatusView {
        let duration_ms = match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        };
        JobStatusView {
            job_id: self.job_id.clone(),
            status: self.status,
            progress: ProgressView {
                total: self.progress.total,
                completed: self.progress.completed,
                failed: self.progress.failed,
                percentage: self.progress.percentage(),
            },
            current_url: self.current_url.clone(),
            results: self.results.clone(),
            started_at: self.started_at,
            completed_at: self.finished_at,
            duration_ms,
        }
    }
}

/// 对外的进度视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressView {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub percentage: u32,
}

/// 对外的任务状态视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: ProgressView,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    pub results: Vec<StageResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// 任务列表过滤条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilters {
    pub status: Option<JobStatus>,
    /// 创建时间下界（含）
    pub start: Option<DateTime<Utc>>,
    /// 创建时间上界（含）
    pub end: Option<DateTime<Utc>>,
}

impl JobFilters {
    pub fn matches(&self, record: &JobRecord) -> bool {
        self.status.map_or(true, |s| record.status == s)
            && self.start.map_or(true, |t| record.created_at >= t)
            && self.end.map_or(true, |t| record.created_at <= t)
    }
}

/// 列表中的任务摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: ProgressView,
    pub url_count: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&JobRecord> for JobSummary {
    fn from(record: &JobRecord) -> Self {
        let view = record.to_status_view();
        Self {
            job_id: view.job_id,
            status: view.status,
            progress: view.progress,
            url_count: record.urls.len(),
            created_at: record.created_at,
            completed_at: view.completed_at,
        }
    }
}

/// 分页结果，`page` 从 1 开始
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPage {
    pub jobs: Vec<JobSummary>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> JobOptions {
        JobOptions {
            delay_between_urls_ms: 0,
            max_retries: 3,
        }
    }

    #[test]
    fn percentage_rounds_completed_over_total() {
        let progress = Progress {
            total: 3,
            completed: 2,
            failed: 1,
        };
        assert_eq!(progress.percentage(), 67);
        assert_eq!(Progress::default().percentage(), 0);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        assert_eq!(JobStatus::parse("active"), Some(JobStatus::Processing));
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }

    #[test]
    fn new_record_starts_pending_with_total() {
        let record = JobRecord::new(
            "batch-1".into(),
            "user".into(),
            vec!["a".into(), "b".into()],
            BTreeMap::new(),
            options(),
        );
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.progress.total, 2);
        assert!(record.results.is_empty());

        let view = record.to_status_view();
        assert_eq!(view.progress.percentage, 0);
        assert!(view.duration_ms.is_none());
    }

    #[test]
    fn submission_deserializes_with_defaults() {
        let json = r#"{"userId":"u1","urls":["https://x.test/prova/1"]}"#;
        let submission: BatchSubmission = serde_json::from_str(json).unwrap();
        assert!(submission.configs.is_empty());
        assert_eq!(submission.options, PipelineOptions::default());
    }
}
