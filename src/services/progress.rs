//! 进度事件广播
//!
//! 没有订阅者时发送失败是正常情况，直接忽略。

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// 进度阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Started,
    Waiting,
    Extracting,
    Extracted,
    Categorizing,
    Categorized,
    Rewritten,
    ProcessingMedia,
    MediaProcessed,
    DraftCreated,
    ArtifactWritten,
    UrlFailed,
    Completed,
    Cancelled,
    Failed,
}

/// 进度事件
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: String,
    pub stage: ProgressStage,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// 进度广播器
#[derive(Clone)]
pub struct ProgressEmitter {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, job_id: &str, stage: ProgressStage, message: impl Into<String>) {
        let event = ProgressEvent {
            job_id: job_id.to_string(),
            stage,
            message: message.into(),
            at: Utc::now(),
        };
        if self.sender.send(event).is_err() {
            debug!("[任务 {}] 没有进度订阅者", job_id);
        }
    }
}

impl Default for ProgressEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
