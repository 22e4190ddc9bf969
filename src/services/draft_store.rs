//! 草稿存储能力

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::Draft;

/// 草稿存储
#[async_trait]
pub trait DraftStore: Send + Sync {
    /// 保存草稿，返回草稿 ID
    async fn create(&self, draft: &Draft) -> Result<String, ServiceError>;

    /// 删除过期草稿，返回删除数量
    async fn delete_expired(&self) -> Result<usize, ServiceError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DraftHeader {
    created_at: DateTime<Utc>,
}

/// 每个草稿一个 JSON 文件
pub struct FileDraftStore {
    dir: PathBuf,
    retention: Duration,
}

impl FileDraftStore {
    pub fn new(dir: impl Into<PathBuf>, retention_secs: i64) -> Self {
        Self {
            dir: dir.into(),
            retention: Duration::seconds(retention_secs),
        }
    }

    /// 删除 `now - retention` 之前创建的草稿
    pub async fn delete_older_than(&self, now: DateTime<Utc>) -> Result<usize, ServiceError> {
        if !tokio::fs::try_exists(&self.dir).await? {
            return Ok(0);
        }

        let cutoff = now - self.retention;
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<DraftHeader>(&content) {
                Ok(header) if header.created_at < cutoff => {
                    tokio::fs::remove_file(&path).await?;
                    debug!("删除过期草稿: {}", path.display());
                    removed += 1;
                }
                Ok(_) => {}
                Err(e) => warn!("⚠️ 无法读取草稿 {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl DraftStore for FileDraftStore {
    async fn create(&self, draft: &Draft) -> Result<String, ServiceError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let draft_id = format!("draft-{}", Uuid::new_v4());
        let path = self.dir.join(format!("{}.json", draft_id));
        tokio::fs::write(&path, serde_json::to_vec_pretty(draft)?).await?;
        Ok(draft_id)
    }

    async fn delete_expired(&self) -> Result<usize, ServiceError> {
        self.delete_older_than(Utc::now()).await
    }
}
